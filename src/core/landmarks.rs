use crate::common::config::{Config, LandmarkConfig};
use crate::common::{resolve_model_path, LivenessError, Result};
use crate::core::detector::{image_to_array, optimization_level, YoloDetector};
use crate::core::geometry::{BoundingBox, Point};
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};
use ort::{Environment, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;

/// Face-mesh indices of the six eye contour points, ordered
/// `[outer, top1, top2, inner, bottom1, bottom2]` so that `top1` sits above
/// `bottom2` and `top2` above `bottom1`.
pub const LEFT_EYE_INDICES: [usize; 6] = [33, 160, 158, 133, 153, 144];
pub const RIGHT_EYE_INDICES: [usize; 6] = [362, 385, 387, 263, 373, 380];

const MESH_POINTS: usize = 468;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLandmarks {
    pub left: [Point; 6],
    pub right: [Point; 6],
}

/// Locates the eye contours of the single most prominent face in a frame.
pub trait LandmarkDetector: Send + Sync {
    /// `Ok(None)` means no face was found.
    fn detect_eyes(&self, frame: &DynamicImage) -> Result<Option<EyeLandmarks>>;
}

/// Face box from the YOLO detector, then a face-mesh model on the crop.
pub struct OnnxLandmarker {
    face_detector: YoloDetector,
    session: Session,
    _environment: Arc<Environment>,
    config: LandmarkConfig,
}

impl OnnxLandmarker {
    pub fn new(config: &Config, models_base: &Path) -> Result<Self> {
        let face_detector = YoloDetector::new(
            "face_detector",
            &resolve_model_path(&config.models.face_detector_path, models_base),
            &config.face_detector,
            &config.performance,
        )?;

        let model_path = resolve_model_path(&config.models.landmark_path, models_base);
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_landmarks")
                .build()
                .map_err(|e| LivenessError::Model(format!("Failed to create environment: {}", e)))?
        );

        if !model_path.exists() {
            return Err(LivenessError::Model(
                format!("Landmark model not found at: {:?}", model_path)
            ));
        }

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(optimization_level(&config.performance))?
            .with_model_from_file(&model_path)?;

        tracing::info!("Loaded landmark model from {:?}", model_path);

        Ok(Self {
            face_detector,
            session,
            _environment: environment,
            config: config.landmarks.clone(),
        })
    }

    fn run_mesh(&self, crop: &DynamicImage) -> Result<(Vec<f32>, Option<f32>)> {
        let size = self.config.input_size;
        let resized = crop.resize_exact(size, size, FilterType::Triangle);
        let array: Array4<f32> = if self.config.channels_last {
            image_to_array(&resized).permuted_axes([0, 2, 3, 1]).as_standard_layout().to_owned()
        } else {
            image_to_array(&resized)
        };

        let cow_array = CowArray::from(array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mesh: Vec<f32> = outputs
            .first()
            .ok_or_else(|| LivenessError::Landmarks("Landmark model produced no outputs".into()))?
            .try_extract::<f32>()?
            .view()
            .iter()
            .copied()
            .collect();

        let face_score = match outputs.get(1) {
            Some(value) => value.try_extract::<f32>()?.view().iter().next().copied().map(sigmoid),
            None => None,
        };

        Ok((mesh, face_score))
    }
}

impl LandmarkDetector for OnnxLandmarker {
    fn detect_eyes(&self, frame: &DynamicImage) -> Result<Option<EyeLandmarks>> {
        let faces = self.face_detector.detect(frame)?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };

        let crop = face
            .bbox
            .expand(self.config.crop_margin)
            .clamp(frame.width() as f32, frame.height() as f32);
        let (x, y) = (crop.x0.floor() as u32, crop.y0.floor() as u32);
        let (w, h) = (crop.width().round() as u32, crop.height().round() as u32);
        if w == 0 || h == 0 {
            return Ok(None);
        }

        let crop_image = frame.crop_imm(x, y, w, h);
        let (mesh, face_score) = self.run_mesh(&crop_image)?;

        if let Some(score) = face_score {
            if score < self.config.min_face_score {
                tracing::debug!("Landmark face score {:.3} below {:.3}", score, self.config.min_face_score);
                return Ok(None);
            }
        }

        let placed = BoundingBox::new(x as f32, y as f32, (x + w) as f32, (y + h) as f32);
        eyes_from_mesh(&mesh, placed, self.config.input_size).map(Some)
    }
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Picks the eye contours out of a flat face mesh and maps them from
/// model-input pixels into frame pixels inside `crop`.
///
/// The mesh is `MESH_POINTS` points of two or three values each.
pub fn eyes_from_mesh(mesh: &[f32], crop: BoundingBox, input_size: u32) -> Result<EyeLandmarks> {
    let stride = match mesh.len() / MESH_POINTS {
        2 => 2,
        s if s >= 3 => 3,
        _ => {
            return Err(LivenessError::Landmarks(format!(
                "Face mesh has {} values, expected {} points", mesh.len(), MESH_POINTS
            )));
        }
    };

    let sx = crop.width() / input_size as f32;
    let sy = crop.height() / input_size as f32;
    let point = |index: usize| -> Point {
        let base = index * stride;
        Point::new(crop.x0 + mesh[base] * sx, crop.y0 + mesh[base + 1] * sy)
    };

    Ok(EyeLandmarks {
        left: LEFT_EYE_INDICES.map(&point),
        right: RIGHT_EYE_INDICES.map(&point),
    })
}
