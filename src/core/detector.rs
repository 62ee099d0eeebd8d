use crate::common::config::{CoordinateUnits, DetectorConfig, OutputLayout, PerformanceConfig};
use crate::common::{LivenessError, Result};
use crate::core::geometry::{BoundingBox, Detection};
use crate::core::orientation::ProfileClassifier;
use ort::{Environment, Session, SessionBuilder, Value, GraphOptimizationLevel};
use std::path::Path;
use std::sync::Arc;
use image::{DynamicImage, GrayImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

const MAX_DETECTIONS: usize = 5;

/// Single-class YOLOv8-style box detector backed by an ONNX model.
///
/// The same type serves as the frontal face locator in front of the landmark
/// model and as the left-profile classifier used for orientation.
pub struct YoloDetector {
    session: Session,
    _environment: Arc<Environment>,
    config: DetectorConfig,
}

impl YoloDetector {
    pub fn new(
        name: &str,
        model_path: &Path,
        config: &DetectorConfig,
        performance: &PerformanceConfig,
    ) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name(name)
                .build()
                .map_err(|e| LivenessError::Model(format!("Failed to create environment: {}", e)))?
        );

        if !model_path.exists() {
            return Err(LivenessError::Model(
                format!("Detector model not found at: {:?}", model_path)
            ));
        }

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(optimization_level(performance))?
            .with_model_from_file(model_path)?;

        tracing::info!("Loaded {} model from {:?}", name, model_path);

        Ok(Self {
            session,
            _environment: environment,
            config: config.clone(),
        })
    }

    /// Detections in the pixel space of `image`, best first.
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let img_array = if image.width() == self.config.input_width
            && image.height() == self.config.input_height {
            image_to_array(image)
        } else {
            let resized = image.resize_exact(
                self.config.input_width,
                self.config.input_height,
                FilterType::Nearest
            );
            image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let output = outputs
            .first()
            .ok_or_else(|| LivenessError::Model("Detector produced no outputs".into()))?
            .try_extract::<f32>()?
            .view()
            .to_owned();
        let shape = output.shape().to_vec();
        let data: Vec<f32> = output.iter().copied().collect();

        let scale_x = orig_width / self.config.input_width as f32;
        let scale_y = orig_height / self.config.input_height as f32;

        let detections = decode_predictions(&data, &shape, &self.config)?
            .into_iter()
            .map(|d| Detection {
                bbox: d.bbox.scale(scale_x, scale_y).clamp(orig_width, orig_height),
                confidence: d.confidence,
            })
            .collect();

        Ok(detections)
    }
}

impl ProfileClassifier for YoloDetector {
    fn detect_profiles(&self, gray: &GrayImage) -> Result<Vec<Detection>> {
        self.detect(&DynamicImage::ImageLuma8(gray.clone()))
    }
}

pub(crate) fn optimization_level(performance: &PerformanceConfig) -> GraphOptimizationLevel {
    match performance.optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}

/// NCHW float tensor in [0, 1]. Grayscale input is replicated across channels.
pub(crate) fn image_to_array(img: &DynamicImage) -> Array4<f32> {
    let rgb = img.to_rgb8();
    let width = rgb.width() as usize;
    let height = rgb.height() as usize;
    let mut array = Array4::<f32>::zeros((1, 3, height, width));

    let norm_factor = 1.0 / 255.0;
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        array[[0, 0, y, x]] = pixel[0] as f32 * norm_factor;
        array[[0, 1, y, x]] = pixel[1] as f32 * norm_factor;
        array[[0, 2, y, x]] = pixel[2] as f32 * norm_factor;
    }

    array
}

/// Turns a raw prediction tensor into boxes in model-input pixel space.
///
/// Layout and coordinate units come from `config`; nothing is inferred from
/// the values themselves.
pub fn decode_predictions(data: &[f32], shape: &[usize], config: &DetectorConfig) -> Result<Vec<Detection>> {
    let (num_predictions, attributes) = match (config.layout, shape) {
        (OutputLayout::AttributesFirst, [1, attrs, anchors]) => (*anchors, *attrs),
        (OutputLayout::AnchorsFirst, [1, anchors, attrs]) => (*anchors, *attrs),
        _ => {
            return Err(LivenessError::Model(format!(
                "Unexpected detector output shape {:?} for layout {:?}", shape, config.layout
            )));
        }
    };

    if attributes < 5 {
        return Err(LivenessError::Model(format!(
            "Detector output has {} attributes per prediction, expected at least 5", attributes
        )));
    }
    if data.len() < num_predictions * attributes {
        return Err(LivenessError::Model(format!(
            "Detector output holds {} values, shape {:?} needs {}",
            data.len(), shape, num_predictions * attributes
        )));
    }

    let at = |prediction: usize, attribute: usize| -> f32 {
        match config.layout {
            OutputLayout::AttributesFirst => data[attribute * num_predictions + prediction],
            OutputLayout::AnchorsFirst => data[prediction * attributes + attribute],
        }
    };

    let (unit_x, unit_y) = match config.coordinates {
        CoordinateUnits::Pixels => (1.0, 1.0),
        CoordinateUnits::Normalized => (config.input_width as f32, config.input_height as f32),
    };
    let input_width = config.input_width as f32;
    let input_height = config.input_height as f32;

    let mut candidates = Vec::new();
    for i in 0..num_predictions {
        let confidence = (4..attributes)
            .map(|a| at(i, a))
            .fold(f32::MIN, f32::max);

        // Skip empty anchors before doing any geometry
        if confidence <= 0.001 {
            continue;
        }

        let bbox = BoundingBox::from_center(
            at(i, 0) * unit_x,
            at(i, 1) * unit_y,
            at(i, 2) * unit_x,
            at(i, 3) * unit_y,
        )
        .clamp(input_width, input_height);

        if bbox.width() > config.min_box_size && bbox.height() > config.min_box_size {
            candidates.push(Detection { bbox, confidence });
        }
    }

    // NMS first on everything, then the real confidence cut
    let mut detections = apply_nms(candidates, config.iou_threshold);
    detections.retain(|d| d.confidence >= config.confidence);
    detections.truncate(MAX_DETECTIONS);

    Ok(detections)
}

/// Greedy non-maximum suppression; output is sorted by confidence.
pub fn apply_nms(mut boxes: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| kept.bbox.iou(&candidate.bbox) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
