//! Liveness challenges: issuance, HMAC signing, expiry and the pass/fail decision.
//!
//! A challenge is a signed token listing the tasks the user must perform.
//! The manager keeps every live challenge in one table behind a mutex; each
//! public operation takes the lock once, so two verifications of the same id
//! cannot both pass or both purge it.
//!
//! The signature only proves the token was issued here and not edited. It
//! says nothing about whether the submitted frames are genuine.

use crate::common::config::ChallengeConfig;
use crate::common::{LivenessError, Result};
use crate::core::orientation::Orientation;
use crate::core::session::SessionStats;
use hmac::{Hmac, Mac};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

type HmacSha256 = Hmac<Sha256>;

const ID_BYTES: usize = 16;
const NONCE_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Blink,
    TurnLeft,
    TurnRight,
}

pub const ALL_TASKS: [Task; 3] = [Task::Blink, Task::TurnLeft, Task::TurnRight];

impl Task {
    /// Wire name, also used in the signed message.
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Blink => "blink",
            Task::TurnLeft => "turn_left",
            Task::TurnRight => "turn_right",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Task::Blink => "blink",
            Task::TurnLeft => "turn left",
            Task::TurnRight => "turn right",
        }
    }

    pub fn question(&self) -> &'static str {
        match self {
            Task::Blink => "blink eyes",
            Task::TurnLeft => "turn face left",
            Task::TurnRight => "turn face right",
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            Task::Blink => "Blink your eyes once",
            Task::TurnLeft => "Turn your face to the left",
            Task::TurnRight => "Turn your face to the right",
        }
    }

    /// Satisfied if the evidence appears anywhere in the sequence.
    pub fn is_satisfied_by(&self, stats: &SessionStats) -> bool {
        match self {
            Task::Blink => stats.new_blinks >= 1,
            Task::TurnLeft => stats.saw(Orientation::Left),
            Task::TurnRight => stats.saw(Orientation::Right),
        }
    }

    fn failure_reason(&self) -> &'static str {
        match self {
            Task::Blink => "no blink detected",
            Task::TurnLeft | Task::TurnRight => "not detected",
        }
    }
}

impl std::str::FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "blink" => Ok(Task::Blink),
            "turn_left" | "left" => Ok(Task::TurnLeft),
            "turn_right" | "right" => Ok(Task::TurnRight),
            other => Err(format!("unknown task '{}' (expected blink, turn_left or turn_right)", other)),
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pass,
    Fail,
    Pending,
    Expired,
    Invalid,
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChallengeStatus::Pass => "pass",
            ChallengeStatus::Fail => "fail",
            ChallengeStatus::Pending => "pending",
            ChallengeStatus::Expired => "expired",
            ChallengeStatus::Invalid => "invalid",
        })
    }
}

/// The signed token. Clients receive it whole and may send it back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub tasks: Vec<Task>,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds.
    pub expires_at: u64,
    pub nonce: String,
    /// Hex HMAC-SHA256 of [`Challenge::canonical_message`].
    pub signature: String,
    pub status: ChallengeStatus,
}

impl Challenge {
    /// `id:task,task:created_at:nonce`
    pub fn canonical_message(&self) -> String {
        let tasks: Vec<&str> = self.tasks.iter().map(Task::as_str).collect();
        format!("{}:{}:{}:{}", self.id, tasks.join(","), self.created_at, self.nonce)
    }

    pub fn is_expired_at(&self, now_millis: u64) -> bool {
        now_millis > self.expires_at
    }

    pub fn instructions(&self) -> Vec<&'static str> {
        self.tasks.iter().map(Task::instruction).collect()
    }
}

/// Source of Unix-millisecond timestamps for tokens. Readings must never
/// decrease.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall-clock time sampled once at construction, then advanced by a
/// monotonic `Instant`. Steps of the system clock after startup do not move
/// expiry.
#[derive(Debug)]
pub struct SystemClock {
    base_millis: u64,
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            base_millis: chrono::Utc::now().timestamp_millis().max(0) as u64,
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.base_millis.saturating_add(duration_millis(self.started.elapsed()))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Clock that only moves when told to. For tests and replay tools.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self { now: AtomicU64::new(start_millis) }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Why a challenge could not be used. Only [`Rejection::status`] and
/// [`Rejection::public_message`] should reach the caller; unknown ids and bad
/// signatures deliberately look the same from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotFound,
    Expired,
    SignatureMismatch,
}

impl Rejection {
    pub fn status(&self) -> ChallengeStatus {
        match self {
            Rejection::Expired => ChallengeStatus::Expired,
            Rejection::NotFound | Rejection::SignatureMismatch => ChallengeStatus::Invalid,
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self {
            Rejection::Expired => "Challenge expired. Please generate a new challenge.",
            Rejection::NotFound | Rejection::SignatureMismatch => {
                "Challenge not found or invalid. Please generate a new challenge."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: ChallengeStatus,
    pub message: String,
    pub satisfied: Vec<Task>,
    pub unsatisfied: Vec<Task>,
}

impl Verdict {
    fn rejected(rejection: Rejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.public_message().to_string(),
            satisfied: Vec::new(),
            unsatisfied: Vec::new(),
        }
    }
}

pub struct ChallengeManager {
    secret: Vec<u8>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    active: Mutex<HashMap<String, Challenge>>,
}

impl ChallengeManager {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self::with_clock(secret, ttl, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(secret: impl Into<Vec<u8>>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let manager = Self {
            secret: secret.into(),
            ttl,
            clock,
            active: Mutex::new(HashMap::new()),
        };
        tracing::info!("Challenge manager initialized (ttl: {}s)", ttl.as_secs());
        manager
    }

    pub fn from_config(config: &ChallengeConfig) -> Self {
        Self::new(config.secret_key.as_bytes(), Duration::from_secs(config.ttl_seconds))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a challenge of `task_count` distinct random tasks. Counts above
    /// the number of task kinds are clamped.
    pub fn generate(&self, task_count: usize) -> Result<Challenge> {
        if task_count == 0 {
            return Err(LivenessError::InvalidTaskCount(task_count));
        }

        let mut tasks = ALL_TASKS.to_vec();
        tasks.shuffle(&mut rand::thread_rng());
        tasks.truncate(task_count.min(ALL_TASKS.len()));

        self.generate_with_tasks(tasks)
    }

    /// Issues `count` challenges of `task_count` tasks each.
    ///
    /// Unless `allow_repeats` is set, tasks are dealt from a shuffled deck of
    /// all kinds, so no kind repeats across the batch until every kind has
    /// been used once. Each challenge still holds distinct tasks.
    pub fn generate_many(&self, count: usize, task_count: usize, allow_repeats: bool) -> Result<Vec<Challenge>> {
        if task_count == 0 {
            return Err(LivenessError::InvalidTaskCount(task_count));
        }
        if allow_repeats {
            return (0..count).map(|_| self.generate(task_count)).collect();
        }

        let per_challenge = task_count.min(ALL_TASKS.len());
        let mut rng = rand::thread_rng();
        let mut deck: Vec<Task> = Vec::new();
        let mut challenges = Vec::with_capacity(count);

        for _ in 0..count {
            let mut tasks = Vec::with_capacity(per_challenge);
            while tasks.len() < per_challenge {
                if deck.is_empty() {
                    deck = ALL_TASKS.to_vec();
                    deck.shuffle(&mut rng);
                }
                if let Some(task) = deck.pop() {
                    if !tasks.contains(&task) {
                        tasks.push(task);
                    }
                }
            }
            challenges.push(self.generate_with_tasks(tasks)?);
        }

        Ok(challenges)
    }

    /// Issues a challenge for exactly these tasks.
    pub fn generate_with_tasks(&self, tasks: Vec<Task>) -> Result<Challenge> {
        if tasks.is_empty() {
            return Err(LivenessError::InvalidTaskCount(0));
        }

        let mut table = self.table();

        let mut id = random_hex(ID_BYTES);
        while table.contains_key(&id) {
            id = random_hex(ID_BYTES);
        }

        let created_at = self.clock.now_millis();
        let mut challenge = Challenge {
            id,
            tasks,
            created_at,
            expires_at: created_at.saturating_add(duration_millis(self.ttl)),
            nonce: random_hex(NONCE_BYTES),
            signature: String::new(),
            status: ChallengeStatus::Pending,
        };
        challenge.signature = self.sign(&challenge.canonical_message())?;

        let tasks: Vec<&str> = challenge.tasks.iter().map(Task::as_str).collect();
        tracing::info!("Generated challenge {} with tasks [{}]", challenge.id, tasks.join(", "));

        table.insert(challenge.id.clone(), challenge.clone());
        Ok(challenge)
    }

    /// Returns the live challenge for `id` if it exists, has not expired and
    /// its stored signature still verifies. Expired challenges are purged.
    pub fn lookup(&self, id: &str) -> std::result::Result<Challenge, Rejection> {
        let mut table = self.table();
        self.check(&mut table, id, None)
    }

    /// Like [`ChallengeManager::lookup`], for a token handed back by a client.
    /// Any field edited since issuance makes the token invalid.
    pub fn lookup_token(&self, token: &Challenge) -> std::result::Result<Challenge, Rejection> {
        let mut table = self.table();
        self.check(&mut table, &token.id, Some(token))
    }

    /// Decides the challenge `id` against `stats`.
    ///
    /// PASS removes the challenge. FAIL keeps it so the caller can retry
    /// with new frames until it expires.
    pub fn evaluate(&self, id: &str, stats: &SessionStats) -> Verdict {
        self.decide(id, None, stats)
    }

    pub fn evaluate_token(&self, token: &Challenge, stats: &SessionStats) -> Verdict {
        self.decide(&token.id, Some(token), stats)
    }

    /// Drops every expired challenge and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, challenge| !challenge.is_expired_at(now));
        let removed = before - table.len();

        if removed > 0 {
            tracing::info!("Cleaned up {} expired challenges", removed);
        }
        removed
    }

    pub fn active_count(&self) -> usize {
        self.table().len()
    }

    fn decide(&self, id: &str, submitted: Option<&Challenge>, stats: &SessionStats) -> Verdict {
        let mut table = self.table();

        let challenge = match self.check(&mut table, id, submitted) {
            Ok(challenge) => challenge,
            Err(rejection) => return Verdict::rejected(rejection),
        };

        let (satisfied, unsatisfied): (Vec<Task>, Vec<Task>) =
            challenge.tasks.iter().partition(|task| task.is_satisfied_by(stats));

        for task in &satisfied {
            tracing::debug!("Challenge {}: {} satisfied", id, task);
        }

        if unsatisfied.is_empty() {
            table.remove(id);
            let message = format!("All challenges completed: {}", labels(&satisfied));
            tracing::info!("Challenge {} passed: {}", id, message);
            return Verdict { status: ChallengeStatus::Pass, message, satisfied, unsatisfied };
        }

        if let Some(stored) = table.get_mut(id) {
            stored.status = ChallengeStatus::Fail;
        }

        let completed = if satisfied.is_empty() { "none".to_string() } else { labels(&satisfied) };
        let failed: Vec<String> = unsatisfied
            .iter()
            .map(|task| format!("{} ({})", task.label(), task.failure_reason()))
            .collect();
        let message = format!("Completed: {}. Failed: {}", completed, failed.join(", "));
        tracing::warn!("Challenge {} failed: {}", id, message);

        Verdict { status: ChallengeStatus::Fail, message, satisfied, unsatisfied }
    }

    fn check(
        &self,
        table: &mut HashMap<String, Challenge>,
        id: &str,
        submitted: Option<&Challenge>,
    ) -> std::result::Result<Challenge, Rejection> {
        let Some(stored) = table.get(id) else {
            tracing::warn!("Challenge not found: {}", id);
            return Err(Rejection::NotFound);
        };

        if stored.is_expired_at(self.clock.now_millis()) {
            tracing::warn!("Challenge expired: {}", id);
            table.remove(id);
            return Err(Rejection::Expired);
        }

        if !self.verify(&stored.canonical_message(), &stored.signature) {
            tracing::warn!("Stored challenge signature invalid: {}", id);
            return Err(Rejection::SignatureMismatch);
        }

        if let Some(token) = submitted {
            let untouched = token.tasks == stored.tasks
                && token.created_at == stored.created_at
                && token.expires_at == stored.expires_at
                && token.nonce == stored.nonce;
            if !untouched || !self.verify(&token.canonical_message(), &token.signature) {
                tracing::warn!("Submitted challenge token does not verify: {}", id);
                return Err(Rejection::SignatureMismatch);
            }
        }

        Ok(stored.clone())
    }

    fn sign(&self, message: &str) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time comparison against the hex `signature`.
    fn verify(&self, message: &str, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(message.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| LivenessError::Signing(e.to_string()))
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Challenge>> {
        // A panic while holding the lock cannot leave a half-written entry
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn labels(tasks: &[Task]) -> String {
    tasks.iter().map(Task::label).collect::<Vec<_>>().join(", ")
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const START: u64 = 1_700_000_000_000;

    fn manager() -> (ChallengeManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let manager = ChallengeManager::with_clock("test-secret", Duration::from_secs(120), clock.clone());
        (manager, clock)
    }

    fn stats(new_blinks: u32, orientations: Vec<Option<Orientation>>) -> SessionStats {
        SessionStats { new_blinks, frame_count: orientations.len(), orientations, ..Default::default() }
    }

    #[test]
    fn generate_picks_distinct_tasks() {
        let (manager, _) = manager();
        for count in 1..=3 {
            let challenge = manager.generate(count).unwrap();
            let unique: HashSet<_> = challenge.tasks.iter().collect();
            assert_eq!(challenge.tasks.len(), count);
            assert_eq!(unique.len(), count);
            assert_eq!(challenge.status, ChallengeStatus::Pending);
        }
        assert_eq!(manager.active_count(), 3);
    }

    #[test]
    fn generate_clamps_and_rejects_zero() {
        let (manager, _) = manager();
        assert_eq!(manager.generate(10).unwrap().tasks.len(), 3);
        assert!(matches!(manager.generate(0), Err(LivenessError::InvalidTaskCount(0))));
        assert!(manager.generate_with_tasks(Vec::new()).is_err());
    }

    #[test]
    fn token_fields_and_signature_format() {
        let (manager, _) = manager();
        let a = manager.generate_with_tasks(vec![Task::Blink, Task::TurnLeft]).unwrap();
        let b = manager.generate(2).unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(a.nonce, b.nonce);
        assert_eq!(a.created_at, START);
        assert_eq!(a.expires_at, START + 120_000);
        assert_eq!(a.signature.len(), 64);
        assert_eq!(
            a.canonical_message(),
            format!("{}:blink,turn_left:{}:{}", a.id, START, a.nonce)
        );
    }

    #[test]
    fn lookup_lifecycle() {
        let (manager, clock) = manager();
        let challenge = manager.generate(2).unwrap();

        assert_eq!(manager.lookup(&challenge.id).unwrap().id, challenge.id);

        // Exactly at expiry is still valid
        clock.advance(Duration::from_secs(120));
        assert!(manager.lookup(&challenge.id).is_ok());

        clock.advance(Duration::from_millis(1));
        assert_eq!(manager.lookup(&challenge.id), Err(Rejection::Expired));
        // Expired challenges are purged
        assert_eq!(manager.lookup(&challenge.id), Err(Rejection::NotFound));
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn unknown_id_is_invalid() {
        let (manager, _) = manager();
        let verdict = manager.evaluate("nope", &stats(1, vec![]));
        assert_eq!(verdict.status, ChallengeStatus::Invalid);
    }

    #[test]
    fn tampered_tokens_are_invalid() {
        let (manager, _) = manager();
        let token = manager.generate_with_tasks(vec![Task::Blink, Task::TurnRight]).unwrap();
        assert!(manager.lookup_token(&token).is_ok());

        let mut edits: Vec<Challenge> = Vec::new();

        let mut t = token.clone();
        t.tasks = vec![Task::Blink];
        edits.push(t);

        let mut t = token.clone();
        t.created_at += 1;
        edits.push(t);

        let mut t = token.clone();
        t.expires_at += 60_000;
        edits.push(t);

        let mut t = token.clone();
        t.nonce = "00".repeat(16);
        edits.push(t);

        let mut t = token.clone();
        t.signature = "ab".repeat(32);
        edits.push(t);

        let mut t = token.clone();
        t.signature = "not hex".into();
        edits.push(t);

        for edited in &edits {
            assert_eq!(manager.lookup_token(edited), Err(Rejection::SignatureMismatch), "{:?}", edited);
            assert_eq!(
                manager.evaluate_token(edited, &stats(1, vec![Some(Orientation::Right)])).status,
                ChallengeStatus::Invalid
            );
        }

        let mut t = token.clone();
        t.id = "ff".repeat(16);
        assert_eq!(manager.lookup_token(&t), Err(Rejection::NotFound));

        // Untouched token still works after all the rejected attempts
        assert!(manager.lookup_token(&token).is_ok());
    }

    #[test]
    fn token_signed_with_other_key_is_invalid() {
        let (manager, clock) = manager();
        let other = ChallengeManager::with_clock("other-secret", Duration::from_secs(120), clock);
        let token = manager.generate(1).unwrap();

        let mut forged = token.clone();
        forged.signature = other.sign(&token.canonical_message()).unwrap();
        assert_eq!(manager.lookup_token(&forged), Err(Rejection::SignatureMismatch));
    }

    #[test]
    fn rejection_messages_do_not_leak_reason() {
        assert_eq!(Rejection::NotFound.public_message(), Rejection::SignatureMismatch.public_message());
        assert_eq!(Rejection::NotFound.status(), ChallengeStatus::Invalid);
        assert_eq!(Rejection::Expired.status(), ChallengeStatus::Expired);
    }

    #[test]
    fn all_tasks_must_be_satisfied() {
        let (manager, _) = manager();
        let challenge = manager.generate_with_tasks(vec![Task::Blink, Task::TurnLeft]).unwrap();

        let verdict = manager.evaluate(&challenge.id, &stats(0, vec![Some(Orientation::Left)]));
        assert_eq!(verdict.status, ChallengeStatus::Fail);
        assert_eq!(verdict.unsatisfied, vec![Task::Blink]);
        assert_eq!(verdict.satisfied, vec![Task::TurnLeft]);
        assert_eq!(verdict.message, "Completed: turn left. Failed: blink (no blink detected)");

        // FAIL keeps the challenge for a retry
        assert_eq!(manager.lookup(&challenge.id).unwrap().status, ChallengeStatus::Fail);

        let verdict = manager.evaluate(
            &challenge.id,
            &stats(1, vec![Some(Orientation::Left), Some(Orientation::Left), None]),
        );
        assert_eq!(verdict.status, ChallengeStatus::Pass);
        assert_eq!(verdict.message, "All challenges completed: blink, turn left");
    }

    #[test]
    fn nothing_satisfied_reports_none() {
        let (manager, _) = manager();
        let challenge = manager.generate_with_tasks(vec![Task::TurnRight, Task::TurnLeft]).unwrap();
        let verdict = manager.evaluate(&challenge.id, &stats(3, vec![None, None]));

        assert_eq!(verdict.status, ChallengeStatus::Fail);
        assert_eq!(
            verdict.message,
            "Completed: none. Failed: turn right (not detected), turn left (not detected)"
        );
    }

    #[test]
    fn pass_is_single_use() {
        let (manager, _) = manager();
        let challenge = manager.generate_with_tasks(vec![Task::TurnRight]).unwrap();
        let evidence = stats(0, vec![None, Some(Orientation::Right)]);

        assert_eq!(manager.evaluate(&challenge.id, &evidence).status, ChallengeStatus::Pass);
        assert_eq!(manager.evaluate(&challenge.id, &evidence).status, ChallengeStatus::Invalid);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn evaluate_after_ttl_is_expired() {
        let (manager, clock) = manager();
        let challenge = manager.generate_with_tasks(vec![Task::Blink]).unwrap();
        clock.advance(Duration::from_secs(121));

        let verdict = manager.evaluate(&challenge.id, &stats(1, vec![]));
        assert_eq!(verdict.status, ChallengeStatus::Expired);
        assert_eq!(manager.evaluate(&challenge.id, &stats(1, vec![])).status, ChallengeStatus::Invalid);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let (manager, clock) = manager();
        manager.generate(1).unwrap();
        manager.generate(1).unwrap();
        clock.advance(Duration::from_secs(100));
        let fresh = manager.generate(1).unwrap();
        clock.advance(Duration::from_secs(30));

        assert_eq!(manager.sweep(), 2);
        assert_eq!(manager.active_count(), 1);
        assert!(manager.lookup(&fresh.id).is_ok());
        assert_eq!(manager.sweep(), 0);
    }

    #[test]
    fn concurrent_evaluations_pass_once() {
        let (manager, _) = manager();
        let manager = Arc::new(manager);
        let challenge = manager.generate_with_tasks(vec![Task::Blink]).unwrap();
        let evidence = stats(1, vec![None]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let id = challenge.id.clone();
                let evidence = evidence.clone();
                std::thread::spawn(move || manager.evaluate(&id, &evidence).status)
            })
            .collect();

        let passes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|s| *s == ChallengeStatus::Pass)
            .count();
        assert_eq!(passes, 1);
    }

    #[test]
    fn token_round_trips_through_json() {
        let (manager, _) = manager();
        let token = manager.generate_with_tasks(vec![Task::TurnLeft, Task::Blink]).unwrap();

        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains(r#""tasks":["turn_left","blink"]"#));
        assert!(json.contains(r#""status":"pending""#));

        let back: Challenge = serde_json::from_str(&json).unwrap();
        assert!(manager.lookup_token(&back).is_ok());
    }

    #[test]
    fn tasks_parse_from_cli_names() {
        assert_eq!("turn-left".parse::<Task>(), Ok(Task::TurnLeft));
        assert_eq!("BLINK".parse::<Task>(), Ok(Task::Blink));
        assert_eq!("turn_right".parse::<Task>(), Ok(Task::TurnRight));
        assert!("nod".parse::<Task>().is_err());
    }

    #[test]
    fn system_clock_never_goes_backwards() {
        let clock = SystemClock::new();
        let wall = chrono::Utc::now().timestamp_millis() as u64;

        let mut last = clock.now_millis();
        assert!(last.abs_diff(wall) < 5_000);
        for _ in 0..1_000 {
            let now = clock.now_millis();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn huge_ttl_saturates_expiry() {
        let clock = Arc::new(ManualClock::new(START));
        let manager = ChallengeManager::with_clock("k", Duration::MAX, clock.clone());
        let challenge = manager.generate(1).unwrap();

        assert_eq!(challenge.expires_at, u64::MAX);
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert!(manager.lookup(&challenge.id).is_ok());
    }

    #[test]
    fn generate_many_deals_every_kind_before_repeating() {
        let (manager, _) = manager();

        let batch = manager.generate_many(3, 1, false).unwrap();
        let kinds: HashSet<Task> = batch.iter().map(|c| c.tasks[0]).collect();
        assert_eq!(kinds.len(), 3);

        let batch = manager.generate_many(6, 1, false).unwrap();
        for kind in ALL_TASKS {
            assert_eq!(batch.iter().filter(|c| c.tasks[0] == kind).count(), 2);
        }

        let batch = manager.generate_many(4, 2, false).unwrap();
        for challenge in &batch {
            assert_eq!(challenge.tasks.len(), 2);
            assert_ne!(challenge.tasks[0], challenge.tasks[1]);
        }

        assert_eq!(manager.generate_many(5, 3, true).unwrap().len(), 5);
        assert_eq!(manager.active_count(), 3 + 6 + 4 + 5);
        assert!(manager.generate_many(2, 0, false).is_err());
    }

    #[test]
    fn task_texts() {
        assert_eq!(Task::TurnLeft.question(), "turn face left");
        assert_eq!(Task::Blink.instruction(), "Blink your eyes once");
        assert_eq!(ChallengeStatus::Expired.to_string(), "expired");
    }
}
