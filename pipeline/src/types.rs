//! Records shared by the pipeline components and the store.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chess_core::{GameResult, Move};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PipelineError, Result};

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique identifier such as `session-1718000000123-4`.
pub fn next_id(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{millis}-{n}")
}

// ============================================================================
// Training data
// ============================================================================

/// One labelled position produced by self-play.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub encoding: Vec<f32>,
    /// Visit-count distribution over the legal moves, in move order
    pub policy: Vec<(Move, f32)>,
    /// Final outcome from the side to move: -1, 0 or 1
    pub value: f32,
    pub fen: String,
    pub session_id: String,
    /// Sequential index across the session's batch
    pub move_index: u32,
    /// Ply within its own game
    pub ply: u32,
}

/// Optimizer settings for one training run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingConfig {
    pub epochs: u32,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub value_weight: f32,
    /// Retries for a batch that fails with a transient predictor error
    pub max_retries: u32,
}

/// Accepted learning rates, at every entry point.
pub const LEARNING_RATE_RANGE: RangeInclusive<f32> = 0.0001..=0.1;

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 64,
            learning_rate: 0.001,
            value_weight: 1.0,
            max_retries: 2,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::Validation(
                "batch_size must be positive".into(),
            ));
        }
        if !LEARNING_RATE_RANGE.contains(&self.learning_rate) {
            return Err(PipelineError::Validation(format!(
                "learning_rate must be between {} and {}, got {}",
                LEARNING_RATE_RANGE.start(),
                LEARNING_RATE_RANGE.end(),
                self.learning_rate
            )));
        }
        if !self.value_weight.is_finite() || self.value_weight < 0.0 {
            return Err(PipelineError::Validation(format!(
                "value_weight must be non-negative, got {}",
                self.value_weight
            )));
        }
        Ok(())
    }
}

/// Mean losses of one epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: u32,
    pub total_loss: f32,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub duration_secs: f64,
    pub device: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// A training run and its per-epoch metrics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrainingSession {
    pub id: String,
    pub config: TrainingConfig,
    pub status: SessionStatus,
    pub epochs: Vec<EpochMetrics>,
    pub positions: usize,
    pub model: Option<ModelId>,
    pub error: Option<String>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
}

// ============================================================================
// Evaluation
// ============================================================================

/// Result of one game from the challenger's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Win,
    Loss,
    Draw,
}

/// One evaluation game.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRecord {
    pub index: u32,
    pub challenger_white: bool,
    pub result: GameResult,
    pub plies: u32,
    pub reason: String,
}

impl GameRecord {
    pub fn outcome(&self) -> MatchOutcome {
        match self.result.winner() {
            None => MatchOutcome::Draw,
            Some(color) if color.is_white() == self.challenger_white => MatchOutcome::Win,
            Some(_) => MatchOutcome::Loss,
        }
    }
}

impl Serialize for GameRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("GameRecord", 6)?;
        s.serialize_field("index", &self.index)?;
        s.serialize_field("challenger_white", &self.challenger_white)?;
        s.serialize_field("result", self.result.as_str())?;
        s.serialize_field("outcome", &self.outcome())?;
        s.serialize_field("plies", &self.plies)?;
        s.serialize_field("reason", &self.reason)?;
        s.end()
    }
}

/// A head-to-head match between a challenger and the champion.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EvaluationResult {
    pub id: String,
    pub challenger: ModelId,
    pub champion: ModelId,
    pub games: Vec<GameRecord>,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub win_rate: f64,
    pub threshold: f64,
    pub promoted: bool,
    /// Started by the training pipeline rather than on request
    pub automatic: bool,
    pub timestamp: u64,
}

// ============================================================================
// Models
// ============================================================================

/// `{family}_v{version}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId {
    pub family: String,
    pub version: u32,
}

impl ModelId {
    pub fn new(family: impl Into<String>, version: u32) -> Self {
        Self {
            family: family.into(),
            version,
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_v{}", self.family, self.version)
    }
}

impl FromStr for ModelId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PipelineError::Validation(format!("invalid model id '{s}'"));
        let (family, version) = s.rsplit_once("_v").ok_or_else(invalid)?;
        if family.is_empty() {
            return Err(invalid());
        }
        let version = version.parse().map_err(|_| invalid())?;
        Ok(Self::new(family, version))
    }
}

impl Serialize for ModelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Provenance of a model version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    pub training_date: u64,
    pub session_id: Option<String>,
    pub positions: usize,
    pub epochs: u32,
    pub final_loss: Option<f32>,
    pub win_rate: Option<f64>,
    pub device: String,
}

/// A registered snapshot. The weight blob lives in the store.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelVersion {
    pub id: ModelId,
    pub metadata: ModelMetadata,
    pub created_at: u64,
}

/// The model currently used for play.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActivePointer {
    pub model: ModelId,
    pub promoted_at: u64,
    pub win_rate: f64,
    pub previous: Option<ModelId>,
    pub manual: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PromotionEntry {
    pub model: ModelId,
    pub previous: Option<ModelId>,
    pub win_rate: f64,
    pub manual: bool,
    pub timestamp: u64,
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Training,
    Evaluation,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Training => "training",
            JobKind::Evaluation => "evaluation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "training" => Some(JobKind::Training),
            "evaluation" => Some(JobKind::Evaluation),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(JobState::Idle),
            "running" => Some(JobState::Running),
            "completed" => Some(JobState::Completed),
            "cancelled" => Some(JobState::Cancelled),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

/// Snapshot of a job slot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobStatus {
    /// None while the slot has never run a job
    pub id: Option<String>,
    pub kind: JobKind,
    pub state: JobState,
    /// 0-100
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

impl JobStatus {
    pub fn idle(kind: JobKind) -> Self {
        Self {
            id: None,
            kind,
            state: JobState::Idle,
            progress: 0,
            message: String::new(),
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_display_and_parse() {
        let id = ModelId::new("zerochess", 12);
        assert_eq!(id.to_string(), "zerochess_v12");
        assert_eq!("zerochess_v12".parse::<ModelId>().unwrap(), id);
        // family names may themselves contain "_v"
        let nested: ModelId = "blitz_variant_v3".parse().unwrap();
        assert_eq!(nested.family, "blitz_variant");
        assert_eq!(nested.version, 3);

        assert!("zerochess".parse::<ModelId>().is_err());
        assert!("_v3".parse::<ModelId>().is_err());
        assert!("zerochess_vx".parse::<ModelId>().is_err());
    }

    #[test]
    fn test_model_id_serde() {
        let id = ModelId::new("zerochess", 2);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"zerochess_v2\"");
        assert_eq!(serde_json::from_str::<ModelId>(&json).unwrap(), id);
    }

    #[test]
    fn test_game_record_outcome() {
        let mut record = GameRecord {
            index: 0,
            challenger_white: true,
            result: GameResult::WhiteWins,
            plies: 40,
            reason: "checkmate".into(),
        };
        assert_eq!(record.outcome(), MatchOutcome::Win);
        record.challenger_white = false;
        assert_eq!(record.outcome(), MatchOutcome::Loss);
        record.result = GameResult::Draw;
        assert_eq!(record.outcome(), MatchOutcome::Draw);
    }

    #[test]
    fn test_training_config_validation() {
        assert!(TrainingConfig::default().validate().is_ok());

        let bad = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        assert!(matches!(bad.validate(), Err(PipelineError::Validation(_))));

        for learning_rate in [f32::NAN, 0.0, 0.00005, 0.2, 50.0] {
            let bad = TrainingConfig {
                learning_rate,
                ..TrainingConfig::default()
            };
            assert!(
                matches!(bad.validate(), Err(PipelineError::Validation(_))),
                "learning rate {learning_rate}"
            );
        }
        for learning_rate in [0.0001, 0.01, 0.1] {
            let ok = TrainingConfig {
                learning_rate,
                ..TrainingConfig::default()
            };
            assert!(ok.validate().is_ok(), "learning rate {learning_rate}");
        }
    }

    #[test]
    fn test_next_id_is_unique() {
        let a = next_id("job");
        let b = next_id("job");
        assert_ne!(a, b);
        assert!(a.starts_with("job-"));
    }

    #[test]
    fn test_job_state_strings() {
        for state in [
            JobState::Idle,
            JobState::Running,
            JobState::Completed,
            JobState::Cancelled,
            JobState::Failed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }
}
