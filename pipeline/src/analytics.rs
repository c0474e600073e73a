//! Read-only summaries over the store.

use serde::Serialize;

use crate::error::Result;
use crate::storage::Store;
use crate::types::{
    ActivePointer, EvaluationResult, ModelId, PromotionEntry, SessionStatus, TrainingSession,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub status: SessionStatus,
    pub epochs: usize,
    pub positions: usize,
    /// Mean total loss over the recorded epochs
    pub average_loss: Option<f32>,
    pub final_loss: Option<f32>,
    pub device: Option<String>,
    pub model: Option<ModelId>,
    pub started_at: u64,
}

impl From<&TrainingSession> for SessionSummary {
    fn from(session: &TrainingSession) -> Self {
        let average_loss = if session.epochs.is_empty() {
            None
        } else {
            let sum: f32 = session.epochs.iter().map(|e| e.total_loss).sum();
            Some(sum / session.epochs.len() as f32)
        };
        Self {
            id: session.id.clone(),
            status: session.status,
            epochs: session.epochs.len(),
            positions: session.positions,
            average_loss,
            final_loss: session.epochs.last().map(|e| e.total_loss),
            device: session.epochs.last().map(|e| e.device.clone()),
            model: session.model.clone(),
            started_at: session.started_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrainingSummary {
    pub total_sessions: usize,
    pub total_epochs: usize,
    pub total_positions: usize,
    /// Newest first
    pub recent: Vec<SessionSummary>,
}

pub fn training_summary(store: &dyn Store, limit: usize) -> Result<TrainingSummary> {
    let recent = store.list_sessions(limit)?;
    Ok(TrainingSummary {
        total_sessions: store.count_sessions()?,
        total_epochs: store.count_epochs()?,
        total_positions: store.count_examples(None)?,
        recent: recent.iter().map(SessionSummary::from).collect(),
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WinRatePoint {
    pub challenger: ModelId,
    pub champion: ModelId,
    pub win_rate: f64,
    pub promoted: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EvaluationSummary {
    pub total_evaluations: usize,
    pub promotions: usize,
    /// Newest first
    pub recent: Vec<EvaluationResult>,
    /// Oldest to newest over the recent window
    pub win_rate_progression: Vec<WinRatePoint>,
}

pub fn evaluation_summary(store: &dyn Store, limit: usize) -> Result<EvaluationSummary> {
    let recent = store.list_evaluations(limit)?;
    let win_rate_progression = recent
        .iter()
        .rev()
        .map(|e| WinRatePoint {
            challenger: e.challenger.clone(),
            champion: e.champion.clone(),
            win_rate: e.win_rate,
            promoted: e.promoted,
            timestamp: e.timestamp,
        })
        .collect();
    Ok(EvaluationSummary {
        total_evaluations: store.count_evaluations()?,
        promotions: recent.iter().filter(|e| e.promoted).count(),
        recent,
        win_rate_progression,
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelHistory {
    pub active: Option<ActivePointer>,
    pub total_versions: usize,
    /// Newest first
    pub promotions: Vec<PromotionEntry>,
}

pub fn model_history(store: &dyn Store, limit: usize) -> Result<ModelHistory> {
    Ok(ModelHistory {
        active: store.get_active()?,
        total_versions: store.list_models(None)?.len(),
        promotions: store.promotion_history(limit)?,
    })
}
