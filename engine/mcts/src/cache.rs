//! Inference cache keyed by canonical position key.

use std::collections::HashMap;

use chess_core::{encode, Move, Position};
use predictor::{PolicyValuePredictor, Prediction, PredictorError};

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Memoizes predictor outputs. Entries are keyed by [`Position::key`], which
/// ignores move counters, so transpositions share an entry.
#[derive(Debug, Default)]
pub struct InferenceCache {
    entries: HashMap<String, Prediction>,
    current: CacheStats,
    lifetime: CacheStats,
}

impl InferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new search: reset per-search counters, and drop entries
    /// unless `keep_entries` is set.
    pub fn begin_search(&mut self, keep_entries: bool) {
        if !keep_entries {
            self.entries.clear();
        }
        self.current = CacheStats::default();
    }

    pub fn get_or_infer<P: PolicyValuePredictor + ?Sized>(
        &mut self,
        predictor: &P,
        position: &Position,
        legal_moves: &[Move],
    ) -> Result<Prediction, PredictorError> {
        let key = position.key();
        if let Some(hit) = self.entries.get(&key) {
            self.current.hits += 1;
            self.lifetime.hits += 1;
            return Ok(hit.clone());
        }

        let prediction = predictor.infer(&encode(position), legal_moves)?;
        self.current.misses += 1;
        self.lifetime.misses += 1;
        self.entries.insert(key, prediction.clone());
        Ok(prediction)
    }

    /// Counters since the last `begin_search`.
    pub fn search_stats(&self) -> CacheStats {
        self.current
    }

    /// Counters since the cache was created.
    pub fn lifetime_stats(&self) -> CacheStats {
        self.lifetime
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
