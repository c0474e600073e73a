//! Uniform predictor: equal priors over legal moves, neutral value.
//! Useful for testing the search without a trained model.

use chess_core::{Move, ENCODED_LEN};

use crate::predictor::{
    cross_entropy, validate_target, LossBreakdown, PolicyValuePredictor, Prediction,
    PredictorError, StepParams, TrainingTarget,
};

const MAGIC: &[u8; 4] = b"ZCUP";

#[derive(Debug, Clone, Copy, Default)]
pub struct UniformPredictor;

impl UniformPredictor {
    pub fn new() -> Self {
        Self
    }
}

impl PolicyValuePredictor for UniformPredictor {
    fn infer(&self, _encoding: &[f32], legal_moves: &[Move]) -> Result<Prediction, PredictorError> {
        if legal_moves.is_empty() {
            return Ok(Prediction {
                priors: Vec::new(),
                value: 0.0,
            });
        }
        let p = 1.0 / legal_moves.len() as f32;
        Ok(Prediction {
            priors: vec![p; legal_moves.len()],
            value: 0.0,
        })
    }

    /// Reports the loss of the uniform policy without changing anything.
    fn train_step(
        &mut self,
        batch: &[TrainingTarget<'_>],
        params: StepParams,
    ) -> Result<LossBreakdown, PredictorError> {
        if batch.is_empty() {
            return Ok(LossBreakdown::default());
        }
        let mut policy = 0.0;
        let mut value = 0.0;
        for target in batch {
            validate_target(target, ENCODED_LEN)?;
            let probs = self.infer(target.encoding, target.legal_moves)?.priors;
            policy += cross_entropy(target.policy, &probs);
            value += target.value * target.value;
        }
        let n = batch.len() as f32;
        let (policy, value) = (policy / n, value / n);
        Ok(LossBreakdown {
            total: policy + params.value_weight * value,
            policy,
            value,
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>, PredictorError> {
        Ok(MAGIC.to_vec())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, PredictorError> {
        if bytes != MAGIC {
            return Err(PredictorError::Snapshot(
                "not a uniform predictor snapshot".into(),
            ));
        }
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_core::{encode, Position};

    #[test]
    fn test_uniform_priors() {
        let pos = Position::startpos();
        let legal = pos.legal_moves();
        let pred = UniformPredictor::new()
            .infer(&encode(&pos), &legal)
            .unwrap();
        assert_eq!(pred.priors.len(), 20);
        assert!(pred.priors.iter().all(|&p| (p - 0.05).abs() < 1e-6));
        assert_eq!(pred.value, 0.0);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let bytes = UniformPredictor.to_bytes().unwrap();
        assert!(UniformPredictor::from_bytes(&bytes).is_ok());
        assert!(UniformPredictor::from_bytes(b"nope").is_err());
    }
}
