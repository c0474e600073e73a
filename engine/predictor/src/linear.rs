//! Trainable linear reference predictor.
//!
//! The policy logit of a move factorises over its squares:
//! `logit(m) = (W_from · x + b_from)[m.from] + (W_to · x + b_to)[m.to]`,
//! normalised with a softmax over the legal moves only. The value head is
//! `tanh(w_v · x + b_v)`.
//!
//! Training is plain SGD on `CE(policy) + value_weight * MSE(value)`. All
//! gradients for a batch are accumulated before any parameter is touched, so
//! a failing step leaves the model unchanged.

use chess_core::{Move, ENCODED_LEN};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::trace;

use crate::predictor::{
    cross_entropy, softmax_in_place, validate_target, LossBreakdown, PolicyValuePredictor,
    Prediction, PredictorError, StepParams, TrainingTarget,
};

const MAGIC: &[u8; 4] = b"ZCLP";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 12;
const SQUARES: usize = 64;
const INIT_SCALE: f32 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct LinearPredictor {
    from_weights: Vec<f32>,
    to_weights: Vec<f32>,
    from_bias: Vec<f32>,
    to_bias: Vec<f32>,
    value_weights: Vec<f32>,
    value_bias: f32,
}

impl Default for LinearPredictor {
    fn default() -> Self {
        Self::new(0)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `y += alpha * x`
fn axpy(y: &mut [f32], alpha: f32, x: &[f32]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

fn all_finite(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite())
}

impl LinearPredictor {
    /// Small random weights drawn from a seeded generator.
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut init = |n: usize| -> Vec<f32> {
            (0..n)
                .map(|_| rng.gen_range(-INIT_SCALE..INIT_SCALE))
                .collect()
        };
        Self {
            from_weights: init(SQUARES * ENCODED_LEN),
            to_weights: init(SQUARES * ENCODED_LEN),
            from_bias: vec![0.0; SQUARES],
            to_bias: vec![0.0; SQUARES],
            value_weights: init(ENCODED_LEN),
            value_bias: 0.0,
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.from_weights.len()
            + self.to_weights.len()
            + self.from_bias.len()
            + self.to_bias.len()
            + self.value_weights.len()
            + 1
    }

    fn square_logits(weights: &[f32], bias: &[f32], x: &[f32]) -> [f32; SQUARES] {
        let mut out = [0.0; SQUARES];
        for (sq, slot) in out.iter_mut().enumerate() {
            let row = &weights[sq * ENCODED_LEN..(sq + 1) * ENCODED_LEN];
            *slot = dot(row, x) + bias[sq];
        }
        out
    }

    /// Returns (move probabilities aligned with `legal`, value).
    fn forward(&self, x: &[f32], legal: &[Move]) -> (Vec<f32>, f32) {
        let from = Self::square_logits(&self.from_weights, &self.from_bias, x);
        let to = Self::square_logits(&self.to_weights, &self.to_bias, x);
        let mut probs: Vec<f32> = legal
            .iter()
            .map(|m| from[m.from.to_usize()] + to[m.to.to_usize()])
            .collect();
        softmax_in_place(&mut probs);
        let value = (dot(&self.value_weights, x) + self.value_bias).tanh();
        (probs, value)
    }

    fn check_encoding(encoding: &[f32]) -> Result<(), PredictorError> {
        if encoding.len() != ENCODED_LEN {
            return Err(PredictorError::InvalidInput(format!(
                "encoding has {} values, expected {}",
                encoding.len(),
                ENCODED_LEN
            )));
        }
        Ok(())
    }

    fn tensors(&self) -> [&[f32]; 5] {
        [
            &self.from_weights,
            &self.to_weights,
            &self.from_bias,
            &self.to_bias,
            &self.value_weights,
        ]
    }
}

/// Accumulated gradients for one batch.
struct Gradients {
    from_weights: Vec<f32>,
    to_weights: Vec<f32>,
    from_bias: Vec<f32>,
    to_bias: Vec<f32>,
    value_weights: Vec<f32>,
    value_bias: f32,
}

impl Gradients {
    fn zeros() -> Self {
        Self {
            from_weights: vec![0.0; SQUARES * ENCODED_LEN],
            to_weights: vec![0.0; SQUARES * ENCODED_LEN],
            from_bias: vec![0.0; SQUARES],
            to_bias: vec![0.0; SQUARES],
            value_weights: vec![0.0; ENCODED_LEN],
            value_bias: 0.0,
        }
    }

    fn is_finite(&self) -> bool {
        all_finite(&self.from_weights)
            && all_finite(&self.to_weights)
            && all_finite(&self.from_bias)
            && all_finite(&self.to_bias)
            && all_finite(&self.value_weights)
            && self.value_bias.is_finite()
    }
}

impl PolicyValuePredictor for LinearPredictor {
    fn infer(&self, encoding: &[f32], legal_moves: &[Move]) -> Result<Prediction, PredictorError> {
        Self::check_encoding(encoding)?;
        if legal_moves.is_empty() {
            return Ok(Prediction {
                priors: Vec::new(),
                value: 0.0,
            });
        }

        let (priors, value) = self.forward(encoding, legal_moves);
        if !all_finite(&priors) || !value.is_finite() {
            return Err(PredictorError::NumericalInstability(
                "non-finite output from linear predictor".into(),
            ));
        }
        Ok(Prediction { priors, value })
    }

    fn train_step(
        &mut self,
        batch: &[TrainingTarget<'_>],
        params: StepParams,
    ) -> Result<LossBreakdown, PredictorError> {
        if batch.is_empty() {
            return Ok(LossBreakdown::default());
        }
        for target in batch {
            validate_target(target, ENCODED_LEN)?;
        }

        let mut grads = Gradients::zeros();
        let mut policy_loss = 0.0;
        let mut value_loss = 0.0;

        for target in batch {
            let x = target.encoding;
            let (probs, value) = self.forward(x, target.legal_moves);
            policy_loss += cross_entropy(target.policy, &probs);
            let err = value - target.value;
            value_loss += err * err;

            // d CE / d logit = p - t, split onto the from and to heads
            let mut d_from = [0.0f32; SQUARES];
            let mut d_to = [0.0f32; SQUARES];
            for ((m, p), t) in target.legal_moves.iter().zip(&probs).zip(target.policy) {
                let d = p - t;
                d_from[m.from.to_usize()] += d;
                d_to[m.to.to_usize()] += d;
            }
            for sq in 0..SQUARES {
                if d_from[sq] != 0.0 {
                    let row = &mut grads.from_weights[sq * ENCODED_LEN..(sq + 1) * ENCODED_LEN];
                    axpy(row, d_from[sq], x);
                    grads.from_bias[sq] += d_from[sq];
                }
                if d_to[sq] != 0.0 {
                    let row = &mut grads.to_weights[sq * ENCODED_LEN..(sq + 1) * ENCODED_LEN];
                    axpy(row, d_to[sq], x);
                    grads.to_bias[sq] += d_to[sq];
                }
            }

            let d_value = params.value_weight * 2.0 * err * (1.0 - value * value);
            axpy(&mut grads.value_weights, d_value, x);
            grads.value_bias += d_value;
        }

        if !grads.is_finite() {
            return Err(PredictorError::NumericalInstability(
                "non-finite gradient, step discarded".into(),
            ));
        }

        let n = batch.len() as f32;
        let step = -params.learning_rate / n;
        axpy(&mut self.from_weights, step, &grads.from_weights);
        axpy(&mut self.to_weights, step, &grads.to_weights);
        axpy(&mut self.from_bias, step, &grads.from_bias);
        axpy(&mut self.to_bias, step, &grads.to_bias);
        axpy(&mut self.value_weights, step, &grads.value_weights);
        self.value_bias += step * grads.value_bias;

        let policy = policy_loss / n;
        let value = value_loss / n;
        trace!(batch = batch.len(), policy, value, "linear predictor step");
        Ok(LossBreakdown {
            total: policy + params.value_weight * value,
            policy,
            value,
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>, PredictorError> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.num_parameters() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(ENCODED_LEN as u32).to_le_bytes());
        for tensor in self.tensors() {
            for v in tensor {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out.extend_from_slice(&self.value_bias.to_le_bytes());
        Ok(out)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, PredictorError> {
        let bad = |msg: &str| PredictorError::Snapshot(msg.to_string());

        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(bad("not a linear predictor snapshot"));
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        if word(4) != FORMAT_VERSION {
            return Err(bad("unsupported snapshot version"));
        }
        if word(8) as usize != ENCODED_LEN {
            return Err(bad("snapshot encoded length does not match this build"));
        }

        let mut model = Self::new(0);
        let expected = HEADER_LEN + model.num_parameters() * 4;
        if bytes.len() != expected {
            return Err(PredictorError::Snapshot(format!(
                "snapshot has {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }

        let mut floats = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        for tensor in [
            &mut model.from_weights,
            &mut model.to_weights,
            &mut model.from_bias,
            &mut model.to_bias,
            &mut model.value_weights,
        ] {
            for slot in tensor.iter_mut() {
                *slot = floats.next().ok_or_else(|| bad("truncated snapshot"))?;
            }
        }
        model.value_bias = floats.next().ok_or_else(|| bad("truncated snapshot"))?;
        Ok(model)
    }
}
