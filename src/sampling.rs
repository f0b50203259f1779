//! Teacher-forced stepping with optional schedule sampling.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::DecodeError;
use crate::scorer::{check_shape, EncodedInput, SlotLayout, StepFunction, StepInput};

/// Seeded per-step coin flip deciding whether the next input comes from the
/// model's own prediction instead of the reference.
#[derive(Debug, Clone)]
pub struct ScheduleSampler {
    probability: f64,
    rng: ChaCha8Rng,
}

impl ScheduleSampler {
    pub fn new(probability: f64, seed: u64) -> Result<Self, DecodeError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(DecodeError::InvalidProbability(probability));
        }
        Ok(Self {
            probability,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn use_prediction(&mut self) -> bool {
        self.probability > 0.0 && self.rng.gen_bool(self.probability)
    }
}

fn argmax(row: ArrayView1<f32>) -> i32 {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (idx, &score) in row.iter().enumerate() {
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    best as i32
}

/// Runs the scorer over `targets` (`N x To`) one step at a time, feeding `sos`
/// first and then either the reference token or, when `sampler` says so, the
/// previous step's best prediction. Returns `N x (To + 1) x V` log-probs.
pub fn teacher_forced<F: StepFunction>(
    scorer: &mut F,
    context: &F::Context,
    targets: ArrayView2<i32>,
    sos: i32,
    mut sampler: Option<&mut ScheduleSampler>,
) -> Result<Array3<f32>, DecodeError> {
    if sos < 0 {
        return Err(DecodeError::InvalidToken {
            start: sos,
            end: sos,
        });
    }
    let items = context.batch_size();
    if targets.nrows() != items {
        return Err(DecodeError::LengthMismatch {
            items,
            lengths: targets.nrows(),
        });
    }

    let vocab = scorer.vocab_size();
    let layout = SlotLayout { items, beam: 1 };
    let steps = targets.ncols() + 1;
    let mut outputs: Vec<Array2<f32>> = Vec::with_capacity(steps);
    let mut state = None;

    for t in 0..steps {
        let prev: Vec<i32> = match outputs.last() {
            None => vec![sos; items],
            Some(last) if sampler.as_deref_mut().is_some_and(|s| s.use_prediction()) => {
                last.rows().into_iter().map(argmax).collect()
            }
            Some(_) => targets.column(t - 1).to_vec(),
        };
        let input = StepInput {
            step: t,
            tokens: &prev,
            layout,
        };
        let out = scorer
            .step(&input, context, state.as_ref())
            .map_err(DecodeError::scorer)?;
        check_shape(&out.log_probs, items, vocab)?;
        outputs.push(out.log_probs);
        state = Some(out.state);
    }

    let views: Vec<_> = outputs.iter().map(|o| o.view()).collect();
    Ok(ndarray::stack(Axis(1), &views)?)
}
