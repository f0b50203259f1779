#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use attn_beam::{
    log_softmax_rows, LanguageModel, PaddedBatch, StepFunction, StepInput, StepOutput,
};
use ndarray::{Array2, Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub const NEG_INF: f32 = f32::NEG_INFINITY;

#[derive(thiserror::Error, Debug)]
#[error("scorer failed at step {step}")]
pub struct ScorerFailure {
    pub step: usize,
}

/// Single-utterance encoder output placeholder.
pub fn utterance() -> Array3<f32> {
    Array3::zeros((1, 4, 2))
}

/// Batch whose item `u` is identified by `seeds[u]`.
pub fn seeded_batch(seeds: &[u64]) -> PaddedBatch {
    let features = Array3::from_shape_fn((seeds.len(), 3, 1), |(u, _, _)| seeds[u] as f32);
    PaddedBatch::new(features, vec![3; seeds.len()]).expect("lengths match items")
}

/// Scores depend only on the previous token: `table[prev]`.
pub struct TableScorer {
    pub table: Array2<f32>,
    pub calls: usize,
}

impl TableScorer {
    pub fn new(table: Array2<f32>) -> Self {
        Self { table, calls: 0 }
    }
}

impl StepFunction for TableScorer {
    type Context = Array3<f32>;
    type State = ();
    type Error = ScorerFailure;

    fn vocab_size(&self) -> usize {
        self.table.ncols()
    }

    fn step(
        &mut self,
        input: &StepInput<'_>,
        _context: &Array3<f32>,
        _state: Option<&()>,
    ) -> Result<StepOutput<()>, ScorerFailure> {
        self.calls += 1;
        let rows: Vec<usize> = input.tokens.iter().map(|&t| t as usize).collect();
        Ok(StepOutput {
            log_probs: self.table.select(Axis(0), &rows),
            state: (),
        })
    }
}

/// Bigram language model over the same vocabulary.
pub struct TableLm {
    pub table: Array2<f32>,
}

impl LanguageModel for TableLm {
    type State = ();
    type Error = ScorerFailure;

    fn vocab_size(&self) -> usize {
        self.table.ncols()
    }

    fn step(
        &mut self,
        input: &StepInput<'_>,
        _state: Option<&()>,
    ) -> Result<StepOutput<()>, ScorerFailure> {
        let rows: Vec<usize> = input.tokens.iter().map(|&t| t as usize).collect();
        Ok(StepOutput {
            log_probs: self.table.select(Axis(0), &rows),
            state: (),
        })
    }
}

/// Scores depend on the full token history of a slot and on the item seed,
/// so any mistake in state reindexing changes the result.
pub struct HistoryScorer {
    pub vocab: usize,
    pub eos: i32,
    pub eos_bonus: f32,
    pub calls: usize,
}

impl HistoryScorer {
    pub fn new(vocab: usize, eos: i32, eos_bonus: f32) -> Self {
        Self {
            vocab,
            eos,
            eos_bonus,
            calls: 0,
        }
    }
}

impl StepFunction for HistoryScorer {
    type Context = PaddedBatch;
    type State = Vec<Vec<i32>>;
    type Error = ScorerFailure;

    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn step(
        &mut self,
        input: &StepInput<'_>,
        context: &PaddedBatch,
        state: Option<&Vec<Vec<i32>>>,
    ) -> Result<StepOutput<Vec<Vec<i32>>>, ScorerFailure> {
        self.calls += 1;
        let slots = input.tokens.len();
        let mut log_probs = Array2::zeros((slots, self.vocab));
        let mut next = Vec::with_capacity(slots);

        for (slot, &token) in input.tokens.iter().enumerate() {
            let mut history = state.map(|s| s[slot].clone()).unwrap_or_default();
            history.push(token);

            let item = input.layout.item_of(slot);
            let seed = context.features()[[item, 0, 0]] as u64;
            fill_seeded_row(&mut log_probs, slot, seed, &history);
            log_probs[[slot, self.eos as usize]] += self.eos_bonus * history.len() as f32;
            next.push(history);
        }

        log_softmax_rows(&mut log_probs);
        Ok(StepOutput {
            log_probs,
            state: next,
        })
    }
}

/// Language model whose scores depend on each slot's full token history,
/// carried as per-slot state. It ignores the batch item, so every item of a
/// batch sees the same model.
pub struct HistoryLm {
    pub vocab: usize,
    pub seed: u64,
    pub calls: usize,
}

impl HistoryLm {
    pub fn new(vocab: usize, seed: u64) -> Self {
        Self {
            vocab,
            seed,
            calls: 0,
        }
    }
}

impl LanguageModel for HistoryLm {
    type State = Vec<Vec<i32>>;
    type Error = ScorerFailure;

    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn step(
        &mut self,
        input: &StepInput<'_>,
        state: Option<&Vec<Vec<i32>>>,
    ) -> Result<StepOutput<Vec<Vec<i32>>>, ScorerFailure> {
        self.calls += 1;
        let slots = input.tokens.len();
        let mut log_probs = Array2::zeros((slots, self.vocab));
        let mut next = Vec::with_capacity(slots);

        for (slot, &token) in input.tokens.iter().enumerate() {
            let mut history = state.map(|s| s[slot].clone()).unwrap_or_default();
            history.push(token);
            fill_seeded_row(&mut log_probs, slot, self.seed, &history);
            next.push(history);
        }

        log_softmax_rows(&mut log_probs);
        Ok(StepOutput {
            log_probs,
            state: next,
        })
    }
}

/// Fills `row` with values in `[-3, 3)` drawn from a generator keyed by
/// `seed` and `history`.
fn fill_seeded_row(log_probs: &mut Array2<f32>, row: usize, seed: u64, history: &[i32]) {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    history.hash(&mut hasher);
    let mut rng = ChaCha8Rng::seed_from_u64(hasher.finish());
    for v in log_probs.row_mut(row) {
        *v = rng.gen_range(-3.0f32..3.0);
    }
}

/// Vocabulary {start=0, a=1, b=2, end=3}: "a" first, then "end".
pub fn a_then_end_table() -> Array2<f32> {
    ndarray::arr2(&[
        [NEG_INF, 0.0, NEG_INF, NEG_INF],
        [NEG_INF, NEG_INF, NEG_INF, 0.0],
        [NEG_INF, NEG_INF, NEG_INF, NEG_INF],
        [NEG_INF, NEG_INF, NEG_INF, NEG_INF],
    ])
}
