//! Contracts between the search and the sequence model driving it.
//!
//! The decoder never inspects model state. It only asks a [`SlotState`] to
//! gather itself by parent slot whenever the frontier is reordered.

use ndarray::{s, Array, Array2, Array3, ArrayBase, ArrayView2, Axis, Data, Ix3, RemoveAxis};

use crate::error::DecodeError;

/// How scorer slots map onto batch items. Slot `s` belongs to item `s / beam`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub items: usize,
    pub beam: usize,
}

impl SlotLayout {
    pub const fn single() -> Self {
        Self { items: 1, beam: 1 }
    }

    pub const fn slots(&self) -> usize {
        self.items * self.beam
    }

    pub const fn item_of(&self, slot: usize) -> usize {
        slot / self.beam
    }
}

/// Inputs for one scorer call: the previously chosen token of every slot.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub step: usize,
    pub tokens: &'a [i32],
    pub layout: SlotLayout,
}

pub struct StepOutput<S> {
    /// `slots x vocab` log-probabilities.
    pub log_probs: Array2<f32>,
    pub state: S,
}

pub trait StepFunction {
    type Context: EncodedInput + ?Sized;
    type State: SlotState;
    type Error: std::error::Error + Send + Sync + 'static;

    fn vocab_size(&self) -> usize;

    /// Scores the next token for every slot in `input`. `state` is `None` on
    /// the first step and otherwise already gathered by parent slot.
    fn step(
        &mut self,
        input: &StepInput<'_>,
        context: &Self::Context,
        state: Option<&Self::State>,
    ) -> Result<StepOutput<Self::State>, Self::Error>;
}

/// External language model fused into the scorer's distribution.
pub trait LanguageModel {
    type State: SlotState;
    type Error: std::error::Error + Send + Sync + 'static;

    fn vocab_size(&self) -> usize;

    fn step(
        &mut self,
        input: &StepInput<'_>,
        state: Option<&Self::State>,
    ) -> Result<StepOutput<Self::State>, Self::Error>;
}

/// Placeholder language model for decodes without fusion. It has no values.
#[derive(Debug)]
pub enum NoLanguageModel {}

impl LanguageModel for NoLanguageModel {
    type State = ();
    type Error = std::convert::Infallible;

    fn vocab_size(&self) -> usize {
        match *self {}
    }

    fn step(
        &mut self,
        _input: &StepInput<'_>,
        _state: Option<&()>,
    ) -> Result<StepOutput<()>, Self::Error> {
        match *self {}
    }
}

pub trait EncodedInput {
    fn batch_size(&self) -> usize;
}

impl<S: Data> EncodedInput for ArrayBase<S, Ix3> {
    fn batch_size(&self) -> usize {
        self.len_of(Axis(0))
    }
}

/// Padded encoder output (`N x T x F`) together with each item's valid length.
#[derive(Debug, Clone)]
pub struct PaddedBatch {
    features: Array3<f32>,
    lengths: Vec<usize>,
}

impl PaddedBatch {
    pub fn new(features: Array3<f32>, lengths: Vec<usize>) -> Result<Self, DecodeError> {
        let items = features.len_of(Axis(0));
        if items != lengths.len() {
            return Err(DecodeError::LengthMismatch {
                items,
                lengths: lengths.len(),
            });
        }
        let frames = features.len_of(Axis(1));
        let lengths = lengths.into_iter().map(|len| len.min(frames)).collect();
        Ok(Self { features, lengths })
    }

    pub fn features(&self) -> &Array3<f32> {
        &self.features
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Valid frames of `item`, padding removed.
    pub fn item(&self, item: usize) -> ArrayView2<'_, f32> {
        self.features.slice(s![item, ..self.lengths[item], ..])
    }
}

impl EncodedInput for PaddedBatch {
    fn batch_size(&self) -> usize {
        self.lengths.len()
    }
}

/// Per-slot state that can be gathered by parent slot.
pub trait SlotState: Sized {
    fn reindex(&self, parents: &[usize]) -> Self;
}

impl SlotState for () {
    fn reindex(&self, _parents: &[usize]) -> Self {}
}

impl<T: Clone> SlotState for Vec<T> {
    fn reindex(&self, parents: &[usize]) -> Self {
        parents.iter().map(|&p| self[p].clone()).collect()
    }
}

impl<A: Clone, D: RemoveAxis> SlotState for Array<A, D> {
    fn reindex(&self, parents: &[usize]) -> Self {
        self.select(Axis(0), parents)
    }
}

impl<T: SlotState> SlotState for Option<T> {
    fn reindex(&self, parents: &[usize]) -> Self {
        self.as_ref().map(|s| s.reindex(parents))
    }
}

impl<A: SlotState, B: SlotState> SlotState for (A, B) {
    fn reindex(&self, parents: &[usize]) -> Self {
        (self.0.reindex(parents), self.1.reindex(parents))
    }
}

/// Recurrent hidden bundle laid out `layers x slots x hidden`, with an
/// optional cell for LSTM-style decoders.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentState {
    pub hidden: Array3<f32>,
    pub cell: Option<Array3<f32>>,
}

impl SlotState for RecurrentState {
    fn reindex(&self, parents: &[usize]) -> Self {
        Self {
            hidden: self.hidden.select(Axis(1), parents),
            cell: self.cell.as_ref().map(|c| c.select(Axis(1), parents)),
        }
    }
}

/// In-place row-wise log-softmax over raw logits.
pub fn log_softmax_rows(logits: &mut Array2<f32>) {
    for mut row in logits.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        if !max.is_finite() {
            continue;
        }
        let log_sum = row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln() + max;
        row.mapv_inplace(|v| v - log_sum);
    }
}

pub(crate) fn check_shape(
    log_probs: &Array2<f32>,
    slots: usize,
    vocab: usize,
) -> Result<(), DecodeError> {
    let got = log_probs.dim();
    if got != (slots, vocab) {
        return Err(DecodeError::StepShape {
            expected: (slots, vocab),
            got,
        });
    }
    Ok(())
}
