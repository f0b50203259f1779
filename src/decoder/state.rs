use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// One ranked, complete output sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSequence {
    pub score: f32,
    /// Always starts with the start token and ends with the end token.
    pub tokens: Vec<i32>,
    /// Set when the end token was appended because `max_len` ran out.
    #[serde(default)]
    pub forced: bool,
}

impl ScoredSequence {
    /// Average log-probability per emitted token (start token excluded).
    pub fn normalized_score(&self) -> f32 {
        let emitted = self.tokens.len().saturating_sub(1).max(1);
        self.score / emitted as f32
    }
}

/// A partial hypothesis of the naive search. Model state snapshots are shared
/// read-only between siblings and never mutated after creation.
pub(crate) struct Hypothesis<S, L> {
    pub tokens: Vec<i32>,
    pub score: f32,
    pub state: Option<Arc<S>>,
    pub lm_state: Option<Arc<L>>,
}

impl<S, L> Hypothesis<S, L> {
    pub fn root(sos: i32) -> Self {
        Self {
            tokens: vec![sos],
            score: 0.0,
            state: None,
            lm_state: None,
        }
    }

    pub fn last_token(&self) -> i32 {
        // tokens always holds at least the start token
        self.tokens[self.tokens.len() - 1]
    }

    pub fn is_finished(&self, eos: i32) -> bool {
        self.last_token() == eos
    }

    pub fn extend(
        &self,
        token: i32,
        log_prob: f32,
        state: &Arc<S>,
        lm_state: Option<&Arc<L>>,
    ) -> Self {
        let mut tokens = Vec::with_capacity(self.tokens.len() + 1);
        tokens.extend_from_slice(&self.tokens);
        tokens.push(token);
        Self {
            tokens,
            score: self.score + log_prob,
            state: Some(Arc::clone(state)),
            lm_state: lm_state.cloned(),
        }
    }

    pub fn into_sequence(self) -> ScoredSequence {
        ScoredSequence {
            score: self.score,
            tokens: self.tokens,
            forced: false,
        }
    }

    /// Closes a hypothesis that ran out of steps by appending `eos`.
    pub fn force_close(mut self, eos: i32) -> ScoredSequence {
        self.tokens.push(eos);
        ScoredSequence {
            score: self.score,
            tokens: self.tokens,
            forced: true,
        }
    }
}

/// Append-only record of every step's choices, `items x beam` per step.
///
/// A hypothesis is identified by `(item, step, slot)`; its tokens are only
/// materialized by walking the back-pointers towards step 0. Past steps are
/// never rewritten, so any number of trace-backs may share the same history.
#[derive(Debug, Clone)]
pub struct History {
    items: usize,
    beam: usize,
    tokens: Vec<Array2<i32>>,
    parents: Vec<Array2<usize>>,
    step_scores: Vec<Array2<f32>>,
}

impl History {
    pub fn new(items: usize, beam: usize) -> Self {
        Self {
            items,
            beam,
            tokens: Vec::new(),
            parents: Vec::new(),
            step_scores: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn beam(&self) -> usize {
        self.beam
    }

    pub fn items(&self) -> usize {
        self.items
    }

    /// Records one step. `parents[[u, k]]` is the slot of step `t - 1` that
    /// slot `k` of item `u` descends from.
    pub fn push(&mut self, tokens: Array2<i32>, parents: Array2<usize>, step_scores: Array2<f32>) {
        let shape = (self.items, self.beam);
        debug_assert_eq!(tokens.dim(), shape);
        debug_assert_eq!(parents.dim(), shape);
        debug_assert_eq!(step_scores.dim(), shape);
        debug_assert!(parents.iter().all(|&p| p < self.beam));
        self.tokens.push(tokens);
        self.parents.push(parents);
        self.step_scores.push(step_scores);
    }

    pub fn last_tokens(&self) -> Option<&Array2<i32>> {
        self.tokens.last()
    }

    pub fn last_parents(&self) -> Option<&Array2<usize>> {
        self.parents.last()
    }

    /// Tokens chosen at steps `0..=step` on the path ending at `slot`.
    pub fn trace_back(&self, item: usize, step: usize, slot: usize) -> Vec<i32> {
        let mut tokens: Vec<i32> = self
            .walk(item, step, slot)
            .map(|(t, k)| self.tokens[t][[item, k]])
            .collect();
        tokens.reverse();
        tokens
    }

    /// Per-step log-probabilities along the same path as [`Self::trace_back`].
    pub fn trace_scores(&self, item: usize, step: usize, slot: usize) -> Vec<f32> {
        let mut scores: Vec<f32> = self
            .walk(item, step, slot)
            .map(|(t, k)| self.step_scores[t][[item, k]])
            .collect();
        scores.reverse();
        scores
    }

    /// Full sequence wrapped with start and end tokens. `terminal` is `None`
    /// when the end token was chosen on the very first step.
    pub fn sequence(
        &self,
        item: usize,
        terminal: Option<(usize, usize)>,
        sos: i32,
        eos: i32,
    ) -> Vec<i32> {
        let body = terminal
            .map(|(step, slot)| self.trace_back(item, step, slot))
            .unwrap_or_default();
        let mut tokens = Vec::with_capacity(body.len() + 2);
        tokens.push(sos);
        tokens.extend(body);
        tokens.push(eos);
        tokens
    }

    fn walk(
        &self,
        item: usize,
        step: usize,
        slot: usize,
    ) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut slot = slot;
        (0..=step).rev().map(move |t| {
            let here = slot;
            slot = self.parents[t][[item, here]];
            (t, here)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample_history() -> History {
        // step 0: slots pick tokens 5, 6
        // step 1: slot 0 <- slot 1 (token 7), slot 1 <- slot 1 (token 8)
        // step 2: slot 0 <- slot 1 (token 9), slot 1 <- slot 0 (token 4)
        let mut history = History::new(1, 2);
        history.push(array![[5, 6]], array![[0, 1]], array![[-0.1, -0.2]]);
        history.push(array![[7, 8]], array![[1, 1]], array![[-0.3, -0.4]]);
        history.push(array![[9, 4]], array![[1, 0]], array![[-0.5, -0.6]]);
        history
    }

    #[test]
    fn trace_back_follows_parents() {
        let history = sample_history();
        assert_eq!(history.trace_back(0, 2, 0), vec![6, 8, 9]);
        assert_eq!(history.trace_back(0, 2, 1), vec![6, 7, 4]);
        assert_eq!(history.trace_back(0, 0, 1), vec![6]);
    }

    #[test]
    fn trace_back_is_repeatable() {
        let history = sample_history();
        let first = history.trace_back(0, 2, 1);
        let _ = history.trace_back(0, 2, 0);
        assert_eq!(history.trace_back(0, 2, 1), first);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn history_reports_its_layout() {
        let mut history = History::new(3, 2);
        assert!(history.is_empty());
        assert_eq!(history.items(), 3);
        assert_eq!(history.beam(), 2);
        assert!(history.last_tokens().is_none());

        history.push(
            array![[1, 2], [3, 4], [5, 6]],
            array![[0, 1], [0, 1], [0, 1]],
            array![[-0.1, -0.2], [-0.3, -0.4], [-0.5, -0.6]],
        );
        assert!(!history.is_empty());
        assert_eq!(history.len(), 1);
        assert_eq!(history.trace_back(2, 0, 1), vec![6]);
    }

    #[test]
    fn trace_scores_match_path() {
        let history = sample_history();
        assert_eq!(history.trace_scores(0, 2, 1), vec![-0.2, -0.3, -0.6]);
    }

    #[test]
    fn sequence_wraps_with_start_and_end() {
        let history = sample_history();
        assert_eq!(history.sequence(0, Some((1, 0)), 0, 3), vec![0, 6, 7, 3]);
        assert_eq!(history.sequence(0, None, 0, 3), vec![0, 3]);
    }

    #[test]
    fn hypothesis_extension_leaves_parent_untouched() {
        let root: Hypothesis<(), ()> = Hypothesis::root(0);
        let state = Arc::new(());
        let child = root.extend(4, -0.5, &state, None);
        let grandchild = child.extend(2, -0.25, &state, None);
        assert_eq!(root.tokens, vec![0]);
        assert_eq!(child.tokens, vec![0, 4]);
        assert_eq!(grandchild.tokens, vec![0, 4, 2]);
        assert!((grandchild.score + 0.75).abs() < 1e-6);
        assert!(grandchild.is_finished(2));
        assert!(!child.is_finished(2));
    }

    #[test]
    fn normalized_score_excludes_start_token() {
        let seq = ScoredSequence {
            score: -2.0,
            tokens: vec![0, 1, 2, 1, 3],
            forced: false,
        };
        assert!((seq.normalized_score() + 0.5).abs() < 1e-6);
    }
}
