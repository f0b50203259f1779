use super::prune::Selection;
use super::state::{History, ScoredSequence};

/// Completed hypotheses of one utterance. Insertion order carries no meaning;
/// ranking happens once at the end.
#[derive(Debug)]
pub(crate) struct FinishedSet {
    sos: i32,
    eos: i32,
    hypotheses: Vec<ScoredSequence>,
}

impl FinishedSet {
    pub fn new(sos: i32, eos: i32) -> Self {
        Self {
            sos,
            eos,
            hypotheses: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn push(&mut self, hypothesis: ScoredSequence) {
        self.hypotheses.push(hypothesis);
    }

    /// Moves every live slot of `selection` that emitted `eos` at `step` into
    /// the finished set and kills its score so later steps cannot extend it.
    /// `history` must not yet contain `step`.
    pub fn collect_ended(
        &mut self,
        history: &History,
        item: usize,
        step: usize,
        selection: &Selection,
        scores: &mut [f32],
    ) -> usize {
        let mut ended = 0;
        for (slot, &token) in selection.tokens.iter().enumerate() {
            if token != self.eos || !scores[slot].is_finite() {
                continue;
            }
            let terminal = step.checked_sub(1).map(|prev| (prev, selection.parents[slot]));
            self.hypotheses.push(ScoredSequence {
                score: scores[slot],
                tokens: history.sequence(item, terminal, self.sos, self.eos),
                forced: false,
            });
            scores[slot] = f32::NEG_INFINITY;
            ended += 1;
        }
        ended
    }

    /// Closes every live slot at the last allowed step by appending `eos`.
    /// `history` must already contain `step`.
    pub fn force_close(
        &mut self,
        history: &History,
        item: usize,
        step: usize,
        scores: &[f32],
    ) -> usize {
        let mut closed = 0;
        for (slot, &score) in scores.iter().enumerate() {
            if !score.is_finite() {
                continue;
            }
            self.hypotheses.push(ScoredSequence {
                score,
                tokens: history.sequence(item, Some((step, slot)), self.sos, self.eos),
                forced: true,
            });
            closed += 1;
        }
        closed
    }

    pub fn into_ranked(self, normalized: bool, nbest: usize) -> Vec<ScoredSequence> {
        rank_hypotheses(self.hypotheses, normalized, nbest)
    }
}

/// Orders finished hypotheses best first and keeps `nbest` of them. With
/// `normalized`, the key is the average log-probability per emitted token.
pub fn rank_hypotheses(
    mut hypotheses: Vec<ScoredSequence>,
    normalized: bool,
    nbest: usize,
) -> Vec<ScoredSequence> {
    if normalized {
        hypotheses.sort_by(|a, b| b.normalized_score().total_cmp(&a.normalized_score()));
    } else {
        hypotheses.sort_by(|a, b| b.score.total_cmp(&a.score));
    }
    hypotheses.truncate(nbest);
    hypotheses
}
