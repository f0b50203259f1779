use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::DecodeError;
use crate::scorer::{
    check_shape, EncodedInput, LanguageModel, SlotLayout, SlotState, StepFunction, StepInput,
};

use super::completion::FinishedSet;
use super::prune::{prune_first, prune_items, prune_matrix, top_k};
use super::state::{History, Hypothesis, ScoredSequence};
use super::BeamDecoder;

/// Optional language model whose weighted log-probabilities are added to the
/// scorer's before any pruning.
pub(crate) struct Fusion<'a, L: LanguageModel> {
    lm: Option<&'a mut L>,
    weight: f32,
}

impl<'a, L: LanguageModel> Fusion<'a, L> {
    pub fn new(lm: Option<&'a mut L>, weight: f32) -> Self {
        Self { lm, weight }
    }

    /// Returns the language model's next state, or `None` without a model.
    fn apply(
        &mut self,
        input: &StepInput<'_>,
        state: Option<&L::State>,
        log_probs: &mut Array2<f32>,
    ) -> Result<Option<L::State>, DecodeError> {
        let Some(lm) = self.lm.as_deref_mut() else {
            return Ok(None);
        };
        let out = lm.step(input, state).map_err(DecodeError::language_model)?;
        check_shape(&out.log_probs, log_probs.nrows(), log_probs.ncols())?;
        // a zero weight would turn -inf into NaN
        if self.weight != 0.0 {
            log_probs.scaled_add(self.weight, &out.log_probs);
        }
        Ok(Some(out.state))
    }
}

fn retain_top_k<S, L>(hyps: &mut Vec<Hypothesis<S, L>>, k: usize) {
    hyps.retain(|h| h.score.is_finite());
    hyps.sort_by(|a, b| b.score.total_cmp(&a.score));
    hyps.truncate(k);
}

/// Reference search: every alive hypothesis is scored on its own and carries
/// its own state snapshot.
pub(crate) fn beam_search_naive<F, L>(
    decoder: &BeamDecoder,
    scorer: &mut F,
    context: &F::Context,
    mut fusion: Fusion<'_, L>,
) -> Result<Vec<ScoredSequence>, DecodeError>
where
    F: StepFunction,
    L: LanguageModel,
{
    let config = decoder.config();
    let (beam, sos, eos) = (config.beam, config.sos, config.eos);
    let vocab = scorer.vocab_size();
    let layout = SlotLayout::single();

    let mut alive: Vec<Hypothesis<F::State, L::State>> = vec![Hypothesis::root(sos)];
    let mut finished = FinishedSet::new(sos, eos);

    for t in 0..config.max_len {
        if decoder.is_cancelled() {
            log::info!("Decoding cancelled at step {}", t);
            break;
        }

        let mut candidates = Vec::with_capacity(alive.len() * beam);
        for hyp in &alive {
            let prev = [hyp.last_token()];
            let input = StepInput {
                step: t,
                tokens: &prev,
                layout,
            };
            let out = scorer
                .step(&input, context, hyp.state.as_deref())
                .map_err(DecodeError::scorer)?;
            let mut log_probs = out.log_probs;
            check_shape(&log_probs, 1, vocab)?;
            let lm_state = fusion
                .apply(&input, hyp.lm_state.as_deref(), &mut log_probs)?
                .map(Arc::new);
            let state = Arc::new(out.state);

            for (token, log_prob) in top_k(log_probs.row(0), beam) {
                candidates.push(hyp.extend(token as i32, log_prob, &state, lm_state.as_ref()));
            }
        }

        retain_top_k(&mut candidates, beam);
        let (ended, active): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|h| h.is_finished(eos));
        for hyp in ended {
            finished.push(hyp.into_sequence());
        }
        alive = active;
        log::trace!("step {}: {} alive, {} finished", t, alive.len(), finished.len());

        if alive.is_empty() || finished.len() >= beam {
            break;
        }

        if t == config.max_len - 1 {
            for hyp in alive.drain(..) {
                finished.push(hyp.force_close(eos));
            }
        }
    }

    Ok(finished.into_ranked(config.normalized, config.effective_nbest()))
}

/// Single-utterance search that scores the whole beam in one call and keeps
/// hypotheses as back-pointers into a shared history.
pub(crate) fn beam_search_vectorized<F, L>(
    decoder: &BeamDecoder,
    scorer: &mut F,
    context: &F::Context,
    mut fusion: Fusion<'_, L>,
) -> Result<Vec<ScoredSequence>, DecodeError>
where
    F: StepFunction,
    L: LanguageModel,
{
    let config = decoder.config();
    let (beam, sos, eos) = (config.beam, config.sos, config.eos);
    let vocab = scorer.vocab_size();
    let layout = SlotLayout { items: 1, beam };

    let mut history = History::new(1, beam);
    let mut accumulated = Array1::<f32>::zeros(beam);
    let mut state: Option<F::State> = None;
    let mut lm_state: Option<L::State> = None;
    let mut finished = FinishedSet::new(sos, eos);

    for t in 0..config.max_len {
        if decoder.is_cancelled() {
            log::info!("Decoding cancelled at step {}", t);
            break;
        }

        let prev: Vec<i32> = match (history.last_tokens(), history.last_parents()) {
            (Some(tokens), Some(parents)) => {
                let parents = parents.row(0).to_vec();
                state = state.map(|s| s.reindex(&parents));
                lm_state = lm_state.map(|s| s.reindex(&parents));
                tokens.row(0).to_vec()
            }
            _ => vec![sos; beam],
        };

        let input = StepInput {
            step: t,
            tokens: &prev,
            layout,
        };
        let out = scorer
            .step(&input, context, state.as_ref())
            .map_err(DecodeError::scorer)?;
        let mut log_probs = out.log_probs;
        check_shape(&log_probs, beam, vocab)?;
        state = Some(out.state);
        if let Some(next) = fusion.apply(&input, lm_state.as_ref(), &mut log_probs)? {
            lm_state = Some(next);
        }

        let selection = if t == 0 {
            prune_first(log_probs.row(0), beam)
        } else {
            prune_matrix(accumulated.view(), log_probs.view(), beam)
        };

        let mut scores = selection.scores.clone();
        finished.collect_ended(&history, 0, t, &selection, &mut scores);
        let live = scores.iter().filter(|s| s.is_finite()).count();
        accumulated = Array1::from(scores);
        log::trace!("step {}: {} live slots, {} finished", t, live, finished.len());

        if live == 0 || finished.len() >= beam {
            break;
        }

        history.push(
            Array2::from_shape_vec((1, beam), selection.tokens)?,
            Array2::from_shape_vec((1, beam), selection.parents)?,
            Array2::from_shape_vec((1, beam), selection.step_scores)?,
        );

        if t == config.max_len - 1 {
            let scores = accumulated.to_vec();
            finished.force_close(&history, 0, t, &scores);
        }
    }

    Ok(finished.into_ranked(config.normalized, config.effective_nbest()))
}

/// Batch search: the same algorithm as the vectorized search, run for every
/// item of the batch in one scorer call per step. Items prune and terminate
/// independently.
pub(crate) fn beam_search_batch<F, L>(
    decoder: &BeamDecoder,
    scorer: &mut F,
    context: &F::Context,
    mut fusion: Fusion<'_, L>,
) -> Result<Vec<Vec<ScoredSequence>>, DecodeError>
where
    F: StepFunction,
    L: LanguageModel,
{
    let config = decoder.config();
    let (beam, sos, eos) = (config.beam, config.sos, config.eos);
    let vocab = scorer.vocab_size();
    let items = context.batch_size();
    let layout = SlotLayout { items, beam };
    let slots = layout.slots();
    let threads = config.worker_threads();

    let mut history = History::new(items, beam);
    let mut accumulated = Array2::<f32>::zeros((items, beam));
    let mut state: Option<F::State> = None;
    let mut lm_state: Option<L::State> = None;
    let mut finished: Vec<FinishedSet> = (0..items)
        .map(|_| FinishedSet::new(sos, eos))
        .collect();
    let mut stopped = vec![false; items];

    for t in 0..config.max_len {
        if decoder.is_cancelled() {
            log::info!("Batch decoding cancelled at step {}", t);
            break;
        }

        let prev: Vec<i32> = match (history.last_tokens(), history.last_parents()) {
            (Some(tokens), Some(parents)) => {
                let parents: Vec<usize> = parents
                    .indexed_iter()
                    .map(|((u, _), &p)| u * beam + p)
                    .collect();
                state = state.map(|s| s.reindex(&parents));
                lm_state = lm_state.map(|s| s.reindex(&parents));
                tokens.iter().copied().collect()
            }
            _ => vec![sos; slots],
        };

        let input = StepInput {
            step: t,
            tokens: &prev,
            layout,
        };
        let out = scorer
            .step(&input, context, state.as_ref())
            .map_err(DecodeError::scorer)?;
        let mut log_probs = out.log_probs;
        check_shape(&log_probs, slots, vocab)?;
        state = Some(out.state);
        if let Some(next) = fusion.apply(&input, lm_state.as_ref(), &mut log_probs)? {
            lm_state = Some(next);
        }

        let selections = prune_items(accumulated.view(), log_probs.view(), beam, t == 0, threads);

        let mut tokens = Array2::<i32>::zeros((items, beam));
        let mut parents = Array2::<usize>::zeros((items, beam));
        let mut step_scores = Array2::<f32>::zeros((items, beam));
        for (u, selection) in selections.iter().enumerate() {
            let mut scores = selection.scores.clone();
            if stopped[u] {
                scores.fill(f32::NEG_INFINITY);
            } else {
                finished[u].collect_ended(&history, u, t, selection, &mut scores);
                let live = scores.iter().any(|s| s.is_finite());
                if !live || finished[u].len() >= beam {
                    log::trace!("item {} stopped at step {}", u, t);
                    stopped[u] = true;
                    scores.fill(f32::NEG_INFINITY);
                }
            }
            accumulated.row_mut(u).assign(&ArrayView1::from(&scores[..]));
            tokens.row_mut(u).assign(&ArrayView1::from(&selection.tokens[..]));
            parents.row_mut(u).assign(&ArrayView1::from(&selection.parents[..]));
            step_scores
                .row_mut(u)
                .assign(&ArrayView1::from(&selection.step_scores[..]));
        }

        if stopped.iter().all(|&s| s) {
            break;
        }

        history.push(tokens, parents, step_scores);

        if t == config.max_len - 1 {
            for (u, done) in finished.iter_mut().enumerate() {
                if stopped[u] {
                    continue;
                }
                let scores = accumulated.row(u).to_vec();
                done.force_close(&history, u, t, &scores);
            }
        }
    }

    let nbest = config.effective_nbest();
    Ok(finished
        .into_iter()
        .map(|done| done.into_ranked(config.normalized, nbest))
        .collect())
}
