use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{BeamSearchConfig, SearchVariant};
use crate::error::DecodeError;
use crate::scorer::{EncodedInput, LanguageModel, NoLanguageModel, StepFunction};

pub(crate) mod completion;
pub(crate) mod prune;
pub(crate) mod search;
pub(crate) mod state;

pub use completion::rank_hypotheses;
pub use state::{History, ScoredSequence};

use search::Fusion;

/// Drives the step loop and returns the ranked N-best list.
#[derive(Debug, Clone)]
pub struct BeamDecoder {
    config: BeamSearchConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl BeamDecoder {
    pub fn new(config: BeamSearchConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Decoding stops at the next step boundary once `flag` is set; the
    /// hypotheses finished so far are returned.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &BeamSearchConfig {
        &self.config
    }

    pub fn decode<F: StepFunction>(
        &self,
        scorer: &mut F,
        context: &F::Context,
    ) -> Result<Vec<ScoredSequence>, DecodeError> {
        self.decode_single(scorer, context, None::<&mut NoLanguageModel>)
    }

    pub fn decode_with_lm<F, L>(
        &self,
        scorer: &mut F,
        context: &F::Context,
        lm: &mut L,
    ) -> Result<Vec<ScoredSequence>, DecodeError>
    where
        F: StepFunction,
        L: LanguageModel,
    {
        self.decode_single(scorer, context, Some(lm))
    }

    /// One ranked list per batch item, in batch order.
    pub fn decode_batch<F: StepFunction>(
        &self,
        scorer: &mut F,
        context: &F::Context,
    ) -> Result<Vec<Vec<ScoredSequence>>, DecodeError> {
        self.decode_many(scorer, context, None::<&mut NoLanguageModel>)
    }

    pub fn decode_batch_with_lm<F, L>(
        &self,
        scorer: &mut F,
        context: &F::Context,
        lm: &mut L,
    ) -> Result<Vec<Vec<ScoredSequence>>, DecodeError>
    where
        F: StepFunction,
        L: LanguageModel,
    {
        self.decode_many(scorer, context, Some(lm))
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn prepare<F, L>(&self, scorer: &F, lm: Option<&L>) -> Result<(), DecodeError>
    where
        F: StepFunction,
        L: LanguageModel,
    {
        let vocab = scorer.vocab_size();
        self.config.validate(vocab)?;
        if let Some(lm) = lm {
            if lm.vocab_size() != vocab {
                return Err(DecodeError::VocabMismatch {
                    scorer: vocab,
                    lm: lm.vocab_size(),
                });
            }
        }
        Ok(())
    }

    fn decode_single<F, L>(
        &self,
        scorer: &mut F,
        context: &F::Context,
        lm: Option<&mut L>,
    ) -> Result<Vec<ScoredSequence>, DecodeError>
    where
        F: StepFunction,
        L: LanguageModel,
    {
        self.prepare(scorer, lm.as_deref())?;
        let batch = context.batch_size();
        if batch != 1 {
            return Err(DecodeError::BatchSize(batch));
        }

        let decode_start = Instant::now();
        log::debug!(
            "Decoding ({:?}, beam={}, nbest={}) max_len={}",
            self.config.variant,
            self.config.beam,
            self.config.nbest,
            self.config.max_len
        );

        let fusion = Fusion::new(lm, self.config.lm_weight);
        let hypotheses = match self.config.variant {
            SearchVariant::Naive => search::beam_search_naive(self, scorer, context, fusion)?,
            SearchVariant::Vectorized => {
                search::beam_search_vectorized(self, scorer, context, fusion)?
            }
        };

        log::debug!(
            "decode completed in {:?} ({} hypotheses)",
            decode_start.elapsed(),
            hypotheses.len()
        );
        Ok(hypotheses)
    }

    fn decode_many<F, L>(
        &self,
        scorer: &mut F,
        context: &F::Context,
        lm: Option<&mut L>,
    ) -> Result<Vec<Vec<ScoredSequence>>, DecodeError>
    where
        F: StepFunction,
        L: LanguageModel,
    {
        self.prepare(scorer, lm.as_deref())?;
        let batch = context.batch_size();
        if batch == 0 {
            return Ok(Vec::new());
        }

        let decode_start = Instant::now();
        log::debug!(
            "Decoding batch of {} (beam={}, nbest={}) max_len={}",
            batch,
            self.config.beam,
            self.config.nbest,
            self.config.max_len
        );

        let fusion = Fusion::new(lm, self.config.lm_weight);
        let hypotheses = search::beam_search_batch(self, scorer, context, fusion)?;

        log::debug!(
            "batch decode completed in {:?} ({} items)",
            decode_start.elapsed(),
            hypotheses.len()
        );
        Ok(hypotheses)
    }
}
