use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchVariant {
    /// One scorer call per hypothesis, hypotheses copied on extension.
    Naive,
    /// One scorer call per step over the whole beam, shared back-pointer history.
    #[default]
    Vectorized,
}

impl std::str::FromStr for SearchVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "naive" => Ok(Self::Naive),
            "vectorized" | "vectorised" => Ok(Self::Vectorized),
            other => Err(format!("unknown search variant '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamSearchConfig {
    pub beam: usize,
    pub nbest: usize,
    pub max_len: usize,
    pub sos: i32,
    pub eos: i32,
    pub normalized: bool,
    pub lm_weight: f32,
    pub variant: SearchVariant,
    pub threads: Option<usize>,
}

impl Default for BeamSearchConfig {
    fn default() -> Self {
        Self {
            beam: 8,
            nbest: 1,
            max_len: 100,
            sos: -1,
            eos: -1,
            normalized: true,
            lm_weight: 0.0,
            variant: SearchVariant::default(),
            threads: None,
        }
    }
}

impl BeamSearchConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides("BEAM_");
        config
    }

    pub fn from_json(document: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(document)?)
    }

    pub fn apply_env_overrides(&mut self, prefix: &str) {
        let read = |suffix: &str| -> Option<(String, String)> {
            let key = format!("{prefix}{suffix}");
            std::env::var(&key).ok().map(|value| (key, value))
        };

        fn parse<T: std::str::FromStr>(entry: Option<(String, String)>) -> Option<T> {
            let (key, value) = entry?;
            match value.trim().parse() {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    log::warn!("Ignoring invalid {} value '{}'", key, value);
                    None
                }
            }
        }

        if let Some(v) = parse(read("WIDTH")) {
            self.beam = v;
        }
        if let Some(v) = parse(read("NBEST")) {
            self.nbest = v;
        }
        if let Some(v) = parse(read("MAX_LEN")) {
            self.max_len = v;
        }
        if let Some(v) = parse(read("SOS")) {
            self.sos = v;
        }
        if let Some(v) = parse(read("EOS")) {
            self.eos = v;
        }
        if let Some(v) = parse(read("NORMALIZED")) {
            self.normalized = v;
        }
        if let Some(v) = parse(read("LM_WEIGHT")) {
            self.lm_weight = v;
        }
        if let Some(v) = parse(read("VARIANT")) {
            self.variant = v;
        }
        if let Some(v) = parse::<usize>(read("THREADS")) {
            self.threads = Some(v.max(1));
        }
    }

    /// Fail-fast checks run before any decoding step.
    pub fn validate(&self, vocab_size: usize) -> Result<(), DecodeError> {
        if self.sos < 0 || self.eos < 0 {
            return Err(DecodeError::InvalidToken {
                start: self.sos,
                end: self.eos,
            });
        }
        if self.max_len == 0 {
            return Err(DecodeError::InvalidMaxLen(self.max_len));
        }
        if self.beam == 0 {
            return Err(DecodeError::ZeroBeam);
        }
        if self.beam > vocab_size {
            return Err(DecodeError::BeamExceedsVocab {
                beam: self.beam,
                vocab: vocab_size,
            });
        }
        if !self.lm_weight.is_finite() {
            return Err(DecodeError::InvalidLmWeight(self.lm_weight));
        }
        Ok(())
    }

    pub fn effective_nbest(&self) -> usize {
        self.nbest.min(self.beam)
    }

    pub(crate) fn worker_threads(&self) -> usize {
        match self.threads {
            Some(threads) => threads.max(1),
            None => num_cpus::get_physical().max(1),
        }
    }
}
