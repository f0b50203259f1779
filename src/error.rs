use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the beam decoder.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid SOS/EOS ID: {start}/{end}")]
    InvalidToken { start: i32, end: i32 },

    #[error("Invalid max_len: {0}")]
    InvalidMaxLen(usize),

    #[error("Beam size ({beam}) > vocabulary size ({vocab})")]
    BeamExceedsVocab { beam: usize, vocab: usize },

    #[error("Beam size must be at least 1")]
    ZeroBeam,

    #[error("Invalid language model weight: {0}")]
    InvalidLmWeight(f32),

    #[error("Language model vocabulary ({lm}) does not match scorer vocabulary ({scorer})")]
    VocabMismatch { scorer: usize, lm: usize },

    #[error("Schedule sampling probability must be within [0, 1], got {0}")]
    InvalidProbability(f64),

    #[error("Invalid configuration document: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Got batch size {0}, only one utterance is supported")]
    BatchSize(usize),

    #[error("Batch has {items} items but {lengths} lengths")]
    LengthMismatch { items: usize, lengths: usize },

    #[error("Step output shape {got:?} does not match expected {expected:?}")]
    StepShape {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("ndarray shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Scorer(BoxError),

    #[error(transparent)]
    LanguageModel(BoxError),
}

impl DecodeError {
    pub(crate) fn scorer<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Scorer(Box::new(err))
    }

    pub(crate) fn language_model<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::LanguageModel(Box::new(err))
    }

    /// True for errors that are raised before any decoding step runs because
    /// the request itself is malformed.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::InvalidToken { .. }
            | Self::InvalidMaxLen(_)
            | Self::BeamExceedsVocab { .. }
            | Self::ZeroBeam
            | Self::InvalidLmWeight(_)
            | Self::VocabMismatch { .. }
            | Self::InvalidProbability(_)
            | Self::Config(_) => true,
            Self::BatchSize(_)
            | Self::LengthMismatch { .. }
            | Self::StepShape { .. }
            | Self::Shape(_)
            | Self::Scorer(_)
            | Self::LanguageModel(_) => false,
        }
    }
}
