pub mod config;
pub mod decoder;
pub mod error;
pub mod sampling;
pub mod scorer;

pub use config::{BeamSearchConfig, SearchVariant};
pub use decoder::{rank_hypotheses, BeamDecoder, History, ScoredSequence};
pub use error::DecodeError;
pub use sampling::{teacher_forced, ScheduleSampler};
pub use scorer::{
    log_softmax_rows, EncodedInput, LanguageModel, NoLanguageModel, PaddedBatch, RecurrentState,
    SlotLayout, SlotState, StepFunction, StepInput, StepOutput,
};
