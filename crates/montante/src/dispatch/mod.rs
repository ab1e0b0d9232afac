//! Request dispatchers: the training gate and the prediction path.

mod prediction;
mod training;

pub use prediction::{PredictionDispatcher, check_columns, request_to_dataframe};
pub use training::{TrainingDispatcher, TrainingOutcome, TrainingPayload, TrainingState};
