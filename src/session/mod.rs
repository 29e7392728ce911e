//! Operator session: selections, submission, and merged live state.

pub mod classes;
pub mod controller;
pub mod history;
pub mod submission;

pub use classes::{ClassSelection, ModelClass};
pub use controller::{output_reference, ProcessingSessionController, SessionStatus};
pub use history::{RingBuffer, DETAIL_CAPACITY};
pub use submission::{
    validate_model_file, ModelSource, Submission, TrackerParams, DEFAULT_MODEL, DEFAULT_TRACKER,
};
