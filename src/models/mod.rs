pub mod file_ref;
pub mod identity;
pub mod outcome;
pub mod unit;

pub use file_ref::{FileLocation, FileReference};
pub use identity::Identity;
pub use outcome::{Outcome, OutcomeStatus, Stage};
pub use unit::{BoundFile, QuestionBinding, SubmissionUnit};
