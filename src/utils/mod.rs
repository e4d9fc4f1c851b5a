// Utilities
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{ArcJobsError, FailureKind, Result};
