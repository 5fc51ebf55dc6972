//! Report jobs: kinds, submission with dedup keys, status lookup and the
//! worker for reports generated by this service.

pub mod dispatch;
pub mod jobs;
pub mod runner;
pub mod status;
pub mod submitter;
pub mod workers;

pub use dispatch::*;
pub use jobs::*;
pub use runner::*;
pub use status::*;
pub use submitter::*;
pub use workers::*;
