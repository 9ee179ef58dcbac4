//! File and stream collaborators for the evolver controller.
//!
//! - [`FileLogStore`]: per-vessel, per-channel text streams on disk
//! - [`JsonLinesTransport`]: wire commands written as JSON lines

pub mod error;
pub mod file_store;
pub mod jsonl;

pub use error::IoError;
pub use file_store::FileLogStore;
pub use jsonl::JsonLinesTransport;
