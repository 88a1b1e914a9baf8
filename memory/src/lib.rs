//! Episodic session memory: structured extraction from transcripts,
//! tamper-evident per-session archives, and a full-fidelity turn log with
//! keyword retrieval.

pub mod archive;
pub mod context;
pub mod error;
pub mod extract;
pub mod factory;
pub mod integrity;
pub mod keywords;
pub mod recall;
pub mod retrieval;
pub mod store;
pub mod types;

pub use error::MemoryError;
