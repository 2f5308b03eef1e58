pub mod backend;
pub mod chunk;
pub mod clean;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod llm;
pub mod metadata;
pub mod pipeline;
pub mod report;
pub mod util;

pub use error::ExtractError;
pub use pipeline::{Pipeline, ProcessedDocument};
