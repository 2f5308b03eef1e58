use crate::{
    backend::{ExtractionMethod, ExtractionStatus},
    chunk::ChunkStatistics,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub input: InputSummary,
    pub extraction: ExtractionReport,
    pub cleaning: CleaningReport,
    pub chunking: ChunkStatistics,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSummary {
    pub file_name: String,
    pub file_path: String,
    pub file_bytes: u64,
    pub title: String,
    pub author: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub method: ExtractionMethod,
    pub status: ExtractionStatus,
    pub total_pages: u32,
    pub empty_pages: u32,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleaningReport {
    pub raw_chars: usize,
    pub cleaned_chars: usize,
}
