use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 1-based page number -> raw page text. Every page of the document has an
/// entry, possibly empty.
pub type PageTextMap = BTreeMap<u32, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionMethod {
    #[serde(rename = "lopdf")]
    Lopdf,
    #[serde(rename = "pdf-extract")]
    PdfExtract,
}

impl ExtractionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionMethod::Lopdf => "lopdf",
            ExtractionMethod::PdfExtract => "pdf-extract",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lopdf" => Ok(Self::Lopdf),
            "pdf-extract" | "pdf_extract" => Ok(Self::PdfExtract),
            other => Err(format!("unknown extraction backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Success,
    Partial,
    Failure,
}

/// One backend's extraction of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub file_name: String,
    pub file_path: String,
    pub total_pages: u32,
    pub text_by_page: PageTextMap,
    pub extraction_method: ExtractionMethod,
    pub status: ExtractionStatus,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Why the backend could not open the document; set only on `Failure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ExtractionResult {
    /// Pages whose extraction degraded to an empty string.
    pub fn degraded_pages(&self) -> usize {
        self.warnings.len()
    }

    /// Characters across all pages, ignoring whitespace.
    pub fn text_chars(&self) -> usize {
        self.text_by_page
            .values()
            .map(|t| t.chars().filter(|c| !c.is_whitespace()).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_pages == 0 || self.text_chars() == 0
    }
}
