use crate::{
    backend::{self, Backend, ExtractionMethod, ExtractionStatus, PageTextMap},
    chunk::{self, Chunk, Chunker},
    clean::Cleaner,
    config::Config,
    document::DocumentHandle,
    error::ExtractError,
    extract::extract_with,
    fallback::{FallbackPolicy, extract_with_fallback},
    metadata::{MetadataRecord, read_metadata},
    report::{CleaningReport, ExtractionReport, InputSummary, JobReport},
};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Which backends `Pipeline::extract` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    Fallback,
    Lopdf,
    PdfExtract,
    All,
}

impl FromStr for ExtractMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fallback" => Ok(Self::Fallback),
            "all" => Ok(Self::All),
            other => match other.parse::<ExtractionMethod>()? {
                ExtractionMethod::Lopdf => Ok(Self::Lopdf),
                ExtractionMethod::PdfExtract => Ok(Self::PdfExtract),
            },
        }
    }
}

/// Extraction result plus metadata: the hand-off to embedding and storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub file_name: String,
    pub file_path: String,
    pub total_pages: u32,
    pub text_by_page: PageTextMap,
    pub extraction_method: ExtractionMethod,
    pub status: ExtractionStatus,
    pub metadata: MetadataRecord,
    pub warnings: Vec<String>,
}

pub struct JobOutput {
    pub document: ProcessedDocument,
    pub cleaned_pages: PageTextMap,
    pub cleaned_text: String,
    pub chunks: Vec<Chunk>,
    pub report: JobReport,
}

pub struct Pipeline {
    cfg: Config,
    primary: Box<dyn Backend>,
    secondary: Box<dyn Backend>,
    cleaner: Cleaner,
    chunker: Chunker,
    policy: FallbackPolicy,
}

impl Pipeline {
    /// Backends come from `extraction.primary` / `extraction.secondary`.
    pub fn new(cfg: &Config) -> Result<Self> {
        let primary = backend::from_name(&cfg.extraction.primary)
            .ok_or_else(|| anyhow!("unknown extraction.primary: {}", cfg.extraction.primary))?;
        let secondary = backend::from_name(&cfg.extraction.secondary).ok_or_else(|| {
            anyhow!("unknown extraction.secondary: {}", cfg.extraction.secondary)
        })?;
        if primary.method() == secondary.method() {
            warn!(
                "extraction.primary and extraction.secondary are both {}",
                primary.method()
            );
        }
        Self::with_backends(cfg, primary, secondary)
    }

    pub fn with_backends(
        cfg: &Config,
        primary: Box<dyn Backend>,
        secondary: Box<dyn Backend>,
    ) -> Result<Self> {
        let cleaner = Cleaner::new(&cfg.cleaning).context("building cleaner")?;
        let chunker = Chunker::new(&cfg.chunking).context("building chunker")?;
        Ok(Self {
            cfg: cfg.clone(),
            primary,
            secondary,
            cleaner,
            chunker,
            policy: FallbackPolicy {
                fallback_on_partial: cfg.extraction.fallback_on_partial,
            },
        })
    }

    pub fn cleaner(&self) -> &Cleaner {
        &self.cleaner
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Open `path` as a document, enforcing `limits.max_input_file_bytes`.
    pub fn open(&self, path: &Path) -> Result<DocumentHandle, ExtractError> {
        let doc = DocumentHandle::open(path)?;
        self.check_size(&doc)?;
        Ok(doc)
    }

    fn check_size(&self, doc: &DocumentHandle) -> Result<(), ExtractError> {
        let limit = self.cfg.limits.max_input_file_bytes;
        if limit > 0 && doc.size() > limit {
            return Err(ExtractError::FileTooLarge {
                name: doc.file_name().to_string(),
                size: doc.size(),
                limit,
            });
        }
        Ok(())
    }

    /// Run extraction in the requested mode. `All` returns one result per
    /// backend (primary first) without falling back.
    pub fn extract(
        &self,
        doc: &DocumentHandle,
        mode: ExtractMode,
    ) -> Result<Vec<backend::ExtractionResult>, ExtractError> {
        self.check_size(doc)?;
        match mode {
            ExtractMode::Fallback => Ok(vec![extract_with_fallback(
                self.primary.as_ref(),
                self.secondary.as_ref(),
                doc,
                self.policy,
            )?]),
            ExtractMode::Lopdf => Ok(vec![self.extract_single(ExtractionMethod::Lopdf, doc)?]),
            ExtractMode::PdfExtract => {
                Ok(vec![self.extract_single(ExtractionMethod::PdfExtract, doc)?])
            }
            ExtractMode::All => Ok(vec![
                extract_with(self.primary.as_ref(), doc)?,
                extract_with(self.secondary.as_ref(), doc)?,
            ]),
        }
    }

    fn extract_single(
        &self,
        method: ExtractionMethod,
        doc: &DocumentHandle,
    ) -> Result<backend::ExtractionResult, ExtractError> {
        if self.primary.method() == method {
            extract_with(self.primary.as_ref(), doc)
        } else if self.secondary.method() == method {
            extract_with(self.secondary.as_ref(), doc)
        } else {
            extract_with(backend::for_method(method).as_ref(), doc)
        }
    }

    /// Fallback extraction plus metadata in one call.
    ///
    /// The page count of the extraction is authoritative: the metadata record
    /// is reconciled to it. Metadata that cannot be read does not fail the
    /// call. An empty document is reported in `warnings`, not as an error.
    pub fn extract_all(&self, doc: &DocumentHandle) -> Result<ProcessedDocument, ExtractError> {
        self.check_size(doc)?;
        let result =
            extract_with_fallback(self.primary.as_ref(), self.secondary.as_ref(), doc, self.policy)?;
        let mut warnings = result.warnings.clone();

        let mut metadata = match read_metadata(doc) {
            Ok(m) => m,
            Err(err @ ExtractError::PasswordProtected(_)) => return Err(err),
            Err(err) => {
                warn!("metadata unavailable for {}: {err}", doc.file_name());
                warnings.push(format!("metadata: {err}"));
                MetadataRecord::empty(doc, result.total_pages)
            }
        };

        let extracted_pages = result.text_by_page.len() as u32;
        if metadata.total_pages != extracted_pages {
            warn!(
                "page count mismatch for {}: metadata={} extraction={}",
                doc.file_name(),
                metadata.total_pages,
                extracted_pages
            );
            warnings.push(format!(
                "page count mismatch: metadata reported {}, extraction produced {}",
                metadata.total_pages, extracted_pages
            ));
            metadata.total_pages = extracted_pages;
        }

        if result.is_empty() {
            let empty = ExtractError::EmptyDocument(doc.file_name().to_string());
            warn!("{empty}");
            warnings.push(empty.to_string());
        }

        info!(
            "extracted {} pages from {} via {} ({:?})",
            extracted_pages,
            doc.file_name(),
            result.extraction_method,
            result.status
        );

        Ok(ProcessedDocument {
            file_name: result.file_name,
            file_path: result.file_path,
            total_pages: extracted_pages,
            text_by_page: result.text_by_page,
            extraction_method: result.extraction_method,
            status: result.status,
            metadata,
            warnings,
        })
    }

    /// Extract, clean, chunk and summarize one document.
    pub fn run_job(&self, doc: &DocumentHandle) -> Result<JobOutput> {
        let started = Instant::now();

        let document = self
            .extract_all(doc)
            .with_context(|| format!("extracting {}", doc.file_name()))?;

        let cleaned_pages = self.cleaner.clean_pages(&document.text_by_page);
        let cleaned_text = join_pages(&cleaned_pages);
        let cleaning = CleaningReport {
            raw_chars: document.text_by_page.values().map(|t| t.chars().count()).sum(),
            cleaned_chars: cleaned_pages.values().map(|t| t.chars().count()).sum(),
        };
        debug!(
            raw = cleaning.raw_chars,
            cleaned = cleaning.cleaned_chars,
            "cleaning done"
        );

        let chunks = self
            .chunker
            .chunk_pages(&cleaned_pages, &document.file_name)
            .context("chunking cleaned text")?;
        let chunking = chunk::statistics(&chunks);

        let report = JobReport {
            input: InputSummary {
                file_name: document.file_name.clone(),
                file_path: document.file_path.clone(),
                file_bytes: doc.size(),
                title: document.metadata.title.clone(),
                author: document.metadata.author.clone(),
            },
            extraction: ExtractionReport {
                method: document.extraction_method,
                status: document.status,
                total_pages: document.total_pages,
                empty_pages: document
                    .text_by_page
                    .values()
                    .filter(|t| t.trim().is_empty())
                    .count() as u32,
                warnings: document.warnings.clone(),
            },
            cleaning,
            chunking,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        Ok(JobOutput {
            document,
            cleaned_pages,
            cleaned_text,
            chunks,
            report,
        })
    }
}

/// Non-empty pages in order, separated by blank lines.
pub fn join_pages(pages: &PageTextMap) -> String {
    pages
        .values()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
