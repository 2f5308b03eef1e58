use super::{panic_message, Backend, ExtractionMethod, OpenedDocument};
use crate::{
    document::{looks_encrypted, DocumentHandle},
    error::ExtractError,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

/// Secondary backend: pdf-extract's layout-aware text output. Slower than
/// lopdf but copes with more font encodings.
///
/// pdf-extract renders the whole document in one pass, so a failure here is
/// document-level; pages come back pre-rendered.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractBackend;

impl Backend for PdfExtractBackend {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::PdfExtract
    }

    fn open(&self, doc: &DocumentHandle) -> Result<Box<dyn OpenedDocument>, ExtractError> {
        let bytes = doc.read_bytes()?;
        let rendered = catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
        }))
        .map_err(panic_message)
        .and_then(|r| r.map_err(|e| e.to_string()));

        match rendered {
            Ok(pages) => {
                debug!("pdf-extract rendered {} pages={}", doc.file_name(), pages.len());
                Ok(Box::new(RenderedPages { pages }))
            }
            Err(reason) if looks_encrypted(&bytes) => {
                debug!("pdf-extract refused encrypted document {}: {reason}", doc.file_name());
                Err(ExtractError::PasswordProtected(doc.file_name().to_string()))
            }
            Err(reason) => Err(ExtractError::BackendExtractionFailure {
                method: self.method(),
                name: doc.file_name().to_string(),
                reason,
            }),
        }
    }
}

struct RenderedPages {
    pages: Vec<String>,
}

impl OpenedDocument for RenderedPages {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, page: u32) -> Result<String, String> {
        page.checked_sub(1)
            .and_then(|i| self.pages.get(i as usize))
            .cloned()
            .ok_or_else(|| format!("page {page} out of range"))
    }
}
