pub mod lopdf_text;
pub mod pdf_extract_text;
pub mod types;

use crate::{document::DocumentHandle, error::ExtractError};

pub use lopdf_text::LopdfBackend;
pub use pdf_extract_text::PdfExtractBackend;
pub use types::{ExtractionMethod, ExtractionResult, ExtractionStatus, PageTextMap};

/// A text-extraction library behind a uniform interface.
///
/// `open` parses the whole document; `page_text` is then asked for every page
/// in turn so a single bad page can be isolated by the caller.
pub trait Backend {
    fn method(&self) -> ExtractionMethod;

    /// Parse `doc`. Must return `PasswordProtected` for documents that need a
    /// password and `BackendExtractionFailure` for anything else it cannot
    /// read.
    fn open(&self, doc: &DocumentHandle) -> Result<Box<dyn OpenedDocument>, ExtractError>;
}

/// A parsed document, owned by one extraction call.
pub trait OpenedDocument {
    fn page_count(&self) -> u32;

    /// Raw text of a 1-based page. `Err` carries the reason recorded as a
    /// warning for a degraded page.
    fn page_text(&self, page: u32) -> Result<String, String>;
}

pub fn for_method(method: ExtractionMethod) -> Box<dyn Backend> {
    match method {
        ExtractionMethod::Lopdf => Box::new(LopdfBackend),
        ExtractionMethod::PdfExtract => Box::new(PdfExtractBackend),
    }
}

/// Build a backend from its config name.
pub fn from_name(name: &str) -> Option<Box<dyn Backend>> {
    name.parse().ok().map(for_method)
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("backend panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("backend panicked: {s}")
    } else {
        "backend panicked".to_string()
    }
}
