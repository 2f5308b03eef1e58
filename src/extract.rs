use crate::{
    backend::{panic_message, Backend, ExtractionResult, ExtractionStatus, PageTextMap},
    document::DocumentHandle,
    error::ExtractError,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, info, warn};

/// Run one backend over `doc` and shape its output into an
/// [`ExtractionResult`].
///
/// - A backend that cannot open the document yields `Ok` with
///   `status == Failure` and the reason in `failure`, so the caller can
///   decide whether to try another backend.
/// - A password-protected document is `Err(PasswordProtected)`.
/// - A page that fails (or panics) becomes `""` plus a warning; the rest of
///   the document is still extracted.
pub fn extract_with(
    backend: &dyn Backend,
    doc: &DocumentHandle,
) -> Result<ExtractionResult, ExtractError> {
    let method = backend.method();
    info!("{method} extraction start file={}", doc.file_name());

    let opened = match backend.open(doc) {
        Ok(opened) => opened,
        Err(ExtractError::BackendExtractionFailure { reason, .. }) => {
            warn!("{method} could not open {}: {reason}", doc.file_name());
            return Ok(ExtractionResult {
                file_name: doc.file_name().to_string(),
                file_path: doc.file_path().to_string(),
                total_pages: 0,
                text_by_page: PageTextMap::new(),
                extraction_method: method,
                status: ExtractionStatus::Failure,
                warnings: Vec::new(),
                failure: Some(reason),
            });
        }
        Err(err) => return Err(err),
    };

    let total_pages = opened.page_count();
    let mut text_by_page = PageTextMap::new();
    let mut warnings = Vec::new();

    for page in 1..=total_pages {
        let text = catch_unwind(AssertUnwindSafe(|| opened.page_text(page)))
            .map_err(panic_message)
            .and_then(|r| r);
        match text {
            Ok(text) => {
                debug!("{method} page {page} chars={}", text.len());
                text_by_page.insert(page, text);
            }
            Err(reason) => {
                warn!("{method} page {page} of {} degraded: {reason}", doc.file_name());
                warnings.push(format!("page {page}: {reason}"));
                text_by_page.insert(page, String::new());
            }
        }
    }

    let status = if warnings.is_empty() {
        ExtractionStatus::Success
    } else {
        ExtractionStatus::Partial
    };

    info!(
        "{method} extraction done file={} pages={} degraded={} status={:?}",
        doc.file_name(),
        total_pages,
        warnings.len(),
        status
    );

    Ok(ExtractionResult {
        file_name: doc.file_name().to_string(),
        file_path: doc.file_path().to_string(),
        total_pages,
        text_by_page,
        extraction_method: method,
        status,
        warnings,
        failure: None,
    })
}
