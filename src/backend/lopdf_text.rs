use super::{panic_message, Backend, ExtractionMethod, OpenedDocument};
use crate::{
    document::{looks_encrypted, DocumentHandle},
    error::ExtractError,
};
use lopdf::{content::Content, Document, Object, ObjectId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

/// Primary backend: lopdf's content-stream text extraction, one page at a
/// time. Fast and pure Rust.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfBackend;

impl Backend for LopdfBackend {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Lopdf
    }

    fn open(&self, doc: &DocumentHandle) -> Result<Box<dyn OpenedDocument>, ExtractError> {
        let pdf = load_document(doc)?;
        let pages: Vec<ObjectId> = pdf.get_pages().values().copied().collect();
        debug!("lopdf opened {} pages={}", doc.file_name(), pages.len());
        Ok(Box::new(LopdfDocument { pdf, pages }))
    }
}

/// Parse `doc` with lopdf and unlock it with the empty user password when it
/// carries an `/Encrypt` entry. Owner-password-only files open this way;
/// only a document that needs a real user password is `PasswordProtected`.
pub(crate) fn load_document(doc: &DocumentHandle) -> Result<Document, ExtractError> {
    let bytes = doc.read_bytes()?;
    let loaded = catch_unwind(AssertUnwindSafe(|| Document::load_mem(&bytes)))
        .map_err(panic_message)
        .and_then(|r| r.map_err(|e| e.to_string()));

    let mut pdf = match loaded {
        Ok(pdf) => pdf,
        Err(reason) if looks_encrypted(&bytes) => {
            debug!("lopdf refused encrypted document {}: {reason}", doc.file_name());
            return Err(ExtractError::PasswordProtected(doc.file_name().to_string()));
        }
        Err(reason) => {
            return Err(ExtractError::BackendExtractionFailure {
                method: ExtractionMethod::Lopdf,
                name: doc.file_name().to_string(),
                reason,
            });
        }
    };

    if pdf.is_encrypted() {
        let unlocked = catch_unwind(AssertUnwindSafe(|| pdf.decrypt("")))
            .map_err(panic_message)
            .and_then(|r| r.map_err(|e| e.to_string()));
        if let Err(reason) = unlocked {
            debug!("{} needs a user password: {reason}", doc.file_name());
            return Err(ExtractError::PasswordProtected(doc.file_name().to_string()));
        }
        debug!("{} unlocked with the empty user password", doc.file_name());
    }
    Ok(pdf)
}

struct LopdfDocument {
    pdf: Document,
    pages: Vec<ObjectId>,
}

impl LopdfDocument {
    /// `extract_text` reads past broken content streams and yields `""`, so
    /// the streams are checked here first. lopdf's decoders are lenient: a
    /// bad zlib body decodes to nothing and parsing stops at the first bad
    /// token, so an empty decode or an unclosed text object marks the page
    /// as damaged.
    fn check_content(&self, page_id: ObjectId) -> Result<(), String> {
        let mut open_text_objects = 0usize;
        for id in self.pdf.get_page_contents(page_id) {
            let stream = self
                .pdf
                .get_object(id)
                .and_then(Object::as_stream)
                .map_err(|e| format!("content stream {} {} R: {e}", id.0, id.1))?;
            let data = if stream.dict.has(b"Filter") {
                let data = stream
                    .decompressed_content()
                    .map_err(|e| format!("cannot decode content stream: {e}"))?;
                if data.is_empty() && !stream.content.is_empty() {
                    return Err("content stream did not decompress".to_string());
                }
                data
            } else {
                stream.content.clone()
            };
            let content = Content::decode(&data)
                .map_err(|e| format!("malformed content stream: {e}"))?;
            for op in &content.operations {
                match op.operator.as_str() {
                    "BT" => open_text_objects += 1,
                    "ET" => open_text_objects = open_text_objects.saturating_sub(1),
                    _ => {}
                }
            }
        }
        if open_text_objects > 0 {
            return Err("content stream ends inside a text object".to_string());
        }
        Ok(())
    }
}

impl OpenedDocument for LopdfDocument {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, page: u32) -> Result<String, String> {
        let page_id = *page
            .checked_sub(1)
            .and_then(|i| self.pages.get(i as usize))
            .ok_or_else(|| format!("page {page} out of range"))?;
        self.check_content(page_id)?;
        self.pdf.extract_text(&[page]).map_err(|e| e.to_string())
    }
}
