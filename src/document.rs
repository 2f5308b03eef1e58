use crate::error::ExtractError;
use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// PDF writers may put garbage before the header; readers accept it anywhere
/// in the first KiB.
const HEADER_WINDOW: usize = 1024;
const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone)]
enum Source {
    Path(PathBuf),
    Upload(Arc<[u8]>),
}

/// Identity of one source document. Validated on construction and immutable
/// afterwards; bytes are only read inside an extraction call.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    file_name: String,
    file_path: String,
    size: u64,
    source: Source,
}

impl DocumentHandle {
    /// Validate a filesystem path: it must exist, carry a `.pdf` extension
    /// and start like a PDF.
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        if !path.is_file() {
            return Err(ExtractError::FileNotFound(path.to_path_buf()));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        check_extension(&file_name)?;

        let io_err = |source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut f = File::open(path).map_err(io_err)?;
        let size = f.metadata().map_err(io_err)?.len();

        let mut head = Vec::with_capacity(HEADER_WINDOW);
        f.by_ref()
            .take(HEADER_WINDOW as u64)
            .read_to_end(&mut head)
            .map_err(io_err)?;
        check_magic(&file_name, &head)?;

        Ok(Self {
            file_name,
            file_path: path.display().to_string(),
            size,
            source: Source::Path(path.to_path_buf()),
        })
    }

    /// Wrap bytes handed over by an upload collaborator. `name` is the
    /// client-supplied file name and is held to the same type checks.
    pub fn from_upload(name: &str, bytes: impl Into<Arc<[u8]>>) -> Result<Self, ExtractError> {
        let bytes: Arc<[u8]> = bytes.into();
        check_extension(name)?;
        check_magic(name, &bytes[..bytes.len().min(HEADER_WINDOW)])?;
        Ok(Self {
            file_name: name.to_string(),
            file_path: name.to_string(),
            size: bytes.len() as u64,
            source: Source::Upload(bytes),
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Full document bytes. Path-backed handles open and close the file
    /// within this call.
    pub fn read_bytes(&self) -> Result<Cow<'_, [u8]>, ExtractError> {
        match &self.source {
            Source::Upload(bytes) => Ok(Cow::Borrowed(&bytes[..])),
            Source::Path(path) => std::fs::read(path)
                .map(Cow::Owned)
                .map_err(|source| ExtractError::Io {
                    path: path.clone(),
                    source,
                }),
        }
    }
}

fn check_extension(name: &str) -> Result<(), ExtractError> {
    let ext = Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => Ok(()),
        Some(other) => Err(ExtractError::InvalidFileType {
            name: name.to_string(),
            reason: format!("expected a .pdf file, got .{other}"),
        }),
        None => Err(ExtractError::InvalidFileType {
            name: name.to_string(),
            reason: "missing .pdf extension".into(),
        }),
    }
}

fn check_magic(name: &str, head: &[u8]) -> Result<(), ExtractError> {
    if head.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC) {
        Ok(())
    } else {
        Err(ExtractError::InvalidFileType {
            name: name.to_string(),
            reason: "content does not start with a %PDF- header".into(),
        })
    }
}

/// True when the raw bytes carry an `/Encrypt` entry. Used to tell a
/// password-protected file apart from a corrupt one when a backend refuses
/// to open it.
pub fn looks_encrypted(bytes: &[u8]) -> bool {
    const MARKER: &[u8] = b"/Encrypt";
    bytes.windows(MARKER.len()).any(|w| w == MARKER)
}
