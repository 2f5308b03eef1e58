use crate::config::Hashing;
use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use time::format_description::well_known::Rfc3339;

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    format!("{:x}", h.finalize())
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)?;
    std::fs::write(path, raw).with_context(|| format!("writing {}", path.display()))
}

/// Content hash of an input source. `fast_2x16mb` hashes the first and last
/// window plus the length; `full_sha256` hashes everything.
pub fn hash_source<R: Read + Seek>(hashing: &Hashing, mut src: R, size: u64) -> Result<String> {
    let mut h = Sha256::new();
    match hashing.mode.as_str() {
        "full_sha256" => {
            src.seek(SeekFrom::Start(0))?;
            let mut buf = vec![0u8; 1024 * 1024];
            loop {
                let n = src.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                h.update(&buf[..n]);
            }
        }
        "fast_2x16mb" => {
            let w = hashing.fast_window_bytes.min(size);
            if w > 0 {
                let mut buf = vec![0u8; w as usize];
                src.seek(SeekFrom::Start(0))?;
                src.read_exact(&mut buf)?;
                h.update(&buf);

                if size > w {
                    src.seek(SeekFrom::Start(size - w))?;
                    src.read_exact(&mut buf)?;
                    h.update(&buf);
                }
            }
            h.update(size.to_le_bytes());
        }
        other => anyhow::bail!("unknown hashing.mode: {other}"),
    }
    Ok(format!("{:x}", h.finalize()))
}
