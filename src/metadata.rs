use crate::{backend::lopdf_text::load_document, document::DocumentHandle, error::ExtractError};
use lopdf::{Dictionary, Document, Object};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, Date, Month, PrimitiveDateTime, Time, UtcOffset};
use tracing::{debug, info};

/// Document-level descriptive fields. Missing fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub total_pages: u32,
    pub title: String,
    pub author: String,
    pub creator: String,
    pub producer: String,
    pub creation_date: String,
    pub modification_date: String,
    pub subject: String,
    pub keywords: String,
}

impl MetadataRecord {
    /// A record with identity fields only, for documents whose info
    /// dictionary cannot be read.
    pub fn empty(doc: &DocumentHandle, total_pages: u32) -> Self {
        Self {
            file_name: doc.file_name().to_string(),
            file_path: doc.file_path().to_string(),
            file_size: doc.size(),
            total_pages,
            ..Default::default()
        }
    }
}

/// Read the trailer `Info` dictionary and page count with lopdf.
///
/// Only a document that cannot be parsed or unlocked is an error; absent or
/// undecodable fields come back empty.
pub fn read_metadata(doc: &DocumentHandle) -> Result<MetadataRecord, ExtractError> {
    info!("reading metadata for {}", doc.file_name());
    let pdf = load_document(doc)?;

    let mut record = MetadataRecord::empty(doc, pdf.get_pages().len() as u32);
    let Some(info) = info_dictionary(&pdf) else {
        debug!("{} has no Info dictionary", doc.file_name());
        return Ok(record);
    };

    let field = |key: &[u8]| -> String {
        info.get(key)
            .ok()
            .and_then(|obj| resolve(&pdf, obj))
            .and_then(text_of)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    record.title = field(b"Title");
    record.author = field(b"Author");
    record.creator = field(b"Creator");
    record.producer = field(b"Producer");
    record.subject = field(b"Subject");
    record.keywords = field(b"Keywords");
    record.creation_date = render_pdf_date(&field(b"CreationDate"));
    record.modification_date = render_pdf_date(&field(b"ModDate"));

    Ok(record)
}

fn info_dictionary(pdf: &Document) -> Option<&Dictionary> {
    let obj = pdf.trailer.get(b"Info").ok()?;
    resolve(pdf, obj)?.as_dict().ok()
}

fn resolve<'a>(pdf: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => pdf.get_object(*id).ok(),
        other => Some(other),
    }
}

fn text_of(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        Object::Name(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

/// PDF text strings are UTF-16BE with a BOM, UTF-8 with a BOM, or
/// PDFDocEncoding (Latin-1 for every printable byte we care about).
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Convert a PDF date (`D:YYYYMMDDHHmmSSOHH'mm'`) to RFC 3339. Anything that
/// does not parse is returned unchanged; an empty input stays empty.
pub fn render_pdf_date(raw: &str) -> String {
    parse_pdf_date(raw).unwrap_or_else(|| raw.to_string())
}

fn parse_pdf_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    let s = s.strip_prefix("D:").unwrap_or(s);
    let digits_len = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len < 4 {
        return None;
    }
    let (digits, tz) = s.split_at(digits_len);

    // Fields after the year are optional 2-digit groups; a stray digit is
    // a truncated field, not a missing one.
    if digits_len > 14 || digits_len % 2 != 0 {
        return None;
    }
    let num = |from: usize, len: usize, default: u8| -> Option<u8> {
        match digits.get(from..from + len) {
            Some(part) => part.parse().ok(),
            None => Some(default),
        }
    };
    let year: i32 = digits.get(0..4)?.parse().ok()?;
    let month = Month::try_from(num(4, 2, 1)?).ok()?;
    let date = Date::from_calendar_date(year, month, num(6, 2, 1)?).ok()?;
    let time = Time::from_hms(num(8, 2, 0)?, num(10, 2, 0)?, num(12, 2, 0)?).ok()?;
    let offset = parse_offset(tz)?;

    PrimitiveDateTime::new(date, time)
        .assume_offset(offset)
        .format(&Rfc3339)
        .ok()
}

fn parse_offset(tz: &str) -> Option<UtcOffset> {
    let tz = tz.trim();
    let sign: i8 = match tz.chars().next() {
        None | Some('Z') => return Some(UtcOffset::UTC),
        Some('+') => 1,
        Some('-') => -1,
        Some(_) => return None,
    };
    let parts: Vec<&str> = tz[1..]
        .split('\'')
        .filter(|p| !p.is_empty())
        .collect();
    let hours: i8 = parts.first().map_or(Some(0), |p| p.parse().ok())?;
    let minutes: i8 = parts.get(1).map_or(Some(0), |p| p.parse().ok())?;
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}
