#![allow(dead_code)]

use docsift::{
    backend::{Backend, ExtractionMethod, OpenedDocument},
    document::DocumentHandle,
    error::ExtractError,
};
use lopdf::{
    Dictionary, Document, Object, ObjectId, Stream, StringFormat,
    content::{Content, Operation},
    dictionary, encryption,
};
use std::path::{Path, PathBuf};

/// What goes into a generated fixture PDF.
#[derive(Default)]
pub struct Fixture<'a> {
    pub pages: Vec<&'a str>,
    pub info: Vec<(&'a str, &'a str)>,
    pub lock: Lock<'a>,
    /// 1-based page whose content stream is broken, and how.
    pub damage: Option<(usize, Damage)>,
}

/// Standard security handler applied to a fixture.
#[derive(Default, Clone, Copy)]
pub enum Lock<'a> {
    #[default]
    None,
    /// A handler revision no reader supports.
    Unsupported,
    /// RC4 40-bit (V1/R2). An empty user password leaves the file readable
    /// to anyone; only the owner password guards permissions.
    Rc4 { user_password: &'a str },
}

#[derive(Clone, Copy)]
pub enum Damage {
    /// Claims `/FlateDecode` but the body is not zlib.
    BadFlate,
    /// Text string never closed, so the text object never ends.
    UnterminatedString,
    /// `/Contents` points at an object that does not exist.
    DanglingContents,
}

const PASSWORD_PAD: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01,
    0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53,
    0x69, 0x7A,
];

fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut state: Vec<u8> = (0..=255).collect();
    let mut j = 0u8;
    for i in 0..256 {
        j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
        state.swap(i, j as usize);
    }
    let (mut i, mut j) = (0u8, 0u8);
    data.iter()
        .map(|b| {
            i = i.wrapping_add(1);
            j = j.wrapping_add(state[i as usize]);
            state.swap(i as usize, j as usize);
            b ^ state[state[i as usize].wrapping_add(state[j as usize]) as usize]
        })
        .collect()
}

fn text_content(text: &str) -> Vec<u8> {
    Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    }
    .encode()
    .expect("encode content")
}

pub fn pdf_bytes(fx: &Fixture<'_>) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for (i, text) in fx.pages.iter().enumerate() {
        let damage = fx.damage.filter(|(page, _)| *page == i + 1).map(|(_, d)| d);
        let contents: Object = match damage {
            None => doc
                .add_object(Stream::new(Dictionary::new(), text_content(text)))
                .into(),
            Some(Damage::BadFlate) => doc
                .add_object(Stream::new(
                    dictionary! { "Filter" => "FlateDecode" },
                    b"this body was never deflated".to_vec(),
                ))
                .into(),
            Some(Damage::UnterminatedString) => {
                let body = format!("BT /F1 24 Tf 72 700 Td ({text} Tj ET");
                doc.add_object(Stream::new(Dictionary::new(), body.into_bytes()))
                    .into()
            }
            Some(Damage::DanglingContents) => Object::Reference((999, 0)),
        };
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => contents,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut info_id = None;
    if !fx.info.is_empty() {
        let mut info = Dictionary::new();
        for (k, v) in &fx.info {
            info.set(k.as_bytes().to_vec(), Object::string_literal(*v));
        }
        let id = doc.add_object(info);
        doc.trailer.set("Info", id);
        info_id = Some(id);
    }

    match fx.lock {
        Lock::None => {}
        Lock::Unsupported => {
            let encrypt_id = doc.add_object(dictionary! {
                "Filter" => "Standard",
                "V" => 99,
                "R" => 99,
                "Length" => 128,
                "O" => Object::string_literal(vec![0u8; 32]),
                "U" => Object::string_literal(vec![0u8; 32]),
                "P" => -4,
            });
            doc.trailer.set("Encrypt", encrypt_id);
        }
        Lock::Rc4 { user_password } => lock_rc4(&mut doc, info_id, user_password),
    }

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save fixture pdf");
    out
}

/// Encrypt every string and stream the way a standard V1/R2 writer does.
fn lock_rc4(doc: &mut Document, info_id: Option<ObjectId>, user_password: &str) {
    let file_id = Object::String(b"docsift-fixture!".to_vec(), StringFormat::Hexadecimal);
    doc.trailer.set("ID", vec![file_id.clone(), file_id]);

    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "Length" => 40,
        "O" => Object::String(vec![0x5A; 32], StringFormat::Hexadecimal),
        "U" => Object::String(vec![0; 32], StringFormat::Hexadecimal),
        "P" => -3904,
    });
    doc.trailer.set("Encrypt", encrypt_id);

    let key = encryption::get_encryption_key(doc, user_password, false).expect("file key");
    let check = Object::String(rc4(&key, &PASSWORD_PAD), StringFormat::Hexadecimal);
    doc.get_dictionary_mut(encrypt_id)
        .expect("encrypt dict")
        .set("U", check);

    for (&id, obj) in doc.objects.iter_mut() {
        if id == encrypt_id {
            continue;
        }
        let Ok(sealed) = encryption::decrypt_object(&key, id, &*obj) else {
            continue;
        };
        *obj = match std::mem::replace(obj, Object::Null) {
            Object::Stream(mut stream) => {
                stream.set_content(sealed);
                Object::Stream(stream)
            }
            _ => Object::String(sealed, StringFormat::Hexadecimal),
        };
    }

    if let Some(info_id) = info_id {
        let info = doc.get_dictionary_mut(info_id).expect("info dict");
        for (_, value) in info.iter_mut() {
            if let Ok(sealed) = encryption::decrypt_object(&key, info_id, &*value) {
                *value = Object::String(sealed, StringFormat::Hexadecimal);
            }
        }
    }
}

pub fn write_pdf(dir: &Path, name: &str, fx: &Fixture<'_>) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, pdf_bytes(fx)).expect("write fixture");
    path
}

/// A handle over bytes that merely look like a PDF; only fake backends read it.
pub fn fake_handle(name: &str) -> DocumentHandle {
    DocumentHandle::from_upload(name, b"%PDF-1.4\n% fake body\n".to_vec()).expect("fake handle")
}

/// Outcome a fake backend produces for one page.
#[derive(Clone)]
pub enum PageOutcome {
    Text(&'static str),
    Error(&'static str),
    Panic,
}

/// Scripted backend for fallback scenarios.
#[derive(Clone)]
pub enum FakeBackend {
    Pages(ExtractionMethod, Vec<PageOutcome>),
    CannotOpen(ExtractionMethod, &'static str),
    Locked(ExtractionMethod),
}

impl FakeBackend {
    pub fn pages(method: ExtractionMethod, texts: &[&'static str]) -> Self {
        Self::Pages(method, texts.iter().map(|t| PageOutcome::Text(*t)).collect())
    }
}

struct FakeOpened(Vec<PageOutcome>);

impl OpenedDocument for FakeOpened {
    fn page_count(&self) -> u32 {
        self.0.len() as u32
    }

    fn page_text(&self, page: u32) -> Result<String, String> {
        match &self.0[(page - 1) as usize] {
            PageOutcome::Text(t) => Ok(t.to_string()),
            PageOutcome::Error(e) => Err(e.to_string()),
            PageOutcome::Panic => panic!("corrupt content stream"),
        }
    }
}

impl Backend for FakeBackend {
    fn method(&self) -> ExtractionMethod {
        match self {
            Self::Pages(m, _) | Self::CannotOpen(m, _) | Self::Locked(m) => *m,
        }
    }

    fn open(&self, doc: &DocumentHandle) -> Result<Box<dyn OpenedDocument>, ExtractError> {
        match self {
            Self::Pages(_, pages) => Ok(Box::new(FakeOpened(pages.clone()))),
            Self::CannotOpen(m, reason) => Err(ExtractError::BackendExtractionFailure {
                method: *m,
                name: doc.file_name().to_string(),
                reason: reason.to_string(),
            }),
            Self::Locked(_) => Err(ExtractError::PasswordProtected(doc.file_name().to_string())),
        }
    }
}
