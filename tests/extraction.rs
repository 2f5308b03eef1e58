mod common;

use common::{Damage, FakeBackend, Fixture, Lock, pdf_bytes, write_pdf};
use docsift::{
    backend::{ExtractionMethod, ExtractionStatus, LopdfBackend, PdfExtractBackend},
    config::Config,
    document::DocumentHandle,
    error::ExtractError,
    extract::extract_with,
    metadata::read_metadata,
    pipeline::Pipeline,
};

fn pipeline() -> Pipeline {
    Pipeline::new(&Config::default()).expect("pipeline")
}

#[test]
fn single_page_document_extracts_with_primary() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(
        dir.path(),
        "hello.pdf",
        &Fixture {
            pages: vec!["Hello World"],
            ..Default::default()
        },
    );

    let out = pipeline().extract_all(&DocumentHandle::open(&path).unwrap()).unwrap();
    assert_eq!(out.status, ExtractionStatus::Success);
    assert_eq!(out.extraction_method, ExtractionMethod::Lopdf);
    assert_eq!(out.total_pages, 1);
    assert_eq!(out.text_by_page.len(), out.total_pages as usize);
    assert!(out.text_by_page[&1].contains("Hello World"));
    assert_eq!(out.metadata.total_pages, 1);
}

#[test]
fn every_page_gets_an_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(
        dir.path(),
        "three.pdf",
        &Fixture {
            pages: vec!["First", "Second", "Third"],
            ..Default::default()
        },
    );
    let doc = DocumentHandle::open(&path).unwrap();

    let res = extract_with(&LopdfBackend, &doc).unwrap();
    assert_eq!(res.total_pages, 3);
    assert_eq!(res.text_by_page.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(res.text_by_page[&2].contains("Second"));
}

#[test]
fn missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = DocumentHandle::open(&dir.path().join("missing.pdf")).unwrap_err();
    assert!(matches!(err, ExtractError::FileNotFound(_)));
    assert_eq!(err.kind(), "file_not_found");
}

#[test]
fn non_pdf_extension_is_invalid_type() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "just text").unwrap();
    let err = DocumentHandle::open(&path).unwrap_err();
    assert!(matches!(err, ExtractError::InvalidFileType { .. }));
}

#[test]
fn pdf_extension_with_wrong_content_is_invalid_type() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake.pdf");
    std::fs::write(&path, "not really a pdf").unwrap();
    let err = DocumentHandle::open(&path).unwrap_err();
    assert!(matches!(err, ExtractError::InvalidFileType { .. }));
}

#[test]
fn unsupported_security_handler_is_password_protected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(
        dir.path(),
        "locked.pdf",
        &Fixture {
            pages: vec!["secret"],
            lock: Lock::Unsupported,
            ..Default::default()
        },
    );
    let doc = DocumentHandle::open(&path).unwrap();

    let err = pipeline().extract_all(&doc).unwrap_err();
    assert!(
        matches!(err, ExtractError::PasswordProtected(_)),
        "got {err:?}"
    );
    assert!(matches!(read_metadata(&doc), Err(ExtractError::PasswordProtected(_))));
}

#[test]
fn owner_password_only_document_is_readable() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(
        dir.path(),
        "owner_only.pdf",
        &Fixture {
            pages: vec!["Owner locked but readable"],
            info: vec![("Title", "Print Restricted")],
            lock: Lock::Rc4 { user_password: "" },
            ..Default::default()
        },
    );
    let doc = DocumentHandle::open(&path).unwrap();

    let out = pipeline().extract_all(&doc).unwrap();
    assert_eq!(out.status, ExtractionStatus::Success);
    assert_eq!(out.extraction_method, ExtractionMethod::Lopdf);
    assert!(out.text_by_page[&1].contains("Owner locked but readable"));
    assert_eq!(out.metadata.title, "Print Restricted");
}

#[test]
fn user_password_document_is_password_protected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(
        dir.path(),
        "user_locked.pdf",
        &Fixture {
            pages: vec!["needs a password"],
            lock: Lock::Rc4 { user_password: "secret" },
            ..Default::default()
        },
    );
    let doc = DocumentHandle::open(&path).unwrap();

    let err = pipeline().extract_all(&doc).unwrap_err();
    assert!(matches!(err, ExtractError::PasswordProtected(_)), "got {err:?}");
    assert!(matches!(read_metadata(&doc), Err(ExtractError::PasswordProtected(_))));
}

fn damaged_second_page(damage: Damage) -> DocumentHandle {
    let bytes = pdf_bytes(&Fixture {
        pages: vec!["Good page", "Lost page"],
        damage: Some((2, damage)),
        ..Default::default()
    });
    DocumentHandle::from_upload("damaged.pdf", bytes).unwrap()
}

#[test]
fn damaged_page_degrades_to_empty_with_warning() {
    for damage in [
        Damage::BadFlate,
        Damage::UnterminatedString,
        Damage::DanglingContents,
    ] {
        let res = extract_with(&LopdfBackend, &damaged_second_page(damage)).unwrap();
        assert_eq!(res.status, ExtractionStatus::Partial);
        assert_eq!(res.total_pages, 2);
        assert!(res.text_by_page[&1].contains("Good page"));
        assert_eq!(res.text_by_page[&2], "");
        assert_eq!(res.warnings.len(), 1);
        assert!(res.warnings[0].contains("page 2"), "{:?}", res.warnings);
    }
}

#[test]
fn damaged_page_surfaces_as_partial_document() {
    let out = pipeline()
        .extract_all(&damaged_second_page(Damage::BadFlate))
        .unwrap();
    assert_eq!(out.status, ExtractionStatus::Partial);
    assert_eq!(out.total_pages, 2);
    assert_eq!(out.text_by_page.len(), 2);
    assert!(out.warnings.iter().any(|w| w.contains("page 2")));
}

#[test]
fn pdf_extract_backend_reads_every_page() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(
        dir.path(),
        "three.pdf",
        &Fixture {
            pages: vec!["First", "Second", "Third"],
            ..Default::default()
        },
    );
    let doc = DocumentHandle::open(&path).unwrap();

    let res = extract_with(&PdfExtractBackend, &doc).unwrap();
    assert_eq!(res.status, ExtractionStatus::Success);
    assert_eq!(res.extraction_method, ExtractionMethod::PdfExtract);
    assert_eq!(res.total_pages, 3);
    assert_eq!(res.text_by_page.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(res.text_by_page[&2].contains("Second"));
}

#[test]
fn failed_primary_falls_back_to_pdf_extract() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(
        dir.path(),
        "fallback.pdf",
        &Fixture {
            pages: vec!["Rescued text", "More rescued text"],
            ..Default::default()
        },
    );
    let doc = DocumentHandle::open(&path).unwrap();
    let pipeline = Pipeline::with_backends(
        &Config::default(),
        Box::new(FakeBackend::CannotOpen(
            ExtractionMethod::Lopdf,
            "xref table unreadable",
        )),
        Box::new(PdfExtractBackend),
    )
    .unwrap();

    let out = pipeline.extract_all(&doc).unwrap();
    assert_eq!(out.extraction_method, ExtractionMethod::PdfExtract);
    assert_eq!(out.status, ExtractionStatus::Success);
    assert_eq!(out.total_pages, 2);
    assert_eq!(out.metadata.total_pages, 2);
    assert!(out.text_by_page[&1].contains("Rescued text"));
}

#[test]
fn metadata_fields_present_and_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(
        dir.path(),
        "meta.pdf",
        &Fixture {
            pages: vec!["Body", "More"],
            info: vec![
                ("Title", "Quarterly Report"),
                ("Author", "Jane Roe"),
                ("CreationDate", "D:20240315093000Z"),
            ],
            ..Default::default()
        },
    );
    let doc = DocumentHandle::open(&path).unwrap();

    let meta = read_metadata(&doc).unwrap();
    assert_eq!(meta.title, "Quarterly Report");
    assert_eq!(meta.author, "Jane Roe");
    assert_eq!(meta.creation_date, "2024-03-15T09:30:00Z");
    assert_eq!(meta.modification_date, "");
    assert_eq!(meta.subject, "");
    assert_eq!(meta.keywords, "");
    assert_eq!(meta.total_pages, 2);
    assert_eq!(meta.file_size, doc.size());
    assert_eq!(meta.file_name, "meta.pdf");
}

#[test]
fn metadata_without_info_dictionary_is_all_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(
        dir.path(),
        "bare.pdf",
        &Fixture {
            pages: vec!["x"],
            ..Default::default()
        },
    );
    let meta = read_metadata(&DocumentHandle::open(&path).unwrap()).unwrap();
    assert_eq!(meta.title, "");
    assert_eq!(meta.author, "");
    assert_eq!(meta.creation_date, "");
    assert_eq!(meta.total_pages, 1);
}

#[test]
fn uploads_extract_like_files() {
    let bytes = pdf_bytes(&Fixture {
        pages: vec!["Uploaded text"],
        ..Default::default()
    });
    let doc = DocumentHandle::from_upload("upload.pdf", bytes).unwrap();
    let out = pipeline().extract_all(&doc).unwrap();
    assert_eq!(out.file_name, "upload.pdf");
    assert!(out.text_by_page[&1].contains("Uploaded text"));
}

#[test]
fn open_enforces_size_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(
        dir.path(),
        "small.pdf",
        &Fixture {
            pages: vec!["x"],
            ..Default::default()
        },
    );
    let mut cfg = Config::default();
    cfg.limits.max_input_file_bytes = 16;
    let err = Pipeline::new(&cfg).unwrap().open(&path).unwrap_err();
    assert!(matches!(err, ExtractError::FileTooLarge { .. }));
}
