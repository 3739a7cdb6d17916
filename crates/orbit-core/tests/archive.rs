//! Packaging tests: every supported container yields the same guest bytes.

use flate2::write::GzEncoder;
use flate2::Compression;
use orbit_core::archive::{self, ARTIFACT_ENTRY, LEGACY_ENTRY};
use orbit_core::{Container, ModuleLoader, UnwrapError};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;

// (module (func (export "ping") (param i32) (result i32) i32.const 0))
const GUEST: &[u8] = &[
    0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0x01, 0x06, 0x01, 0x60, 0x01, 0x7f, 0x01,
    0x7f, 0x03, 0x02, 0x01, 0x00, 0x07, 0x08, 0x01, 0x04, 0x70, 0x69, 0x6e, 0x67, 0x00, 0x00,
    0x0a, 0x06, 0x01, 0x04, 0x00, 0x41, 0x00, 0x0b,
];

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(data).expect("zip write");
    }
    writer.finish().expect("zip finish").into_inner()
}

fn unwrap_bytes(data: Vec<u8>) -> (Container, Vec<u8>) {
    let binary = archive::unwrap(Box::new(Cursor::new(data))).expect("unwrap");
    let container = binary.container();
    (container, binary.into_bytes().expect("read"))
}

#[test]
fn test_all_containers_yield_identical_bytes() {
    let cases = [
        (Container::Raw, GUEST.to_vec()),
        (Container::Gzip, gzip(GUEST)),
        (Container::Zip, zip_with(&[(ARTIFACT_ENTRY, GUEST)])),
        (Container::Zip, zip_with(&[(LEGACY_ENTRY, GUEST)])),
    ];

    for (expected, data) in cases {
        let (container, bytes) = unwrap_bytes(data);
        assert_eq!(container, expected);
        assert_eq!(bytes, GUEST, "{expected} container changed the payload");
    }
}

#[test]
fn test_current_entry_preferred_over_legacy() {
    let data = zip_with(&[(LEGACY_ENTRY, &b"old"[..]), (ARTIFACT_ENTRY, GUEST)]);
    let (_, bytes) = unwrap_bytes(data);
    assert_eq!(bytes, GUEST);
}

#[test]
fn test_zip_without_guest_entry_names_both() {
    let data = zip_with(&[("README.md", &b"nothing to see"[..])]);
    let err = archive::unwrap(Box::new(Cursor::new(data))).expect_err("no entry");
    assert!(matches!(err, UnwrapError::MissingEntry { .. }));

    let message = err.to_string();
    assert!(message.contains(ARTIFACT_ENTRY), "{message}");
    assert!(message.contains(LEGACY_ENTRY), "{message}");
}

#[test]
fn test_classification_does_not_consume_stream() {
    let data = gzip(GUEST);
    let mut cursor = Cursor::new(data.clone());
    let header = archive::read_header(&mut cursor).expect("header");
    assert_eq!(archive::classify(&header), Container::Gzip);

    let mut rest = Vec::new();
    cursor.read_to_end(&mut rest).expect("read");
    assert_eq!(rest, data);
}

#[test]
fn test_truncated_gzip_is_an_error() {
    let mut data = gzip(GUEST);
    data.truncate(data.len() / 2);
    let binary = archive::unwrap(Box::new(Cursor::new(data))).expect("classified");
    assert_eq!(binary.container(), Container::Gzip);
    assert!(binary.into_bytes().is_err());
}

#[test]
fn test_raw_and_zip_binaries_are_seekable() {
    for data in [GUEST.to_vec(), zip_with(&[(ARTIFACT_ENTRY, GUEST)])] {
        let mut binary = archive::unwrap(Box::new(Cursor::new(data))).expect("unwrap");
        assert!(binary.is_seekable());

        let mut magic = [0u8; 4];
        binary.read_exact(&mut magic).expect("magic");
        assert_eq!(&magic, b"\0asm");

        let end = binary.seek(SeekFrom::End(0)).expect("seek end");
        assert_eq!(end, GUEST.len() as u64);

        binary.seek(SeekFrom::Start(0)).expect("rewind");
        assert_eq!(binary.into_bytes().expect("read"), GUEST);
    }
}

#[test]
fn test_gzip_binary_reads_forward_only() {
    let mut binary = archive::unwrap(Box::new(Cursor::new(gzip(GUEST)))).expect("unwrap");
    assert!(!binary.is_seekable());
    let err = binary.seek(SeekFrom::Start(0)).expect_err("gzip cannot seek");
    assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
    assert_eq!(binary.into_bytes().expect("read"), GUEST);
}

fn write(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("write module");
    path
}

#[tokio::test]
async fn test_loader_unwraps_files_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = [
        write(dir.path(), "guest.wasm", GUEST),
        write(dir.path(), "guest.wasm.gz", &gzip(GUEST)),
        write(dir.path(), "build.zip", &zip_with(&[(ARTIFACT_ENTRY, GUEST)])),
    ];

    for path in files {
        let loaded = ModuleLoader::from_file(&path)
            .load("functions/ping")
            .await
            .expect("load");
        assert_eq!(loaded.bytes, GUEST, "{}", path.display());
        assert_eq!(loaded.reference.tag(), "file");
    }
}

#[tokio::test]
async fn test_loader_missing_file_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = ModuleLoader::from_file(dir.path().join("absent.wasm"))
        .load("functions/ping")
        .await
        .expect_err("missing");
    assert!(matches!(
        err,
        orbit_core::ResolutionError::Locate(orbit_core::LocateError::NotFound(_))
    ));
}
