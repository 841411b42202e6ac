use packvault::archive::{pack, verify, PackOptions};
use packvault::PackError;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn packed_archive(options: &PackOptions) -> (tempfile::TempDir, PathBuf) {
    let source = tempdir().unwrap();
    let root = source.path().join("a");
    fs::create_dir_all(root.join("dir")).unwrap();
    fs::write(root.join("file1.txt"), b"hello").unwrap();
    fs::write(root.join("dir/file2.txt"), b"world").unwrap();

    let work = tempdir().unwrap();
    let archive_path = work.path().join("a.pvk");
    pack(&root, &archive_path, options, &|_| true).unwrap();
    (work, archive_path)
}

fn flip_byte(path: &std::path::Path, offset: usize) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset] ^= 0x01;
    fs::write(path, bytes).unwrap();
}

#[test]
fn intact_archive_verifies() {
    let (_work, archive_path) = packed_archive(&PackOptions::default());
    verify(&archive_path).unwrap();
}

#[test]
fn flipping_a_body_byte_is_detected() {
    // Scenario: flip the byte at offset 273 and expect a checksum failure.
    let (_work, archive_path) = packed_archive(&PackOptions::default());
    flip_byte(&archive_path, 273);
    let err = verify(&archive_path).unwrap_err();
    assert!(matches!(err, PackError::ChecksumMismatch { .. }), "got {:?}", err);
}

#[test]
fn any_single_body_flip_is_detected() {
    let (_work, archive_path) = packed_archive(&PackOptions::default());
    let len = fs::metadata(&archive_path).unwrap().len() as usize;
    let pristine = fs::read(&archive_path).unwrap();

    for offset in [272, 272 + (len - 272) / 2, len - 1] {
        flip_byte(&archive_path, offset);
        assert!(
            matches!(verify(&archive_path), Err(PackError::ChecksumMismatch { .. })),
            "flip at offset {} went unnoticed",
            offset
        );
        fs::write(&archive_path, &pristine).unwrap();
    }
}

#[test]
fn tampering_an_encrypted_archive_is_detected_without_the_password() {
    let options = PackOptions {
        encrypt: true,
        password: Some("pw".to_string()),
        ..Default::default()
    };
    let (_work, archive_path) = packed_archive(&options);
    verify(&archive_path).unwrap();

    flip_byte(&archive_path, 300);
    assert!(matches!(
        verify(&archive_path),
        Err(PackError::ChecksumMismatch { .. })
    ));
}

#[test]
fn truncated_body_fails_verification() {
    let (_work, archive_path) = packed_archive(&PackOptions::default());
    let bytes = fs::read(&archive_path).unwrap();
    fs::write(&archive_path, &bytes[..bytes.len() - 10]).unwrap();
    assert!(matches!(
        verify(&archive_path),
        Err(PackError::ChecksumMismatch { .. })
    ));
}

#[test]
fn file_shorter_than_the_header_is_a_bad_archive() {
    let work = tempdir().unwrap();
    let stub = work.path().join("stub.pvk");
    fs::write(&stub, vec![0u8; 100]).unwrap();
    assert!(matches!(verify(&stub), Err(PackError::BadArchive(_))));
}

#[test]
fn unknown_mod_bits_are_a_bad_archive() {
    let (_work, archive_path) = packed_archive(&PackOptions::default());
    let mut bytes = fs::read(&archive_path).unwrap();
    bytes[268] |= 0b1000_0000;
    fs::write(&archive_path, bytes).unwrap();
    assert!(matches!(verify(&archive_path), Err(PackError::BadArchive(_))));
}

#[test]
fn verify_reports_the_stored_and_computed_sums() {
    let (_work, archive_path) = packed_archive(&PackOptions::default());
    let stored = packvault::archive::read_header(&archive_path).unwrap().checksum;
    flip_byte(&archive_path, 280);
    match verify(&archive_path) {
        Err(PackError::ChecksumMismatch { stored: s, computed }) => {
            assert_eq!(s, stored);
            assert_ne!(computed, stored);
        }
        other => panic!("expected ChecksumMismatch, got {:?}", other.map(|_| ())),
    }
}
