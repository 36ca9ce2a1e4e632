use std::io::Write;

use health_export_ingest::error::IngestError;
use health_export_ingest::services::archive::validate_and_resolve;

fn build_zip(entries: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap();
    file
}

const WELL_FORMED: &[u8] = b"<HealthData><Record type=\"HKQuantityTypeIdentifierStepCount\" startDate=\"2024-01-15 08:30:00 -0500\" value=\"10\"/></HealthData>";

#[test]
fn prefers_export_xml_member_over_others() {
    let zip = build_zip(&[
        ("notes.xml", b"<Notes/>"),
        ("apple_health_export/export.xml", WELL_FORMED),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let zip_path = dir.path().join("export.zip");
    std::fs::copy(zip.path(), &zip_path).unwrap();

    let resolved = validate_and_resolve(&zip_path, dir.path(), 1024 * 1024).unwrap();
    assert!(resolved.ends_with("export.xml"));
}

#[test]
fn falls_back_to_first_xml_member_when_no_export_xml() {
    let zip = build_zip(&[("data/health.xml", WELL_FORMED)]);
    let dir = tempfile::tempdir().unwrap();
    let zip_path = dir.path().join("archive.zip");
    std::fs::copy(zip.path(), &zip_path).unwrap();

    let resolved = validate_and_resolve(&zip_path, dir.path(), 1024 * 1024).unwrap();
    assert!(resolved.ends_with("health.xml"));
}

#[test]
fn rejects_archive_with_no_xml_member() {
    let zip = build_zip(&[("readme.txt", b"nothing here")]);
    let dir = tempfile::tempdir().unwrap();
    let zip_path = dir.path().join("archive.zip");
    std::fs::copy(zip.path(), &zip_path).unwrap();

    let err = validate_and_resolve(&zip_path, dir.path(), 1024 * 1024).unwrap_err();
    assert!(matches!(err, IngestError::ArchiveMalformed(_)));
}

#[test]
fn rejects_truncated_export_inside_archive() {
    let truncated = b"<HealthData><Record type=\"HKQuantityTypeIdentifierStepCount\"";
    let zip = build_zip(&[("export.xml", truncated)]);
    let dir = tempfile::tempdir().unwrap();
    let zip_path = dir.path().join("export.zip");
    std::fs::copy(zip.path(), &zip_path).unwrap();

    let err = validate_and_resolve(&zip_path, dir.path(), 1024 * 1024).unwrap_err();
    assert!(matches!(err, IngestError::InputTruncated));
}
