//! Accepts a raw upload, validates it, and resolves it to a readable XML
//! file path (component C1).
//!
//! Supported inputs are a bare `.xml` file or a `.zip` archive containing
//! one. Zip members are checked against path traversal before anything is
//! written to disk, and the final bytes of the resolved XML are checked for
//! a root closing tag so a truncated upload fails fast instead of silently
//! under-ingesting.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, IngestResult};

const TAIL_CHECK_BYTES: usize = 4096;
const HEAD_CHECK_BYTES: usize = 1024;

/// Validate `upload_path`'s size and extension, resolve a `.zip` to its
/// member XML under `extract_root`, and confirm the resolved file is not
/// truncated. Returns the path to the XML file ready for streaming.
pub fn validate_and_resolve(
    upload_path: &Path,
    extract_root: &Path,
    max_upload_bytes: u64,
) -> IngestResult<PathBuf> {
    let metadata = std::fs::metadata(upload_path)?;
    if metadata.len() > max_upload_bytes {
        return Err(IngestError::InputTooLarge);
    }

    let extension = upload_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let xml_path = match extension.as_deref() {
        Some("xml") => upload_path.to_path_buf(),
        Some("zip") => extract_xml_member(upload_path, extract_root)?,
        _ => return Err(IngestError::UnsupportedInput),
    };

    check_not_truncated(&xml_path)?;
    Ok(xml_path)
}

fn extract_xml_member(zip_path: &Path, extract_root: &Path) -> IngestResult<PathBuf> {
    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| IngestError::ArchiveMalformed(e.to_string()))?;

    let resolved_root = extract_root
        .canonicalize()
        .or_else(|_| {
            std::fs::create_dir_all(extract_root)?;
            extract_root.canonicalize()
        })
        .map_err(IngestError::Io)?;

    let member_index = pick_member(&mut archive)?;

    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| IngestError::ArchiveMalformed(e.to_string()))?;
        let enclosed = entry
            .enclosed_name()
            .ok_or_else(|| IngestError::ArchiveMalformed(format!("unsafe entry path: {}", entry.name())))?;
        let target = resolved_root.join(&enclosed);
        if !target.starts_with(&resolved_root) {
            return Err(IngestError::ArchiveMalformed(format!(
                "entry escapes extraction root: {}",
                entry.name()
            )));
        }
    }

    let mut member = archive
        .by_index(member_index)
        .map_err(|e| IngestError::ArchiveMalformed(e.to_string()))?;
    let enclosed = member
        .enclosed_name()
        .ok_or_else(|| IngestError::ArchiveMalformed("unsafe member path".to_string()))?
        .to_path_buf();
    let dest_path = resolved_root.join(&enclosed);
    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut dest = File::create(&dest_path)?;
    std::io::copy(&mut member, &mut dest)?;

    Ok(dest_path)
}

/// Prefer a member whose path ends in `export.xml`/`Export.xml`; otherwise
/// the first `.xml` member; error if none exist.
fn pick_member<R: Read + Seek>(archive: &mut zip::ZipArchive<R>) -> IngestResult<usize> {
    let mut first_xml: Option<usize> = None;

    for i in 0..archive.len() {
        let name = {
            let entry = archive
                .by_index(i)
                .map_err(|e| IngestError::ArchiveMalformed(e.to_string()))?;
            entry.name().to_string()
        };
        if name.ends_with("export.xml") || name.ends_with("Export.xml") {
            return Ok(i);
        }
        if first_xml.is_none() && name.to_ascii_lowercase().ends_with(".xml") {
            first_xml = Some(i);
        }
    }

    first_xml.ok_or_else(|| {
        IngestError::ArchiveMalformed("no XML file found in archive".to_string())
    })
}

/// Read the document's root element name from the first `HEAD_CHECK_BYTES`
/// bytes, skipping the `<?xml ...?>` declaration if present.
fn read_root_tag_name(xml_path: &Path) -> IngestResult<String> {
    let mut file = File::open(xml_path)?;
    let len = file.metadata()?.len();
    let read_len = HEAD_CHECK_BYTES.min(len as usize);
    let mut head = vec![0u8; read_len];
    file.read_exact(&mut head)?;
    let head_str = String::from_utf8_lossy(&head);

    let mut rest = head_str.as_ref();
    loop {
        let start = rest.find('<').ok_or_else(|| {
            IngestError::ArchiveMalformed("no root element found".to_string())
        })?;
        rest = &rest[start + 1..];
        if rest.starts_with('?') || rest.starts_with('!') {
            continue;
        }
        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
            .unwrap_or(rest.len());
        return Ok(rest[..name_end].to_string());
    }
}

/// Crude but effective truncation check: the document's own root closing tag
/// (not just any closing tag) must appear at the end of the file. A file
/// truncated right after a complete child element — e.g. ending in
/// `</Workout>` with the root never closed — must still fail this check.
fn check_not_truncated(xml_path: &Path) -> IngestResult<()> {
    let root_tag = read_root_tag_name(xml_path)?;
    let closing_tag = format!("</{root_tag}>");

    let mut file = File::open(xml_path)?;
    let len = file.metadata()?.len();
    let read_len = TAIL_CHECK_BYTES.min(len as usize);
    if read_len == 0 {
        return Err(IngestError::InputTruncated);
    }

    file.seek(SeekFrom::End(-(read_len as i64)))?;
    let mut tail = vec![0u8; read_len];
    file.read_exact(&mut tail)?;
    let tail_str = String::from_utf8_lossy(&tail);

    if tail_str.trim_end().ends_with(closing_tag.as_str()) {
        Ok(())
    } else {
        Err(IngestError::InputTruncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        std::fs::write(&path, b"a,b,c").unwrap();
        let err = validate_and_resolve(&path, dir.path(), 1024).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedInput));
    }

    #[test]
    fn rejects_oversized_upload() {
        let file = write_tmp(b"<HealthData></HealthData>");
        let renamed = file.path().with_extension("xml");
        std::fs::copy(file.path(), &renamed).unwrap();
        let err = validate_and_resolve(&renamed, renamed.parent().unwrap(), 4).unwrap_err();
        assert!(matches!(err, IngestError::InputTooLarge));
        let _ = std::fs::remove_file(&renamed);
    }

    #[test]
    fn detects_truncated_xml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.xml");
        std::fs::write(&path, b"<HealthData><Record type=\"x\"").unwrap();
        let err = validate_and_resolve(&path, dir.path(), 1024 * 1024).unwrap_err();
        assert!(matches!(err, IngestError::InputTruncated));
    }

    #[test]
    fn rejects_file_missing_root_closing_tag_even_with_complete_child_element() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.xml");
        std::fs::write(
            &path,
            b"<HealthData><Workout workoutActivityType=\"x\"></Workout>",
        )
        .unwrap();
        let err = validate_and_resolve(&path, dir.path(), 1024 * 1024).unwrap_err();
        assert!(matches!(err, IngestError::InputTruncated));
    }

    #[test]
    fn accepts_well_formed_xml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.xml");
        std::fs::write(&path, b"<HealthData><Record type=\"x\"/></HealthData>").unwrap();
        let resolved = validate_and_resolve(&path, dir.path(), 1024 * 1024).unwrap();
        assert_eq!(resolved, path);
    }
}
