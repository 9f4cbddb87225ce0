//! Answer-file writer for `ovirt-hosted-engine-setup`.
//!
//! The setup tool parses its answer file procedurally, so line order is part
//! of the contract: section header first, `vmBoot` always before
//! `ovfArchive`. Key names and the `str:`/`none:` value prefixes must stay
//! bit-exact.

use crate::errors::SetupError;
use log::{debug, info};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// First three bytes of a gzip stream; OVA archives are gzip-compressed.
const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// How the engine VM boots for its first run.
///
/// Exactly one variant; the page enforces "PXE or image, not both" before
/// one of these is ever constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootMode {
    Pxe,
    Cdrom(PathBuf),
    Disk(PathBuf),
}

impl BootMode {
    fn keyword(&self) -> &'static str {
        match self {
            BootMode::Pxe => "pxe",
            BootMode::Cdrom(_) => "cdrom",
            BootMode::Disk(_) => "disk",
        }
    }
}

/// Decide how a local image file should be booted.
///
/// `.iso` is trusted by extension alone; anything else must carry the gzip
/// signature to count as an OVA disk archive.
pub fn classify_image(path: &Path) -> Result<BootMode, SetupError> {
    if has_iso_extension(path) {
        return Ok(BootMode::Cdrom(path.to_path_buf()));
    }
    if is_gzip(path)? {
        return Ok(BootMode::Disk(path.to_path_buf()));
    }
    Err(SetupError::UnrecognizedImageFormat)
}

fn has_iso_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("iso"))
        .unwrap_or(false)
}

fn is_gzip(path: &Path) -> Result<bool, SetupError> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 3];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        // Shorter than the signature cannot be a gzip archive.
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn render(mode: &BootMode) -> String {
    let mut lines = vec!["[environment:default]".to_string()];
    if let BootMode::Cdrom(image) = mode {
        lines.push(format!("OVEHOSTED_VM/vmCDRom=str:{}", image.display()));
    }
    lines.push(format!("OVEHOSTED_VM/vmBoot=str:{}", mode.keyword()));
    let archive = match mode {
        BootMode::Disk(image) => format!("str:{}", image.display()),
        _ => "none:None".to_string(),
    };
    lines.push(format!("OVEHOSTED_VM/ovfArchive={}", archive));
    lines.join("\n") + "\n"
}

/// Validate `mode` and persist the answer document to `path`.
///
/// Validation runs before anything touches `path`, so a rejected image
/// leaves no document behind. The write goes through a sibling temp file
/// and a rename; the consuming tool never observes a partial document and
/// no handle outlives this call on any exit path.
pub fn write_answers(path: &Path, mode: &BootMode) -> Result<(), SetupError> {
    match mode {
        BootMode::Pxe => {}
        BootMode::Cdrom(image) => {
            if !has_iso_extension(image) {
                return Err(SetupError::UnrecognizedImageFormat);
            }
        }
        BootMode::Disk(image) => {
            if !is_gzip(image)? {
                return Err(SetupError::UnrecognizedImageFormat);
            }
        }
    }

    info!("Saving hosted engine setup configuration");
    let payload = render(mode);

    let tmp_path = temp_path(path);
    let mut file = File::create(&tmp_path)?;
    file.write_all(payload.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            dir.sync_all().ok();
        }
    }

    info!("Wrote hosted engine setup configuration to {}", path.display());
    for line in payload.lines() {
        debug!("answers: {}", line);
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("answers.conf");
    path.with_file_name(format!("{}.tmp", file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::tempdir;

    #[test]
    fn pxe_document_is_exact() {
        let dir = tempdir().unwrap();
        let answers = dir.path().join("answers.conf");
        write_answers(&answers, &BootMode::Pxe).unwrap();
        let written = fs::read_to_string(&answers).unwrap();
        assert_eq!(
            written,
            "[environment:default]\n\
             OVEHOSTED_VM/vmBoot=str:pxe\n\
             OVEHOSTED_VM/ovfArchive=none:None\n"
        );
    }

    #[test]
    fn boot_target_precedes_archive_source() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("engine.ova");
        write(&image, [0x1f, 0x8b, 0x08, 0x00]).unwrap();
        let answers = dir.path().join("answers.conf");
        write_answers(&answers, &BootMode::Disk(image.clone())).unwrap();

        let written = fs::read_to_string(&answers).unwrap();
        let boot = written.find("OVEHOSTED_VM/vmBoot=str:disk").unwrap();
        let archive = written.find("OVEHOSTED_VM/ovfArchive=").unwrap();
        assert!(boot < archive);
        assert_eq!(written.matches("OVEHOSTED_VM/vmBoot=").count(), 1);
        assert!(written.contains(&format!("OVEHOSTED_VM/ovfArchive=str:{}", image.display())));
    }

    #[test]
    fn iso_is_trusted_by_extension_alone() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("engine.iso");
        // Deliberately not gzip; ISO images get no content check.
        write(&image, b"plain bytes").unwrap();
        let answers = dir.path().join("answers.conf");
        write_answers(&answers, &BootMode::Cdrom(image.clone())).unwrap();

        let written = fs::read_to_string(&answers).unwrap();
        assert!(written.contains(&format!("OVEHOSTED_VM/vmCDRom=str:{}", image.display())));
        assert!(written.contains("OVEHOSTED_VM/vmBoot=str:cdrom"));
        assert!(written.contains("OVEHOSTED_VM/ovfArchive=none:None"));
    }

    #[test]
    fn non_gzip_disk_image_writes_nothing() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("engine.ova");
        write(&image, b"not an archive").unwrap();
        let answers = dir.path().join("answers.conf");

        let err = write_answers(&answers, &BootMode::Disk(image)).unwrap_err();
        assert!(matches!(err, SetupError::UnrecognizedImageFormat));
        assert!(!answers.exists());
    }

    #[test]
    fn truncated_disk_image_is_rejected() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("engine.ova");
        write(&image, [0x1f, 0x8b]).unwrap();
        let err = write_answers(&dir.path().join("a.conf"), &BootMode::Disk(image)).unwrap_err();
        assert!(matches!(err, SetupError::UnrecognizedImageFormat));
    }

    #[test]
    fn rewrite_is_byte_identical() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("engine.ova");
        write(&image, [0x1f, 0x8b, 0x08, 0x42]).unwrap();
        let answers = dir.path().join("answers.conf");

        write_answers(&answers, &BootMode::Disk(image.clone())).unwrap();
        let first = fs::read(&answers).unwrap();
        write_answers(&answers, &BootMode::Disk(image)).unwrap();
        let second = fs::read(&answers).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn classify_prefers_iso_extension_over_content() {
        let dir = tempdir().unwrap();
        let iso = dir.path().join("boot.iso");
        write(&iso, [0x1f, 0x8b, 0x08]).unwrap();
        assert_eq!(classify_image(&iso).unwrap(), BootMode::Cdrom(iso.clone()));

        let ova = dir.path().join("engine.ova");
        write(&ova, [0x1f, 0x8b, 0x08]).unwrap();
        assert_eq!(classify_image(&ova).unwrap(), BootMode::Disk(ova.clone()));

        let junk = dir.path().join("engine.img");
        write(&junk, b"junk").unwrap();
        assert!(matches!(
            classify_image(&junk).unwrap_err(),
            SetupError::UnrecognizedImageFormat
        ));
    }
}
