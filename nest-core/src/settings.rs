//! Persisted hosted-engine defaults.
//!
//! The host keeps the operator's page inputs in its defaults file as
//! `KEY="value"` lines. Only the three hosted-engine keys are managed here;
//! everything else in the file is preserved verbatim on rewrite.

use crate::errors::Result;
use anyhow::Context;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const IMAGE_PATH_KEY: &str = "OVIRT_HOSTED_ENGINE_IMAGE_PATH";
pub const PXE_KEY: &str = "OVIRT_HOSTED_ENGINE_PXE";
pub const FORCE_ENABLE_KEY: &str = "OVIRT_HOSTED_ENGINE_FORCE_ENABLE";

const MANAGED_KEYS: [&str; 3] = [IMAGE_PATH_KEY, PXE_KEY, FORCE_ENABLE_KEY];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostedEngineDefaults {
    pub image_path: String,
    pub pxe: bool,
    pub force_enable: bool,
}

impl HostedEngineDefaults {
    /// Load the managed keys from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read defaults file: {}", path.display()))?;

        let mut defaults = Self::default();
        for line in content.lines() {
            let Some((key, value)) = parse_line(line) else {
                continue;
            };
            match key {
                IMAGE_PATH_KEY => defaults.image_path = value,
                PXE_KEY => defaults.pxe = value == "yes",
                FORCE_ENABLE_KEY => defaults.force_enable = value == "yes",
                _ => {}
            }
        }
        Ok(defaults)
    }

    /// Rewrite `path` with these values atomically, preserving unrelated
    /// keys and their order. Booleans serialize as `yes` or drop the key.
    pub fn store(&self, path: &Path) -> Result<()> {
        let existing = if path.exists() {
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read defaults file: {}", path.display()))?
        } else {
            String::new()
        };

        let mut lines: Vec<String> = existing
            .lines()
            .filter(|line| match parse_line(line) {
                Some((key, _)) => !MANAGED_KEYS.contains(&key),
                None => true,
            })
            .map(str::to_string)
            .collect();

        lines.push(format!("{}=\"{}\"", IMAGE_PATH_KEY, self.image_path));
        if self.pxe {
            lines.push(format!("{}=\"yes\"", PXE_KEY));
        }
        if self.force_enable {
            lines.push(format!("{}=\"yes\"", FORCE_ENABLE_KEY));
        }

        let payload = lines.join("\n") + "\n";
        let tmp_path = temp_path(path);
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp defaults file: {}", tmp_path.display()))?;
        file.write_all(payload.as_bytes())
            .context("Failed to write defaults")?;
        file.sync_all().context("Failed to flush defaults")?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace defaults file: {}", path.display()))?;
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<(&str, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim().trim_matches('"').to_string()))
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("defaults");
    path.with_file_name(format!("{}.tmp", file_name))
}
