//! Read-only inspection of an existing engine vm.conf.

use std::fs;
use std::path::Path;

/// The engine counts as configured once its vm.conf exists.
pub fn is_configured(vm_conf: &Path) -> bool {
    vm_conf.exists()
}

/// Engine VM name from the first `vmName=` line, if any.
pub fn vm_name(vm_conf: &Path) -> Option<String> {
    let content = fs::read_to_string(vm_conf).ok()?;
    content.lines().find_map(|line| {
        let (key, value) = line.trim().split_once('=')?;
        (key.trim() == "vmName").then(|| value.trim().to_string())
    })
}
