//! Launcher for the external setup tool.

use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;
use std::process::Command;

fn setup_command(answers: &Path) -> Command {
    let executable =
        env::var("NEST_SETUP_COMMAND").unwrap_or_else(|_| "ovirt-hosted-engine-setup".into());
    let mut cmd = Command::new(executable);
    cmd.arg(format!("--config-append={}", answers.display()));
    cmd
}

/// Hand the terminal over to `ovirt-hosted-engine-setup`. Called only after
/// the TUI has been torn down.
pub fn launch(answers: &Path) -> Result<()> {
    log::info!("Beginning hosted engine setup with {}", answers.display());
    println!("Beginning Hosted Engine Setup ...");
    let status = setup_command(answers)
        .status()
        .context("Failed to run ovirt-hosted-engine-setup (is it installed?)")?;
    if !status.success() {
        bail!("ovirt-hosted-engine-setup failed with status: {}", status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_setup_exit_is_an_error() {
        env::set_var("NEST_SETUP_COMMAND", "/bin/false");
        let err = launch(Path::new("/tmp/answers.conf")).unwrap_err();
        env::set_var("NEST_SETUP_COMMAND", "/bin/true");
        let ok = launch(Path::new("/tmp/answers.conf"));
        env::remove_var("NEST_SETUP_COMMAND");

        assert!(err.to_string().contains("failed with status"));
        assert!(ok.is_ok());
    }
}
