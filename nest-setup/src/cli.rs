//! CLI argument parsing for NEST.
//!
//! Makes the console page the default entry point when no subcommand is
//! provided.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nest")]
#[command(about = "🪺 NEST - hosted engine setup console")]
#[command(long_about = "🪺 NEST - hosted engine setup console\n\n\
    Configures the hosted engine VM for a virtualization host: choose PXE\n\
    boot or download an ISO/OVA boot image, then hand off to\n\
    ovirt-hosted-engine-setup.\n\n\
    Run without arguments to launch the interactive console page.\n\
    Or use subcommands for scripting.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Directory where downloaded boot images are kept
    #[arg(long, default_value = "/data/ovirt-hosted-engine-setup", global = true)]
    pub setup_dir: PathBuf,

    /// Answer file handed to ovirt-hosted-engine-setup
    /// (defaults to answers.conf inside the setup dir)
    #[arg(long, global = true)]
    pub answers_file: Option<PathBuf>,

    /// Host defaults file holding the persisted page settings
    #[arg(long, default_value = "/etc/default/ovirt", global = true)]
    pub defaults_file: PathBuf,

    /// Engine vm.conf used to detect an existing deployment
    #[arg(long, default_value = "/etc/ovirt-hosted-engine/vm.conf", global = true)]
    pub vm_conf: PathBuf,

    /// Log file (falls back to stderr when unwritable)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn answers_path(&self) -> PathBuf {
        self.answers_file
            .clone()
            .unwrap_or_else(|| self.setup_dir.join("answers.conf"))
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// 🔍 Print the engine HA status summary
    Status,

    /// 💾 Write the setup configuration without the TUI (for scripting)
    Configure {
        /// Boot the engine VM over PXE
        #[arg(long, conflicts_with = "image")]
        pxe: bool,

        /// URL or local path of the engine ISO/OVA image
        #[arg(long, required_unless_present = "pxe")]
        image: Option<String>,
    },
}
