//! CLI command definitions

use clap::{ArgAction, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// VBM CLI (Rust)
#[derive(Parser, Debug)]
#[command(name = "vbm", version, about = "VirtualBox VM manager in Rust")]
pub struct Cli {
    /// Config file (defaults to <config dir>/vbm/config.json)
    #[arg(long, global = true, env = "VBM_CONFIG")]
    pub config: Option<PathBuf>,

    /// More logging: -v for debug, -vv for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Create or update a VM from a JSON spec file
    Define {
        spec: PathBuf,

        /// Write the VM as read back from VirtualBox to this file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Print a spec with every default filled in, without changing anything
    Defaults { spec: PathBuf },

    /// Show a VM as JSON
    Info { vm: String },

    /// Start a VM headless
    Start { vm: String },

    /// Power off a VM
    Stop { vm: String },

    /// Pause a running VM
    Pause { vm: String },

    /// Resume a paused VM
    Resume { vm: String },

    /// List host networks
    Networks,

    /// List guest OS types
    Ostypes,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Install Fish shell completions automatically
    InstallFish,

    /// Generate man page
    ManPage,
}
