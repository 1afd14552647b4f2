use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "apk",
    version,
    about = "Alpine-style package keeper",
    disable_help_subcommand = true
)]
pub struct ApkCli {
    #[arg(
        long,
        global = true,
        default_value = "/",
        help = "Root filesystem to operate on"
    )]
    pub root: PathBuf,
    #[arg(
        long,
        global = true,
        help = "Use an additional repository (also APK_REPOSITORY)"
    )]
    pub repository: Option<String>,
    #[arg(
        short,
        long,
        global = true,
        help = "Suppress output; print a progress dot per installed package"
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)")]
    pub verbose: u8,
    #[arg(long, global = true, help = "Emit a JSON summary on success")]
    pub json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a root filesystem
    Create,
    /// Add packages to the world and commit the resolved set
    Add {
        /// Local package archives to register before resolving
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,
        /// Package names to require
        names: Vec<String>,
    },
    /// Remove packages from the world and commit the resolved set
    Del {
        names: Vec<String>,
    },
    /// Re-resolve the world against the newest available versions
    Upgrade,
    /// Build a gzipped repository index from package files
    Index {
        /// Where to write the index
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
        files: Vec<PathBuf>,
    },
}
