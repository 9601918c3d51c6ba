use crate::commands::{ConfigArgs, DumpArgs};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "ATorch training arguments toolkit", long_about = None)]
pub struct Cli {
    /// Directory for the daily rolling log files
    #[arg(long, global = true, default_value = "logs")]
    pub log_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and validate the arguments
    Validate(ConfigArgs),

    /// Print the serialized arguments (optionally save them)
    Dump(DumpArgs),

    /// Join the process group and bind this process's device
    SetupDevices(ConfigArgs),
}
