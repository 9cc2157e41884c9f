pub mod report;

use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

/// Command-line arguments for voxconv
#[derive(Parser, Debug)]
#[command(name = "voxconv")]
#[command(about = "Convert medical image files to MetaIO volumes")]
#[command(version)]
pub struct Cli {
    /// Directory containing the input files
    #[arg(value_name = "INPUT_DIR")]
    pub input: PathBuf,

    /// Directory to write converted images to
    #[arg(value_name = "OUTPUT_DIR")]
    pub output: PathBuf,

    /// Do not descend into subdirectories of the input directory
    #[arg(long)]
    pub no_recurse: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Output format options
#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    Text,
    /// JSON format
    Json,
}

/// Collects candidate files from the input directory
///
/// Every regular file is a candidate; format detection is left to the image
/// builders, so no extension filtering happens here.
pub fn collect_files(directory: &Path, recurse: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() {
            files.push(path);
        } else if path.is_dir() && recurse {
            files.extend(collect_files(&path, recurse)?);
        }
    }

    Ok(files)
}
