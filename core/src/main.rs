use clap::Parser;
use log::{error, info};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process;
use voxconv_core::api;
use voxconv_core::cli::{collect_files, report::TextReport, Cli, OutputFormat};

fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    if !cli.input.is_dir() {
        eprintln!("Error: {} is not a directory", cli.input.display());
        process::exit(2);
    }

    info!("Scanning input directory: {}", cli.input.display());

    let files: BTreeSet<PathBuf> = match collect_files(&cli.input, !cli.no_recurse) {
        Ok(files) => files.into_iter().collect(),
        Err(e) => {
            error!("Failed to read input directory: {}", e);
            eprintln!("Error: Failed to read input directory: {}", e);
            process::exit(2);
        }
    };

    if files.is_empty() {
        eprintln!("Error: No files found in input directory");
        process::exit(2);
    }

    info!("Found {} candidate file(s)", files.len());

    let report = match api::run(&files, &cli.output) {
        Ok(report) => report,
        Err(e) => {
            error!("Conversion run failed: {}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    match cli.format {
        OutputFormat::Text => {
            println!("{}", TextReport::new(&report));
        }
        OutputFormat::Json => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize report to JSON: {}", e);
                eprintln!("Error: Failed to serialize report to JSON: {}", e);
                process::exit(1);
            }
        },
    }
}

fn setup_logging(verbose: bool) {
    if verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }
}
