//! Conversion orchestration
//!
//! Drives the registered image builders over one candidate file set, writes
//! the produced images as MetaIO files and runs post-processors over the
//! written outputs. Accounting is exhaustive: every input file ends up
//! either consumed by exactly one produced image or carrying at least one
//! error in the report.

use crate::builders::{self, ImageBuilder};
use crate::error::{Result, VoxconvError};
use crate::metaio;
use crate::models::{DerivedFile, FileErrors, OutputFile, OutputKind, SourceImage};
use crate::post_processors::{self, PostFailure, PostProcessor};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Error attached to files no builder claimed or rejected
pub const UNEXPLAINED_FILE_ERROR: &str = "no image builder could interpret this file";

/// Result of the builder phase, before anything is written
#[derive(Debug)]
pub struct ConvertOutcome {
    pub images: Vec<SourceImage>,
    pub file_errors: FileErrors,
}

/// Full result of one conversion run
#[derive(Debug, Serialize)]
pub struct ConversionReport {
    pub outputs: Vec<OutputFile>,
    pub derived: Vec<DerivedFile>,
    pub post_errors: Vec<PostFailure>,
    pub file_errors: FileErrors,
}

impl ConversionReport {
    /// Whether every input file was converted without errors
    pub fn is_clean(&self) -> bool {
        self.file_errors.is_empty() && self.post_errors.is_empty()
    }
}

/// Runs the builders over the candidate set and enforces their contract
///
/// Builders run in registry order against a shrinking pool: files claimed by
/// a produced image are withdrawn before the next builder runs, along with
/// any rejection errors recorded for them earlier. Builder errors are only
/// kept for files that remain unclaimed at that point.
///
/// # Errors
///
/// Returns [`VoxconvError::BuilderContract`] when a builder produces an
/// image with an empty `consumed_files` set or claims a file outside the
/// pool it was given. Both indicate a broken builder, so the run aborts.
pub fn convert(
    files: &BTreeSet<PathBuf>,
    builders: &[Box<dyn ImageBuilder>],
) -> Result<ConvertOutcome> {
    let mut pool = files.clone();
    let mut images = Vec::new();
    let mut file_errors = FileErrors::new();

    for builder in builders {
        if pool.is_empty() {
            break;
        }
        debug!(
            "running builder `{}` over {} file(s)",
            builder.name(),
            pool.len()
        );
        let output = builder.build(&pool);

        for mut image in output.images {
            if image.consumed_files.is_empty() {
                return Err(VoxconvError::BuilderContract {
                    builder: builder.name(),
                    reason: format!("image `{}` consumed no files", image.name),
                });
            }
            if let Some(outside) = image.consumed_files.iter().find(|f| !pool.contains(*f)) {
                return Err(VoxconvError::BuilderContract {
                    builder: builder.name(),
                    reason: format!("claimed a file outside the candidate set: {:?}", outside),
                });
            }
            for file in &image.consumed_files {
                pool.remove(file);
                // A successful claim overrides rejections by earlier builders
                file_errors.remove(file);
            }
            image.extract_segments();
            images.push(image);
        }

        for (file, messages) in output.file_errors {
            if pool.contains(&file) {
                file_errors.entry(file).or_default().extend(messages);
            }
        }
    }

    // Exhaustiveness: leftover files that no builder even rejected still get
    // exactly one explanatory entry
    for file in pool {
        file_errors
            .entry(file)
            .or_insert_with(|| vec![UNEXPLAINED_FILE_ERROR.to_string()]);
    }

    Ok(ConvertOutcome {
        images,
        file_errors,
    })
}

/// Converts a candidate set with the default builders and post-processors
///
/// # Errors
///
/// Returns an error for builder contract violations and for failures writing
/// the primary outputs. Per-file and post-processing problems are reported
/// inside the returned [`ConversionReport`] instead.
pub fn run(files: &BTreeSet<PathBuf>, output_dir: &Path) -> Result<ConversionReport> {
    run_with(
        files,
        output_dir,
        &builders::default_builders(),
        &post_processors::default_post_processors(),
    )
}

/// [`run`] with explicit builder and post-processor registries
pub fn run_with(
    files: &BTreeSet<PathBuf>,
    output_dir: &Path,
    builders: &[Box<dyn ImageBuilder>],
    processors: &[Box<dyn PostProcessor>],
) -> Result<ConversionReport> {
    info!("converting {} candidate file(s)", files.len());
    let outcome = convert(files, builders)?;
    fs::create_dir_all(output_dir)?;

    let mut used_stems: BTreeSet<String> = BTreeSet::new();
    let mut outputs = Vec::new();
    for image in &outcome.images {
        // Distinct images may share a name; suffix until the stem is free
        let mut stem = image.name.clone();
        let mut suffix = 1;
        while !used_stems.insert(stem.clone()) {
            stem = format!("{}-{}", image.name, suffix);
            suffix += 1;
        }
        let path = output_dir.join(format!("{}.mha", stem));
        metaio::write_mha(image, &path)?;
        debug!(
            "wrote {:?} from {} input file(s)",
            path,
            image.consumed_files.len()
        );
        outputs.push(OutputFile {
            path,
            kind: OutputKind::Mha,
            name: image.name.clone(),
            consumed_files: image.consumed_files.clone(),
        });
    }

    let post = post_processors::post_process(&outputs, processors);
    info!(
        "run finished: {} output(s), {} derived file(s), {} file(s) with errors",
        outputs.len(),
        post.derived.len(),
        outcome.file_errors.len()
    );

    Ok(ConversionReport {
        outputs,
        derived: post.derived,
        post_errors: post.failures,
        file_errors: outcome.file_errors,
    })
}
