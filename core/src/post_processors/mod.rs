//! Post-processors
//!
//! Derived artifacts are computed per written output, after all primary
//! outputs exist. A post-processor failure never fails the run and never
//! touches other outputs; it is recorded and reported alongside the results.

pub mod pixel_range;
pub mod thumbnail;

pub use pixel_range::PixelRangeProcessor;
pub use thumbnail::ThumbnailProcessor;

use crate::models::{DerivedFile, OutputFile};
use log::warn;
use serde::Serialize;
use std::path::PathBuf;

/// One recorded post-processing failure
#[derive(Debug, Clone, Serialize)]
pub struct PostFailure {
    /// The primary output the processor ran on
    pub output: PathBuf,
    pub processor: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct PostProcessOutcome {
    pub derived: Vec<DerivedFile>,
    pub failures: Vec<PostFailure>,
}

/// Derives secondary artifacts from one written output
pub trait PostProcessor {
    /// Short name used in logs and failure records
    fn name(&self) -> &'static str;

    /// Produces at most one derived file for `output`.
    ///
    /// `Ok(None)` means the processor does not apply to this output, which
    /// is not a failure.
    fn process(&self, output: &OutputFile) -> Result<Option<DerivedFile>, String>;
}

/// Default post-processor registry
pub fn default_post_processors() -> Vec<Box<dyn PostProcessor>> {
    vec![
        Box::new(PixelRangeProcessor::new()),
        Box::new(ThumbnailProcessor::new()),
    ]
}

/// Runs every processor over every output, isolating failures
pub fn post_process(
    outputs: &[OutputFile],
    processors: &[Box<dyn PostProcessor>],
) -> PostProcessOutcome {
    let mut outcome = PostProcessOutcome::default();

    for output in outputs {
        for processor in processors {
            match processor.process(output) {
                Ok(Some(derived)) => outcome.derived.push(derived),
                Ok(None) => {}
                Err(message) => {
                    warn!(
                        "post-processor `{}` failed on {:?}: {}",
                        processor.name(),
                        output.path,
                        message
                    );
                    outcome.failures.push(PostFailure {
                        output: output.path.clone(),
                        processor: processor.name(),
                        message,
                    });
                }
            }
        }
    }

    outcome
}
