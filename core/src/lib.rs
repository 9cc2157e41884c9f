pub mod api;
pub mod builders;
pub mod cli;
pub mod error;
pub mod metaio;
pub mod models;
pub mod post_processors;

pub use api::{convert, run, ConversionReport, ConvertOutcome};
pub use builders::{default_builders, ImageBuilder};
pub use cli::report::TextReport;
pub use error::{Result, VoxconvError};
pub use models::{DerivedFile, FileErrors, OutputFile, PixelBuffer, PixelData, SourceImage};
pub use post_processors::{default_post_processors, PostProcessor};
