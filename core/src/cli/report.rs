use crate::api::ConversionReport;
use std::fmt;

/// Text report formatter for a conversion run
pub struct TextReport<'a> {
    report: &'a ConversionReport,
}

impl<'a> TextReport<'a> {
    /// Creates a new text report
    pub fn new(report: &'a ConversionReport) -> Self {
        Self { report }
    }
}

impl<'a> fmt::Display for TextReport<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Conversion Report")?;
        writeln!(f, "=================")?;
        writeln!(f)?;

        writeln!(f, "Outputs ({})", self.report.outputs.len())?;
        for output in &self.report.outputs {
            writeln!(
                f,
                "  {}  ({} input file(s))",
                output.path.display(),
                output.consumed_files.len()
            )?;
        }

        if !self.report.derived.is_empty() {
            writeln!(f)?;
            writeln!(f, "Derived files ({})", self.report.derived.len())?;
            for derived in &self.report.derived {
                writeln!(f, "  {}", derived.path.display())?;
            }
        }

        if !self.report.file_errors.is_empty() {
            writeln!(f)?;
            writeln!(f, "File errors ({})", self.report.file_errors.len())?;
            for (file, messages) in &self.report.file_errors {
                for message in messages {
                    writeln!(f, "  {}: {}", file.display(), message)?;
                }
            }
        }

        if !self.report.post_errors.is_empty() {
            writeln!(f)?;
            writeln!(f, "Post-processing errors ({})", self.report.post_errors.len())?;
            for failure in &self.report.post_errors {
                writeln!(
                    f,
                    "  {} [{}]: {}",
                    failure.output.display(),
                    failure.processor,
                    failure.message
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutputFile, OutputKind};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn test_text_report_format() {
        let report = ConversionReport {
            outputs: vec![OutputFile {
                path: PathBuf::from("out/series.mha"),
                kind: OutputKind::Mha,
                name: "series".to_string(),
                consumed_files: [PathBuf::from("in/a.dcm"), PathBuf::from("in/b.dcm")]
                    .into_iter()
                    .collect(),
            }],
            derived: Vec::new(),
            post_errors: Vec::new(),
            file_errors: BTreeMap::from([(
                PathBuf::from("in/junk.xyz"),
                vec!["no image builder could interpret this file".to_string()],
            )]),
        };

        let text = format!("{}", TextReport::new(&report));
        assert!(text.contains("Conversion Report"));
        assert!(text.contains("out/series.mha"));
        assert!(text.contains("2 input file(s)"));
        assert!(text.contains("in/junk.xyz: no image builder"));
    }
}
