//! Plain-text load and save.

use std::{fs, path::Path};

use tracing::info;

use crate::error::{ExternalIoError, IoOperation};

/// Seed for a new document. Uses every delimiter family.
pub const SAMPLE_DOCUMENT: &str = r"# Welcome

Write **Markdown** on the left; the preview on the right follows every edit.

Inline math uses $e^{i\pi} + 1 = 0$ or \(a^2 + b^2 = c^2\).

Display math uses double dollars

$$\int_0^1 x^2 \, dx = \frac{1}{3}$$

or brackets

\[\sum_{n=1}^{\infty} \frac{1}{n^2} = \frac{\pi^2}{6}\]

1. Ordered lists
2. are numbered

- bullets
- *emphasis* and `code`

> A literal \$5 stays text.
";

pub fn load_text(path: &Path) -> Result<String, ExternalIoError> {
    let text = fs::read_to_string(path)
        .map_err(|err| ExternalIoError::new(IoOperation::Read, path, err))?;
    info!(path = %path.display(), bytes = text.len(), "loaded document");
    Ok(text)
}

pub fn save_text(path: &Path, text: &str) -> Result<(), ExternalIoError> {
    fs::write(path, text).map_err(|err| ExternalIoError::new(IoOperation::Write, path, err))?;
    info!(path = %path.display(), bytes = text.len(), "saved document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::segment;
    use std::collections::HashSet;

    #[test]
    fn save_then_load_returns_the_same_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.md");
        let text = "# Title\n\n$x$ and ünïcode\n";
        save_text(&path, text).unwrap();
        assert_eq!(load_text(&path).unwrap(), text);
    }

    #[test]
    fn missing_file_reports_path_and_operation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.md");
        let err = load_text(&path).unwrap_err();
        assert_eq!(err.operation, IoOperation::Read);
        assert_eq!(err.path, path);
        assert!(err.to_string().starts_with("failed to read"));
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("doc.md");
        let err = save_text(&path, "x").unwrap_err();
        assert_eq!(err.operation, IoOperation::Write);
    }

    #[test]
    fn sample_exercises_every_delimiter() {
        let delimiters: HashSet<_> = segment(SAMPLE_DOCUMENT)
            .iter()
            .filter_map(|s| s.delimiter)
            .collect();
        assert_eq!(delimiters.len(), 4);
    }
}
