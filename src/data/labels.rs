use std::path::{Path, PathBuf};

use crate::{data::LabelFormat, Float, LineNetError, Result};

use super::LineType;

/// One row of a label file: `path x y z line_type class`.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRecord {
    pub path: PathBuf,
    /// center coordinates followed by the class
    pub labels: Vec<Float>,
    pub line_type: LineType,
}

/// Reads a label file as written by the dataset split tool. The line type is
/// the second to last column; every other numeric column is a label.
pub fn read_label_file(path: impl AsRef<Path>) -> Result<Vec<LabelRecord>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| LineNetError::io(path, e))?;

    let expected = LabelFormat::Text.label_len();
    let mut records = Vec::new();
    for (i, row) in raw.lines().enumerate() {
        let items: Vec<&str> = row.split_whitespace().collect();
        if items.is_empty() {
            continue;
        }
        if items.len() < 3 {
            return Err(LineNetError::parse(
                path,
                i + 1,
                "expected an image path, labels, a line type and a class",
            ));
        }

        let number = |s: &str| -> Result<Float> {
            s.parse::<Float>()
                .map_err(|e| LineNetError::parse(path, i + 1, format!("'{s}': {e}")))
        };

        let n = items.len();
        let mut labels = items[1..n - 2]
            .iter()
            .map(|s| number(*s))
            .collect::<Result<Vec<_>>>()?;
        labels.push(number(items[n - 1])?);
        if labels.len() != expected {
            return Err(LineNetError::LabelShape {
                expected,
                found: labels.len(),
            });
        }

        let line_type = LineType::try_from(number(items[n - 2])?)?;
        records.push(LabelRecord {
            path: PathBuf::from(items[0]),
            labels,
            line_type,
        });
    }

    tracing::debug!(file = %path.display(), rows = records.len(), "read label file");
    Ok(records)
}
