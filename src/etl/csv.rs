use crate::error::{PipelineError, Result};
use std::fs;
use std::io;
use std::path::Path;

/// Splits one CSV line, honoring double-quoted fields and doubled quotes.
pub fn split_line(line: &str) -> Vec<String> {
    let line = line.trim_end_matches('\r');
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            other => field.push(other),
        }
    }
    fields.push(field);
    fields
}

/// Reads the values of one named column from header-driven CSV content.
/// Rows shorter than the header or with an empty value are skipped.
pub fn column_values(content: &str, column: &str) -> Result<Vec<String>> {
    let mut lines = content.lines();
    let header = lines
        .next()
        .ok_or_else(|| PipelineError::MissingColumn(column.to_string()))?;
    let index = split_line(header)
        .iter()
        .position(|c| c.trim() == column)
        .ok_or_else(|| PipelineError::MissingColumn(column.to_string()))?;

    let mut values = Vec::new();
    for line in lines.filter(|l| !l.trim().is_empty()) {
        let fields = split_line(line);
        if let Some(value) = fields.get(index) {
            let value = value.trim();
            if !value.is_empty() {
                values.push(value.to_string());
            }
        }
    }
    Ok(values)
}

/// Writes a file through a temporary sibling and renames it into place,
/// so a crash mid-write never leaves a truncated file at the final path.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    fs::write(tmp, contents)?;
    fs::rename(tmp, path)
}
