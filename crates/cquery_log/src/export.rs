//! JSON export of history and status rows.
//!
//! History is written as JSON lines (one entry per line) so it can be tailed
//! and appended to; status snapshots are a single JSON array.

use crate::entry::{StatusEntry, StatusRow};
use cquery_core::{CoreError, CoreResult};
use std::io::Write;

/// Write entries as JSON lines, returning the number of lines written
///
/// # Errors
///
/// Returns error if serialization or the writer fails
pub fn write_json_lines<'a, W, I>(mut writer: W, entries: I) -> CoreResult<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a StatusEntry>,
{
    let mut written = 0;
    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n").map_err(io_error)?;
        written += 1;
    }
    writer.flush().map_err(io_error)?;
    Ok(written)
}

/// Parse JSON lines back into entries, skipping blank lines
///
/// # Errors
///
/// Returns error on the first malformed line
pub fn read_json_lines(input: &str) -> CoreResult<Vec<StatusEntry>> {
    input
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(CoreError::from))
        .collect()
}

/// Render status rows as a JSON array
///
/// # Errors
///
/// Returns error if serialization fails
pub fn status_to_json(rows: &[StatusRow]) -> CoreResult<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

fn io_error(err: std::io::Error) -> CoreError {
    CoreError::Internal {
        message: format!("log export: {}", err),
    }
}
