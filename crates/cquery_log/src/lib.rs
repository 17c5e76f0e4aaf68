//! CQUERY Status Log
//!
//! Append-only, bounded history of transition firings plus the row type of
//! the live status view. Entries are serde types and export as JSON lines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod export;
pub mod history;

pub use entry::{StatusEntry, StatusRow};
pub use export::{read_json_lines, status_to_json, write_json_lines};
pub use history::{Appended, StatusLog};
