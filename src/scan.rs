//! Discovery of history files laid out as `<root>/<backend>/<os>/data.js`.

use rayon::prelude::*;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::error::StorageError;
use crate::schema::HistoryDocument;

pub const DEFAULT_FILE_NAME: &str = "data.js";

#[derive(Debug, Clone, Serialize)]
pub struct SuiteSummary {
    pub name: String,
    pub entries: usize,
    pub latest_date: Option<u64>,
    pub latest_commit: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<u64>,
    pub suites: Vec<SuiteSummary>,
    /// Set when the file could not be loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every file named `file_name` under `root`, sorted.
pub fn discover(root: &Path, file_name: &str) -> Result<Vec<PathBuf>, StorageError> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && entry.file_name() == file_name {
            out.push(entry.path().to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}

pub fn summarize_document(path: &Path, doc: &HistoryDocument) -> FileSummary {
    FileSummary {
        path: path.to_path_buf(),
        repo_url: Some(doc.repo_url.clone()),
        last_update: Some(doc.last_update),
        suites: doc
            .entries
            .iter()
            .map(|(name, entries)| {
                let last = entries.last();
                SuiteSummary {
                    name: name.clone(),
                    entries: entries.len(),
                    latest_date: last.map(|e| e.date),
                    latest_commit: last.map(|e| e.commit.id.clone()),
                }
            })
            .collect(),
        error: None,
    }
}

/// Summary of the file at `path`; load failures are reported in `error`.
pub fn summarize(path: &Path, variable: &str) -> FileSummary {
    match codec::read_file(path, variable) {
        Ok(doc) => summarize_document(path, &doc),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable history");
            FileSummary {
                path: path.to_path_buf(),
                repo_url: None,
                last_update: None,
                suites: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

/// Load and summarize files in parallel; output order follows `paths`.
pub fn summarize_all(paths: &[PathBuf], variable: &str) -> Vec<FileSummary> {
    paths.par_iter().map(|p| summarize(p, variable)).collect()
}
