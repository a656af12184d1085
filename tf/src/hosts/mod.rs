//! Host list and host table files
//!
//! A host list is one host URL per line; blank lines are skipped.
//!
//! A host table starts with a header line `hostname<TAB>var1<TAB>var2...`.
//! Each data row holds a host URL followed by one value per variable
//! column; missing trailing columns read as empty strings.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

static HOSTNAME_COLUMN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^hostname\b").expect("valid header pattern"));
static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^hostname(?:\t[^\t]+)*$").expect("valid header pattern"));

/// Errors raised while reading host files
#[derive(Debug, Error)]
pub enum HostFileError {
    #[error("No such file: {path}")]
    NotFound { path: PathBuf },

    #[error("Syntax error in CSV file header: File does not start with \"hostname\".")]
    MissingHostnameColumn,

    #[error("Syntax error in CSV file header: Make sure to separate columns by tabs.")]
    NotTabSeparated,

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One data row of a host table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRow {
    pub host_url: String,
    /// One value per variable column, padded with empty strings
    pub values: Vec<String>,
}

/// A parsed host table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTable {
    /// Variable names, without the leading `hostname` column
    pub columns: Vec<String>,
    pub rows: Vec<HostRow>,
}

impl HostTable {
    /// Iterate `(column, value)` pairs of a row
    pub fn row_vars<'a>(&'a self, row: &'a HostRow) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(row.values.iter().map(String::as_str))
    }
}

/// Read a host list file
pub fn read_host_list(path: &Path) -> Result<Vec<String>, HostFileError> {
    debug!(?path, "read_host_list: called");
    let content = read(path)?;
    Ok(parse_host_list(&content))
}

/// Split host list content into host URLs
pub fn parse_host_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Read a tab-separated host table file
pub fn read_host_table(path: &Path) -> Result<HostTable, HostFileError> {
    debug!(?path, "read_host_table: called");
    let content = read(path)?;
    parse_host_table(&content)
}

/// Parse host table content
pub fn parse_host_table(content: &str) -> Result<HostTable, HostFileError> {
    let mut lines = content.lines();
    let header = lines.next().unwrap_or("").trim_end();
    let columns = parse_header(header)?;
    debug!(?columns, "parse_host_table: header parsed");

    let mut rows = Vec::new();
    for line in lines {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let host_url = fields.next().unwrap_or("").trim().to_string();
        let mut values: Vec<String> = fields.take(columns.len()).map(String::from).collect();
        values.resize(columns.len(), String::new());
        rows.push(HostRow { host_url, values });
    }
    debug!(row_count = rows.len(), "parse_host_table: rows parsed");

    Ok(HostTable { columns, rows })
}

fn parse_header(header: &str) -> Result<Vec<String>, HostFileError> {
    if !HOSTNAME_COLUMN_RE.is_match(header) {
        return Err(HostFileError::MissingHostnameColumn);
    }
    if !HEADER_RE.is_match(header) {
        return Err(HostFileError::NotTabSeparated);
    }
    Ok(header.split('\t').skip(1).map(String::from).collect())
}

fn read(path: &Path) -> Result<String, HostFileError> {
    if !path.exists() {
        return Err(HostFileError::NotFound {
            path: path.to_path_buf(),
        });
    }
    fs::read_to_string(path).map_err(|source| HostFileError::Io {
        path: path.to_path_buf(),
        source,
    })
}
