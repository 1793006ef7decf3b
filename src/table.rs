use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ShareError;

/// Delimited text table with a header row.
#[derive(Debug, Clone)]
pub struct Table {
    path: PathBuf,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read_csv(path: &Path) -> Result<Self, ShareError> {
        Self::read(path, ',', 0)
    }

    pub fn read_tsv(path: &Path, skip_rows: usize) -> Result<Self, ShareError> {
        Self::read(path, '\t', skip_rows)
    }

    /// Tab when the header line has one, comma otherwise.
    pub fn sniff_delimiter(path: &Path) -> Result<char, ShareError> {
        let text = Self::load(path)?;
        let first_line = text.lines().next().unwrap_or_default();
        Ok(if first_line.contains('\t') { '\t' } else { ',' })
    }

    pub fn read(path: &Path, delimiter: char, skip_rows: usize) -> Result<Self, ShareError> {
        let text = Self::load(path)?;
        Self::parse(path, &text, delimiter, skip_rows)
    }

    fn load(path: &Path) -> Result<String, ShareError> {
        fs::read_to_string(path).map_err(|err| ShareError::TableRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// `skip_rows` drops that many records after the header.
    pub fn parse(
        path: &Path,
        text: &str,
        delimiter: char,
        skip_rows: usize,
    ) -> Result<Self, ShareError> {
        let mut records = split_records(text, delimiter).into_iter();
        let header = records
            .next()
            .ok_or_else(|| ShareError::TableRead {
                path: path.to_path_buf(),
                message: "empty table".to_string(),
            })?
            .into_iter()
            .map(|name| name.trim().to_string())
            .collect::<Vec<_>>();

        let width = header.len();
        let rows = records
            .skip(skip_rows)
            .map(|mut record| {
                record.resize(width, String::new());
                record
            })
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            header,
            rows,
        })
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Result<usize, ShareError> {
        self.header
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
            .ok_or_else(|| ShareError::MissingColumn {
                path: self.path.clone(),
                column: name.to_string(),
            })
    }
}

fn split_records(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                push_record(&mut records, std::mem::take(&mut record));
            }
            _ if ch == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        push_record(&mut records, record);
    }
    records
}

fn push_record(records: &mut Vec<Vec<String>>, record: Vec<String>) {
    let blank = record.iter().all(|cell| cell.trim().is_empty());
    if !blank {
        records.push(record);
    }
}
