//! I/O utilities for reading spreadsheet CSV exports and writing reports.
//!
//! All CSV input flows through this module. It provides:
//!
//! - **Line tokenization**: quote-aware splitting with doubled-quote escapes and
//!   byte-order-mark stripping, without an error path.
//! - **Decoding**: UTF-8 first, falling back to Windows-1252 for files saved by
//!   spreadsheet tools on a Latin-1 locale.
//! - **File reading**: whole-file parsing into a header plus numbered rows, so
//!   quoted fields may span physical lines.
//! - **Failed-row reports**: rejected rows written back out as CSV for review.

use std::{
    fs::{self, File},
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

use csv::{QuoteStyle, StringRecord};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use log::warn;

use crate::error::FileError;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
const BOM: char = '\u{feff}';
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// One data row with its 1-based physical line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    pub line: usize,
    pub fields: Vec<String>,
}

impl CsvRow {
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.fields.get(idx).map(String::as_str)
    }
}

/// A parsed source file: header tokens and data rows.
#[derive(Debug, Clone)]
pub struct CsvFile {
    pub path: PathBuf,
    pub header: Vec<String>,
    pub rows: Vec<CsvRow>,
}

impl CsvFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

fn csv_reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(DEFAULT_CSV_DELIMITER)
        .double_quote(true)
        .flexible(true)
        .from_reader(bytes)
}

/// Split one raw line into fields.
///
/// Commas inside double-quoted spans do not split, a doubled quote inside a
/// quoted span is a literal quote, and a leading byte-order mark is dropped.
/// Malformed quoting never fails; the bytes are kept as field content.
///
/// ```
/// use tarja_sync::io_utils::tokenize_line;
///
/// assert_eq!(tokenize_line("1,\"Lapins, Bing\",x"), vec!["1", "Lapins, Bing", "x"]);
/// ```
pub fn tokenize_line(line: &str) -> Vec<String> {
    let line = line.strip_prefix(BOM).unwrap_or(line);
    let mut reader = csv_reader(line.as_bytes());
    let mut record = StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => record.iter().map(str::to_string).collect(),
        Ok(false) => vec![String::new()],
        Err(_) => line.split(',').map(str::to_string).collect(),
    }
}

/// Decode raw file bytes, dropping a UTF-8 byte-order mark.
///
/// Returns the text and, when UTF-8 decoding failed, the fallback encoding
/// that was used instead.
pub fn decode_bytes(bytes: &[u8]) -> (String, Option<&'static Encoding>) {
    let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
    if !had_errors {
        return (text.into_owned(), None);
    }
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let (text, _, _) = WINDOWS_1252.decode(body);
    (text.into_owned(), Some(WINDOWS_1252))
}

/// Read and parse a whole CSV file. The first non-empty record is the header.
pub fn read_csv_file(path: &Path) -> Result<CsvFile, FileError> {
    let bytes = fs::read(path).map_err(|source| FileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let (text, fallback) = decode_bytes(&bytes);
    if let Some(encoding) = fallback {
        warn!(
            "{:?} is not valid UTF-8; decoded as {}",
            path,
            encoding.name()
        );
    }
    let text = text.strip_prefix(BOM).unwrap_or(&text);

    let mut reader = csv_reader(text.as_bytes());
    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    let mut record = StringRecord::new();
    loop {
        let more = reader
            .read_record(&mut record)
            .map_err(|source| FileError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        if !more {
            break;
        }
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let fields: Vec<String> = record.iter().map(str::to_string).collect();
        if header.is_none() {
            header = Some(fields);
            continue;
        }
        let line = record
            .position()
            .map(|pos| pos.line() as usize)
            .unwrap_or(rows.len() + 2);
        rows.push(CsvRow { line, fields });
    }

    let header = header.ok_or_else(|| FileError::Empty(path.to_path_buf()))?;
    Ok(CsvFile {
        path: path.to_path_buf(),
        header,
        rows,
    })
}

/// Write rejected rows to `dir/FAILED_<file name>`, header first.
pub fn write_failed_rows(dir: &Path, source: &CsvFile, rows: &[&CsvRow]) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let out_path = dir.join(format!("FAILED_{}", source.file_name()));
    let file = BufWriter::new(File::create(&out_path)?);
    let mut writer = csv::WriterBuilder::new()
        .delimiter(DEFAULT_CSV_DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .flexible(true)
        .from_writer(file);
    writer.write_record(&source.header)?;
    for row in rows {
        writer.write_record(&row.fields)?;
    }
    writer.flush()?;
    Ok(out_path)
}
