// src/coverage/mod.rs

use calamine::{open_workbook_auto_from_rs, Data, DataType, Range, Reader};
use std::{fs, io, io::Cursor, path::PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::codes::{CodeError, ZipCode};
use crate::fetch::ResourceHandle;

/// Zero-based (row, column) of the cell describing a zone file's coverage.
pub const COVERAGE_CELL: (u32, u32) = (4, 0);

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("reading zone file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("opening zone file {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
    #[error("zone file {0:?} has no sheets")]
    NoSheet(PathBuf),
    #[error("cell ({row}, {col}) is empty", row = COVERAGE_CELL.0, col = COVERAGE_CELL.1)]
    EmptyCell,
    #[error("no \"to \" in coverage phrase {0:?}")]
    MissingTo(String),
    #[error("coverage phrase {0:?} has no room for a first code before \"to \"")]
    MisplacedTo(String),
    #[error("coverage phrase {0:?} has no terminating \".\"")]
    MissingStop(String),
    #[error("coverage phrase {phrase:?} holds an invalid code")]
    InvalidCode {
        phrase: String,
        #[source]
        source: CodeError,
    },
}

/// Inclusive range of postal codes a zone file actually covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageRange {
    pub first: ZipCode,
    pub last: ZipCode,
}

/// Reads the coverage a stored zone file declares.
pub trait CoverageExtractor {
    fn extract(&self, handle: &ResourceHandle) -> Result<CoverageRange, ExtractError>;
}

/// Parse the coverage phrase of a zone file, e.g.
/// `"... for ZIP Codes 005-00 to 005-99."`.
///
/// Positional: the last code sits between `"to "` and the final `"."`; the
/// first code is the six characters ending one before `"to "`. Hyphens are
/// grouping and are dropped.
pub fn parse_coverage_phrase(phrase: &str) -> Result<CoverageRange, ExtractError> {
    let to = phrase
        .find("to ")
        .ok_or_else(|| ExtractError::MissingTo(phrase.to_string()))?;
    if to < 7 {
        return Err(ExtractError::MisplacedTo(phrase.to_string()));
    }
    let stop = phrase
        .rfind('.')
        .filter(|&d| d > to + 3)
        .ok_or_else(|| ExtractError::MissingStop(phrase.to_string()))?;

    let last = slice(phrase, to + 3, stop)?;
    let first = slice(phrase, to - 7, to - 1)?;

    let code = |s: &str| {
        ZipCode::parse(s).map_err(|source| ExtractError::InvalidCode {
            phrase: phrase.to_string(),
            source,
        })
    };
    Ok(CoverageRange {
        first: code(first)?,
        last: code(last)?,
    })
}

fn slice(phrase: &str, start: usize, end: usize) -> Result<&str, ExtractError> {
    phrase
        .get(start..end)
        .ok_or_else(|| ExtractError::MisplacedTo(phrase.to_string()))
}

/// Text of the coverage cell in a sheet read without a header row.
pub fn coverage_text(sheet: &Range<Data>) -> Result<String, ExtractError> {
    match sheet.get_value(COVERAGE_CELL) {
        Some(cell) if !cell.is_empty() => Ok(cell.to_string()),
        _ => Err(ExtractError::EmptyCell),
    }
}

/// Reads the first sheet of the stored workbook and parses its coverage cell.
///
/// The workbook format is detected from content, not from the file name: the
/// endpoint serves legacy `.xls` workbooks whatever the local extension is.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadsheetExtractor;

impl CoverageExtractor for SpreadsheetExtractor {
    #[instrument(level = "debug", skip(self), fields(path = %handle.path.display()))]
    fn extract(&self, handle: &ResourceHandle) -> Result<CoverageRange, ExtractError> {
        let bytes = fs::read(&handle.path).map_err(|source| ExtractError::Read {
            path: handle.path.clone(),
            source,
        })?;
        let mut workbook =
            open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|source| ExtractError::Open {
                path: handle.path.clone(),
                source,
            })?;
        let sheet = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| ExtractError::NoSheet(handle.path.clone()))?
            .map_err(|source| ExtractError::Open {
                path: handle.path.clone(),
                source,
            })?;

        let phrase = coverage_text(&sheet)?;
        let range = parse_coverage_phrase(&phrase)?;
        debug!(phrase = %phrase, first = %range.first, last = %range.last, "coverage");
        Ok(range)
    }
}
