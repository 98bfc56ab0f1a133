// src/ranges/mod.rs

use calamine::{open_workbook_auto, Data, DataType, Range, Reader};
use serde::Deserialize;
use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::codes::{CodeError, ZipCode};

/// Which sheet of the ranges workbook to read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SheetSelector {
    Index(usize),
    Name(String),
}

impl fmt::Display for SheetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetSelector::Index(i) => write!(f, "#{}", i),
            SheetSelector::Name(n) => write!(f, "{:?}", n),
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("opening workbook {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
    #[error("sheet {0} not found")]
    MissingSheet(SheetSelector),
    #[error("reading sheet {sheet}")]
    Sheet {
        sheet: SheetSelector,
        #[source]
        source: calamine::Error,
    },
    #[error("sheet {0} has no header row")]
    NoHeader(SheetSelector),
    #[error("column {0:?} not found in header row")]
    MissingColumn(String),
    #[error("row {row}, column {column:?}: {value:?} is not a postal code")]
    InvalidCell {
        row: u32,
        column: String,
        value: String,
        #[source]
        source: Option<CodeError>,
    },
    #[error("first code {0} appears more than once")]
    DuplicateFirstCode(ZipCode),
}

/// One row of the ranges workbook: the codes a caller needs covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEntry {
    pub first: ZipCode,
    pub expected_last: ZipCode,
}

/// Ordered, immutable set of range entries keyed by unique first codes.
#[derive(Debug, Clone, Default)]
pub struct RangeMap {
    entries: Vec<RangeEntry>,
}

impl RangeMap {
    pub fn new(entries: Vec<RangeEntry>) -> Result<Self, ParseError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for e in &entries {
            if !seen.insert(e.first) {
                return Err(ParseError::DuplicateFirstCode(e.first));
            }
        }
        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &RangeEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, first: &ZipCode) -> Option<&RangeEntry> {
        self.entries.iter().find(|e| &e.first == first)
    }
}

/// Load the range map from `source`.
///
/// The first row of the selected sheet is the header row; `column_from` and
/// `column_to` name the columns holding each entry's first and expected last
/// code. Values are used as-is (no offset) and padded to five digits.
#[instrument(level = "info", skip(source), fields(path = %source.as_ref().display()))]
pub fn load<P: AsRef<Path>>(
    source: P,
    column_from: &str,
    column_to: &str,
    sheet: &SheetSelector,
) -> Result<RangeMap, ParseError> {
    let path = source.as_ref();
    let mut workbook = open_workbook_auto(path).map_err(|source| ParseError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let range = match sheet {
        SheetSelector::Name(name) => {
            if !workbook.sheet_names().iter().any(|s| s == name) {
                return Err(ParseError::MissingSheet(sheet.clone()));
            }
            workbook.worksheet_range(name)
        }
        SheetSelector::Index(idx) => workbook
            .worksheet_range_at(*idx)
            .ok_or_else(|| ParseError::MissingSheet(sheet.clone()))?,
    }
    .map_err(|source| ParseError::Sheet {
        sheet: sheet.clone(),
        source,
    })?;

    let map = ranges_from_sheet(&range, column_from, column_to, sheet)?;
    info!(entries = map.len(), "loaded zip ranges");
    Ok(map)
}

/// Build the range map from an already opened sheet.
pub fn ranges_from_sheet(
    range: &Range<Data>,
    column_from: &str,
    column_to: &str,
    sheet: &SheetSelector,
) -> Result<RangeMap, ParseError> {
    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| ParseError::NoHeader(sheet.clone()))?;
    let from_idx = column_index(header, column_from)?;
    let to_idx = column_index(header, column_to)?;

    // 1-based sheet row of the first data row
    let first_row = range.start().map(|(r, _)| r).unwrap_or(0) + 2;

    let mut entries = Vec::new();
    for (i, row) in rows.enumerate() {
        let row_no = first_row + i as u32;
        let from = row.get(from_idx).unwrap_or(&Data::Empty);
        let to = row.get(to_idx).unwrap_or(&Data::Empty);
        if from.is_empty() && to.is_empty() {
            debug!(row = row_no, "skipping blank row");
            continue;
        }
        let entry = RangeEntry {
            first: cell_to_code(from, row_no, column_from)?,
            expected_last: cell_to_code(to, row_no, column_to)?,
        };
        if entry.expected_last < entry.first {
            warn!(
                row = row_no,
                first = %entry.first,
                last = %entry.expected_last,
                "range ends before it starts"
            );
        }
        entries.push(entry);
    }

    RangeMap::new(entries)
}

fn column_index(header: &[Data], name: &str) -> Result<usize, ParseError> {
    header
        .iter()
        .position(|cell| cell.to_string().trim() == name)
        .ok_or_else(|| ParseError::MissingColumn(name.to_string()))
}

/// Convert a cell holding an integer (number, integral float, or digit
/// string) into a padded postal code.
fn cell_to_code(cell: &Data, row: u32, column: &str) -> Result<ZipCode, ParseError> {
    let invalid = |source: Option<CodeError>| ParseError::InvalidCell {
        row,
        column: column.to_string(),
        value: cell.to_string(),
        source,
    };
    match cell {
        Data::Int(n) if *n >= 0 => {
            ZipCode::from_number(*n as u64).map_err(|e| invalid(Some(e)))
        }
        Data::Float(f) if *f >= 0.0 && f.fract() == 0.0 => {
            ZipCode::from_number(*f as u64).map_err(|e| invalid(Some(e)))
        }
        Data::String(s) => ZipCode::parse(s).map_err(|e| invalid(Some(e))),
        _ => Err(invalid(None)),
    }
}
