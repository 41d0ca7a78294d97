//! Reads an uploaded CSV or Excel file into an [`InputTable`].
//!
//! Column roles are positional: the first column holds keywords, the second
//! brands, and every further column is a category column.

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::cell::{CellParseError, parse_category_cell};
use crate::types::{InputTable, Row, TableHeader};

pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "xls", "xlsx"];

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("unsupported file format '{0}', expected one of csv, xls, xlsx")]
    UnsupportedFormat(String),

    #[error("file must have at least 2 columns (keyword and brand), found {found}")]
    MissingColumns { found: usize },

    #[error("workbook has no worksheets")]
    EmptyWorkbook,

    #[error("invalid category cell in row {row}, column '{column}': {source}")]
    Cell {
        row: usize,
        column: String,
        #[source]
        source: CellParseError,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("workbook error: {0}")]
    Workbook(#[from] calamine::Error),
}

/// Lower-cased extension of `filename`, if it is one we can read.
pub fn supported_extension(filename: &str) -> Option<String> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())?
        .to_lowercase();
    SUPPORTED_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(extension)
}

#[tracing::instrument(skip(bytes), fields(size = bytes.len()))]
pub fn load_table(filename: &str, bytes: &[u8]) -> Result<InputTable, LoadError> {
    let extension = supported_extension(filename)
        .ok_or_else(|| LoadError::UnsupportedFormat(filename.to_string()))?;

    let (headers, rows) = if extension == "csv" {
        read_csv(bytes)?
    } else {
        read_workbook(bytes)?
    };
    let table = build_table(headers, rows)?;
    tracing::debug!(
        rows = table.rows.len(),
        category_columns = table.header.categories.len(),
        "Table loaded"
    );
    Ok(table)
}

fn read_csv(bytes: &[u8]) -> Result<(Vec<String>, Vec<Vec<String>>), LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()?
        .iter()
        .map(|value| value.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|value| value.trim().to_string()).collect());
    }
    Ok((headers, rows))
}

fn read_workbook(bytes: &[u8]) -> Result<(Vec<String>, Vec<Vec<String>>), LoadError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(LoadError::EmptyWorkbook)?;
    let range = workbook.worksheet_range(&sheet_name)?;
    let Some((last_row, last_col)) = range.end() else {
        return Ok((Vec::new(), Vec::new()));
    };

    // The used range starts at the first non-empty cell; read from A1 so an
    // empty leading column keeps its position like it does in a CSV.
    let mut grid = (0..=last_row)
        .map(|row| {
            (0..=last_col)
                .map(|col| range.get_value((row, col)).map(cell_to_string).unwrap_or_default())
                .collect::<Vec<String>>()
        })
        .skip_while(|cells| cells.iter().all(String::is_empty));

    let headers = grid.next().unwrap_or_default();
    let rows = grid.collect();
    Ok((headers, rows))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        _ => cell.to_string().trim().to_string(),
    }
}

fn build_table(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<InputTable, LoadError> {
    // Trailing blank header cells come from formatted-but-empty columns.
    let mut headers = headers;
    while headers.last().is_some_and(|name| name.is_empty()) {
        headers.pop();
    }
    if headers.len() < 2 {
        return Err(LoadError::MissingColumns {
            found: headers.len(),
        });
    }

    let mut names = headers.into_iter();
    let header = TableHeader {
        keyword: names.next().unwrap_or_default(),
        brand: names.next().unwrap_or_default(),
        categories: names.collect(),
    };

    let mut table_rows = Vec::with_capacity(rows.len());
    for cells in rows
        .into_iter()
        .filter(|cells| cells.iter().any(|value| !value.is_empty()))
    {
        let index = table_rows.len();
        let cell = |position: usize| cells.get(position).map(String::as_str).unwrap_or("");

        let categories = header
            .categories
            .iter()
            .enumerate()
            .map(|(offset, column)| {
                parse_category_cell(cell(offset + 2)).map_err(|source| LoadError::Cell {
                    row: index,
                    column: column.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        table_rows.push(Row {
            index,
            keyword: cell(0).to_string(),
            brand: cell(1).to_string(),
            categories,
        });
    }

    Ok(InputTable {
        header,
        rows: table_rows,
    })
}
