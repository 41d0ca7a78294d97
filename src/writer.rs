use chrono::{DateTime, TimeZone};
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, XlsxError};
use std::path::Path;
use thiserror::Error;

use crate::types::OutputTable;

pub const SHEET_NAME: &str = "Classification Results";
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const MAX_COLUMN_WIDTH: usize = 50;

#[derive(Error, Debug)]
#[error("failed to build workbook: {0}")]
pub struct WriteError(#[from] XlsxError);

/// `classified_<stem>_<timestamp>.xlsx`, with the stem reduced to characters
/// that are safe in a download name.
pub fn output_filename<Tz: TimeZone>(original: &str, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let stem = Path::new(original)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("upload");
    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("classified_{stem}_{}.xlsx", now.format("%Y%m%d_%H%M%S"))
}

/// Serializes the table as a single formatted worksheet.
#[tracing::instrument(skip_all, fields(rows = table.len()))]
pub fn write_workbook(table: &OutputTable) -> Result<Vec<u8>, WriteError> {
    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(0x366092))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin);
    let cell_format = Format::new()
        .set_align(FormatAlign::Left)
        .set_align(FormatAlign::Top)
        .set_text_wrap()
        .set_border(FormatBorder::Thin);

    let columns = table.column_names();
    let mut widths: Vec<usize> = columns.iter().map(|name| name.chars().count()).collect();

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col, name) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, name, &header_format)?;
    }

    for (offset, classified) in table.rows.iter().enumerate() {
        let row = &classified.row;
        let cells = [row.keyword.clone(), row.brand.clone()]
            .into_iter()
            .chain(row.categories.iter().map(|tags| tags.join(", ")))
            .chain(std::iter::once(classified.classification.render()));

        for (col, value) in cells.enumerate() {
            if let Some(width) = widths.get_mut(col) {
                *width = (*width).max(value.chars().count());
            }
            sheet.write_string_with_format(offset as u32 + 1, col as u16, &value, &cell_format)?;
        }
    }

    for (col, width) in widths.iter().enumerate() {
        let width = (width + 2).min(MAX_COLUMN_WIDTH);
        sheet.set_column_width(col as u16, width as f64)?;
    }

    Ok(workbook.save_to_buffer()?)
}
