//! Workbook synthesis from a JSON description.
//!
//! ```json
//! {
//!   "formats": {"header": {"bold": true, "bg_color": "#DDEBF7", "border": true}},
//!   "worksheets": [{
//!     "name": "Answers",
//!     "columns": [{"col": 0, "width": 40}],
//!     "cells": [{"row": 0, "col": 0, "value": "Question", "format": "header"}],
//!     "merges": [{"first_row": 1, "first_col": 0, "last_row": 1, "last_col": 2, "value": "..."}],
//!     "charts": [{"type": "column", "row": 4, "col": 4, "title": "Score",
//!                 "series": [{"name": "Score", "categories": "Answers!$A$2:$A$5", "values": "Answers!$B$2:$B$5"}]}]
//!   }]
//! }
//! ```

use super::require_input;
use crate::pipeline::error::PipelineError;
use crate::pipeline::file::{DocumentFile, FileFormat};
use rust_xlsxwriter::{Chart, ChartType, Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Default, Deserialize)]
struct WorkbookDef {
    #[serde(default)]
    formats: HashMap<String, FormatDef>,
    #[serde(default)]
    worksheets: Vec<WorksheetDef>,
}

#[derive(Debug, Default, Deserialize)]
struct FormatDef {
    #[serde(default)]
    bold: bool,
    #[serde(default)]
    italic: bool,
    #[serde(default)]
    wrap: bool,
    #[serde(default)]
    border: bool,
    font_color: Option<String>,
    bg_color: Option<String>,
    num_format: Option<String>,
    align: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorksheetDef {
    name: Option<String>,
    #[serde(default)]
    columns: Vec<ColumnDef>,
    #[serde(default)]
    cells: Vec<CellDef>,
    #[serde(default)]
    merges: Vec<MergeDef>,
    #[serde(default)]
    charts: Vec<ChartDef>,
}

#[derive(Debug, Deserialize)]
struct ColumnDef {
    col: u16,
    width: f64,
}

#[derive(Debug, Deserialize)]
struct CellDef {
    row: u32,
    col: u16,
    #[serde(default)]
    value: serde_json::Value,
    formula: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeDef {
    first_row: u32,
    first_col: u16,
    last_row: u32,
    last_col: u16,
    #[serde(default)]
    value: String,
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartDef {
    #[serde(rename = "type")]
    kind: String,
    row: u32,
    col: u16,
    title: Option<String>,
    #[serde(default)]
    series: Vec<SeriesDef>,
}

#[derive(Debug, Deserialize)]
struct SeriesDef {
    name: Option<String>,
    categories: Option<String>,
    values: String,
}

/// Builds an XLSX workbook from JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExcelStep;

impl ExcelStep {
    pub(crate) const NAME: &'static str = "excel";

    pub(crate) fn accepts(format: &FileFormat) -> bool {
        *format == FileFormat::JSON
    }

    pub(crate) async fn execute(self, file: DocumentFile) -> Result<DocumentFile, PipelineError> {
        require_input(Self::NAME, &file, Self::accepts)?;
        let layout: WorkbookDef = serde_json::from_slice(&file.content)
            .map_err(|err| PipelineError::step(Self::NAME, format!("invalid workbook description: {err}")))?;
        let content = tokio::task::spawn_blocking(move || build(&layout))
            .await
            .map_err(|err| PipelineError::step(Self::NAME, format!("workbook task failed: {err}")))?
            .map_err(|err| PipelineError::step(Self::NAME, err.to_string()))?;
        Ok(DocumentFile::new(FileFormat::XLSX, content))
    }
}

fn build(layout: &WorkbookDef) -> Result<Vec<u8>, XlsxError> {
    let formats: HashMap<&str, Format> = layout
        .formats
        .iter()
        .map(|(name, format)| (name.as_str(), to_format(format)))
        .collect();

    let mut workbook = Workbook::new();
    for sheet in &layout.worksheets {
        let worksheet = workbook.add_worksheet();
        if let Some(name) = &sheet.name {
            worksheet.set_name(name)?;
        }
        fill(worksheet, sheet, &formats)?;
    }
    if layout.worksheets.is_empty() {
        workbook.add_worksheet();
    }
    workbook.save_to_buffer()
}

fn fill(worksheet: &mut Worksheet, sheet: &WorksheetDef, formats: &HashMap<&str, Format>) -> Result<(), XlsxError> {
    let default = Format::new();
    let lookup = |name: Option<&String>| name.and_then(|name| formats.get(name.as_str())).unwrap_or(&default);

    for column in &sheet.columns {
        worksheet.set_column_width(column.col, column.width)?;
    }
    for cell in &sheet.cells {
        let format = lookup(cell.format.as_ref());
        if let Some(formula) = &cell.formula {
            worksheet.write_formula_with_format(cell.row, cell.col, formula.as_str(), format)?;
            continue;
        }
        match &cell.value {
            serde_json::Value::Null => worksheet.write_blank(cell.row, cell.col, format)?,
            serde_json::Value::Bool(value) => worksheet.write_boolean_with_format(cell.row, cell.col, *value, format)?,
            serde_json::Value::Number(number) => {
                worksheet.write_number_with_format(cell.row, cell.col, number.as_f64().unwrap_or_default(), format)?
            }
            serde_json::Value::String(text) => worksheet.write_string_with_format(cell.row, cell.col, text, format)?,
            other => worksheet.write_string_with_format(cell.row, cell.col, other.to_string(), format)?,
        };
    }
    for merge in &sheet.merges {
        worksheet.merge_range(
            merge.first_row,
            merge.first_col,
            merge.last_row,
            merge.last_col,
            &merge.value,
            lookup(merge.format.as_ref()),
        )?;
    }
    for chart_def in &sheet.charts {
        let mut chart = Chart::new(chart_type(&chart_def.kind));
        if let Some(title) = &chart_def.title {
            chart.title().set_name(title.as_str());
        }
        for series in &chart_def.series {
            let added = chart.add_series().set_values(series.values.as_str());
            if let Some(categories) = &series.categories {
                added.set_categories(categories.as_str());
            }
            if let Some(name) = &series.name {
                added.set_name(name.as_str());
            }
        }
        worksheet.insert_chart(chart_def.row, chart_def.col, &chart)?;
    }
    Ok(())
}

fn chart_type(kind: &str) -> ChartType {
    match kind {
        "bar" => ChartType::Bar,
        "line" => ChartType::Line,
        "pie" => ChartType::Pie,
        "doughnut" => ChartType::Doughnut,
        "area" => ChartType::Area,
        "radar" => ChartType::Radar,
        "scatter" => ChartType::Scatter,
        _ => ChartType::Column,
    }
}

fn to_format(def: &FormatDef) -> Format {
    let mut format = Format::new();
    if def.bold {
        format = format.set_bold();
    }
    if def.italic {
        format = format.set_italic();
    }
    if def.wrap {
        format = format.set_text_wrap();
    }
    if def.border {
        format = format.set_border(FormatBorder::Thin);
    }
    if let Some(color) = def.font_color.as_deref().and_then(parse_color) {
        format = format.set_font_color(color);
    }
    if let Some(color) = def.bg_color.as_deref().and_then(parse_color) {
        format = format.set_background_color(color);
    }
    if let Some(num_format) = &def.num_format {
        format = format.set_num_format(num_format);
    }
    match def.align.as_deref() {
        Some("left") => format.set_align(FormatAlign::Left),
        Some("center") => format.set_align(FormatAlign::Center),
        Some("right") => format.set_align(FormatAlign::Right),
        _ => format,
    }
}

/// `#RRGGBB` to a color.
fn parse_color(value: &str) -> Option<Color> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if hex.len() != 6 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().map(Color::RGB)
}
