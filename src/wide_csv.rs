// 📄 Wide CSV artifacts - the EstimateTable as two same-shape grids
//
//   values:     Report_Date,Q3'16,Q4'16,...   2016-12-09,28.69,30.05*,...
//   confidence: Report_Date,Q3'16,Q4'16,...   2016-12-09,0.995,0.995,...
//
// Estimate cells carry a trailing `*`; actual cells are plain numbers.
// Absent cells are blank, never zero.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;

use crate::quarter::QuarterKey;
use crate::snapshot::{QuarterEstimate, ReportSnapshot};
use crate::table::EstimateTable;

pub const DATE_COLUMN: &str = "Report_Date";
pub const ESTIMATE_MARKER: char = '*';

/// Confidence given to imported cells when no confidence grid is supplied
pub const IMPORTED_CONFIDENCE: f64 = 1.0;

// ============================================================================
// WRITE
// ============================================================================

pub fn write_values_csv(path: &Path, table: &EstimateTable) -> Result<()> {
    write_grid(path, table, |cell| {
        if cell.is_actual {
            cell.value.to_string()
        } else {
            format!("{}{}", cell.value, ESTIMATE_MARKER)
        }
    })
}

pub fn write_confidence_csv(path: &Path, table: &EstimateTable) -> Result<()> {
    write_grid(path, table, |cell| cell.confidence.to_string())
}

fn write_grid(
    path: &Path,
    table: &EstimateTable,
    render: impl Fn(&QuarterEstimate) -> String,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec![DATE_COLUMN.to_string()];
    header.extend(table.columns().iter().map(|q| q.to_string()));
    writer.write_record(&header)?;

    for (report_date, row) in table.rows() {
        let mut record = vec![report_date.to_string()];
        record.extend(
            table
                .columns()
                .iter()
                .map(|q| row.get(q).map(&render).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

// ============================================================================
// READ
// ============================================================================

struct Grid {
    columns: Vec<QuarterKey>,
    rows: Vec<(NaiveDate, Vec<String>)>,
}

fn read_grid(path: &Path) -> Result<Grid> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let headers = reader.headers()?.clone();
    match headers.get(0) {
        Some(first) if first == DATE_COLUMN => {}
        other => bail!(
            "{}: first column must be {}, found {:?}",
            path.display(),
            DATE_COLUMN,
            other
        ),
    }

    let columns = headers
        .iter()
        .skip(1)
        .map(|h| {
            h.trim()
                .parse::<QuarterKey>()
                .with_context(|| format!("{}: bad quarter column {:?}", path.display(), h))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{}: bad row {}", path.display(), i + 2))?;
        let raw_date = record.get(0).unwrap_or_default();
        let report_date = NaiveDate::parse_from_str(raw_date.trim(), "%Y-%m-%d")
            .with_context(|| format!("{}: bad report date {:?}", path.display(), raw_date))?;
        let cells = record.iter().skip(1).map(|c| c.trim().to_string()).collect();
        rows.push((report_date, cells));
    }

    Ok(Grid { columns, rows })
}

fn parse_value_cell(raw: &str) -> Result<(f64, bool)> {
    let (number, is_actual) = match raw.strip_suffix(ESTIMATE_MARKER) {
        Some(stripped) => (stripped.trim(), false),
        None => (raw, true),
    };
    let value = number
        .parse::<f64>()
        .with_context(|| format!("bad EPS cell {:?}", raw))?;
    if !value.is_finite() {
        bail!("EPS cell {:?} is not a finite number", raw);
    }
    Ok((value, is_actual))
}

/// Rebuild the table by merging rows in file order, so an artifact with a
/// repeated or backwards report date is rejected the same way ingest is.
pub fn read_wide_csv(values_path: &Path, confidence_path: Option<&Path>) -> Result<EstimateTable> {
    let values = read_grid(values_path)?;

    let mut confidence: HashMap<(NaiveDate, QuarterKey), f64> = HashMap::new();
    if let Some(path) = confidence_path {
        let grid = read_grid(path)?;
        for (report_date, cells) in &grid.rows {
            for (quarter, cell) in grid.columns.iter().zip(cells) {
                if cell.is_empty() {
                    continue;
                }
                let score = cell.parse::<f64>().with_context(|| {
                    format!("{}: bad confidence {:?} at {} {}", path.display(), cell, report_date, quarter)
                })?;
                if !(0.0..=1.0).contains(&score) {
                    bail!(
                        "{}: confidence {:?} at {} {} is outside [0, 1]",
                        path.display(),
                        cell,
                        report_date,
                        quarter
                    );
                }
                confidence.insert((*report_date, *quarter), score);
            }
        }
    }

    let mut table = EstimateTable::new();
    for (report_date, cells) in &values.rows {
        let mut estimates = Vec::new();
        for (quarter, cell) in values.columns.iter().zip(cells) {
            if cell.is_empty() {
                continue;
            }
            let (value, is_actual) = parse_value_cell(cell)
                .with_context(|| format!("{} at {} {}", values_path.display(), report_date, quarter))?;

            let score = match confidence_path {
                Some(path) => *confidence.get(&(*report_date, *quarter)).with_context(|| {
                    format!("{}: no confidence for {} {}", path.display(), report_date, quarter)
                })?,
                None => IMPORTED_CONFIDENCE,
            };

            estimates.push(QuarterEstimate {
                quarter: *quarter,
                value,
                is_actual,
                confidence: score,
            });
        }

        let snapshot = ReportSnapshot::new(*report_date, estimates)?;
        table = table
            .merge(&snapshot)
            .with_context(|| format!("{}: row {}", values_path.display(), report_date))?;
    }

    Ok(table)
}
