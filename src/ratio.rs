// 📈 Ratio Engine - price / 4-quarter EPS sum, per trading day
//
// For each trading day d:
//   vintage = latest report_date <= d        (none → day skipped)
//   q(d)    = calendar quarter containing d  (the DAY's quarter, not the report's)
//   Forward  window: q(d) .. q(d)+3
//   Trailing window: q(d)-4 .. q(d)-1
//   any window cell absent at that vintage → day skipped
//
// Only the effective vintage is consulted. An older row that happens to hold
// the missing quarter is never used as a fallback.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::errors::EstimateError;
use crate::quarter::QuarterKey;
use crate::table::EstimateTable;

// ============================================================================
// RATIO TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RatioType {
    Forward,
    Trailing,
}

impl RatioType {
    /// The four quarters summed for reference quarter `q`
    pub fn window(&self, q: QuarterKey) -> [QuarterKey; 4] {
        let start = match self {
            RatioType::Forward => 0,
            RatioType::Trailing => -4,
        };
        [start, start + 1, start + 2, start + 3].map(|n| q.offset(n))
    }
}

impl fmt::Display for RatioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatioType::Forward => write!(f, "Forward"),
            RatioType::Trailing => write!(f, "Trailing"),
        }
    }
}

impl FromStr for RatioType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Ok(RatioType::Forward),
            "trailing" => Ok(RatioType::Trailing),
            other => anyhow::bail!("unknown ratio type {:?} (expected forward|trailing)", other),
        }
    }
}

// ============================================================================
// PRICE SERIES
// ============================================================================

#[derive(Debug, Deserialize)]
struct PriceRecord {
    #[serde(rename = "Date")]
    date: NaiveDate,

    #[serde(rename = "Price")]
    price: f64,
}

/// One price per trading day, strictly increasing dates, positive prices
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    points: Vec<(NaiveDate, f64)>,
}

impl PriceSeries {
    pub fn new(points: Vec<(NaiveDate, f64)>) -> Result<Self, EstimateError> {
        if let Some(w) = points.windows(2).find(|w| w[1].0 <= w[0].0) {
            return Err(EstimateError::PriceSeries(format!(
                "dates not strictly increasing at {} -> {}",
                w[0].0, w[1].0
            )));
        }
        if let Some((date, price)) = points.iter().find(|(_, p)| !(p.is_finite() && *p > 0.0)) {
            return Err(EstimateError::PriceSeries(format!(
                "non-positive price {} on {}",
                price, date
            )));
        }
        Ok(PriceSeries { points })
    }

    /// Read a `Date,Price` CSV (ISO dates)
    pub fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open price file {}", path.display()))?;

        let mut points = Vec::new();
        for (i, record) in reader.deserialize::<PriceRecord>().enumerate() {
            let record = record.with_context(|| {
                format!("Failed to parse price row {} in {}", i + 2, path.display())
            })?;
            points.push((record.date, record.price));
        }

        Ok(PriceSeries::new(points)?)
    }

    pub fn points(&self) -> &[(NaiveDate, f64)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ============================================================================
// RATIO ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioRow {
    #[serde(rename = "Report_Date")]
    pub report_date: NaiveDate,

    #[serde(rename = "Price_Date")]
    pub price_date: NaiveDate,

    #[serde(rename = "Price")]
    pub price: f64,

    #[serde(rename = "EPS_4Q_Sum")]
    pub eps_4q_sum: f64,

    #[serde(rename = "PE_Ratio")]
    pub pe_ratio: f64,

    #[serde(rename = "Type")]
    pub kind: RatioType,
}

pub struct RatioEngine;

impl RatioEngine {
    /// One RatioRow per trading day with a complete window, in price order
    pub fn compute(table: &EstimateTable, prices: &PriceSeries, kind: RatioType) -> Vec<RatioRow> {
        let mut rows = Vec::with_capacity(prices.len());
        let mut no_vintage = 0usize;
        let mut incomplete = 0usize;

        for &(day, price) in prices.points() {
            let Some((report_date, vintage)) = table.effective_vintage(day) else {
                no_vintage += 1;
                continue;
            };

            let window = kind.window(QuarterKey::containing(day));
            let cells: Option<Vec<f64>> = window
                .iter()
                .map(|q| vintage.get(q).map(|e| e.value))
                .collect();

            let Some(cells) = cells else {
                incomplete += 1;
                tracing::debug!(%day, %report_date, first = %window[0], "window incomplete");
                continue;
            };

            let eps_4q_sum: f64 = cells.iter().sum();
            if !(eps_4q_sum.is_finite() && eps_4q_sum > 0.0) {
                tracing::warn!(%day, %report_date, eps_4q_sum, "unusable EPS sum; day skipped");
                continue;
            }

            rows.push(RatioRow {
                report_date,
                price_date: day,
                price,
                eps_4q_sum,
                pe_ratio: price / eps_4q_sum,
                kind,
            });
        }

        tracing::info!(
            %kind,
            computed = rows.len(),
            no_vintage,
            incomplete,
            "ratio series computed"
        );

        rows
    }
}

/// Write ratio rows as `Report_Date,Price_Date,Price,EPS_4Q_Sum,PE_Ratio,Type`
pub fn write_ratio_csv(path: &Path, rows: &[RatioRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{QuarterEstimate, ReportSnapshot};
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn snapshot(report_date: NaiveDate, cells: &[(&str, f64)]) -> ReportSnapshot {
        ReportSnapshot::new(
            report_date,
            cells.iter().map(|(quarter, value)| QuarterEstimate {
                quarter: quarter.parse().unwrap(),
                value: *value,
                is_actual: false,
                confidence: 1.0,
            }),
        )
        .unwrap()
    }

    fn december_table() -> EstimateTable {
        EstimateTable::new()
            .merge(&snapshot(
                date(2016, 12, 9),
                &[("Q4'16", 30.0), ("Q1'17", 31.0), ("Q2'17", 32.0), ("Q3'17", 33.0)],
            ))
            .unwrap()
    }

    #[test]
    fn test_forward_ratio_example() {
        let prices = PriceSeries::new(vec![(date(2016, 12, 12), 2256.96)]).unwrap();
        let rows = RatioEngine::compute(&december_table(), &prices, RatioType::Forward);

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.report_date, date(2016, 12, 9));
        assert_eq!(row.price_date, date(2016, 12, 12));
        assert_eq!(row.eps_4q_sum, 126.0);
        assert!((row.pe_ratio - 17.9124).abs() < 1e-4);
        assert_eq!(row.kind, RatioType::Forward);
    }

    #[test]
    fn test_days_before_first_report_and_incomplete_windows_skipped() {
        let prices = PriceSeries::new(vec![
            (date(2016, 12, 8), 2246.19),
            (date(2016, 12, 12), 2256.96),
            // Q1'17 reference needs Q4'17, which the December row lacks
            (date(2017, 1, 3), 2257.83),
        ])
        .unwrap();
        let rows = RatioEngine::compute(&december_table(), &prices, RatioType::Forward);
        assert_eq!(
            rows.iter().map(|r| r.price_date).collect::<Vec<_>>(),
            vec![date(2016, 12, 12)]
        );
    }

    #[test]
    fn test_no_fallback_to_older_vintage() {
        let table = EstimateTable::new()
            .merge_batch(vec![
                snapshot(
                    date(2016, 12, 9),
                    &[("Q1'17", 31.0), ("Q2'17", 32.0), ("Q3'17", 33.0), ("Q4'17", 34.0)],
                ),
                snapshot(
                    date(2017, 3, 3),
                    &[("Q1'17", 30.5), ("Q2'17", 32.5), ("Q3'17", 33.5)],
                ),
            ])
            .unwrap();

        // both days reference Q1'17..Q4'17; only the December row has Q4'17
        let prices = PriceSeries::new(vec![
            (date(2017, 1, 3), 2257.83),
            (date(2017, 3, 6), 2375.31),
        ])
        .unwrap();
        let rows = RatioEngine::compute(&table, &prices, RatioType::Forward);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price_date, date(2017, 1, 3));
        assert_eq!(rows[0].report_date, date(2016, 12, 9));
    }

    #[test]
    fn test_trailing_window() {
        let table = EstimateTable::new()
            .merge(&snapshot(
                date(2017, 1, 6),
                &[("Q1'16", 26.0), ("Q2'16", 29.0), ("Q3'16", 28.7), ("Q4'16", 30.0)],
            ))
            .unwrap();
        let prices = PriceSeries::new(vec![(date(2017, 1, 9), 2268.90)]).unwrap();

        let rows = RatioEngine::compute(&table, &prices, RatioType::Trailing);
        assert_eq!(rows.len(), 1);
        assert!((rows[0].eps_4q_sum - 113.7).abs() < 1e-9);

        assert!(RatioEngine::compute(&table, &prices, RatioType::Forward).is_empty());
    }

    #[test]
    fn test_non_positive_sum_skipped() {
        let table = EstimateTable::new()
            .merge(&snapshot(
                date(2020, 4, 3),
                &[("Q2'20", -40.0), ("Q3'20", 10.0), ("Q4'20", 12.0), ("Q1'21", 15.0)],
            ))
            .unwrap();
        let prices = PriceSeries::new(vec![(date(2020, 4, 6), 2663.68)]).unwrap();
        assert!(RatioEngine::compute(&table, &prices, RatioType::Forward).is_empty());
    }

    #[test]
    fn test_non_finite_sum_skipped() {
        let prices = PriceSeries::new(vec![(date(2016, 12, 12), 2256.96)]).unwrap();
        for bad in [f64::NAN, f64::INFINITY] {
            let table = EstimateTable::new()
                .merge(&snapshot(
                    date(2016, 12, 9),
                    &[("Q4'16", bad), ("Q1'17", 31.0), ("Q2'17", 32.0), ("Q3'17", 33.0)],
                ))
                .unwrap();
            assert!(RatioEngine::compute(&table, &prices, RatioType::Forward).is_empty());
        }
    }

    #[test]
    fn test_price_series_validation() {
        let err = PriceSeries::new(vec![(date(2017, 1, 3), 2257.83), (date(2017, 1, 3), 2270.0)])
            .unwrap_err();
        assert!(matches!(err, EstimateError::PriceSeries(_)));

        let err = PriceSeries::new(vec![(date(2017, 1, 3), 0.0)]).unwrap_err();
        assert!(matches!(err, EstimateError::PriceSeries(_)));
    }

    #[test]
    fn test_price_csv_and_ratio_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Date,Price").unwrap();
        writeln!(file, "2016-12-09,2259.53").unwrap();
        writeln!(file, "2016-12-12,2256.96").unwrap();
        file.flush().unwrap();

        let prices = PriceSeries::load_csv(file.path()).unwrap();
        assert_eq!(prices.len(), 2);

        let rows = RatioEngine::compute(&december_table(), &prices, RatioType::Forward);
        assert_eq!(rows.len(), 2);

        let out = tempfile::NamedTempFile::new().unwrap();
        write_ratio_csv(out.path(), &rows).unwrap();
        let text = std::fs::read_to_string(out.path()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Report_Date,Price_Date,Price,EPS_4Q_Sum,PE_Ratio,Type")
        );
        assert!(lines.next().unwrap().starts_with("2016-12-09,2016-12-09,2259.53,126.0,"));
        assert!(lines.next().unwrap().ends_with(",Forward"));
    }

    #[test]
    fn test_ratio_type_from_str() {
        assert_eq!("forward".parse::<RatioType>().unwrap(), RatioType::Forward);
        assert_eq!("Trailing".parse::<RatioType>().unwrap(), RatioType::Trailing);
        assert!("pe".parse::<RatioType>().is_err());
    }
}
