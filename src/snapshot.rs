// 📸 Report Snapshot - one chart's (report_date, {quarter: estimate})
// Immutable once produced; the unit folded into the EstimateTable.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::errors::EstimateError;
use crate::quarter::QuarterKey;

static DATE_STAMP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{8})").unwrap());

/// Unit persisted per (report, quarter) cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuarterEstimate {
    pub quarter: QuarterKey,
    pub value: f64,
    pub is_actual: bool,

    /// Advisory trust in [0, 1]; never gates whether the value is written
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    report_date: NaiveDate,
    estimates: BTreeMap<QuarterKey, QuarterEstimate>,
}

impl ReportSnapshot {
    /// Build a snapshot; a quarter appearing twice is a parse error
    pub fn new(
        report_date: NaiveDate,
        estimates: impl IntoIterator<Item = QuarterEstimate>,
    ) -> Result<Self, EstimateError> {
        let mut map = BTreeMap::new();
        for estimate in estimates {
            if map.insert(estimate.quarter, estimate).is_some() {
                return Err(EstimateError::parse(format!(
                    "quarter {} appears twice in snapshot for {}",
                    estimate.quarter, report_date
                )));
            }
        }
        Ok(ReportSnapshot {
            report_date,
            estimates: map,
        })
    }

    pub fn report_date(&self) -> NaiveDate {
        self.report_date
    }

    pub fn estimates(&self) -> &BTreeMap<QuarterKey, QuarterEstimate> {
        &self.estimates
    }

    pub fn get(&self, quarter: &QuarterKey) -> Option<&QuarterEstimate> {
        self.estimates.get(quarter)
    }

    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    /// Content hash (date + every cell), stable across runs
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.report_date.to_string());
        for estimate in self.estimates.values() {
            hasher.update(format!(
                "|{}={}:{}:{}",
                estimate.quarter, estimate.value, estimate.is_actual, estimate.confidence
            ));
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Report date from the first `YYYYMMDD` run in a chart file name
/// (e.g. "20161209-6.png" → 2016-12-09)
pub fn report_date_from_filename(filename: &str) -> Result<NaiveDate, EstimateError> {
    let stamp = DATE_STAMP
        .captures(filename)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| EstimateError::parse(format!("no YYYYMMDD date in {:?}", filename)))?;

    NaiveDate::parse_from_str(&stamp, "%Y%m%d")
        .map_err(|e| EstimateError::parse(format!("bad date {:?} in {:?}: {}", stamp, filename, e)))
}
