// 🚨 Error Taxonomy - every failure the extraction + vintage core can raise
//
// Per-image errors (Parse, Match, Classification) are fatal for that chart
// only. Merge errors (DuplicateSnapshot, OutOfOrderMerge) protect the
// point-in-time table. Nothing here is retried inside the core.

use chrono::NaiveDate;
use thiserror::Error;

use crate::quarter::QuarterKey;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimateError {
    /// Malformed or unrecognizable OCR input
    #[error("parse error: {0}")]
    Parse(String),

    /// A label or value region could not be paired
    #[error("match error on region {region:?}: {reason}")]
    Match { region: String, reason: String },

    /// Fewer than two classifier votes (or no majority) for a bar
    #[error("classification error for {quarter}: {reason}")]
    Classification { quarter: QuarterKey, reason: String },

    /// Re-ingesting a report_date that is already in the table
    #[error("snapshot for {0} has already been merged")]
    DuplicateSnapshot(NaiveDate),

    /// Snapshot older than the newest row of the table
    #[error("snapshot for {report_date} is older than newest row {newest}")]
    OutOfOrderMerge {
        report_date: NaiveDate,
        newest: NaiveDate,
    },

    /// Price input that is not strictly ordered or not positive
    #[error("invalid price series: {0}")]
    PriceSeries(String),
}

impl EstimateError {
    pub fn parse(message: impl Into<String>) -> Self {
        EstimateError::Parse(message.into())
    }

    pub fn unmatched(region: impl Into<String>, reason: impl Into<String>) -> Self {
        EstimateError::Match {
            region: region.into(),
            reason: reason.into(),
        }
    }

    /// True for errors a caller may retry with a widened matcher tolerance
    pub fn is_match_error(&self) -> bool {
        matches!(self, EstimateError::Match { .. })
    }
}
