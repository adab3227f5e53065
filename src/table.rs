// 🗂️ Estimate Table - the point-in-time wide table
//
// Rows keyed by report_date (strictly increasing, unique); columns are the
// union of every QuarterKey ever seen. A cell written for (report_date,
// quarter) is never touched again: merge returns a NEW table and leaves
// the receiver as it was.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::EstimateError;
use crate::quarter::QuarterKey;
use crate::snapshot::{QuarterEstimate, ReportSnapshot};

pub type Vintage = BTreeMap<QuarterKey, QuarterEstimate>;

/// Serialize-only: the only way to build one is through `merge`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EstimateTable {
    rows: BTreeMap<NaiveDate, Vintage>,
    columns: BTreeSet<QuarterKey>,
}

impl EstimateTable {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // MERGE
    // ========================================================================

    /// Fold one snapshot in as a new row.
    ///
    /// Fails with `DuplicateSnapshot` if the report_date is already a row and
    /// with `OutOfOrderMerge` if it is older than the newest row.
    pub fn merge(&self, snapshot: &ReportSnapshot) -> Result<EstimateTable, EstimateError> {
        let report_date = snapshot.report_date();

        if self.rows.contains_key(&report_date) {
            return Err(EstimateError::DuplicateSnapshot(report_date));
        }
        if let Some(newest) = self.newest() {
            if report_date < newest {
                return Err(EstimateError::OutOfOrderMerge {
                    report_date,
                    newest,
                });
            }
        }

        let mut next = self.clone();
        next.columns.extend(snapshot.estimates().keys().copied());
        next.rows.insert(report_date, snapshot.estimates().clone());

        tracing::debug!(
            %report_date,
            cells = snapshot.len(),
            columns = next.columns.len(),
            "merged snapshot"
        );

        Ok(next)
    }

    /// Merge many snapshots in report_date order. Two snapshots with the same
    /// date in one batch are rejected before anything is applied.
    pub fn merge_batch(
        &self,
        snapshots: impl IntoIterator<Item = ReportSnapshot>,
    ) -> Result<EstimateTable, EstimateError> {
        let mut batch: Vec<ReportSnapshot> = snapshots.into_iter().collect();
        batch.sort_by_key(|s| s.report_date());

        if let Some(pair) = batch
            .windows(2)
            .find(|w| w[0].report_date() == w[1].report_date())
        {
            return Err(EstimateError::DuplicateSnapshot(pair[0].report_date()));
        }

        batch
            .iter()
            .try_fold(self.clone(), |table, snapshot| table.merge(snapshot))
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn row(&self, report_date: NaiveDate) -> Option<&Vintage> {
        self.rows.get(&report_date)
    }

    pub fn cell(&self, report_date: NaiveDate, quarter: QuarterKey) -> Option<&QuarterEstimate> {
        self.rows.get(&report_date)?.get(&quarter)
    }

    /// Latest row with report_date <= `day`: what was known on that day
    pub fn effective_vintage(&self, day: NaiveDate) -> Option<(NaiveDate, &Vintage)> {
        self.rows
            .range(..=day)
            .next_back()
            .map(|(date, row)| (*date, row))
    }

    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, &Vintage)> {
        self.rows.iter().map(|(date, row)| (*date, row))
    }

    pub fn report_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.rows.keys().copied()
    }

    /// Sorted column set
    pub fn columns(&self) -> &BTreeSet<QuarterKey> {
        &self.columns
    }

    pub fn newest(&self) -> Option<NaiveDate> {
        self.rows.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
