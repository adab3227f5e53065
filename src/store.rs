// 🗄️ Estimate Ledger - SQLite persistence for the point-in-time table
//
// Two append-only tables guarded by triggers (UPDATE/DELETE abort):
//   snapshots  one row per merged report (fingerprint, source, cell count)
//   estimates  one row per (report_date, quarter) cell
// plus the events audit trail. A snapshot is written in a single SQL
// transaction or not at all.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::EstimateError;
use crate::quarter::QuarterKey;
use crate::snapshot::{QuarterEstimate, ReportSnapshot};
use crate::table::EstimateTable;

pub const SNAPSHOT_MERGED: &str = "snapshot_merged";

// ============================================================================
// EVENTS
// ============================================================================

/// Audit trail entry
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open ledger {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases report "memory" instead
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS snapshots (
            report_date TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            source TEXT NOT NULL,
            cells INTEGER NOT NULL,
            merged_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS estimates (
            report_date TEXT NOT NULL REFERENCES snapshots(report_date),
            quarter TEXT NOT NULL,
            value REAL NOT NULL,
            is_actual INTEGER NOT NULL,
            confidence REAL NOT NULL,
            PRIMARY KEY (report_date, quarter)
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TRIGGER IF NOT EXISTS estimates_no_update
        BEFORE UPDATE ON estimates
        BEGIN SELECT RAISE(ABORT, 'estimates are append-only'); END;

        CREATE TRIGGER IF NOT EXISTS estimates_no_delete
        BEFORE DELETE ON estimates
        BEGIN SELECT RAISE(ABORT, 'estimates are append-only'); END;

        CREATE TRIGGER IF NOT EXISTS snapshots_no_update
        BEFORE UPDATE ON snapshots
        BEGIN SELECT RAISE(ABORT, 'snapshots are append-only'); END;

        CREATE TRIGGER IF NOT EXISTS snapshots_no_delete
        BEFORE DELETE ON snapshots
        BEGIN SELECT RAISE(ABORT, 'snapshots are append-only'); END;

        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);",
    )?;

    Ok(())
}

// ============================================================================
// WRITE
// ============================================================================

/// Newest merged report date, if any
pub fn newest_report_date(conn: &Connection) -> Result<Option<NaiveDate>> {
    let raw: Option<String> = conn.query_row("SELECT MAX(report_date) FROM snapshots", [], |row| {
        row.get(0)
    })?;
    raw.map(|s| parse_date(&s)).transpose()
}

pub fn contains_report(conn: &Connection, report_date: NaiveDate) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM snapshots WHERE report_date = ?1",
            params![report_date.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Append one snapshot as a new row of the ledger.
///
/// Duplicate or older report dates fail with the corresponding
/// `EstimateError` (downcastable from the returned error) and write nothing.
pub fn append_snapshot(conn: &mut Connection, snapshot: &ReportSnapshot, source: &str) -> Result<()> {
    let report_date = snapshot.report_date();
    let tx = conn.transaction()?;

    if contains_report(&tx, report_date)? {
        return Err(EstimateError::DuplicateSnapshot(report_date).into());
    }
    if let Some(newest) = newest_report_date(&tx)? {
        if report_date < newest {
            return Err(EstimateError::OutOfOrderMerge {
                report_date,
                newest,
            }
            .into());
        }
    }

    let fingerprint = snapshot.fingerprint();
    tx.execute(
        "INSERT INTO snapshots (report_date, fingerprint, source, cells, merged_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            report_date.to_string(),
            fingerprint,
            source,
            snapshot.len() as i64,
            Utc::now().to_rfc3339(),
        ],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO estimates (report_date, quarter, value, is_actual, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for estimate in snapshot.estimates().values() {
            stmt.execute(params![
                report_date.to_string(),
                estimate.quarter.to_string(),
                estimate.value,
                estimate.is_actual,
                estimate.confidence,
            ])?;
        }
    }

    let event = Event::new(
        SNAPSHOT_MERGED,
        "snapshot",
        &report_date.to_string(),
        serde_json::json!({
            "fingerprint": fingerprint,
            "source": source,
            "cells": snapshot.len(),
            "actuals": snapshot.estimates().values().filter(|e| e.is_actual).count(),
        }),
        "ingest",
    );
    insert_event(&tx, &event)?;

    tx.commit()
        .with_context(|| format!("Failed to commit snapshot {}", report_date))?;

    tracing::info!(%report_date, cells = snapshot.len(), %fingerprint, "snapshot appended");
    Ok(())
}

// ============================================================================
// READ
// ============================================================================

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Corrupt report date {:?} in ledger", raw))
}

fn load_snapshots(conn: &Connection) -> Result<Vec<(ReportSnapshot, String)>> {
    let mut stmt = conn.prepare("SELECT report_date, fingerprint FROM snapshots ORDER BY report_date")?;
    let headers = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut cells: BTreeMap<NaiveDate, Vec<QuarterEstimate>> = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT report_date, quarter, value, is_actual, confidence FROM estimates",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (raw_date, raw_quarter, value, is_actual, confidence) in rows {
        let quarter: QuarterKey = raw_quarter
            .parse()
            .with_context(|| format!("Corrupt quarter {:?} in ledger", raw_quarter))?;
        cells.entry(parse_date(&raw_date)?).or_default().push(QuarterEstimate {
            quarter,
            value,
            is_actual,
            confidence,
        });
    }

    headers
        .into_iter()
        .map(|(raw_date, fingerprint)| -> Result<(ReportSnapshot, String)> {
            let report_date = parse_date(&raw_date)?;
            let estimates = cells.remove(&report_date).unwrap_or_default();
            Ok((ReportSnapshot::new(report_date, estimates)?, fingerprint))
        })
        .collect()
}

/// Rebuild the EstimateTable from every merged snapshot
pub fn load_table(conn: &Connection) -> Result<EstimateTable> {
    let snapshots = load_snapshots(conn)?
        .into_iter()
        .map(|(snapshot, _)| snapshot);
    Ok(EstimateTable::new().merge_batch(snapshots)?)
}

/// Report dates whose stored cells no longer hash to the recorded fingerprint
pub fn verify_fingerprints(conn: &Connection) -> Result<Vec<NaiveDate>> {
    Ok(load_snapshots(conn)?
        .into_iter()
        .filter(|(snapshot, fingerprint)| snapshot.fingerprint() != *fingerprint)
        .map(|(snapshot, _)| snapshot.report_date())
        .collect())
}

pub fn count_cells(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM estimates", [], |row| row.get(0))?;
    Ok(count)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events for one entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let raw = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| -> Result<Event> {
            Ok(Event {
                event_id,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .with_context(|| format!("Corrupt event timestamp {:?}", timestamp))?
                    .with_timezone(&Utc),
                event_type,
                entity_type,
                entity_id,
                data: serde_json::from_str(&data)?,
                actor,
            })
        })
        .collect()
}
