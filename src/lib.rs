// EPS Vintage - Core Library
// Chart OCR → point-in-time EPS estimate table → price/EPS ratio series.
// Exposes all modules for use in the CLI, the API server, and tests.

pub mod errors;
pub mod quarter;
pub mod config;
pub mod regions;     // TextRegionParser
pub mod matcher;     // CoordinateMatcher
pub mod classifier;  // BarClassifier (3-method vote)
pub mod confidence;  // ConfidenceScorer
pub mod snapshot;
pub mod extraction;  // one chart → one ReportSnapshot
pub mod table;       // PointInTimeMerger
pub mod ratio;       // RatioEngine
pub mod wide_csv;
pub mod store;       // SQLite ledger
pub mod logging;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export commonly used types
pub use errors::EstimateError;
pub use quarter::QuarterKey;
pub use config::{ExtractionConfig, LegendColors};
pub use regions::{OcrDetection, Point, RegionKind, TextRegion, TextRegionParser};
pub use matcher::{BarGeometry, CoordinateMatcher, MatchedBar};
pub use classifier::{
    BarClassifier, BarKind, ChartContext, ClassifiedBar, ClassifierMethod,
    LegendSwatches, PixelSource,
};
pub use confidence::{actuals_consistency, ConfidenceScorer};
pub use snapshot::{report_date_from_filename, QuarterEstimate, ReportSnapshot};
pub use extraction::ChartExtractor;
pub use table::{EstimateTable, Vintage};
pub use ratio::{write_ratio_csv, PriceSeries, RatioEngine, RatioRow, RatioType};
pub use wide_csv::{read_wide_csv, write_confidence_csv, write_values_csv};
pub use store::{
    Event, append_snapshot, load_table, setup_database,
    insert_event, get_events_for_entity, verify_fingerprints,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
