use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use eps_vintage::{
    actuals_consistency, logging, read_wide_csv, report_date_from_filename, store,
    write_confidence_csv, write_ratio_csv, write_values_csv, ChartExtractor, EstimateTable,
    ExtractionConfig, OcrDetection, PixelSource, PriceSeries, RatioEngine, RatioType,
    ReportSnapshot,
};

#[derive(Parser, Debug)]
#[command(
    name = "eps-vintage",
    version,
    about = "Point-in-time EPS estimates from chart OCR, and the price ratios they imply"
)]
struct Cli {
    /// Emit structured logs to stderr
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract charts (OCR JSON + same-stem PNG) and append them to the ledger
    Ingest {
        #[arg(long = "db", default_value = "eps.db")]
        db: PathBuf,

        /// Extraction settings (JSON); defaults when omitted
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,

        /// Detection files, or directories of them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Write the wide values + confidence CSVs
    Export {
        #[arg(long = "db", default_value = "eps.db")]
        db: PathBuf,

        #[arg(long = "values", default_value = "eps_values.csv")]
        values: PathBuf,

        #[arg(long = "confidence", default_value = "eps_confidence.csv")]
        confidence: PathBuf,
    },

    /// Load wide CSVs into an empty or older ledger
    Import {
        #[arg(long = "db", default_value = "eps.db")]
        db: PathBuf,

        #[arg(long = "values")]
        values: PathBuf,

        #[arg(long = "confidence")]
        confidence: Option<PathBuf>,
    },

    /// Compute the price / 4-quarter EPS series
    Ratios {
        #[arg(long = "db", default_value = "eps.db")]
        db: PathBuf,

        /// `Date,Price` CSV
        #[arg(long = "prices")]
        prices: PathBuf,

        /// forward | trailing
        #[arg(short = 't', long = "type", default_value = "forward")]
        kind: RatioType,

        #[arg(short = 'o', long = "out", default_value = "pe_ratios.csv")]
        out: PathBuf,
    },

    /// Check every stored snapshot against its recorded fingerprint
    Verify {
        #[arg(long = "db", default_value = "eps.db")]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    match cli.command {
        Command::Ingest { db, config, inputs } => run_ingest(&db, config.as_deref(), &inputs),
        Command::Export { db, values, confidence } => run_export(&db, &values, &confidence),
        Command::Import { db, values, confidence } => run_import(&db, &values, confidence.as_deref()),
        Command::Ratios { db, prices, kind, out } => run_ratios(&db, &prices, kind, &out),
        Command::Verify { db } => run_verify(&db),
    }
}

// ============================================================================
// INGEST
// ============================================================================

fn collect_detection_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in std::fs::read_dir(input)
                .with_context(|| format!("Failed to list {}", input.display()))?
            {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn load_chart(json_path: &Path) -> Result<Option<image::RgbImage>> {
    let png_path = json_path.with_extension("png");
    if !png_path.exists() {
        return Ok(None);
    }
    let img = image::open(&png_path)
        .with_context(|| format!("Failed to read chart {}", png_path.display()))?;
    Ok(Some(img.to_rgb8()))
}

fn extract_one(extractor: &ChartExtractor, json_path: &Path) -> Result<ReportSnapshot> {
    let name = json_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let report_date = report_date_from_filename(&name)?;
    let detections = OcrDetection::load_json(json_path)?;
    let chart = load_chart(json_path)?;
    if chart.is_none() {
        tracing::warn!(%report_date, "no chart image beside {}; pixel votes abstain", name);
    }
    let pixels = chart.as_ref().map(|img| img as &dyn PixelSource);

    Ok(extractor.extract_widening(&detections, report_date, pixels)?)
}

fn run_ingest(db: &Path, config: Option<&Path>, inputs: &[PathBuf]) -> Result<()> {
    println!("📥 Ingest - chart OCR → point-in-time ledger");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = match config {
        Some(path) => ExtractionConfig::from_file(path)?,
        None => ExtractionConfig::default(),
    };
    let extractor = ChartExtractor::new(config);

    let mut conn = store::open(db)?;
    let mut table = store::load_table(&conn)?;
    println!("✓ Ledger holds {} report(s)", table.len());

    // order by report date so every merge is an append
    let mut jobs = Vec::new();
    for path in collect_detection_files(inputs)? {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        match name.as_deref().map(report_date_from_filename) {
            Some(Ok(date)) => jobs.push((date, path)),
            Some(Err(e)) => println!("❌ {}: {}", path.display(), e),
            None => println!("❌ {}: not a file name", path.display()),
        }
    }
    jobs.sort();

    let (mut merged, mut skipped, mut failed) = (0usize, 0usize, 0usize);

    for (report_date, path) in jobs {
        if table.row(report_date).is_some() {
            println!("⏭️  {} already merged", report_date);
            skipped += 1;
            continue;
        }

        let snapshot = match extract_one(&extractor, &path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                println!("❌ {}: {:#}", path.display(), e);
                failed += 1;
                continue;
            }
        };

        let previous = table.newest().and_then(|d| table.row(d));
        let consistency = previous.and_then(|row| actuals_consistency(row, &snapshot));

        let next = match table.merge(&snapshot) {
            Ok(next) => next,
            Err(e) => {
                println!("❌ {}: {}", path.display(), e);
                failed += 1;
                continue;
            }
        };
        store::append_snapshot(&mut conn, &snapshot, &path.display().to_string())?;
        table = next;
        merged += 1;

        match consistency {
            Some(share) if share < 1.0 => println!(
                "⚠️  {} merged ({} quarters); only {:.0}% of actuals agree with the previous report",
                report_date,
                snapshot.len(),
                share * 100.0
            ),
            _ => println!("✓ {} merged ({} quarters)", report_date, snapshot.len()),
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Merged: {}   Skipped: {}   Failed: {}", merged, skipped, failed);
    println!("✓ Ledger now holds {} report(s), {} quarter column(s)", table.len(), table.columns().len());

    Ok(())
}

// ============================================================================
// EXPORT / IMPORT
// ============================================================================

fn run_export(db: &Path, values: &Path, confidence: &Path) -> Result<()> {
    let conn = store::open(db)?;
    let table = store::load_table(&conn)?;

    write_values_csv(values, &table)?;
    write_confidence_csv(confidence, &table)?;

    println!("✓ Exported {} report(s) × {} quarter(s)", table.len(), table.columns().len());
    println!("  values:     {}", values.display());
    println!("  confidence: {}", confidence.display());
    Ok(())
}

fn run_import(db: &Path, values: &Path, confidence: Option<&Path>) -> Result<()> {
    let imported = read_wide_csv(values, confidence)?;
    println!("📂 Read {} report(s) from {}", imported.len(), values.display());

    let mut conn = store::open(db)?;
    let existing: EstimateTable = store::load_table(&conn)?;

    let mut appended = 0usize;
    for (report_date, row) in imported.rows() {
        if existing.row(report_date).is_some() {
            println!("⏭️  {} already in ledger", report_date);
            continue;
        }
        let snapshot = ReportSnapshot::new(report_date, row.values().copied())?;
        store::append_snapshot(&mut conn, &snapshot, &values.display().to_string())
            .with_context(|| format!("Failed to import {}", report_date))?;
        appended += 1;
    }

    println!("✅ Imported {} report(s)", appended);
    Ok(())
}

// ============================================================================
// RATIOS / VERIFY
// ============================================================================

fn run_ratios(db: &Path, prices: &Path, kind: RatioType, out: &Path) -> Result<()> {
    let conn = store::open(db)?;
    let table = store::load_table(&conn)?;
    let prices = PriceSeries::load_csv(prices)?;

    let rows = RatioEngine::compute(&table, &prices, kind);
    write_ratio_csv(out, &rows)?;

    println!(
        "✓ {} {} ratio(s) from {} trading day(s) → {}",
        rows.len(),
        kind,
        prices.len(),
        out.display()
    );
    if let (Some(first), Some(last)) = (rows.first(), rows.last()) {
        println!(
            "  {} → {}   P/E {:.2} → {:.2}",
            first.price_date, last.price_date, first.pe_ratio, last.pe_ratio
        );
    }
    Ok(())
}

fn run_verify(db: &Path) -> Result<()> {
    let conn = store::open(db)?;
    let tampered = store::verify_fingerprints(&conn)?;

    if tampered.is_empty() {
        println!("✅ Every snapshot matches its fingerprint");
        return Ok(());
    }
    for date in &tampered {
        println!("❌ {} no longer matches its fingerprint", date);
        let history = store::get_events_for_entity(&conn, "snapshot", &date.to_string())?;
        for event in history.iter().filter(|e| e.event_type == store::SNAPSHOT_MERGED) {
            let source = event.data.get("source").and_then(|s| s.as_str()).unwrap_or("?");
            println!("   merged {} from {}", event.timestamp.to_rfc3339(), source);
        }
    }
    anyhow::bail!("{} snapshot(s) failed verification", tampered.len())
}
