// 🔎 Chart Extraction - one chart image → one ReportSnapshot
//
// detections → TextRegionParser → CoordinateMatcher → BarClassifier
//            → ConfidenceScorer → ReportSnapshot
//
// Pure and synchronous. Charts are independent, so callers may run several
// extractions in parallel; merging is what must be serialized.

use chrono::NaiveDate;

use crate::classifier::{BarClassifier, ChartContext, LegendSwatches, PixelSource};
use crate::config::ExtractionConfig;
use crate::confidence::ConfidenceScorer;
use crate::errors::EstimateError;
use crate::matcher::CoordinateMatcher;
use crate::regions::{OcrDetection, TextRegionParser};
use crate::snapshot::ReportSnapshot;

pub struct ChartExtractor {
    config: ExtractionConfig,
    classifier: BarClassifier,
}

impl ChartExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        ChartExtractor {
            config,
            classifier: BarClassifier::new(),
        }
    }

    pub fn extract(
        &self,
        detections: &[OcrDetection],
        report_date: NaiveDate,
        pixels: Option<&dyn PixelSource>,
    ) -> Result<ReportSnapshot, EstimateError> {
        let regions = TextRegionParser::new(&self.config).parse(detections)?;
        let bars = CoordinateMatcher::new(&self.config).match_bars(&regions)?;

        let legend = pixels
            .and_then(|p| {
                LegendSwatches::sample(
                    &regions,
                    p,
                    self.config.legend_swatch_offset,
                    self.config.sample_radius,
                )
            })
            .or_else(|| self.config.legend_colors.map(LegendSwatches::from_colors));

        if legend.is_none() {
            tracing::warn!(%report_date, "no legend calibration; color votes will abstain");
        }

        let context = ChartContext {
            report_date,
            pixels,
            legend,
            sample_radius: self.config.sample_radius,
        };

        let classified = self.classifier.classify_all(&bars, &context)?;

        let scorer = ConfidenceScorer::new(self.config.default_ocr_confidence);
        let snapshot =
            ReportSnapshot::new(report_date, classified.iter().map(|c| scorer.estimate(c)))?;

        tracing::debug!(
            %report_date,
            quarters = snapshot.len(),
            actuals = classified.iter().filter(|c| c.is_actual).count(),
            "extracted snapshot"
        );

        Ok(snapshot)
    }

    /// Caller-side retry policy: re-run with a widened matcher tolerance
    /// after a `Match` error, up to `match_retries` extra attempts. Every
    /// other error is returned as-is on the first attempt.
    pub fn extract_widening(
        &self,
        detections: &[OcrDetection],
        report_date: NaiveDate,
        pixels: Option<&dyn PixelSource>,
    ) -> Result<ReportSnapshot, EstimateError> {
        let mut attempt = 0;
        loop {
            let extractor = ChartExtractor {
                config: self.config.widened(attempt),
                classifier: BarClassifier::with_methods(self.classifier.methods()),
            };
            match extractor.extract(detections, report_date, pixels) {
                Err(err) if err.is_match_error() && attempt < self.config.match_retries => {
                    attempt += 1;
                    tracing::warn!(
                        %report_date,
                        attempt,
                        x_tolerance = self.config.widened(attempt).x_tolerance,
                        error = %err,
                        "match failed; retrying with widened tolerance"
                    );
                }
                result => return result,
            }
        }
    }
}
