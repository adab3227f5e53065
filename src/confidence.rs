// 🎯 Confidence Scorer - advisory trust per quarter
//
//   confidence  = 0.5 * agreement + 0.5 * consistency
//   consistency = 0.5 * OCR confidence of the value text
//               + 0.5 * matcher tie-break margin
//
// A sole, unambiguous candidate read with full OCR confidence scores 1.0.

use std::collections::BTreeMap;

use crate::classifier::ClassifiedBar;
use crate::matcher::MatchedBar;
use crate::quarter::QuarterKey;
use crate::snapshot::{QuarterEstimate, ReportSnapshot};

/// Relative change an actual may show between vintages and still agree
pub const ACTUAL_REVISION_TOLERANCE: f64 = 0.2;

pub struct ConfidenceScorer {
    default_ocr_confidence: f64,
}

impl ConfidenceScorer {
    pub fn new(default_ocr_confidence: f64) -> Self {
        ConfidenceScorer {
            default_ocr_confidence: default_ocr_confidence.clamp(0.0, 1.0),
        }
    }

    pub fn consistency(&self, bar: &MatchedBar) -> f64 {
        let ocr = bar
            .value_region
            .ocr_confidence
            .unwrap_or(self.default_ocr_confidence)
            .clamp(0.0, 1.0);
        let margin = bar.tie_break_margin.clamp(0.0, 1.0);
        0.5 * ocr + 0.5 * margin
    }

    pub fn score(&self, classified: &ClassifiedBar) -> f64 {
        let agreement = classified.agreement.clamp(0.0, 1.0);
        (0.5 * agreement + 0.5 * self.consistency(&classified.bar)).clamp(0.0, 1.0)
    }

    pub fn estimate(&self, classified: &ClassifiedBar) -> QuarterEstimate {
        QuarterEstimate {
            quarter: classified.bar.quarter,
            value: classified.bar.value,
            is_actual: classified.is_actual,
            confidence: self.score(classified),
        }
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        ConfidenceScorer::new(1.0)
    }
}

/// Share of comparable actuals that stayed within tolerance of the
/// previous vintage. Only quarters that are actual in both rows count;
/// None when there is nothing to compare.
pub fn actuals_consistency(
    previous: &BTreeMap<QuarterKey, QuarterEstimate>,
    snapshot: &ReportSnapshot,
) -> Option<f64> {
    let mut total = 0usize;
    let mut agreeing = 0usize;

    for current in snapshot.estimates().values().filter(|e| e.is_actual) {
        let Some(prior) = previous.get(&current.quarter).filter(|p| p.is_actual) else {
            continue;
        };
        total += 1;
        let change = (current.value - prior.value).abs() / prior.value.abs().max(0.01);
        if change <= ACTUAL_REVISION_TOLERANCE {
            agreeing += 1;
        }
    }

    if total == 0 {
        None
    } else {
        Some(agreeing as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{BarClassifier, ChartContext, LegendSwatches};
    use crate::config::ExtractionConfig;
    use crate::fixtures;
    use crate::matcher::CoordinateMatcher;
    use crate::regions::TextRegionParser;
    use chrono::NaiveDate;

    fn classified() -> Vec<ClassifiedBar> {
        let config = ExtractionConfig::default();
        let regions = TextRegionParser::new(&config)
            .parse(&fixtures::detections())
            .unwrap();
        let bars = CoordinateMatcher::new(&config).match_bars(&regions).unwrap();
        let image = fixtures::image();
        let ctx = ChartContext {
            report_date: fixtures::report_date(),
            pixels: Some(&image),
            legend: LegendSwatches::sample(&regions, &image, 12.0, 3),
            sample_radius: 3,
        };
        BarClassifier::new().classify_all(&bars, &ctx).unwrap()
    }

    #[test]
    fn test_perfect_match_scores_high() {
        let scorer = ConfidenceScorer::default();
        let bars = classified();
        // OCR 0.98, margin 1.0, agreement 1.0
        let score = scorer.score(&bars[0]);
        assert!((score - (0.5 + 0.5 * (0.5 * 0.98 + 0.5))).abs() < 1e-9);

        let mut perfect = bars[0].clone();
        perfect.bar.value_region.ocr_confidence = None;
        assert_eq!(scorer.score(&perfect), 1.0);
    }

    #[test]
    fn test_score_stays_in_unit_interval() {
        let scorer = ConfidenceScorer::new(0.0);
        let mut bar = classified().remove(1);
        bar.bar.value_region.ocr_confidence = Some(7.0);
        bar.bar.tie_break_margin = -3.0;
        bar.agreement = 2.0 / 3.0;
        let score = scorer.score(&bar);
        assert!((0.0..=1.0).contains(&score));

        bar.bar.value_region.ocr_confidence = None;
        bar.bar.tie_break_margin = 0.0;
        assert!((scorer.score(&bar) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_carries_classification() {
        let scorer = ConfidenceScorer::default();
        let bars = classified();
        let first = scorer.estimate(&bars[0]);
        assert!(first.is_actual);
        assert_eq!(first.value, fixtures::VALUES[0]);
        assert!(!scorer.estimate(&bars[3]).is_actual);
    }

    #[test]
    fn test_actuals_consistency() {
        let q = |s: &str| -> QuarterKey { s.parse().unwrap() };
        let cell = |quarter: &str, value: f64, is_actual: bool| QuarterEstimate {
            quarter: q(quarter),
            value,
            is_actual,
            confidence: 1.0,
        };

        let previous: BTreeMap<_, _> = [
            cell("Q2'16", 29.0, true),
            cell("Q3'16", 28.0, true),
            cell("Q4'16", 30.0, false),
        ]
        .into_iter()
        .map(|c| (c.quarter, c))
        .collect();

        let date = NaiveDate::from_ymd_opt(2017, 3, 3).unwrap();
        let snapshot = ReportSnapshot::new(
            date,
            vec![
                cell("Q2'16", 29.5, true),
                cell("Q3'16", 45.0, true),
                cell("Q4'16", 30.2, true),
            ],
        )
        .unwrap();

        // Q4'16 was an estimate before, so only two quarters compare
        assert_eq!(actuals_consistency(&previous, &snapshot), Some(0.5));

        let empty = BTreeMap::new();
        assert_eq!(actuals_consistency(&empty, &snapshot), None);
    }
}
