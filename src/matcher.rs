// 📐 Coordinate Matcher - pair quarter labels with value regions by layout
//
// OCR gives no grouping, so pairing is a bipartite assignment solved
// greedily: labels left → right, each claims the nearest unclaimed value
// that sits above it inside the x tolerance band. Bar slots never overlap,
// so greedy order by x is enough.

use serde::{Deserialize, Serialize};

use crate::config::ExtractionConfig;
use crate::errors::EstimateError;
use crate::quarter::QuarterKey;
use crate::regions::{Point, TextRegion};

// ============================================================================
// BAR GEOMETRY
// ============================================================================

/// Pixel column between the value text (top) and the label text (bottom)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarGeometry {
    pub x_min: f64,
    pub x_max: f64,
    pub y_top: f64,
    pub y_bottom: f64,
}

impl BarGeometry {
    fn between(label: &TextRegion, value: &TextRegion, half_width: f64) -> Self {
        let x_center = (label.centroid.x + value.centroid.x) / 2.0;
        BarGeometry {
            x_min: (x_center - half_width).max(0.0),
            x_max: x_center + half_width,
            y_top: value.max_y(),
            y_bottom: label.min_y(),
        }
    }

    pub fn centroid(&self) -> Point {
        Point::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_top + self.y_bottom) / 2.0,
        )
    }

    /// Value text overlapping the label leaves no bar to sample
    pub fn is_degenerate(&self) -> bool {
        self.y_bottom <= self.y_top || self.x_max <= self.x_min
    }
}

// ============================================================================
// MATCHED BAR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedBar {
    pub quarter: QuarterKey,
    pub value: f64,
    pub bar_geometry: BarGeometry,
    pub label_region: TextRegion,
    pub value_region: TextRegion,

    /// 1.0 = sole candidate; 0.0 = runner-up was just as close
    pub tie_break_margin: f64,
}

// ============================================================================
// MATCHER
// ============================================================================

pub struct CoordinateMatcher {
    x_tolerance: f64,
    bar_half_width: f64,
}

struct Candidate {
    index: usize,
    distance: f64,
}

impl CoordinateMatcher {
    pub fn new(config: &ExtractionConfig) -> Self {
        CoordinateMatcher {
            x_tolerance: config.x_tolerance,
            bar_half_width: config.bar_half_width,
        }
    }

    /// Pair every label with exactly one value.
    ///
    /// Output is in left → right bar order with strictly increasing
    /// quarters. Any leftover label or value is a `Match` error.
    pub fn match_bars(&self, regions: &[TextRegion]) -> Result<Vec<MatchedBar>, EstimateError> {
        let mut labels: Vec<(QuarterKey, &TextRegion)> = regions
            .iter()
            .filter_map(|r| r.quarter().map(|q| (q, r)))
            .collect();
        labels.sort_by(|a, b| a.1.centroid.x.total_cmp(&b.1.centroid.x));

        let values: Vec<(f64, &TextRegion)> = regions
            .iter()
            .filter_map(|r| r.value().map(|v| (v, r)))
            .collect();
        let mut claimed = vec![false; values.len()];

        let mut bars = Vec::with_capacity(labels.len());

        for (quarter, label) in labels {
            let mut candidates: Vec<Candidate> = values
                .iter()
                .enumerate()
                .filter(|(i, (_, value))| {
                    !claimed[*i]
                        && (value.centroid.x - label.centroid.x).abs() <= self.x_tolerance
                        && value.centroid.y < label.centroid.y
                })
                .map(|(index, (_, value))| Candidate {
                    index,
                    distance: value.centroid.distance(&label.centroid),
                })
                .collect();

            candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));

            let best = candidates.first().ok_or_else(|| {
                EstimateError::unmatched(
                    label.describe(),
                    format!(
                        "no value region above label within x tolerance {:.1}",
                        self.x_tolerance
                    ),
                )
            })?;

            let tie_break_margin = match candidates.get(1) {
                Some(runner_up) if runner_up.distance > 0.0 => {
                    ((runner_up.distance - best.distance) / runner_up.distance).clamp(0.0, 1.0)
                }
                Some(_) => 0.0,
                None => 1.0,
            };

            claimed[best.index] = true;
            let (amount, value) = values[best.index];

            bars.push(MatchedBar {
                quarter,
                value: amount,
                bar_geometry: BarGeometry::between(label, value, self.bar_half_width),
                label_region: label.clone(),
                value_region: value.clone(),
                tie_break_margin,
            });
        }

        for pair in bars.windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            if right.quarter == left.quarter {
                return Err(EstimateError::unmatched(
                    right.label_region.describe(),
                    format!("duplicate quarter label {}", right.quarter),
                ));
            }
            if right.quarter < left.quarter {
                return Err(EstimateError::unmatched(
                    right.label_region.describe(),
                    format!(
                        "quarter order decreases left to right ({} after {})",
                        right.quarter, left.quarter
                    ),
                ));
            }
        }

        if let Some(i) = claimed.iter().position(|c| !c) {
            return Err(EstimateError::unmatched(
                values[i].1.describe(),
                "value region not paired with any quarter label",
            ));
        }

        tracing::debug!(bars = bars.len(), x_tolerance = self.x_tolerance, "matched bars");
        Ok(bars)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::regions::{OcrDetection, TextRegionParser};

    fn run(detections: &[OcrDetection]) -> Result<Vec<MatchedBar>, EstimateError> {
        let config = ExtractionConfig::default();
        let regions = TextRegionParser::new(&config).parse(detections).unwrap();
        CoordinateMatcher::new(&config).match_bars(&regions)
    }

    fn q(s: &str) -> QuarterKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_fixture_chart_matches_every_bar() {
        let bars = run(&fixtures::detections()).unwrap();

        let quarters: Vec<_> = bars.iter().map(|b| b.quarter).collect();
        assert_eq!(quarters, vec![q("Q3'16"), q("Q4'16"), q("Q1'17"), q("Q2'17")]);

        let values: Vec<_> = bars.iter().map(|b| b.value).collect();
        assert_eq!(values, fixtures::VALUES.to_vec());

        assert!(bars.iter().all(|b| b.tie_break_margin == 1.0));
        assert!(bars.iter().all(|b| !b.bar_geometry.is_degenerate()));
    }

    #[test]
    fn test_bar_geometry_spans_value_to_label() {
        let bars = run(&fixtures::detections()).unwrap();
        let first = &bars[0].bar_geometry;
        assert_eq!(first.y_top, bars[0].value_region.max_y());
        assert_eq!(first.y_bottom, bars[0].label_region.min_y());
        assert_eq!(first.x_max - first.x_min, 30.0);
    }

    #[test]
    fn test_nearest_value_wins_and_is_claimed() {
        let detections = vec![
            OcrDetection::boxed("Q1'17", 90.0, 400.0, 20.0, 14.0),
            OcrDetection::boxed("Q2'17", 98.0, 400.0, 20.0, 14.0),
            OcrDetection::boxed("30.10", 90.0, 200.0, 20.0, 14.0),
            OcrDetection::boxed("31.20", 96.0, 100.0, 20.0, 14.0),
        ];
        let bars = run(&detections).unwrap();

        assert_eq!(bars[0].quarter, q("Q1'17"));
        assert_eq!(bars[0].value, 30.10);
        assert!(bars[0].tie_break_margin > 0.0 && bars[0].tie_break_margin < 1.0);

        // the nearer value is gone from the pool for the second label
        assert_eq!(bars[1].value, 31.20);
        assert_eq!(bars[1].tie_break_margin, 1.0);
    }

    #[test]
    fn test_value_below_label_is_not_a_candidate() {
        let detections = vec![
            OcrDetection::boxed("Q1'17", 90.0, 300.0, 20.0, 14.0),
            OcrDetection::boxed("30.10", 90.0, 400.0, 20.0, 14.0),
        ];
        let err = run(&detections).unwrap_err();
        match err {
            EstimateError::Match { region, .. } => assert!(region.contains("Q1'17")),
            other => panic!("expected match error, got {:?}", other),
        }
    }

    #[test]
    fn test_unpaired_value_is_an_error() {
        let mut detections = fixtures::detections();
        detections.push(OcrDetection::boxed("44.44", 370.0, 60.0, 20.0, 14.0));
        let err = run(&detections).unwrap_err();
        match err {
            EstimateError::Match { region, reason } => {
                assert!(region.contains("44.44"));
                assert!(reason.contains("not paired"));
            }
            other => panic!("expected match error, got {:?}", other),
        }
    }

    #[test]
    fn test_decreasing_quarters_rejected() {
        let detections = vec![
            OcrDetection::boxed("Q2'17", 90.0, 400.0, 20.0, 14.0),
            OcrDetection::boxed("Q1'17", 190.0, 400.0, 20.0, 14.0),
            OcrDetection::boxed("30.10", 90.0, 200.0, 20.0, 14.0),
            OcrDetection::boxed("31.20", 190.0, 200.0, 20.0, 14.0),
        ];
        let err = run(&detections).unwrap_err();
        assert!(err.to_string().contains("decreases"));
    }

    #[test]
    fn test_duplicate_quarters_rejected() {
        let detections = vec![
            OcrDetection::boxed("Q1'17", 90.0, 400.0, 20.0, 14.0),
            OcrDetection::boxed("Q1'17", 190.0, 400.0, 20.0, 14.0),
            OcrDetection::boxed("30.10", 90.0, 200.0, 20.0, 14.0),
            OcrDetection::boxed("31.20", 190.0, 200.0, 20.0, 14.0),
        ];
        let err = run(&detections).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_widened_tolerance_recovers_offset_value() {
        let detections = vec![
            OcrDetection::boxed("Q1'17", 90.0, 400.0, 20.0, 14.0),
            OcrDetection::boxed("30.10", 105.0, 200.0, 20.0, 14.0),
        ];
        let config = ExtractionConfig::default();
        let regions = TextRegionParser::new(&config).parse(&detections).unwrap();

        assert!(CoordinateMatcher::new(&config).match_bars(&regions).is_err());
        let bars = CoordinateMatcher::new(&config.widened(1))
            .match_bars(&regions)
            .unwrap();
        assert_eq!(bars.len(), 1);
    }
}
