// 🔤 Text Region Parser - raw OCR detections → typed regions
//
// Kind assignment is rule-based on text shape:
//   quarter label in the bottom band → Label
//   decimal number in the value range → Value
//   "Actual" / "Estimate" legend text → Legend
//   anything else                     → Axis

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::classifier::BarKind;
use crate::config::ExtractionConfig;
use crate::errors::EstimateError;
use crate::quarter::QuarterKey;

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").unwrap());

// ============================================================================
// OCR INPUT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// One text detection as handed over by the OCR service (no ordering)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrDetection {
    pub text: String,
    pub polygon: [Point; 4],
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl OcrDetection {
    pub fn new(text: &str, polygon: [Point; 4]) -> Self {
        OcrDetection {
            text: text.to_string(),
            polygon,
            confidence: None,
        }
    }

    /// Axis-aligned box helper, mostly for tests and fixtures
    pub fn boxed(text: &str, left: f64, top: f64, width: f64, height: f64) -> Self {
        OcrDetection::new(
            text,
            [
                Point::new(left, top),
                Point::new(left + width, top),
                Point::new(left + width, top + height),
                Point::new(left, top + height),
            ],
        )
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Load the detections JSON written by the OCR collaborator
    pub fn load_json(path: &Path) -> Result<Vec<OcrDetection>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read detections: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse detections JSON: {}", path.display()))
    }
}

// ============================================================================
// TEXT REGION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RegionKind {
    Label(QuarterKey),
    Value(f64),
    Legend(BarKind),
    Axis,
}

/// Immutable once parsed; lives only for the processing of one chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub text: String,
    pub polygon: [Point; 4],
    pub centroid: Point,
    pub kind: RegionKind,
    pub ocr_confidence: Option<f64>,
}

impl TextRegion {
    pub fn min_x(&self) -> f64 {
        self.polygon.iter().map(|p| p.x).fold(f64::INFINITY, f64::min)
    }

    pub fn max_x(&self) -> f64 {
        self.polygon.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min_y(&self) -> f64 {
        self.polygon.iter().map(|p| p.y).fold(f64::INFINITY, f64::min)
    }

    pub fn max_y(&self) -> f64 {
        self.polygon.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn quarter(&self) -> Option<QuarterKey> {
        match self.kind {
            RegionKind::Label(q) => Some(q),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self.kind {
            RegionKind::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Short human-readable locator used in error messages
    pub fn describe(&self) -> String {
        format!(
            "{:?} @ ({:.0}, {:.0})",
            self.text, self.centroid.x, self.centroid.y
        )
    }
}

fn centroid(polygon: &[Point; 4]) -> Point {
    let x = polygon.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let y = polygon.iter().map(|p| p.y).sum::<f64>() / 4.0;
    Point::new(x, y)
}

// ============================================================================
// PARSER
// ============================================================================

pub struct TextRegionParser {
    value_min: f64,
    value_max: f64,
    require_decimal_point: bool,
    label_band_fraction: f64,
}

impl TextRegionParser {
    pub fn new(config: &ExtractionConfig) -> Self {
        TextRegionParser {
            value_min: config.value_min,
            value_max: config.value_max,
            require_decimal_point: config.require_decimal_point,
            label_band_fraction: config.label_band_fraction,
        }
    }

    /// Parse one chart's detections into regions ordered left → right.
    ///
    /// Fails when the chart has no quarter label or no value: an empty
    /// snapshot must never come out of an unrecognizable chart.
    pub fn parse(&self, detections: &[OcrDetection]) -> Result<Vec<TextRegion>, EstimateError> {
        let chart_bottom = detections
            .iter()
            .flat_map(|d| d.polygon.iter().map(|p| p.y))
            .fold(f64::NEG_INFINITY, f64::max);
        let band_top = chart_bottom * (1.0 - self.label_band_fraction);

        let mut regions: Vec<TextRegion> = detections
            .iter()
            .filter(|d| !d.text.trim().is_empty())
            .map(|d| {
                let mut region = TextRegion {
                    text: d.text.trim().to_string(),
                    polygon: d.polygon,
                    centroid: centroid(&d.polygon),
                    kind: RegionKind::Axis,
                    ocr_confidence: d.confidence,
                };
                region.kind = self.classify(&region, band_top);
                region
            })
            .collect();

        regions.sort_by(|a, b| {
            a.centroid
                .x
                .total_cmp(&b.centroid.x)
                .then(a.centroid.y.total_cmp(&b.centroid.y))
        });

        let labels = regions.iter().filter(|r| r.quarter().is_some()).count();
        let values = regions.iter().filter(|r| r.value().is_some()).count();

        tracing::debug!(
            regions = regions.len(),
            labels,
            values,
            "parsed OCR detections"
        );

        if labels == 0 {
            return Err(EstimateError::parse(
                "no quarter label regions found in chart",
            ));
        }
        if values == 0 {
            return Err(EstimateError::parse("no value regions found in chart"));
        }

        Ok(regions)
    }

    fn classify(&self, region: &TextRegion, band_top: f64) -> RegionKind {
        if let Some(quarter) = QuarterKey::recognize(&region.text) {
            // Quarter-like text above the axis band is a title or annotation
            return if region.max_y() >= band_top {
                RegionKind::Label(quarter)
            } else {
                RegionKind::Axis
            };
        }

        if let Some(value) = self.parse_value(&region.text) {
            return RegionKind::Value(value);
        }

        match legend_kind(&region.text) {
            Some(kind) => RegionKind::Legend(kind),
            None => RegionKind::Axis,
        }
    }

    /// Decimal number within the accepted range, else None
    pub fn parse_value(&self, text: &str) -> Option<f64> {
        let cleaned: String = text
            .trim()
            .trim_start_matches('$')
            .trim_end_matches('*')
            .chars()
            .filter(|c| *c != ',' && !c.is_whitespace())
            .collect();

        if !NUMBER.is_match(&cleaned) {
            return None;
        }
        if self.require_decimal_point && !cleaned.contains('.') {
            return None;
        }

        let value: f64 = cleaned.parse().ok()?;
        if value < self.value_min || value > self.value_max {
            return None;
        }
        Some(value)
    }
}

/// Short legend captions only; longer text mentioning "estimates" is a title
fn legend_kind(text: &str) -> Option<BarKind> {
    let lower = text.to_lowercase();
    if lower.split_whitespace().count() > 2 {
        return None;
    }
    if lower.contains("actual") {
        Some(BarKind::Actual)
    } else if lower.contains("estimate") || lower.starts_with("est") {
        Some(BarKind::Estimate)
    } else {
        None
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> TextRegionParser {
        TextRegionParser::new(&ExtractionConfig::default())
    }

    fn chart() -> Vec<OcrDetection> {
        vec![
            OcrDetection::boxed("S&P 500 Quarterly EPS Estimates", 100.0, 10.0, 400.0, 20.0),
            OcrDetection::boxed("Actual", 420.0, 40.0, 50.0, 14.0),
            OcrDetection::boxed("Estimate", 520.0, 40.0, 60.0, 14.0),
            OcrDetection::boxed("$60", 5.0, 100.0, 25.0, 14.0),
            OcrDetection::boxed("31.04", 190.0, 150.0, 40.0, 14.0).with_confidence(0.97),
            OcrDetection::boxed("29.87", 90.0, 160.0, 40.0, 14.0),
            OcrDetection::boxed("Q2'17", 190.0, 400.0, 40.0, 14.0),
            OcrDetection::boxed("Q114", 90.0, 400.0, 40.0, 14.0),
            OcrDetection::boxed("   ", 300.0, 300.0, 10.0, 10.0),
        ]
    }

    #[test]
    fn test_kinds_assigned_by_shape() {
        let regions = parser().parse(&chart()).unwrap();
        assert_eq!(regions.len(), 8);

        let kind_of = |text: &str| regions.iter().find(|r| r.text == text).unwrap().kind;

        assert_eq!(kind_of("Q114"), RegionKind::Label("Q1'14".parse().unwrap()));
        assert_eq!(kind_of("Q2'17"), RegionKind::Label("Q2'17".parse().unwrap()));
        assert_eq!(kind_of("31.04"), RegionKind::Value(31.04));
        assert_eq!(kind_of("$60"), RegionKind::Axis);
        assert_eq!(kind_of("Actual"), RegionKind::Legend(BarKind::Actual));
        assert_eq!(kind_of("Estimate"), RegionKind::Legend(BarKind::Estimate));
        assert_eq!(kind_of("S&P 500 Quarterly EPS Estimates"), RegionKind::Axis);
    }

    #[test]
    fn test_regions_ordered_left_to_right() {
        let regions = parser().parse(&chart()).unwrap();
        let xs: Vec<f64> = regions.iter().map(|r| r.centroid.x).collect();
        assert!(xs.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            regions.iter().find(|r| r.text == "31.04").unwrap().ocr_confidence,
            Some(0.97)
        );
    }

    #[test]
    fn test_quarter_text_outside_label_band_is_axis() {
        let detections = vec![
            OcrDetection::boxed("Q3'17 outlook", 100.0, 10.0, 80.0, 14.0),
            OcrDetection::boxed("30.10", 100.0, 200.0, 40.0, 14.0),
            OcrDetection::boxed("Q3'17", 100.0, 400.0, 40.0, 14.0),
        ];
        let regions = parser().parse(&detections).unwrap();
        let labels: Vec<_> = regions.iter().filter_map(|r| r.quarter()).collect();
        assert_eq!(labels.len(), 1);
        let title = regions.iter().find(|r| r.text == "Q3'17 outlook").unwrap();
        assert_eq!(title.kind, RegionKind::Axis);
    }

    #[test]
    fn test_no_labels_is_parse_error() {
        let detections = vec![OcrDetection::boxed("30.10", 100.0, 200.0, 40.0, 14.0)];
        let err = parser().parse(&detections).unwrap_err();
        assert!(matches!(err, EstimateError::Parse(_)));
    }

    #[test]
    fn test_no_values_is_parse_error() {
        let detections = vec![
            OcrDetection::boxed("Q1'17", 100.0, 400.0, 40.0, 14.0),
            OcrDetection::boxed("$40", 5.0, 200.0, 20.0, 14.0),
        ];
        let err = parser().parse(&detections).unwrap_err();
        assert!(matches!(err, EstimateError::Parse(_)));
    }

    #[test]
    fn test_parse_value_rules() {
        let p = parser();
        assert_eq!(p.parse_value("27.85"), Some(27.85));
        assert_eq!(p.parse_value("$1,000.00"), Some(1000.0));
        assert_eq!(p.parse_value("33.10*"), Some(33.10));
        assert_eq!(p.parse_value("60"), None);
        assert_eq!(p.parse_value("5.25"), None);
        assert_eq!(p.parse_value("2017.5"), None);
        assert_eq!(p.parse_value("-"), None);
    }

    #[test]
    fn test_detections_json_shape() {
        let json = r#"[{"text": "Q1'17", "polygon": [
            {"x": 1.0, "y": 2.0}, {"x": 3.0, "y": 2.0},
            {"x": 3.0, "y": 4.0}, {"x": 1.0, "y": 4.0}], "confidence": 0.9}]"#;
        let parsed: Vec<OcrDetection> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed[0].text, "Q1'17");
        assert_eq!(parsed[0].confidence, Some(0.9));
        assert_eq!(centroid(&parsed[0].polygon), Point::new(2.0, 3.0));
    }
}
