// 🎨 Bar Classifier - actual vs estimate by ensemble vote
//
// Three independent, equally weighted methods:
//   1. PixelDarkness - bar luminance against a threshold calibrated from
//      the two legend swatches (actual bars render darker)
//   2. Positional    - quarters before the report date's quarter are actual
//   3. LegendMatch   - nearest legend swatch color
//
// A method that cannot vote drops out. Fewer than two votes, or a split
// with no majority, fails the bar.

use chrono::NaiveDate;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::LegendColors;
use crate::errors::EstimateError;
use crate::matcher::MatchedBar;
use crate::quarter::QuarterKey;
use crate::regions::{Point, RegionKind, TextRegion};

// ============================================================================
// CORE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BarKind {
    Actual,
    Estimate,
}

impl BarKind {
    pub fn is_actual(&self) -> bool {
        matches!(self, BarKind::Actual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClassifierMethod {
    PixelDarkness,
    Positional,
    LegendMatch,
}

type VoteFn = fn(&MatchedBar, &ChartContext) -> Result<BarKind, String>;

impl ClassifierMethod {
    pub const ALL: [ClassifierMethod; 3] = [
        ClassifierMethod::PixelDarkness,
        ClassifierMethod::Positional,
        ClassifierMethod::LegendMatch,
    ];

    pub fn name(&self) -> &str {
        match self {
            ClassifierMethod::PixelDarkness => "pixel_darkness",
            ClassifierMethod::Positional => "positional",
            ClassifierMethod::LegendMatch => "legend_match",
        }
    }

    fn vote_fn(&self) -> VoteFn {
        match self {
            ClassifierMethod::PixelDarkness => vote_pixel_darkness,
            ClassifierMethod::Positional => vote_positional,
            ClassifierMethod::LegendMatch => vote_legend_match,
        }
    }

    /// Cast this method's vote; Err carries why it could not vote
    pub fn vote(&self, bar: &MatchedBar, context: &ChartContext) -> Result<BarKind, String> {
        (self.vote_fn())(bar, context)
    }
}

// ============================================================================
// PIXELS
// ============================================================================

/// Read access to the rasterized chart
pub trait PixelSource {
    fn dimensions(&self) -> (u32, u32);

    fn rgb_at(&self, x: u32, y: u32) -> [u8; 3];
}

impl PixelSource for RgbImage {
    fn dimensions(&self) -> (u32, u32) {
        RgbImage::dimensions(self)
    }

    fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        self.get_pixel(x, y).0
    }
}

/// Mean color of the square window around `center`, clipped to the image
pub fn sample_mean(pixels: &dyn PixelSource, center: Point, radius: u32) -> Option<[f64; 3]> {
    let (width, height) = pixels.dimensions();
    let reach = radius as f64;
    let inside = |v: f64, limit: u32| v.is_finite() && v >= 0.0 && v - reach <= limit as f64;
    if !(inside(center.x, width) && inside(center.y, height)) {
        return None;
    }
    let (cx, cy) = (center.x.round() as i64, center.y.round() as i64);
    let r = radius as i64;

    let mut sum = [0.0f64; 3];
    let mut count = 0usize;

    for y in (cy - r).max(0)..=(cy + r).min(height as i64 - 1) {
        for x in (cx - r).max(0)..=(cx + r).min(width as i64 - 1) {
            let rgb = pixels.rgb_at(x as u32, y as u32);
            for (acc, channel) in sum.iter_mut().zip(rgb) {
                *acc += channel as f64;
            }
            count += 1;
        }
    }

    if count == 0 {
        return None;
    }
    Some(sum.map(|s| s / count as f64))
}

/// ITU-R BT.601 luma
pub fn luminance(rgb: [f64; 3]) -> f64 {
    0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2]
}

fn color_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

// ============================================================================
// LEGEND + CHART CONTEXT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegendSwatches {
    pub actual: [f64; 3],
    pub estimate: [f64; 3],
}

impl LegendSwatches {
    pub fn from_colors(colors: LegendColors) -> Self {
        LegendSwatches {
            actual: colors.actual.map(f64::from),
            estimate: colors.estimate.map(f64::from),
        }
    }

    /// Sample the swatch drawn to the left of each legend caption.
    /// None unless both the actual and the estimate swatch are readable.
    pub fn sample(
        regions: &[TextRegion],
        pixels: &dyn PixelSource,
        swatch_offset: f64,
        radius: u32,
    ) -> Option<Self> {
        let swatch_for = |kind: BarKind| {
            regions
                .iter()
                .find(|r| r.kind == RegionKind::Legend(kind))
                .and_then(|r| {
                    let at = Point::new(r.min_x() - swatch_offset, r.centroid.y);
                    sample_mean(pixels, at, radius)
                })
        };

        Some(LegendSwatches {
            actual: swatch_for(BarKind::Actual)?,
            estimate: swatch_for(BarKind::Estimate)?,
        })
    }
}

/// Everything a vote may look at besides the bar itself
pub struct ChartContext<'a> {
    pub report_date: NaiveDate,
    pub pixels: Option<&'a dyn PixelSource>,
    pub legend: Option<LegendSwatches>,
    pub sample_radius: u32,
}

impl<'a> ChartContext<'a> {
    fn bar_color(&self, bar: &MatchedBar) -> Result<[f64; 3], String> {
        let pixels = self.pixels.ok_or("no chart pixels available")?;
        if bar.bar_geometry.is_degenerate() {
            return Err(format!("degenerate bar geometry for {}", bar.quarter));
        }
        sample_mean(pixels, bar.bar_geometry.centroid(), self.sample_radius)
            .ok_or_else(|| format!("bar centroid for {} lies outside the image", bar.quarter))
    }
}

// ============================================================================
// VOTING METHODS
// ============================================================================

fn vote_pixel_darkness(bar: &MatchedBar, context: &ChartContext) -> Result<BarKind, String> {
    let legend = context.legend.ok_or("legend swatches unreadable")?;
    let actual_luma = luminance(legend.actual);
    let estimate_luma = luminance(legend.estimate);

    if actual_luma >= estimate_luma {
        return Err(format!(
            "legend actual swatch ({:.1}) is not darker than estimate swatch ({:.1})",
            actual_luma, estimate_luma
        ));
    }

    let threshold = (actual_luma + estimate_luma) / 2.0;
    let bar_luma = luminance(context.bar_color(bar)?);

    Ok(if bar_luma < threshold {
        BarKind::Actual
    } else {
        BarKind::Estimate
    })
}

fn vote_positional(bar: &MatchedBar, context: &ChartContext) -> Result<BarKind, String> {
    let current = QuarterKey::containing(context.report_date);
    Ok(if bar.quarter < current {
        BarKind::Actual
    } else {
        BarKind::Estimate
    })
}

fn vote_legend_match(bar: &MatchedBar, context: &ChartContext) -> Result<BarKind, String> {
    let legend = context.legend.ok_or("legend swatches unreadable")?;
    let color = context.bar_color(bar)?;

    let to_actual = color_distance(color, legend.actual);
    let to_estimate = color_distance(color, legend.estimate);

    if to_actual == to_estimate {
        return Err(format!("bar color for {} is equidistant to both swatches", bar.quarter));
    }

    Ok(if to_actual < to_estimate {
        BarKind::Actual
    } else {
        BarKind::Estimate
    })
}

// ============================================================================
// CLASSIFIED BAR + ENSEMBLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedBar {
    pub bar: MatchedBar,
    pub is_actual: bool,
    pub classifier_votes: BTreeMap<ClassifierMethod, BarKind>,

    /// Fraction of votes agreeing with the winner (≥ 2/3 with three voters)
    pub agreement: f64,
}

pub struct BarClassifier {
    methods: Vec<ClassifierMethod>,
}

impl BarClassifier {
    pub fn new() -> Self {
        BarClassifier {
            methods: ClassifierMethod::ALL.to_vec(),
        }
    }

    pub fn with_methods(methods: &[ClassifierMethod]) -> Self {
        BarClassifier {
            methods: methods.to_vec(),
        }
    }

    pub fn methods(&self) -> &[ClassifierMethod] {
        &self.methods
    }

    pub fn classify(
        &self,
        bar: &MatchedBar,
        context: &ChartContext,
    ) -> Result<ClassifiedBar, EstimateError> {
        let mut votes = BTreeMap::new();
        let mut abstentions = Vec::new();

        for method in &self.methods {
            match method.vote(bar, context) {
                Ok(kind) => {
                    votes.insert(*method, kind);
                }
                Err(reason) => {
                    tracing::debug!(quarter = %bar.quarter, method = method.name(), %reason, "vote dropped");
                    abstentions.push(format!("{}: {}", method.name(), reason));
                }
            }
        }

        if votes.len() < 2 {
            return Err(EstimateError::Classification {
                quarter: bar.quarter,
                reason: format!(
                    "only {} classifier vote(s) [{}]",
                    votes.len(),
                    abstentions.join("; ")
                ),
            });
        }

        let actual = votes.values().filter(|k| k.is_actual()).count();
        let estimate = votes.len() - actual;

        // TODO: revisit tie-breaking if the label set ever grows past two classes
        if actual == estimate {
            return Err(EstimateError::Classification {
                quarter: bar.quarter,
                reason: format!("no majority among {} votes", votes.len()),
            });
        }

        let (is_actual, winning) = if actual > estimate {
            (true, actual)
        } else {
            (false, estimate)
        };

        Ok(ClassifiedBar {
            bar: bar.clone(),
            is_actual,
            agreement: winning as f64 / votes.len() as f64,
            classifier_votes: votes,
        })
    }

    /// All-or-nothing: one unclassifiable bar fails the whole chart
    pub fn classify_all(
        &self,
        bars: &[MatchedBar],
        context: &ChartContext,
    ) -> Result<Vec<ClassifiedBar>, EstimateError> {
        bars.iter().map(|bar| self.classify(bar, context)).collect()
    }
}

impl Default for BarClassifier {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
