// ⚙️ Extraction Config - tolerances and calibration as data
// Every field has a default, so a config file only needs the overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Legend swatch colors supplied by hand when the legend text is not detected
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegendColors {
    pub actual: [u8; 3],
    pub estimate: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Smallest accepted EPS value on a bar
    pub value_min: f64,

    /// Largest accepted EPS value on a bar
    pub value_max: f64,

    /// Integers are axis ticks, not bar values
    pub require_decimal_point: bool,

    /// Quarter labels sit in this bottom fraction of the chart
    pub label_band_fraction: f64,

    /// Horizontal tolerance (px) between a label and its value
    pub x_tolerance: f64,

    /// Half-width (px) of the sampled bar column
    pub bar_half_width: f64,

    /// Half-size (px) of the pixel sampling window
    pub sample_radius: u32,

    /// Distance (px) from legend text to its color swatch
    pub legend_swatch_offset: f64,

    pub legend_colors: Option<LegendColors>,

    /// How many widened re-matches a caller may attempt
    pub match_retries: u32,

    /// Tolerance multiplier per retry
    pub tolerance_growth: f64,

    /// OCR confidence assumed when the detector reports none
    pub default_ocr_confidence: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            value_min: 10.0,
            value_max: 1000.0,
            require_decimal_point: true,
            label_band_fraction: 0.3,
            x_tolerance: 10.0,
            bar_half_width: 15.0,
            sample_radius: 3,
            legend_swatch_offset: 12.0,
            legend_colors: None,
            match_retries: 2,
            tolerance_growth: 2.0,
            default_ocr_confidence: 1.0,
        }
    }
}

impl ExtractionConfig {
    /// Load config overrides from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: ExtractionConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.value_min < self.value_max,
            "value_min ({}) must be below value_max ({})",
            self.value_min,
            self.value_max
        );
        anyhow::ensure!(
            self.label_band_fraction > 0.0 && self.label_band_fraction <= 1.0,
            "label_band_fraction must be in (0, 1], got {}",
            self.label_band_fraction
        );
        anyhow::ensure!(self.x_tolerance > 0.0, "x_tolerance must be positive");
        anyhow::ensure!(
            self.tolerance_growth >= 1.0,
            "tolerance_growth must be >= 1.0"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.default_ocr_confidence),
            "default_ocr_confidence must be in [0, 1]"
        );
        Ok(())
    }

    /// Copy of this config with the matcher tolerance grown `attempt` times
    pub fn widened(&self, attempt: u32) -> Self {
        let mut next = self.clone();
        next.x_tolerance = self.x_tolerance * self.tolerance_growth.powi(attempt as i32);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"x_tolerance": 25.0, "legend_colors": {{"actual": [20, 40, 90], "estimate": [150, 180, 220]}}}}"#
        )
        .unwrap();

        let config = ExtractionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.x_tolerance, 25.0);
        assert_eq!(config.value_max, 1000.0);
        assert_eq!(config.legend_colors.unwrap().actual, [20, 40, 90]);
    }

    #[test]
    fn test_invalid_range_rejected() {
        let config = ExtractionConfig {
            value_min: 50.0,
            value_max: 10.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_widened_tolerance() {
        let config = ExtractionConfig::default();
        assert_eq!(config.widened(0).x_tolerance, 10.0);
        assert_eq!(config.widened(2).x_tolerance, 40.0);
    }
}
