// Synthetic chart used across module tests: four bars, one actual
// (Q3'16) and three estimates, drawn the way the source charts are.

use chrono::NaiveDate;
use image::{Rgb, RgbImage};

use crate::regions::OcrDetection;

pub const ACTUAL_RGB: [u8; 3] = [30, 50, 110];
pub const ESTIMATE_RGB: [u8; 3] = [160, 190, 230];
pub const VALUES: [f64; 4] = [28.69, 30.05, 31.04, 32.20];

const LABELS: [&str; 4] = ["Q3'16", "Q4'16", "Q1'17", "Q2'17"];
const BAR_CENTERS: [u32; 4] = [60, 140, 220, 300];

pub fn report_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, 12, 9).unwrap()
}

pub fn detections() -> Vec<OcrDetection> {
    let mut detections = vec![
        OcrDetection::boxed("S&P 500 Quarterly Bottom-Up EPS", 60.0, 40.0, 200.0, 14.0),
        OcrDetection::boxed("Actual", 250.0, 10.0, 40.0, 14.0),
        OcrDetection::boxed("Estimate", 320.0, 10.0, 50.0, 14.0),
        OcrDetection::boxed("$30", 2.0, 120.0, 20.0, 14.0),
    ];

    for (i, center) in BAR_CENTERS.iter().enumerate() {
        let left = *center as f64 - 18.0;
        detections.push(
            OcrDetection::boxed(&format!("{:.2}", VALUES[i]), left, 80.0, 36.0, 14.0)
                .with_confidence(0.98),
        );
        detections.push(OcrDetection::boxed(LABELS[i], left, 260.0, 36.0, 14.0));
    }

    detections
}

pub fn image() -> RgbImage {
    let mut img = RgbImage::from_pixel(400, 300, Rgb([255, 255, 255]));

    for (i, center) in BAR_CENTERS.iter().enumerate() {
        let color = if i == 0 { ACTUAL_RGB } else { ESTIMATE_RGB };
        fill(&mut img, center - 15, center + 15, 100, 250, color);
    }

    // legend swatches sit 12px left of their caption
    fill(&mut img, 232, 244, 11, 23, ACTUAL_RGB);
    fill(&mut img, 302, 314, 11, 23, ESTIMATE_RGB);

    img
}

fn fill(img: &mut RgbImage, x0: u32, x1: u32, y0: u32, y1: u32, color: [u8; 3]) {
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, Rgb(color));
        }
    }
}
