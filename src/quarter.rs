// 📅 QuarterKey - canonical calendar quarter (year, 1..4)
//
// Textual form is `Qn'YY`. Strict parsing (FromStr) accepts only that form;
// `recognize` additionally repairs the usual OCR garbling of chart labels.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::EstimateError;

static CANONICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Q([1-4])'(\d{2})$").unwrap());

// Lenient patterns, tried in order against normalized upper-case text
static APOSTROPHE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Q([1-4])'(\d{2})").unwrap());
static FULL_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"Q([1-4])\s+20(\d{2})").unwrap());
static RUN_TOGETHER: Lazy<Regex> = Lazy::new(|| Regex::new(r"Q([1-4])(\d{2})").unwrap());
static GARBLED: Lazy<Regex> = Lazy::new(|| Regex::new(r"Q([1-4])[IL1](\d)[YI]").unwrap());
static SPURIOUS_ONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Q[IL]('?\d)").unwrap());

// ============================================================================
// QUARTER KEY
// ============================================================================

/// Field order matters: derived `Ord` compares year first, then quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QuarterKey {
    year: i32,
    quarter: u8,
}

impl QuarterKey {
    pub fn new(year: i32, quarter: u8) -> Result<Self, EstimateError> {
        if !(1..=4).contains(&quarter) {
            return Err(EstimateError::parse(format!(
                "quarter must be 1..4, got {}",
                quarter
            )));
        }
        Ok(QuarterKey { year, quarter })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn quarter(&self) -> u8 {
        self.quarter
    }

    /// Calendar quarter containing `date`
    pub fn containing(date: NaiveDate) -> Self {
        QuarterKey {
            year: date.year(),
            quarter: (date.month0() / 3 + 1) as u8,
        }
    }

    /// Quarter `n` steps away (negative = earlier)
    pub fn offset(&self, n: i32) -> Self {
        let index = self.year * 4 + (self.quarter as i32 - 1) + n;
        QuarterKey {
            year: index.div_euclid(4),
            quarter: (index.rem_euclid(4) + 1) as u8,
        }
    }

    /// Recognize a quarter label in noisy OCR text.
    ///
    /// Handles `Q1'14`, `Q1’14`, `Q1 2014`, `Q114`, `0114`/`O114`,
    /// `QI'14`/`Ql'14` and the `Q1i7y` garbling. Returns None when the text
    /// does not look like a quarter label at all.
    pub fn recognize(text: &str) -> Option<Self> {
        let normalized = normalize_label(text);

        for pattern in [&*APOSTROPHE, &*FULL_YEAR, &*RUN_TOGETHER] {
            if let Some(caps) = pattern.captures(&normalized) {
                let quarter: u8 = caps[1].parse().ok()?;
                let yy: i32 = caps[2].parse().ok()?;
                return Some(QuarterKey {
                    year: expand_year(yy),
                    quarter,
                });
            }
        }

        // Q1i7y → Q1'17 ; the decade is inferred from the single surviving digit
        if let Some(caps) = GARBLED.captures(&normalized) {
            let quarter: u8 = caps[1].parse().ok()?;
            let digit: i32 = caps[2].parse().ok()?;
            let decade = if digit >= 7 { 10 } else { 20 };
            return Some(QuarterKey {
                year: expand_year(decade + digit),
                quarter,
            });
        }

        None
    }
}

/// `YY < 50` → 20YY, otherwise 19YY
fn expand_year(yy: i32) -> i32 {
    if yy >= 50 {
        1900 + yy
    } else {
        2000 + yy
    }
}

fn normalize_label(text: &str) -> String {
    let mut s: String = text
        .trim()
        .chars()
        .map(|c| match c {
            '\u{2019}' | '\u{2018}' | '`' | '\u{00B4}' => '\'',
            other => other,
        })
        .collect::<String>()
        .to_uppercase();

    // Leading O/0 misread for Q
    let mut chars = s.chars();
    if let (Some(first), Some(second)) = (chars.next(), chars.next()) {
        if (first == 'O' || first == '0') && ('1'..='4').contains(&second) {
            s.replace_range(..1, "Q");
        }
    }

    // I/l misread for 1 right after Q
    SPURIOUS_ONE.replace(&s, "Q1$1").into_owned()
}

impl fmt::Display for QuarterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}'{:02}", self.quarter, self.year.rem_euclid(100))
    }
}

impl FromStr for QuarterKey {
    type Err = EstimateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = CANONICAL
            .captures(s)
            .ok_or_else(|| EstimateError::parse(format!("not a quarter label: {:?}", s)))?;
        let quarter: u8 = caps[1]
            .parse()
            .map_err(|_| EstimateError::parse(format!("bad quarter digit in {:?}", s)))?;
        let yy: i32 = caps[2]
            .parse()
            .map_err(|_| EstimateError::parse(format!("bad year in {:?}", s)))?;
        QuarterKey::new(expand_year(yy), quarter)
    }
}

impl TryFrom<String> for QuarterKey {
    type Error = EstimateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QuarterKey> for String {
    fn from(key: QuarterKey) -> Self {
        key.to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================
