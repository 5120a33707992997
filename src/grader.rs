use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::CheckError;

pub const ERROR_LABEL: &str = "ERROR";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Grade {
    Label(String),
    /// The submission could not be graded at all.
    Error,
}

impl Grade {
    pub fn as_str(&self) -> &str {
        match self {
            Grade::Label(l) => l,
            Grade::Error => ERROR_LABEL,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Grade {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub threshold: f64,
    pub label: String,
}

/// Threshold list as given on the command line, e.g. `A=0.95,B=0.80,C=0.50`.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds(pub Vec<Band>);

impl FromStr for Thresholds {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(|pair| {
                let (label, value) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("expected LABEL=THRESHOLD, got {pair:?}"))?;
                let threshold = value
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| format!("bad threshold {value:?}: {e}"))?;
                Ok(Band {
                    threshold,
                    label: label.trim().to_string(),
                })
            })
            .collect::<Result<Vec<_>, String>>()
            .map(Thresholds)
    }
}

/// Ordered threshold table. A score takes the label of the highest
/// threshold it meets or exceeds, or `lowest` when it meets none.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeTable {
    bands: Vec<Band>,
    lowest: String,
}

impl Default for GradeTable {
    fn default() -> Self {
        let band = |threshold, label: &str| Band {
            threshold,
            label: label.to_string(),
        };
        Self {
            bands: vec![band(0.95, "A"), band(0.80, "B"), band(0.50, "C")],
            lowest: "D".to_string(),
        }
    }
}

impl GradeTable {
    pub fn new(mut bands: Vec<Band>, lowest: impl Into<String>) -> Result<Self, CheckError> {
        let lowest = lowest.into();

        let mut seen = vec![lowest.as_str()];
        for band in &bands {
            if !(0.0..=1.0).contains(&band.threshold) {
                return Err(CheckError::precondition(format!(
                    "threshold for grade {} must be within [0, 1], got {}",
                    band.label, band.threshold
                )));
            }
            if seen.contains(&band.label.as_str()) {
                return Err(CheckError::precondition(format!(
                    "grade {} is listed more than once",
                    band.label
                )));
            }
            seen.push(&band.label);
        }
        if seen.iter().any(|l| l.is_empty() || *l == ERROR_LABEL) {
            return Err(CheckError::precondition(format!(
                "grade labels must be non-empty and not {ERROR_LABEL}"
            )));
        }

        bands.sort_by(|x, y| y.threshold.total_cmp(&x.threshold));
        Ok(Self { bands, lowest })
    }

    pub fn grade(&self, similarity: f64) -> Grade {
        self.bands
            .iter()
            .find(|band| similarity >= band.threshold)
            .map(|band| Grade::Label(band.label.clone()))
            .unwrap_or_else(|| Grade::Label(self.lowest.clone()))
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    /// All labels from best to worst, the lowest label last.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.bands
            .iter()
            .map(|b| b.label.as_str())
            .chain(std::iter::once(self.lowest.as_str()))
    }

    pub fn is_top(&self, grade: &Grade) -> bool {
        self.labels().next() == Some(grade.as_str())
    }

    pub fn is_lowest(&self, grade: &Grade) -> bool {
        matches!(grade, Grade::Label(l) if *l == self.lowest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(l: &str) -> Grade {
        Grade::Label(l.to_string())
    }

    #[test]
    fn default_bands_are_right_open() {
        let table = GradeTable::default();
        assert_eq!(table.grade(1.0), label("A"));
        assert_eq!(table.grade(0.95), label("A"));
        assert_eq!(table.grade(0.9499), label("B"));
        assert_eq!(table.grade(0.80), label("B"));
        assert_eq!(table.grade(0.7999), label("C"));
        assert_eq!(table.grade(0.50), label("C"));
        assert_eq!(table.grade(0.4999), label("D"));
        assert_eq!(table.grade(0.0), label("D"));
    }

    #[test]
    fn grading_is_monotonic() {
        let table = GradeTable::default();
        let order: Vec<&str> = table.labels().collect();
        let rank = |g: Grade| order.iter().position(|l| *l == g.as_str()).unwrap();

        let mut prev = rank(table.grade(0.0));
        for step in 1..=100 {
            let r = rank(table.grade(step as f64 / 100.0));
            assert!(r <= prev);
            prev = r;
        }
    }

    #[test]
    fn parses_and_sorts_custom_thresholds() {
        let Thresholds(bands) = "pass=0.6, merit = 0.75,distinction=0.9".parse().unwrap();
        let table = GradeTable::new(bands, "fail").unwrap();
        assert_eq!(
            table.labels().collect::<Vec<_>>(),
            ["distinction", "merit", "pass", "fail"]
        );
        assert_eq!(table.grade(0.75), label("merit"));
        assert_eq!(table.grade(0.1), label("fail"));
        assert!(table.is_top(&label("distinction")));
        assert!(table.is_lowest(&label("fail")));
    }

    #[test]
    fn rejects_bad_tables() {
        assert!("A:0.9".parse::<Thresholds>().is_err());
        assert!("A=high".parse::<Thresholds>().is_err());

        let Thresholds(out_of_range) = "A=1.5".parse().unwrap();
        assert!(GradeTable::new(out_of_range, "D").is_err());

        let Thresholds(dup) = "A=0.9,A=0.5".parse().unwrap();
        assert!(GradeTable::new(dup, "D").is_err());

        let Thresholds(clash) = "D=0.9".parse().unwrap();
        assert!(GradeTable::new(clash, "D").is_err());

        let Thresholds(reserved) = "ERROR=0.9".parse().unwrap();
        assert!(GradeTable::new(reserved, "D").is_err());
    }

    #[test]
    fn error_grade_renders_as_label() {
        assert_eq!(Grade::Error.to_string(), "ERROR");
        assert_eq!(serde_json::to_string(&label("B")).unwrap(), "\"B\"");
    }
}
