//! Qualitative gauge-stage classification.
//!
//! A reach can carry up to ten gauge boundary readings (`gauge_r0..r9`) that
//! split the gauge's range into runnable bands. The band a live observation
//! falls in is named from a fixed vocabulary; which names are used depends on
//! how many boundaries are defined and whether they cluster toward the low or
//! high end of the range.

use std::fmt;

/// Stage labels, in ascending order of flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GaugeStage {
    ExtremelyLow,
    TooLow,
    VeryLow,
    Low,
    MediumLow,
    Medium,
    MediumHigh,
    High,
    VeryHigh,
    TooHigh,
    ExtremelyHigh,
}

impl GaugeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GaugeStage::ExtremelyLow => "extremely low",
            GaugeStage::TooLow => "too low",
            GaugeStage::VeryLow => "very low",
            GaugeStage::Low => "low",
            GaugeStage::MediumLow => "medium low",
            GaugeStage::Medium => "medium",
            GaugeStage::MediumHigh => "medium high",
            GaugeStage::High => "high",
            GaugeStage::VeryHigh => "very high",
            GaugeStage::TooHigh => "too high",
            GaugeStage::ExtremelyHigh => "extremely high",
        }
    }

    pub fn parse(label: &str) -> Option<GaugeStage> {
        ALL.iter().copied().find(|s| s.as_str() == label)
    }
}

impl fmt::Display for GaugeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use GaugeStage::*;

const ALL: [GaugeStage; 11] = [
    ExtremelyLow, TooLow, VeryLow, Low, MediumLow, Medium, MediumHigh, High, VeryHigh, TooHigh, ExtremelyHigh,
];

/// Band labels for `count` boundaries, lowest band first. Always `count + 1` long.
///
/// Odd counts can't be centred on `Medium`, so the extra band goes to the
/// side the boundaries crowd toward. An even split counts as high-heavy.
fn band_labels(count: usize, low_heavy: bool) -> Option<&'static [GaugeStage]> {
    let labels: &'static [GaugeStage] = match (count, low_heavy) {
        (2, _) => &[TooLow, Medium, TooHigh],
        (3, true) => &[TooLow, Low, Medium, TooHigh],
        (3, false) => &[TooLow, Medium, High, TooHigh],
        (4, _) => &[TooLow, Low, Medium, High, TooHigh],
        (5, true) => &[TooLow, VeryLow, Low, Medium, High, TooHigh],
        (5, false) => &[TooLow, Low, Medium, High, VeryHigh, TooHigh],
        (6, _) => &[TooLow, VeryLow, Low, Medium, High, VeryHigh, TooHigh],
        (7, true) => &[TooLow, VeryLow, Low, MediumLow, Medium, High, VeryHigh, TooHigh],
        (7, false) => &[TooLow, VeryLow, Low, Medium, MediumHigh, High, VeryHigh, TooHigh],
        (8, _) => &[TooLow, VeryLow, Low, MediumLow, Medium, MediumHigh, High, VeryHigh, TooHigh],
        (9, true) => &[
            ExtremelyLow, TooLow, VeryLow, Low, MediumLow, Medium, MediumHigh, High, VeryHigh, TooHigh,
        ],
        (9, false) => &[
            TooLow, VeryLow, Low, MediumLow, Medium, MediumHigh, High, VeryHigh, TooHigh, ExtremelyHigh,
        ],
        (10, _) => &ALL,
        _ => return None,
    };
    Some(labels)
}

/// Defined boundaries, sorted ascending with duplicates removed.
pub fn normalize_boundaries(boundaries: &[Option<f64>]) -> Vec<f64> {
    let mut values: Vec<f64> = boundaries.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(f64::total_cmp);
    values.dedup();
    values
}

/// True if more boundaries sit below the midpoint of their range than above it.
fn is_low_heavy(sorted: &[f64]) -> bool {
    let (Some(min), Some(max)) = (sorted.first(), sorted.last()) else {
        return false;
    };
    let midpoint = (min + max) / 2.0;
    let below = sorted.iter().filter(|b| **b < midpoint).count();
    let above = sorted.iter().filter(|b| **b > midpoint).count();
    below > above
}

/// Classifies `observation` against the gauge boundaries.
///
/// Returns `None` without an observation or with fewer than two distinct
/// boundaries. An observation equal to a boundary falls in the band above it.
pub fn classify_gauge_stage(boundaries: &[Option<f64>], observation: Option<f64>) -> Option<GaugeStage> {
    let observation = observation.filter(|o| o.is_finite())?;
    let sorted = normalize_boundaries(boundaries);
    if sorted.len() < 2 {
        return None;
    }

    let labels = band_labels(sorted.len(), is_low_heavy(&sorted))?;
    let band = sorted.partition_point(|b| *b <= observation);
    labels.get(band).copied()
}
