use serde::Serialize;

use crate::constants::{
    DEFAULT_HIGH_CHARGE_RATIO, DEFAULT_LOW_COLLECTION_RATIO, DEFAULT_LOW_PAYMENT_RATIO,
    DEFAULT_PERFORMANCE_BAND,
};

/// Business thresholds for the diagnostic tags and the performance
/// label. Injected rather than read from globals so variants can be
/// tested without code changes.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub low_payment_ratio: f64,
    pub low_collection_ratio: f64,
    pub high_charge_ratio: f64,
    pub performance_band: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low_payment_ratio: DEFAULT_LOW_PAYMENT_RATIO,
            low_collection_ratio: DEFAULT_LOW_COLLECTION_RATIO,
            high_charge_ratio: DEFAULT_HIGH_CHARGE_RATIO,
            performance_band: DEFAULT_PERFORMANCE_BAND,
        }
    }
}

/// actual - expected. Missing when either side is missing; an expected
/// value of zero is a real zero and still produces a variance.
pub fn dollar_variance(actual: Option<f64>, expected: Option<f64>) -> Option<f64> {
    match (actual, expected) {
        (Some(a), Some(e)) => Some(a - e),
        _ => None,
    }
}

/// (actual - expected) / expected. Missing when expected is zero or
/// either side is missing; zero and "no data" are distinct states.
pub fn percent_variance(actual: Option<f64>, expected: Option<f64>) -> Option<f64> {
    match (actual, expected) {
        (Some(a), Some(e)) if e != 0.0 => Some((a - e) / e),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PerformanceLabel {
    #[serde(rename = "Over Performing")]
    OverPerforming,
    #[serde(rename = "Under Performing")]
    UnderPerforming,
    #[serde(rename = "Average Performance")]
    AveragePerformance,
    #[serde(rename = "No Data")]
    NoData,
}

impl PerformanceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceLabel::OverPerforming => "Over Performing",
            PerformanceLabel::UnderPerforming => "Under Performing",
            PerformanceLabel::AveragePerformance => "Average Performance",
            PerformanceLabel::NoData => "No Data",
        }
    }

    /// Classifies actual vs expected payment by percent variance against
    /// a fixed band. Not a statistical test; just a three-way threshold
    /// with "No Data" when the comparison is undefined.
    pub fn classify(
        actual: Option<f64>,
        expected: Option<f64>,
        thresholds: &Thresholds,
    ) -> PerformanceLabel {
        match percent_variance(actual, expected) {
            None => PerformanceLabel::NoData,
            Some(pct) if pct > thresholds.performance_band => PerformanceLabel::OverPerforming,
            Some(pct) if pct < -thresholds.performance_band => PerformanceLabel::UnderPerforming,
            Some(_) => PerformanceLabel::AveragePerformance,
        }
    }
}

/// Root-cause tags comparing a row against its benchmark cohort. A
/// missing side leaves the row untagged, matching the historical
/// NaN-comparison behavior; "No Data" is surfaced by the performance
/// label instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticTags {
    pub low_payment: bool,
    pub low_collection: bool,
    pub high_charge: bool,
}

pub fn diagnostic_tags(
    payment: Option<f64>,
    benchmark_payment: Option<f64>,
    collection_rate: Option<f64>,
    benchmark_collection_rate: Option<f64>,
    charge: Option<f64>,
    benchmark_charge: Option<f64>,
    thresholds: &Thresholds,
) -> DiagnosticTags {
    let below = |actual: Option<f64>, benchmark: Option<f64>, ratio: f64| match (actual, benchmark)
    {
        (Some(a), Some(b)) => a < ratio * b,
        _ => false,
    };
    let above = |actual: Option<f64>, benchmark: Option<f64>, ratio: f64| match (actual, benchmark)
    {
        (Some(a), Some(b)) => a > ratio * b,
        _ => false,
    };
    DiagnosticTags {
        low_payment: below(payment, benchmark_payment, thresholds.low_payment_ratio),
        low_collection: below(
            collection_rate,
            benchmark_collection_rate,
            thresholds.low_collection_ratio,
        ),
        high_charge: above(charge, benchmark_charge, thresholds.high_charge_ratio),
    }
}
