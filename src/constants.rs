/// Delimiter joining the segments of a benchmark key.
pub const KEY_DELIMITER: char = '|';

/// A row is tagged "low payment" when actual payment falls below this
/// share of the benchmark payment.
pub const DEFAULT_LOW_PAYMENT_RATIO: f64 = 0.9;

/// A row is tagged "low collection" when the actual collection rate falls
/// below this share of the benchmark collection rate.
pub const DEFAULT_LOW_COLLECTION_RATIO: f64 = 0.9;

/// A row is tagged "high charge" when the actual charge exceeds this
/// multiple of the benchmark charge.
pub const DEFAULT_HIGH_CHARGE_RATIO: f64 = 1.1;

/// Percent-variance band for the performance label. Variance above +band
/// is "Over Performing", below -band is "Under Performing".
pub const DEFAULT_PERFORMANCE_BAND: f64 = 0.05;

/// E/M code benchmarks are expressed as this share of the reference fee
/// schedule amount.
pub const EM_FEE_SCHEDULE_SHARE: f64 = 0.85;

pub const DEFAULT_DETAIL_INDEX_CSV: &str = "invoice_level_index.csv";
pub const DEFAULT_KEY_ROLLUP_CSV: &str = "benchmark_key_rollup.csv";
pub const DEFAULT_WEEKLY_ROLLUP_CSV: &str = "weekly_trend_rollup.csv";
pub const DEFAULT_VALIDATION_CSV: &str = "validation_report.csv";
pub const DEFAULT_DASHBOARD_JSON: &str = "revenue-data.json";
pub const DEFAULT_BUNDLE_ZIP: &str = "revenue_reports.zip";
