use clap::Parser;

use crate::constants::{
    DEFAULT_HIGH_CHARGE_RATIO, DEFAULT_LOW_COLLECTION_RATIO, DEFAULT_LOW_PAYMENT_RATIO,
    DEFAULT_PERFORMANCE_BAND,
};

#[derive(Debug, Parser)]
#[command(name = "build_reports")]
#[command(about = "Build benchmark-keyed revenue performance reports from billing detail CSVs")]
pub struct Args {
    /// Billing detail CSV exported from the practice management system.
    #[arg(long)]
    pub input_path: std::path::PathBuf,

    /// Directory where report outputs are written.
    #[arg(long, default_value = "data/output")]
    pub output_dir: std::path::PathBuf,

    /// Detail-level index CSV output path (one row per procedure line).
    #[arg(long)]
    pub detail_index_csv: Option<std::path::PathBuf>,

    /// Benchmark-key rollup CSV output path (driver ranking).
    #[arg(long)]
    pub key_rollup_csv: Option<std::path::PathBuf>,

    /// Weekly trend rollup CSV output path.
    #[arg(long)]
    pub weekly_rollup_csv: Option<std::path::PathBuf>,

    /// Validation report CSV path for quarantined rows.
    #[arg(long)]
    pub validation_csv: Option<std::path::PathBuf>,

    /// Also write the weekly rollup as a JSON array of records for the
    /// dashboard front end.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Also bundle the report CSVs into a ZIP archive.
    #[arg(long, default_value_t = false)]
    pub zip: bool,

    /// Low-payment tag threshold as a share of benchmark payment.
    #[arg(long, default_value_t = DEFAULT_LOW_PAYMENT_RATIO)]
    pub low_payment_ratio: f64,

    /// Low-collection tag threshold as a share of benchmark collection rate.
    #[arg(long, default_value_t = DEFAULT_LOW_COLLECTION_RATIO)]
    pub low_collection_ratio: f64,

    /// High-charge tag threshold as a multiple of benchmark charge.
    #[arg(long, default_value_t = DEFAULT_HIGH_CHARGE_RATIO)]
    pub high_charge_ratio: f64,

    /// Percent-variance band for the Over/Under Performing label.
    #[arg(long, default_value_t = DEFAULT_PERFORMANCE_BAND)]
    pub performance_band: f64,
}
