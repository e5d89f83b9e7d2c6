mod aggregate;
mod args;
mod constants;
mod detail;
mod export;
mod key;
mod normalize;
mod schema;
mod variance;

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;

use aggregate::{invoice_totals, key_benchmarks, weekly_rollup};
use args::Args;
use constants::{
    DEFAULT_BUNDLE_ZIP, DEFAULT_DASHBOARD_JSON, DEFAULT_DETAIL_INDEX_CSV, DEFAULT_KEY_ROLLUP_CSV,
    DEFAULT_VALIDATION_CSV, DEFAULT_WEEKLY_ROLLUP_CSV,
};
use detail::annotate_rows;
use export::{
    bundle_reports_zip, write_dashboard_json, write_detail_index, write_key_rollup,
    write_validation_report, write_weekly_rollup,
};
use key::assign_benchmark_keys;
use normalize::load_detail_rows;
use variance::Thresholds;

fn main() -> Result<()> {
    let args = Args::parse();

    if !args.input_path.is_file() {
        bail!("Input file not found: {}", args.input_path.display());
    }

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed creating {}", args.output_dir.display()))?;

    let detail_csv = args
        .detail_index_csv
        .clone()
        .unwrap_or_else(|| args.output_dir.join(DEFAULT_DETAIL_INDEX_CSV));
    let key_rollup_csv = args
        .key_rollup_csv
        .clone()
        .unwrap_or_else(|| args.output_dir.join(DEFAULT_KEY_ROLLUP_CSV));
    let weekly_rollup_csv = args
        .weekly_rollup_csv
        .clone()
        .unwrap_or_else(|| args.output_dir.join(DEFAULT_WEEKLY_ROLLUP_CSV));
    let validation_csv = args
        .validation_csv
        .clone()
        .unwrap_or_else(|| args.output_dir.join(DEFAULT_VALIDATION_CSV));

    let thresholds = Thresholds {
        low_payment_ratio: args.low_payment_ratio,
        low_collection_ratio: args.low_collection_ratio,
        high_charge_ratio: args.high_charge_ratio,
        performance_band: args.performance_band,
    };

    println!("Using input file {}", args.input_path.display());
    let outcome = load_detail_rows(&args.input_path)?;
    println!(
        "Read {} rows: {} kept, {} quarantined, {} summary rows removed",
        outcome.rows_read,
        outcome.rows.len(),
        outcome.rejected.len(),
        outcome.total_rows_removed
    );
    for column in &outcome.synthesized_columns {
        println!("Warning: input is missing column \"{column}\"; synthesized with defaults");
    }

    write_validation_report(&validation_csv, &outcome.rejected)?;
    println!(
        "Wrote validation report {} ({} rows)",
        validation_csv.display(),
        outcome.rejected.len()
    );

    let keyed = assign_benchmark_keys(outcome.rows);
    let invoices = invoice_totals(&keyed);
    let benchmarks = key_benchmarks(&invoices);
    println!(
        "Assigned {} detail rows to {} invoices in {} benchmark cohorts",
        keyed.len(),
        invoices.len(),
        benchmarks.len()
    );

    let annotated = annotate_rows(&keyed, &benchmarks, &thresholds);
    let weekly = weekly_rollup(&keyed, &benchmarks, &thresholds);

    write_detail_index(&detail_csv, &annotated)?;
    println!("Wrote detail index {}", detail_csv.display());

    write_key_rollup(&key_rollup_csv, &benchmarks)?;
    println!("Wrote key rollup {}", key_rollup_csv.display());

    write_weekly_rollup(&weekly_rollup_csv, &weekly)?;
    println!(
        "Wrote weekly rollup {} ({} cells)",
        weekly_rollup_csv.display(),
        weekly.len()
    );

    if args.json {
        let json_path = args.output_dir.join(DEFAULT_DASHBOARD_JSON);
        write_dashboard_json(&json_path, &weekly)?;
        println!("Wrote dashboard JSON {}", json_path.display());
    }

    if args.zip {
        let zip_path = args.output_dir.join(DEFAULT_BUNDLE_ZIP);
        bundle_reports_zip(
            &zip_path,
            &[
                detail_csv.clone(),
                key_rollup_csv.clone(),
                weekly_rollup_csv.clone(),
            ],
        )?;
        println!("Wrote report bundle {}", zip_path.display());
    }

    Ok(())
}
