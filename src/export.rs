use anyhow::{Context, Result};
use csv::Writer;
use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};
use zip::{CompressionMethod, write::SimpleFileOptions};

use crate::aggregate::{KeyBenchmark, WeeklyRollup};
use crate::detail::AnnotatedRow;
use crate::normalize::RejectedRow;

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn fmt_bool(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn tmp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("output.csv");
    path.with_file_name(format!("{file_name}.tmp"))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating {}", parent.display()))?;
    }
    Ok(())
}

fn finish_atomic(mut writer: Writer<File>, tmp: &Path, path: &Path) -> Result<()> {
    writer.flush().context("Failed flushing CSV writer")?;
    drop(writer);
    fs::rename(tmp, path)
        .with_context(|| format!("Failed moving {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Detail-level drill index: one row per procedure line with its keys,
/// cohort benchmarks, variances, and tags.
pub fn write_detail_index(path: &Path, rows: &[AnnotatedRow]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = tmp_path(path);
    let mut writer = Writer::from_path(&tmp)
        .with_context(|| format!("Failed creating detail index {}", tmp.display()))?;
    writer
        .write_record([
            "Year",
            "Week",
            "Payer",
            "Group_EM",
            "Group_EM2",
            "Invoice_Number",
            "Charge CPT Code",
            "Charge Amount",
            "Payment Amount*",
            "Charge Billed Balance",
            "Expected Amount (85% E/M)",
            "Fee Schedule Expected Amount",
            "Payment per Visit",
            "Collection Rate*",
            "Zero Balance Collection Rate",
            "Denial %",
            "Open Invoice Count",
            "% of Remaining Charges",
            "NRV Gap ($)",
            "NRV Gap (%)",
            "Benchmark_Key",
            "Abbreviate_Benchmark_Key",
            "CPT_Count",
            "Benchmark_Invoice_Count",
            "Benchmark_Charge_Amount",
            "Benchmark_Payment_Amount",
            "Benchmark_Payment_per_Visit",
            "Benchmark_Collection_Rate",
            "Benchmark_Zero_Balance_Collection_Rate",
            "Expected_Rate_per_Visit",
            "Revenue_Variance_$",
            "Revenue_Variance_%",
            "Overpayment ($)",
            "Invoice_Payment_Diff_vs_Benchmark",
            "Invoice_Payment_Pct_Diff_vs_Benchmark",
            "Tag_Low_Payment",
            "Tag_Low_Collection",
            "Tag_High_Charge",
            "Performance_Label",
        ])
        .context("Failed writing detail index header")?;

    for row in rows {
        let d = &row.detail;
        writer
            .write_record([
                d.year.to_string(),
                d.week.to_string(),
                d.payer.clone(),
                d.group_em.clone(),
                d.group_em2.clone(),
                d.invoice_number.clone(),
                d.cpt_code.clone(),
                fmt_opt(d.charge_amount),
                fmt_opt(d.payment_amount),
                fmt_opt(d.charge_billed_balance),
                fmt_opt(d.expected_amount_85_em),
                fmt_opt(d.fee_schedule_expected_amount),
                fmt_opt(d.payment_per_visit),
                fmt_opt(d.collection_rate),
                fmt_opt(d.zero_balance_collection_rate),
                fmt_opt(d.denial_pct),
                fmt_opt(d.open_invoice_count),
                fmt_opt(d.remaining_charges_pct),
                fmt_opt(d.nrv_gap_dollar),
                fmt_opt(d.nrv_gap_pct),
                row.benchmark_key.clone(),
                row.invoice_key.clone(),
                row.cpt_count.to_string(),
                row.benchmark_invoice_count
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
                fmt_opt(row.benchmark_charge),
                fmt_opt(row.benchmark_payment),
                fmt_opt(row.benchmark_payment_rate_per_visit),
                fmt_opt(row.benchmark_collection_rate),
                fmt_opt(row.benchmark_zb_collection_rate),
                fmt_opt(row.expected_rate_per_visit),
                fmt_opt(row.revenue_variance_dollar),
                fmt_opt(row.revenue_variance_pct),
                fmt_opt(row.overpayment_dollar),
                fmt_opt(row.payment_diff_vs_benchmark),
                fmt_opt(row.payment_pct_diff_vs_benchmark),
                fmt_bool(row.tags.low_payment).to_string(),
                fmt_bool(row.tags.low_collection).to_string(),
                fmt_bool(row.tags.high_charge).to_string(),
                row.performance_label.as_str().to_string(),
            ])
            .context("Failed writing detail index row")?;
    }
    finish_atomic(writer, &tmp, path)
}

/// Key-level rollup in driver ranking order (worst underpayment first).
pub fn write_key_rollup(path: &Path, benchmarks: &[KeyBenchmark]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = tmp_path(path);
    let mut writer = Writer::from_path(&tmp)
        .with_context(|| format!("Failed creating key rollup {}", tmp.display()))?;
    writer
        .write_record([
            "Benchmark_Key",
            "Payer",
            "Group_EM",
            "Group_EM2",
            "CPT_Count",
            "Benchmark_Invoice_Count",
            "Row_Count",
            "Week_Count",
            "Total_Charge_Amount",
            "Total_Payment_Amount",
            "Benchmark_Charge_Amount",
            "Benchmark_Payment_Amount",
            "Benchmark_Payment_per_Visit",
            "Expected_Rate_per_Visit",
            "Benchmark_Collection_Rate",
            "Benchmark_Zero_Balance_Collection_Rate",
            "Expected_Payment",
            "Revenue_Variance",
            "Revenue_Variance_Pct",
            "Avg_Weekly_Visits",
        ])
        .context("Failed writing key rollup header")?;

    for b in benchmarks {
        writer
            .write_record([
                b.key.canonical().to_string(),
                b.key.payer().to_string(),
                b.key.group_em().to_string(),
                b.key.group_em2().to_string(),
                b.key.cpt_count().to_string(),
                b.invoice_count.to_string(),
                b.row_count.to_string(),
                b.week_count.to_string(),
                fmt_opt(b.total_charge),
                fmt_opt(b.total_payment),
                fmt_opt(b.avg_charge_per_invoice),
                fmt_opt(b.avg_payment_per_invoice),
                fmt_opt(b.payment_rate_per_visit),
                fmt_opt(b.expected_rate_per_visit),
                fmt_opt(b.avg_collection_rate),
                fmt_opt(b.avg_zb_collection_rate),
                fmt_opt(b.expected_payment_total),
                fmt_opt(b.revenue_variance),
                fmt_opt(b.revenue_variance_pct),
                fmt_opt(b.avg_weekly_visits),
            ])
            .context("Failed writing key rollup row")?;
    }
    finish_atomic(writer, &tmp, path)
}

/// Weekly trend rollup in natural key order (time, payer, group).
pub fn write_weekly_rollup(path: &Path, cells: &[WeeklyRollup]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = tmp_path(path);
    let mut writer = Writer::from_path(&tmp)
        .with_context(|| format!("Failed creating weekly rollup {}", tmp.display()))?;
    writer
        .write_record([
            "Year",
            "Week",
            "Payer",
            "Group_EM",
            "Group_EM2",
            "Benchmark_Key",
            "CPT_Count",
            "Visit_Count",
            "Group_Size",
            "Charge_Amount",
            "Payment_Amount",
            "Collection_Rate",
            "Zero_Balance_Collection_Rate",
            "Denial_Percent",
            "NRV_Gap_Dollar",
            "NRV_Gap_Percent",
            "Remaining_Charges_Percent",
            "Open_Invoice_Count",
            "Expected_Rate_per_Visit",
            "Expected_Payment",
            "Actual_Rate_per_Visit",
            "Revenue_Variance",
            "Revenue_Variance_Pct",
            "Rate_Variance",
            "Volume_Gap",
            "Performance_Label",
        ])
        .context("Failed writing weekly rollup header")?;

    for cell in cells {
        writer
            .write_record([
                cell.year.to_string(),
                cell.week.to_string(),
                cell.payer.clone(),
                cell.group_em.clone(),
                cell.group_em2.clone(),
                cell.benchmark_key.clone(),
                cell.cpt_count.to_string(),
                cell.visit_count.to_string(),
                cell.group_size.to_string(),
                fmt_opt(cell.charge_amount),
                fmt_opt(cell.payment_amount),
                fmt_opt(cell.collection_rate),
                fmt_opt(cell.zb_collection_rate),
                fmt_opt(cell.denial_pct),
                fmt_opt(cell.nrv_gap_dollar),
                fmt_opt(cell.nrv_gap_pct),
                fmt_opt(cell.remaining_charges_pct),
                fmt_opt(cell.open_invoice_count),
                fmt_opt(cell.expected_rate_per_visit),
                fmt_opt(cell.expected_payment),
                fmt_opt(cell.actual_rate_per_visit),
                fmt_opt(cell.revenue_variance),
                fmt_opt(cell.revenue_variance_pct),
                fmt_opt(cell.rate_variance),
                fmt_opt(cell.volume_gap),
                cell.performance_label.as_str().to_string(),
            ])
            .context("Failed writing weekly rollup row")?;
    }
    finish_atomic(writer, &tmp, path)
}

/// Quarantined input rows, for operator review.
pub fn write_validation_report(path: &Path, rejected: &[RejectedRow]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = tmp_path(path);
    let mut writer = Writer::from_path(&tmp)
        .with_context(|| format!("Failed creating validation report {}", tmp.display()))?;
    writer
        .write_record([
            "line",
            "reason",
            "Invoice_Number",
            "Payer",
            "Group_EM",
            "Group_EM2",
            "Charge CPT Code",
        ])
        .context("Failed writing validation report header")?;
    for row in rejected {
        writer
            .write_record([
                row.line.to_string(),
                row.reason.clone(),
                row.invoice_number.clone(),
                row.payer.clone(),
                row.group_em.clone(),
                row.group_em2.clone(),
                row.cpt_code.clone(),
            ])
            .context("Failed writing validation report row")?;
    }
    finish_atomic(writer, &tmp, path)
}

/// Weekly rollup as a JSON array of records for the dashboard front
/// end. Missing values serialize as null, never zero.
pub fn write_dashboard_json(path: &Path, cells: &[WeeklyRollup]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = tmp_path(path);
    let file = File::create(&tmp)
        .with_context(|| format!("Failed creating dashboard JSON {}", tmp.display()))?;
    serde_json::to_writer_pretty(file, cells)
        .with_context(|| format!("Failed writing dashboard JSON {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed moving {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Bundles report CSVs into one deflate-compressed ZIP for delivery.
pub fn bundle_reports_zip(zip_path: &Path, files: &[PathBuf]) -> Result<()> {
    ensure_parent(zip_path)?;
    let tmp = tmp_path(zip_path);
    let file = File::create(&tmp)
        .with_context(|| format!("Failed creating archive {}", tmp.display()))?;
    let mut archive = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in files {
        let arcname = path
            .file_name()
            .and_then(|x| x.to_str())
            .with_context(|| format!("Could not derive archive name for {}", path.display()))?;
        archive
            .start_file(arcname, options)
            .with_context(|| format!("Failed adding {arcname} to archive"))?;
        let mut input = File::open(path)
            .with_context(|| format!("Failed opening {}", path.display()))?;
        io::copy(&mut input, &mut archive)
            .with_context(|| format!("Failed compressing {}", path.display()))?;
    }
    archive.finish().context("Failed finalizing archive")?;
    fs::rename(&tmp, zip_path).with_context(|| {
        format!(
            "Failed moving {} to {}",
            tmp.display(),
            zip_path.display()
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(label: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let dir = std::env::temp_dir().join(format!("build_reports_{label}_{stamp}"));
        fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[test]
    fn missing_values_serialize_as_empty_cells() {
        assert_eq!(fmt_opt(None), "");
        assert_eq!(fmt_opt(Some(0.0)), "0");
        assert_eq!(fmt_opt(Some(1.5)), "1.5");
    }

    #[test]
    fn zip_bundle_contains_input_files_by_name() {
        let dir = scratch_dir("zip");
        let csv_a = dir.join("a.csv");
        let csv_b = dir.join("b.csv");
        for (path, body) in [(&csv_a, "x,y\n1,2\n"), (&csv_b, "x\n9\n")] {
            let mut f = File::create(path).expect("create");
            f.write_all(body.as_bytes()).expect("write");
        }

        let zip_path = dir.join("bundle.zip");
        bundle_reports_zip(&zip_path, &[csv_a, csv_b]).expect("bundle");

        let reader = File::open(&zip_path).expect("open zip");
        let mut archive = zip::ZipArchive::new(reader).expect("read zip");
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).expect("entry").name().to_string())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn validation_report_round_trips() {
        let dir = scratch_dir("validation");
        let path = dir.join("validation_report.csv");
        let rejected = vec![RejectedRow {
            line: 7,
            reason: "missing required field: Charge CPT Code".to_string(),
            invoice_number: "INV-9".to_string(),
            payer: "Aetna".to_string(),
            group_em: "New E/M Code".to_string(),
            group_em2: "Layer2".to_string(),
            cpt_code: String::new(),
        }];
        write_validation_report(&path, &rejected).expect("write");

        let mut reader = csv::Reader::from_path(&path).expect("open");
        let records: Vec<csv::StringRecord> =
            reader.records().map(|r| r.expect("record")).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][0], "7");
        assert_eq!(&records[0][2], "INV-9");

        fs::remove_dir_all(&dir).ok();
    }
}
