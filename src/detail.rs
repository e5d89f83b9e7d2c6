use std::collections::HashMap;

use crate::aggregate::KeyBenchmark;
use crate::key::KeyedRow;
use crate::schema::DetailRow;
use crate::variance::{
    DiagnosticTags, PerformanceLabel, Thresholds, diagnostic_tags, dollar_variance,
    percent_variance,
};

/// One detail row joined with its cohort benchmarks, variances, and
/// diagnostic tags: a row of the detail-level drill index.
#[derive(Debug, Clone)]
pub struct AnnotatedRow {
    pub detail: DetailRow,
    pub benchmark_key: String,
    pub invoice_key: String,
    pub cpt_count: usize,
    pub benchmark_invoice_count: Option<usize>,
    /// Cohort mean charge per procedure line (same granularity as the
    /// row itself).
    pub benchmark_charge: Option<f64>,
    /// Cohort mean payment per procedure line.
    pub benchmark_payment: Option<f64>,
    pub benchmark_payment_rate_per_visit: Option<f64>,
    pub benchmark_collection_rate: Option<f64>,
    pub benchmark_zb_collection_rate: Option<f64>,
    pub expected_rate_per_visit: Option<f64>,
    /// Payment minus the row's 85% E/M expected amount.
    pub revenue_variance_dollar: Option<f64>,
    pub revenue_variance_pct: Option<f64>,
    /// Positive part of the revenue variance; zero when underpaid.
    pub overpayment_dollar: Option<f64>,
    pub payment_diff_vs_benchmark: Option<f64>,
    pub payment_pct_diff_vs_benchmark: Option<f64>,
    pub tags: DiagnosticTags,
    pub performance_label: PerformanceLabel,
}

/// Joins key-level benchmarks back onto every detail row. The join is a
/// typed lookup by benchmark key; each output column is written exactly
/// once, so there is no possibility of ambiguous duplicate columns.
pub fn annotate_rows(
    rows: &[KeyedRow],
    benchmarks: &[KeyBenchmark],
    thresholds: &Thresholds,
) -> Vec<AnnotatedRow> {
    let by_key: HashMap<&str, &KeyBenchmark> = benchmarks
        .iter()
        .map(|b| (b.key.canonical(), b))
        .collect();

    rows.iter()
        .map(|row| {
            let benchmark = by_key.get(row.key.canonical()).copied();
            // A detail row is a single procedure line, so its baselines
            // are the cohort per-line means, not per-invoice averages.
            let benchmark_payment = benchmark.and_then(|b| b.avg_payment_per_line);
            let benchmark_charge = benchmark.and_then(|b| b.avg_charge_per_line);
            let benchmark_collection_rate = benchmark.and_then(|b| b.avg_collection_rate);

            let revenue_variance_dollar = dollar_variance(
                row.detail.payment_amount,
                row.detail.expected_amount_85_em,
            );
            let revenue_variance_pct = percent_variance(
                row.detail.payment_amount,
                row.detail.expected_amount_85_em,
            );
            let payment_diff_vs_benchmark =
                dollar_variance(row.detail.payment_amount, benchmark_payment);
            let payment_pct_diff_vs_benchmark =
                percent_variance(row.detail.payment_amount, benchmark_payment);

            AnnotatedRow {
                detail: row.detail.clone(),
                benchmark_key: row.key.canonical().to_string(),
                invoice_key: row.invoice_key.clone(),
                cpt_count: row.key.cpt_count(),
                benchmark_invoice_count: benchmark.map(|b| b.invoice_count),
                benchmark_charge,
                benchmark_payment,
                benchmark_payment_rate_per_visit: benchmark
                    .and_then(|b| b.payment_rate_per_visit),
                benchmark_collection_rate,
                benchmark_zb_collection_rate: benchmark.and_then(|b| b.avg_zb_collection_rate),
                expected_rate_per_visit: benchmark.and_then(|b| b.expected_rate_per_visit),
                revenue_variance_dollar,
                revenue_variance_pct,
                overpayment_dollar: revenue_variance_dollar.map(|v| v.max(0.0)),
                payment_diff_vs_benchmark,
                payment_pct_diff_vs_benchmark,
                tags: diagnostic_tags(
                    row.detail.payment_amount,
                    benchmark_payment,
                    row.detail.collection_rate,
                    benchmark_collection_rate,
                    row.detail.charge_amount,
                    benchmark_charge,
                    thresholds,
                ),
                performance_label: PerformanceLabel::classify(
                    row.detail.payment_amount,
                    row.detail.expected_amount_85_em,
                    thresholds,
                ),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{invoice_totals, key_benchmarks};
    use crate::key::assign_benchmark_keys;

    fn detail(invoice: &str, cpt: &str, payment: f64, expected: Option<f64>) -> DetailRow {
        DetailRow {
            year: 2024,
            week: 10,
            payer: "Aetna".to_string(),
            group_em: "New E/M Code".to_string(),
            group_em2: "Layer2".to_string(),
            invoice_number: invoice.to_string(),
            cpt_code: cpt.to_string(),
            charge_amount: Some(100.0),
            payment_amount: Some(payment),
            charge_billed_balance: None,
            expected_amount_85_em: expected,
            fee_schedule_expected_amount: None,
            payment_per_visit: None,
            collection_rate: None,
            zero_balance_collection_rate: None,
            denial_pct: None,
            open_invoice_count: None,
            remaining_charges_pct: None,
            nrv_gap_dollar: None,
            nrv_gap_pct: None,
        }
    }

    #[test]
    fn rows_join_their_cohort_benchmarks() {
        let rows = assign_benchmark_keys(vec![
            detail("INV-1", "99213", 80.0, Some(100.0)),
            detail("INV-2", "99213", 120.0, Some(100.0)),
        ]);
        let benchmarks = key_benchmarks(&invoice_totals(&rows));
        let annotated = annotate_rows(&rows, &benchmarks, &Thresholds::default());
        assert_eq!(annotated.len(), 2);
        for row in &annotated {
            assert_eq!(row.benchmark_invoice_count, Some(2));
            assert_eq!(row.benchmark_payment, Some(100.0));
        }
    }

    #[test]
    fn low_payment_rows_are_tagged_against_cohort() {
        let rows = assign_benchmark_keys(vec![
            detail("INV-1", "99213", 80.0, Some(100.0)),
            detail("INV-2", "99213", 120.0, Some(100.0)),
        ]);
        let benchmarks = key_benchmarks(&invoice_totals(&rows));
        let annotated = annotate_rows(&rows, &benchmarks, &Thresholds::default());
        let low = annotated
            .iter()
            .find(|r| r.detail.invoice_number == "INV-1")
            .unwrap();
        // 80 < 0.9 * 100
        assert!(low.tags.low_payment);
        let high = annotated
            .iter()
            .find(|r| r.detail.invoice_number == "INV-2")
            .unwrap();
        assert!(!high.tags.low_payment);
    }

    #[test]
    fn multi_line_invoices_at_cohort_average_are_not_tagged() {
        // Two identical two-line invoices, every line paid 60. Each
        // invoice totals 120, exactly the cohort per-invoice average.
        // The lines sit on the cohort per-line mean, so none of them
        // is a low payment outlier.
        let rows = assign_benchmark_keys(vec![
            detail("INV-1", "99213", 60.0, Some(60.0)),
            detail("INV-1", "71045", 60.0, Some(60.0)),
            detail("INV-2", "99213", 60.0, Some(60.0)),
            detail("INV-2", "71045", 60.0, Some(60.0)),
        ]);
        let benchmarks = key_benchmarks(&invoice_totals(&rows));
        assert_eq!(benchmarks.len(), 1);
        assert_eq!(benchmarks[0].avg_payment_per_invoice, Some(120.0));
        assert_eq!(benchmarks[0].avg_payment_per_line, Some(60.0));

        let annotated = annotate_rows(&rows, &benchmarks, &Thresholds::default());
        for row in &annotated {
            assert_eq!(row.benchmark_payment, Some(60.0));
            assert_eq!(row.benchmark_charge, Some(100.0));
            assert_eq!(row.payment_diff_vs_benchmark, Some(0.0));
            assert!(!row.tags.low_payment);
            assert!(!row.tags.high_charge);
        }
    }

    #[test]
    fn overpayment_is_positive_part_only() {
        let rows = assign_benchmark_keys(vec![
            detail("INV-1", "99213", 80.0, Some(100.0)),
            detail("INV-2", "99213", 120.0, Some(100.0)),
        ]);
        let benchmarks = key_benchmarks(&invoice_totals(&rows));
        let annotated = annotate_rows(&rows, &benchmarks, &Thresholds::default());
        let under = annotated
            .iter()
            .find(|r| r.detail.invoice_number == "INV-1")
            .unwrap();
        assert_eq!(under.overpayment_dollar, Some(0.0));
        let over = annotated
            .iter()
            .find(|r| r.detail.invoice_number == "INV-2")
            .unwrap();
        assert_eq!(over.overpayment_dollar, Some(20.0));
    }
}
