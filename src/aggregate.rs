use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::key::{BenchmarkKey, KeyedRow};
use crate::variance::{PerformanceLabel, Thresholds, dollar_variance, percent_variance};

/// Visit-weighted running average: sum(rate * weight) / sum(weight).
/// Missing rates are skipped entirely so "no data" never drags the
/// average toward zero; a zero weight sum yields a missing result.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedMean {
    numerator: f64,
    weight: f64,
}

impl WeightedMean {
    pub fn add(&mut self, rate: Option<f64>, weight: f64) {
        if let Some(rate) = rate {
            self.numerator += rate * weight;
            self.weight += weight;
        }
    }

    pub fn value(&self) -> Option<f64> {
        if self.weight == 0.0 {
            None
        } else {
            Some(self.numerator / self.weight)
        }
    }
}

/// Sum that distinguishes "no contributing values" from a real zero.
#[derive(Debug, Default, Clone, Copy)]
struct OptSum {
    total: f64,
    seen: bool,
}

impl OptSum {
    fn add(&mut self, value: Option<f64>) {
        if let Some(value) = value {
            self.total += value;
            self.seen = true;
        }
    }

    fn value(&self) -> Option<f64> {
        self.seen.then_some(self.total)
    }
}

/// One invoice's totals within its benchmark cohort. An invoice is one
/// visit; detail rows are procedure lines within it.
#[derive(Debug, Clone)]
pub struct InvoiceTotals {
    pub invoice_number: String,
    pub key: BenchmarkKey,
    pub invoice_key: String,
    pub year: i32,
    pub week: u32,
    pub row_count: usize,
    pub charge: Option<f64>,
    pub payment: Option<f64>,
    pub expected_85_em: Option<f64>,
    pub collection_rate: Option<f64>,
    pub zb_collection_rate: Option<f64>,
}

/// Groups detail rows into per-invoice totals. Rows of one invoice share
/// a key by construction, so (invoice, key) and invoice group the same.
pub fn invoice_totals(rows: &[KeyedRow]) -> Vec<InvoiceTotals> {
    struct Acc {
        key: BenchmarkKey,
        invoice_number: String,
        year: i32,
        week: u32,
        row_count: usize,
        charge: OptSum,
        payment: OptSum,
        expected_85_em: OptSum,
        collection_rate: WeightedMean,
        zb_collection_rate: WeightedMean,
    }

    let mut groups: HashMap<String, Acc> = HashMap::new();
    for row in rows {
        let acc = groups.entry(row.invoice_key.clone()).or_insert_with(|| Acc {
            key: row.key.clone(),
            invoice_number: row.detail.invoice_number.clone(),
            year: row.detail.year,
            week: row.detail.week,
            row_count: 0,
            charge: OptSum::default(),
            payment: OptSum::default(),
            expected_85_em: OptSum::default(),
            collection_rate: WeightedMean::default(),
            zb_collection_rate: WeightedMean::default(),
        });
        acc.row_count += 1;
        acc.charge.add(row.detail.charge_amount);
        acc.payment.add(row.detail.payment_amount);
        acc.expected_85_em.add(row.detail.expected_amount_85_em);
        acc.collection_rate.add(row.detail.collection_rate, 1.0);
        acc.zb_collection_rate
            .add(row.detail.zero_balance_collection_rate, 1.0);
    }

    let mut out: Vec<InvoiceTotals> = groups
        .into_iter()
        .map(|(invoice_key, acc)| InvoiceTotals {
            invoice_number: acc.invoice_number,
            key: acc.key,
            invoice_key,
            year: acc.year,
            week: acc.week,
            row_count: acc.row_count,
            charge: acc.charge.value(),
            payment: acc.payment.value(),
            expected_85_em: acc.expected_85_em.value(),
            collection_rate: acc.collection_rate.value(),
            zb_collection_rate: acc.zb_collection_rate.value(),
        })
        .collect();
    out.sort_by(|a, b| a.invoice_key.cmp(&b.invoice_key));
    out
}

/// Benchmark aggregates for one cohort of statistically similar
/// invoices (one row per distinct full benchmark key).
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBenchmark {
    pub key: BenchmarkKey,
    /// Distinct invoices in the cohort; an invoice is one visit.
    pub invoice_count: usize,
    pub row_count: usize,
    pub week_count: usize,
    pub total_charge: Option<f64>,
    pub total_payment: Option<f64>,
    pub avg_charge_per_invoice: Option<f64>,
    pub avg_payment_per_invoice: Option<f64>,
    /// Cohort mean charge per procedure line. Baseline for comparisons
    /// against individual detail rows, which are single lines.
    pub avg_charge_per_line: Option<f64>,
    /// Cohort mean payment per procedure line.
    pub avg_payment_per_line: Option<f64>,
    /// Visit-weighted average actual payment per visit.
    pub payment_rate_per_visit: Option<f64>,
    /// Visit-weighted average expected (85% E/M) amount per visit.
    pub expected_rate_per_visit: Option<f64>,
    pub avg_collection_rate: Option<f64>,
    pub avg_zb_collection_rate: Option<f64>,
    /// Always recomputed as expected rate x visit count so the rate and
    /// dollar views cannot disagree.
    pub expected_payment_total: Option<f64>,
    pub revenue_variance: Option<f64>,
    pub revenue_variance_pct: Option<f64>,
    /// Mean visits per week the cohort was active; the volume baseline.
    pub avg_weekly_visits: Option<f64>,
}

/// Computes per-key benchmarks from invoice totals, returned in driver
/// ranking order: ascending dollar variance, worst underpayment first,
/// cohorts with no computable variance last.
pub fn key_benchmarks(invoices: &[InvoiceTotals]) -> Vec<KeyBenchmark> {
    struct Acc {
        key: BenchmarkKey,
        invoice_count: usize,
        row_count: usize,
        weeks: HashSet<(i32, u32)>,
        charge: OptSum,
        payment: OptSum,
        payment_rate: WeightedMean,
        expected_rate: WeightedMean,
        collection_rate: WeightedMean,
        zb_collection_rate: WeightedMean,
    }

    let mut groups: HashMap<String, Acc> = HashMap::new();
    for invoice in invoices {
        let acc = groups
            .entry(invoice.key.canonical().to_string())
            .or_insert_with(|| Acc {
                key: invoice.key.clone(),
                invoice_count: 0,
                row_count: 0,
                weeks: HashSet::new(),
                charge: OptSum::default(),
                payment: OptSum::default(),
                payment_rate: WeightedMean::default(),
                expected_rate: WeightedMean::default(),
                collection_rate: WeightedMean::default(),
                zb_collection_rate: WeightedMean::default(),
            });
        acc.invoice_count += 1;
        acc.row_count += invoice.row_count;
        acc.weeks.insert((invoice.year, invoice.week));
        acc.charge.add(invoice.charge);
        acc.payment.add(invoice.payment);
        // One invoice is one visit, so the invoice totals are its
        // per-visit rates with weight 1.
        acc.payment_rate.add(invoice.payment, 1.0);
        acc.expected_rate.add(invoice.expected_85_em, 1.0);
        acc.collection_rate.add(invoice.collection_rate, 1.0);
        acc.zb_collection_rate.add(invoice.zb_collection_rate, 1.0);
    }

    let mut out: Vec<KeyBenchmark> = groups
        .into_values()
        .map(|acc| {
            let invoice_count = acc.invoice_count;
            let row_count = acc.row_count;
            let total_payment = acc.payment.value();
            let expected_rate = acc.expected_rate.value();
            let expected_payment_total = expected_rate.map(|rate| rate * invoice_count as f64);
            KeyBenchmark {
                key: acc.key,
                invoice_count,
                row_count: acc.row_count,
                week_count: acc.weeks.len(),
                total_charge: acc.charge.value(),
                total_payment,
                avg_charge_per_invoice: acc
                    .charge
                    .value()
                    .map(|total| total / invoice_count as f64),
                avg_payment_per_invoice: total_payment.map(|total| total / invoice_count as f64),
                avg_charge_per_line: acc.charge.value().map(|total| total / row_count as f64),
                avg_payment_per_line: total_payment.map(|total| total / row_count as f64),
                payment_rate_per_visit: acc.payment_rate.value(),
                expected_rate_per_visit: expected_rate,
                avg_collection_rate: acc.collection_rate.value(),
                avg_zb_collection_rate: acc.zb_collection_rate.value(),
                expected_payment_total,
                revenue_variance: dollar_variance(total_payment, expected_payment_total),
                revenue_variance_pct: percent_variance(total_payment, expected_payment_total),
                avg_weekly_visits: if acc.weeks.is_empty() {
                    None
                } else {
                    Some(invoice_count as f64 / acc.weeks.len() as f64)
                },
            }
        })
        .collect();

    out.sort_by(|a, b| match (a.revenue_variance, b.revenue_variance) {
        (Some(x), Some(y)) => x
            .partial_cmp(&y)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.canonical().cmp(b.key.canonical())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.key.canonical().cmp(b.key.canonical()),
    });
    out
}

/// One row per year x week x payer x group x subgroup x benchmark key,
/// for the trend report and the dashboard feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyRollup {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Week")]
    pub week: u32,
    #[serde(rename = "Payer")]
    pub payer: String,
    #[serde(rename = "Group_EM")]
    pub group_em: String,
    #[serde(rename = "Group_EM2")]
    pub group_em2: String,
    #[serde(rename = "Benchmark_Key")]
    pub benchmark_key: String,
    #[serde(rename = "CPT_Count")]
    pub cpt_count: usize,
    #[serde(rename = "Visit_Count")]
    pub visit_count: usize,
    #[serde(rename = "Group_Size")]
    pub group_size: usize,
    #[serde(rename = "Charge_Amount")]
    pub charge_amount: Option<f64>,
    #[serde(rename = "Payment_Amount")]
    pub payment_amount: Option<f64>,
    #[serde(rename = "Collection_Rate")]
    pub collection_rate: Option<f64>,
    #[serde(rename = "Zero_Balance_Collection_Rate")]
    pub zb_collection_rate: Option<f64>,
    #[serde(rename = "Denial_Percent")]
    pub denial_pct: Option<f64>,
    #[serde(rename = "NRV_Gap_Dollar")]
    pub nrv_gap_dollar: Option<f64>,
    #[serde(rename = "NRV_Gap_Percent")]
    pub nrv_gap_pct: Option<f64>,
    #[serde(rename = "Remaining_Charges_Percent")]
    pub remaining_charges_pct: Option<f64>,
    #[serde(rename = "Open_Invoice_Count")]
    pub open_invoice_count: Option<f64>,
    #[serde(rename = "Expected_Rate_per_Visit")]
    pub expected_rate_per_visit: Option<f64>,
    #[serde(rename = "Expected_Payment")]
    pub expected_payment: Option<f64>,
    #[serde(rename = "Actual_Rate_per_Visit")]
    pub actual_rate_per_visit: Option<f64>,
    #[serde(rename = "Revenue_Variance")]
    pub revenue_variance: Option<f64>,
    #[serde(rename = "Revenue_Variance_Pct")]
    pub revenue_variance_pct: Option<f64>,
    #[serde(rename = "Rate_Variance")]
    pub rate_variance: Option<f64>,
    #[serde(rename = "Volume_Gap")]
    pub volume_gap: Option<f64>,
    #[serde(rename = "Performance_Label")]
    pub performance_label: PerformanceLabel,
}

/// Computes the weekly trend rollup. Benchmark rates come from the
/// key-level cohort; expected payment is recomputed per cell as rate x
/// visits. Output is sorted by the natural keys (time, payer, group).
pub fn weekly_rollup(
    rows: &[KeyedRow],
    benchmarks: &[KeyBenchmark],
    thresholds: &Thresholds,
) -> Vec<WeeklyRollup> {
    let by_key: HashMap<&str, &KeyBenchmark> = benchmarks
        .iter()
        .map(|b| (b.key.canonical(), b))
        .collect();

    struct Acc<'a> {
        key: &'a BenchmarkKey,
        invoices: HashSet<&'a str>,
        group_size: usize,
        charge: OptSum,
        payment: OptSum,
        collection_rate: WeightedMean,
        zb_collection_rate: WeightedMean,
        denial_pct: WeightedMean,
        nrv_gap_dollar: OptSum,
        nrv_gap_pct: WeightedMean,
        remaining_charges_pct: WeightedMean,
        open_invoice_count: OptSum,
    }

    let mut groups: HashMap<(i32, u32, &str), Acc> = HashMap::new();
    for row in rows {
        let cell = (row.detail.year, row.detail.week, row.key.canonical());
        let acc = groups.entry(cell).or_insert_with(|| Acc {
            key: &row.key,
            invoices: HashSet::new(),
            group_size: 0,
            charge: OptSum::default(),
            payment: OptSum::default(),
            collection_rate: WeightedMean::default(),
            zb_collection_rate: WeightedMean::default(),
            denial_pct: WeightedMean::default(),
            nrv_gap_dollar: OptSum::default(),
            nrv_gap_pct: WeightedMean::default(),
            remaining_charges_pct: WeightedMean::default(),
            open_invoice_count: OptSum::default(),
        });
        acc.invoices.insert(row.detail.invoice_number.as_str());
        acc.group_size += 1;
        acc.charge.add(row.detail.charge_amount);
        acc.payment.add(row.detail.payment_amount);
        acc.collection_rate.add(row.detail.collection_rate, 1.0);
        acc.zb_collection_rate
            .add(row.detail.zero_balance_collection_rate, 1.0);
        acc.denial_pct.add(row.detail.denial_pct, 1.0);
        acc.nrv_gap_dollar.add(row.detail.nrv_gap_dollar);
        acc.nrv_gap_pct.add(row.detail.nrv_gap_pct, 1.0);
        acc.remaining_charges_pct
            .add(row.detail.remaining_charges_pct, 1.0);
        acc.open_invoice_count.add(row.detail.open_invoice_count);
    }

    let mut out: Vec<WeeklyRollup> = groups
        .into_iter()
        .map(|((year, week, canonical), acc)| {
            let benchmark = by_key.get(canonical).copied();
            let visit_count = acc.invoices.len();
            let payment_amount = acc.payment.value();
            let expected_rate_per_visit =
                benchmark.and_then(|b| b.expected_rate_per_visit);
            let expected_payment =
                expected_rate_per_visit.map(|rate| rate * visit_count as f64);
            let actual_rate_per_visit = if visit_count == 0 {
                None
            } else {
                payment_amount.map(|p| p / visit_count as f64)
            };
            WeeklyRollup {
                year,
                week,
                payer: acc.key.payer().to_string(),
                group_em: acc.key.group_em().to_string(),
                group_em2: acc.key.group_em2().to_string(),
                benchmark_key: canonical.to_string(),
                cpt_count: acc.key.cpt_count(),
                visit_count,
                group_size: acc.group_size,
                charge_amount: acc.charge.value(),
                payment_amount,
                collection_rate: acc.collection_rate.value(),
                zb_collection_rate: acc.zb_collection_rate.value(),
                denial_pct: acc.denial_pct.value(),
                nrv_gap_dollar: acc.nrv_gap_dollar.value(),
                nrv_gap_pct: acc.nrv_gap_pct.value(),
                remaining_charges_pct: acc.remaining_charges_pct.value(),
                open_invoice_count: acc.open_invoice_count.value(),
                expected_rate_per_visit,
                expected_payment,
                actual_rate_per_visit,
                revenue_variance: dollar_variance(payment_amount, expected_payment),
                revenue_variance_pct: percent_variance(payment_amount, expected_payment),
                rate_variance: dollar_variance(actual_rate_per_visit, expected_rate_per_visit),
                volume_gap: benchmark
                    .and_then(|b| b.avg_weekly_visits)
                    .map(|baseline| visit_count as f64 - baseline),
                performance_label: PerformanceLabel::classify(
                    payment_amount,
                    expected_payment,
                    thresholds,
                ),
            }
        })
        .collect();

    out.sort_by(|a, b| {
        (a.year, a.week, &a.payer, &a.group_em, &a.group_em2, &a.benchmark_key).cmp(&(
            b.year,
            b.week,
            &b.payer,
            &b.group_em,
            &b.group_em2,
            &b.benchmark_key,
        ))
    });
    out
}
