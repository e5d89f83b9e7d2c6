use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::{fs::File, io::Read, path::Path};

use crate::constants::EM_FEE_SCHEDULE_SHARE;
use crate::schema::{
    COL_CHARGE_AMOUNT, COL_CHARGE_BILLED_BALANCE, COL_COLLECTION_RATE, COL_CPT_CODE,
    COL_DENIAL_PCT, COL_EXPECTED_85_EM, COL_FEE_SCHEDULE_EXPECTED, COL_GROUP_EM, COL_GROUP_EM2,
    COL_INVOICE_NUMBER, COL_OPEN_INVOICE_COUNT, COL_PAYER, COL_PAYMENT_AMOUNT,
    COL_PAYMENT_PER_VISIT, COL_WEEK, COL_YEAR, COL_ZB_COLLECTION_RATE, ColumnMap, DetailRow,
    REQUIRED_KEY_COLUMNS,
};

/// A quarantined input row. Carries enough of the raw record for the
/// operator to trace it back to the source file.
#[derive(Debug, Clone)]
pub struct RejectedRow {
    pub line: u64,
    pub reason: String,
    pub invoice_number: String,
    pub payer: String,
    pub group_em: String,
    pub group_em2: String,
    pub cpt_code: String,
}

#[derive(Debug)]
pub struct NormalizeOutcome {
    pub rows: Vec<DetailRow>,
    pub rejected: Vec<RejectedRow>,
    pub total_rows_removed: usize,
    pub synthesized_columns: Vec<String>,
    pub rows_read: usize,
}

/// Parses a free-text numeric cell. Tolerates `$` prefixes, thousands
/// commas, and a trailing `%` (which divides by 100). Blank or
/// unparsable cells are missing, never zero.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let upper = trimmed.to_ascii_uppercase();
    if matches!(upper.as_str(), "NAN" | "N/A" | "NA" | "NULL" | "NONE" | "-") {
        return None;
    }
    let mut cleaned = trimmed.replace([',', '$'], "");
    let percent = cleaned.ends_with('%');
    if percent {
        cleaned.pop();
    }
    let parsed = cleaned.trim().parse::<f64>().ok()?;
    if parsed.is_nan() {
        None
    } else if percent {
        Some(parsed / 100.0)
    } else {
        Some(parsed)
    }
}

/// Parses week labels like `23`, `W23`, or `Week 23`.
pub fn parse_week(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Parses year cells, including float artifacts like `2024.0`.
pub fn parse_year(raw: &str) -> Option<i32> {
    parse_number(raw).map(|y| y as i32)
}

/// Spreadsheet exports append "Total" / "Grand Total" summary rows that
/// must not flow into the aggregates.
fn is_total_marker(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    lowered == "total" || lowered == "grand total"
}

fn progress_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} normalizing rows {pos} {msg}")
    {
        spinner.set_style(style);
    }
    spinner
}

/// Loads and normalizes the billing detail CSV: resolves column aliases,
/// forward-fills merged-cell identifier columns, coerces numerics, and
/// quarantines rows missing required keys.
pub fn load_detail_rows(input_path: &Path) -> Result<NormalizeOutcome> {
    let file = File::open(input_path)
        .with_context(|| format!("Failed opening input CSV {}", input_path.display()))?;
    let reader = csv::Reader::from_reader(file);
    normalize_records(reader)
        .with_context(|| format!("Failed normalizing {}", input_path.display()))
}

pub fn normalize_records<R: Read>(mut reader: csv::Reader<R>) -> Result<NormalizeOutcome> {
    let headers = reader.headers().context("Failed reading CSV header")?;
    let columns = ColumnMap::from_headers(headers);
    let synthesized_columns = columns.synthesized.clone();

    // Carried values for merged-cell forward-fill. Must be applied before
    // any grouping, or rows land on the wrong invoice.
    let mut carry_year = String::new();
    let mut carry_week = String::new();
    let mut carry_payer = String::new();
    let mut carry_group = String::new();
    let mut carry_group2 = String::new();
    let mut carry_invoice = String::new();

    let mut rows = Vec::new();
    let mut rejected = Vec::new();
    let mut total_rows_removed = 0usize;
    let mut rows_read = 0usize;

    let spinner = progress_spinner();

    for result in reader.records() {
        let record = result.context("Failed reading CSV record")?;
        rows_read += 1;
        spinner.inc(1);
        let line = record.position().map(|p| p.line()).unwrap_or(rows_read as u64);

        if REQUIRED_KEY_COLUMNS
            .iter()
            .copied()
            .chain([COL_YEAR, COL_WEEK])
            .any(|col| is_total_marker(columns.field(&record, col)))
        {
            total_rows_removed += 1;
            continue;
        }

        let fill = |raw: &str, carry: &mut String| -> String {
            if raw.is_empty() {
                carry.clone()
            } else {
                *carry = raw.to_string();
                raw.to_string()
            }
        };

        let year_raw = fill(columns.field(&record, COL_YEAR), &mut carry_year);
        let week_raw = fill(columns.field(&record, COL_WEEK), &mut carry_week);
        let payer = fill(columns.field(&record, COL_PAYER), &mut carry_payer);
        let group_em = fill(columns.field(&record, COL_GROUP_EM), &mut carry_group);
        let group_em2 = fill(columns.field(&record, COL_GROUP_EM2), &mut carry_group2);
        let invoice_number = fill(columns.field(&record, COL_INVOICE_NUMBER), &mut carry_invoice);
        let cpt_code = columns.field(&record, COL_CPT_CODE).to_string();

        let missing_key = [
            (COL_PAYER, payer.as_str()),
            (COL_GROUP_EM, group_em.as_str()),
            (COL_GROUP_EM2, group_em2.as_str()),
            (COL_INVOICE_NUMBER, invoice_number.as_str()),
            (COL_CPT_CODE, cpt_code.as_str()),
        ]
        .iter()
        .find(|(_, value)| value.is_empty())
        .map(|(col, _)| *col);

        if let Some(col) = missing_key {
            rejected.push(RejectedRow {
                line,
                reason: format!("missing required field: {col}"),
                invoice_number,
                payer,
                group_em,
                group_em2,
                cpt_code,
            });
            continue;
        }

        let charge_amount = parse_number(columns.field(&record, COL_CHARGE_AMOUNT));
        let payment_amount = parse_number(columns.field(&record, COL_PAYMENT_AMOUNT));
        let charge_billed_balance = parse_number(columns.field(&record, COL_CHARGE_BILLED_BALANCE));
        let fee_schedule_expected_amount =
            parse_number(columns.field(&record, COL_FEE_SCHEDULE_EXPECTED));
        let mut expected_amount_85_em = parse_number(columns.field(&record, COL_EXPECTED_85_EM));
        let mut payment_per_visit = parse_number(columns.field(&record, COL_PAYMENT_PER_VISIT));
        let mut collection_rate = parse_number(columns.field(&record, COL_COLLECTION_RATE));
        let mut zero_balance_collection_rate =
            parse_number(columns.field(&record, COL_ZB_COLLECTION_RATE));
        let denial_pct = parse_number(columns.field(&record, COL_DENIAL_PCT));
        let open_invoice_count = parse_number(columns.field(&record, COL_OPEN_INVOICE_COUNT));

        // The E/M benchmark is defined as a fixed share of the fee
        // schedule; reconstruct it when the export omits the column.
        if expected_amount_85_em.is_none() {
            expected_amount_85_em = fee_schedule_expected_amount.map(|f| f * EM_FEE_SCHEDULE_SHARE);
        }

        // A fully unpaid line has real zero rates, not missing ones.
        if payment_amount == Some(0.0) {
            payment_per_visit = Some(0.0);
            collection_rate = Some(0.0);
            zero_balance_collection_rate = Some(0.0);
        }

        let remaining_charges_pct = match (charge_billed_balance, charge_amount) {
            (Some(balance), Some(charge)) if charge != 0.0 => Some(balance / charge),
            _ => None,
        };
        let nrv_gap_dollar = match (charge_billed_balance, payment_amount) {
            (Some(balance), Some(payment)) => Some(balance - payment),
            _ => None,
        };
        let nrv_gap_pct = match (nrv_gap_dollar, charge_billed_balance) {
            (Some(gap), Some(balance)) if balance != 0.0 => Some(gap / balance),
            _ => None,
        };

        rows.push(DetailRow {
            year: parse_year(&year_raw).unwrap_or(0),
            week: parse_week(&week_raw).unwrap_or(0),
            payer,
            group_em,
            group_em2,
            invoice_number,
            cpt_code,
            charge_amount,
            payment_amount,
            charge_billed_balance,
            expected_amount_85_em,
            fee_schedule_expected_amount,
            payment_per_visit,
            collection_rate,
            zero_balance_collection_rate,
            denial_pct,
            open_invoice_count,
            remaining_charges_pct,
            nrv_gap_dollar,
            nrv_gap_pct,
        });
    }
    spinner.finish_and_clear();

    Ok(NormalizeOutcome {
        rows,
        rejected,
        total_rows_removed,
        synthesized_columns,
        rows_read,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_from(csv_text: &str) -> NormalizeOutcome {
        let reader = csv::Reader::from_reader(csv_text.as_bytes());
        normalize_records(reader).expect("normalize")
    }

    #[test]
    fn parses_percent_and_formatted_numbers() {
        assert_eq!(parse_number("12.5%"), Some(0.125));
        assert_eq!(parse_number("1,234.50"), Some(1234.5));
        assert_eq!(parse_number("$250"), Some(250.0));
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_number("garbage"), None);
    }

    #[test]
    fn parses_week_and_year_artifacts() {
        assert_eq!(parse_week("W23"), Some(23));
        assert_eq!(parse_week("Week 7"), Some(7));
        assert_eq!(parse_week(""), None);
        assert_eq!(parse_year("2024.0"), Some(2024));
        assert_eq!(parse_year("2024"), Some(2024));
    }

    #[test]
    fn forward_fills_merged_cell_identifiers() {
        let csv_text = "\
Year,Week,Payer,Group_EM,Group_EM2,Charge Invoice Number,Charge CPT Code,Charge Amount,Payment Amount*
2024,W10,Aetna,New E/M Code,Layer2,INV-1,99213,100,80
,,,,,,71045,50,40
2024,W10,Cigna,New E/M Code,Layer2,INV-2,99214,120,90
";
        let outcome = outcome_from(csv_text);
        assert_eq!(outcome.rows.len(), 3);
        let second = &outcome.rows[1];
        assert_eq!(second.invoice_number, "INV-1");
        assert_eq!(second.payer, "Aetna");
        assert_eq!(second.year, 2024);
        assert_eq!(second.week, 10);
        assert_eq!(outcome.rows[2].invoice_number, "INV-2");
    }

    #[test]
    fn quarantines_rows_missing_required_keys() {
        let csv_text = "\
Year,Week,Payer,Group_EM,Group_EM2,Charge Invoice Number,Charge CPT Code,Charge Amount,Payment Amount*
2024,W10,Aetna,New E/M Code,Layer2,INV-1,99213,100,80
2024,W10,,New E/M Code,Layer2,INV-2,,100,80
";
        let outcome = outcome_from(csv_text);
        // Payer forward-fills from the prior row; the blank CPT code is
        // what quarantines the second row.
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
        assert!(outcome.rejected[0].reason.contains("Charge CPT Code"));
    }

    #[test]
    fn removes_total_summary_rows() {
        let csv_text = "\
Year,Week,Payer,Group_EM,Group_EM2,Charge Invoice Number,Charge CPT Code,Charge Amount,Payment Amount*
2024,W10,Aetna,New E/M Code,Layer2,INV-1,99213,100,80
Grand Total,0,,,,,,370,290
";
        let outcome = outcome_from(csv_text);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.total_rows_removed, 1);
    }

    #[test]
    fn zero_payment_rows_get_zero_rates_not_missing() {
        let csv_text = "\
Year,Week,Payer,Group_EM,Group_EM2,Charge Invoice Number,Charge CPT Code,Charge Amount,Payment Amount*,Collection Rate*
2024,W10,Aetna,New E/M Code,Layer2,INV-1,99213,100,0,
";
        let outcome = outcome_from(csv_text);
        let row = &outcome.rows[0];
        assert_eq!(row.payment_amount, Some(0.0));
        assert_eq!(row.collection_rate, Some(0.0));
        assert_eq!(row.zero_balance_collection_rate, Some(0.0));
    }

    #[test]
    fn zero_charge_leaves_ratio_missing_not_error() {
        let csv_text = "\
Year,Week,Payer,Group_EM,Group_EM2,Charge Invoice Number,Charge CPT Code,Charge Amount,Payment Amount*,Charge Billed Balance
2024,W10,Aetna,New E/M Code,Layer2,INV-1,99213,0,80,20
";
        let outcome = outcome_from(csv_text);
        let row = &outcome.rows[0];
        assert_eq!(row.remaining_charges_pct, None);
        assert_eq!(row.nrv_gap_dollar, Some(-60.0));
    }

    #[test]
    fn reconstructs_expected_amount_from_fee_schedule() {
        let csv_text = "\
Year,Week,Payer,Group_EM,Group_EM2,Charge Invoice Number,Charge CPT Code,Charge Amount,Payment Amount*,Fee Schedule Expected Amount
2024,W10,Aetna,New E/M Code,Layer2,INV-1,99213,100,80,200
";
        let outcome = outcome_from(csv_text);
        assert!(
            outcome
                .synthesized_columns
                .contains(&"Expected Amount (85% E/M)".to_string())
        );
        assert_eq!(outcome.rows[0].expected_amount_85_em, Some(170.0));
    }
}
