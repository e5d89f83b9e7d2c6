use std::collections::{BTreeSet, HashMap};

use crate::constants::KEY_DELIMITER;
use crate::schema::DetailRow;

/// Composite grouping identity for a cohort of statistically similar
/// invoices: payer, procedure group, subgroup, and the sorted set of
/// procedure codes billed together on the invoice. The canonical string
/// form is computed once at construction and is presentation-only; it is
/// never parsed back into fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BenchmarkKey {
    payer: String,
    group_em: String,
    group_em2: String,
    codes: Vec<String>,
    canonical: String,
}

impl BenchmarkKey {
    pub fn new(
        payer: &str,
        group_em: &str,
        group_em2: &str,
        codes: impl IntoIterator<Item = String>,
    ) -> Self {
        let codes: Vec<String> = codes.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let canonical = format!(
            "{payer}{d}{group_em}{d}{group_em2}{d}{list}",
            d = KEY_DELIMITER,
            list = render_code_list(&codes),
        );
        Self {
            payer: payer.to_string(),
            group_em: group_em.to_string(),
            group_em2: group_em2.to_string(),
            codes,
            canonical,
        }
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Invoice-scoped key variant, binding one invoice to its cohort.
    pub fn invoice_scoped(&self, invoice_number: &str) -> String {
        format!("{invoice_number}{}{}", KEY_DELIMITER, self.canonical)
    }

    pub fn payer(&self) -> &str {
        &self.payer
    }

    pub fn group_em(&self) -> &str {
        &self.group_em
    }

    pub fn group_em2(&self) -> &str {
        &self.group_em2
    }

    /// Number of distinct procedure codes on the invoice cohort.
    pub fn cpt_count(&self) -> usize {
        self.codes.len()
    }
}

/// Renders the code set the way the historical exports did:
/// `['71045', '99213']` (single quotes, comma-space). Dashboard
/// consumers match on this exact form.
fn render_code_list(codes: &[String]) -> String {
    let mut out = String::from("[");
    for (idx, code) in codes.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        out.push('\'');
        out.push_str(code);
        out.push('\'');
    }
    out.push(']');
    out
}

/// A normalized detail row bound to its invoice's benchmark key.
#[derive(Debug, Clone)]
pub struct KeyedRow {
    pub detail: DetailRow,
    pub key: BenchmarkKey,
    pub invoice_key: String,
}

/// Collects the full procedure-code set per invoice, then binds every
/// row to the key built from its invoice's codes. The key depends only
/// on the invoice-level code set, so it is stable under any row order.
pub fn assign_benchmark_keys(rows: Vec<DetailRow>) -> Vec<KeyedRow> {
    let mut codes_by_invoice: HashMap<String, BTreeSet<String>> = HashMap::new();
    for row in &rows {
        codes_by_invoice
            .entry(row.invoice_number.clone())
            .or_default()
            .insert(row.cpt_code.clone());
    }

    rows.into_iter()
        .map(|detail| {
            let codes = codes_by_invoice
                .get(&detail.invoice_number)
                .map(|set| set.iter().cloned().collect::<Vec<_>>())
                .unwrap_or_default();
            let key = BenchmarkKey::new(&detail.payer, &detail.group_em, &detail.group_em2, codes);
            let invoice_key = key.invoice_scoped(&detail.invoice_number);
            KeyedRow {
                detail,
                key,
                invoice_key,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(invoice: &str, cpt: &str) -> DetailRow {
        DetailRow {
            year: 2024,
            week: 10,
            payer: "Aetna".to_string(),
            group_em: "New E/M Code".to_string(),
            group_em2: "Layer2".to_string(),
            invoice_number: invoice.to_string(),
            cpt_code: cpt.to_string(),
            charge_amount: Some(100.0),
            payment_amount: Some(80.0),
            charge_billed_balance: None,
            expected_amount_85_em: None,
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
    fn canonical_form_matches_published_format() {
        let key = BenchmarkKey::new(
            "Aetna",
            "New E/M Code",
            "Layer2",
            ["99213".to_string(), "71045".to_string()],
        );
        assert_eq!(
            key.canonical(),
            "Aetna|New E/M Code|Layer2|['71045', '99213']"
        );
        assert_eq!(key.cpt_count(), 2);
    }

    #[test]
    fn key_is_stable_under_row_order() {
        let forward = assign_benchmark_keys(vec![detail("INV-1", "99213"), detail("INV-1", "71045")]);
        let reversed =
            assign_benchmark_keys(vec![detail("INV-1", "71045"), detail("INV-1", "99213")]);
        assert_eq!(forward[0].key.canonical(), forward[1].key.canonical());
        assert_eq!(forward[0].key.canonical(), reversed[0].key.canonical());
    }

    #[test]
    fn duplicate_codes_collapse() {
        let key = BenchmarkKey::new(
            "Aetna",
            "New E/M Code",
            "Layer2",
            ["99213".to_string(), "99213".to_string()],
        );
        assert_eq!(key.canonical(), "Aetna|New E/M Code|Layer2|['99213']");
        assert_eq!(key.cpt_count(), 1);
    }

    #[test]
    fn codes_sort_lexicographically_as_strings() {
        let key = BenchmarkKey::new(
            "Aetna",
            "New E/M Code",
            "Layer2",
            ["9".to_string(), "10".to_string()],
        );
        // String sort, not numeric: "10" precedes "9".
        assert_eq!(key.canonical(), "Aetna|New E/M Code|Layer2|['10', '9']");
    }

    #[test]
    fn invoice_scoped_key_embeds_invoice_number() {
        let rows = assign_benchmark_keys(vec![detail("INV-7", "99213")]);
        assert_eq!(
            rows[0].invoice_key,
            "INV-7|Aetna|New E/M Code|Layer2|['99213']"
        );
    }
}
