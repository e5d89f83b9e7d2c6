use std::collections::HashMap;

/// Canonical column names used throughout the pipeline. Input files are
/// alias-tolerant; everything downstream of the normalizer sees only
/// these names.
pub const COL_YEAR: &str = "Year";
pub const COL_WEEK: &str = "Week";
pub const COL_PAYER: &str = "Payer";
pub const COL_GROUP_EM: &str = "Group_EM";
pub const COL_GROUP_EM2: &str = "Group_EM2";
pub const COL_INVOICE_NUMBER: &str = "Invoice_Number";
pub const COL_CPT_CODE: &str = "Charge CPT Code";
pub const COL_CHARGE_AMOUNT: &str = "Charge Amount";
pub const COL_PAYMENT_AMOUNT: &str = "Payment Amount*";
pub const COL_CHARGE_BILLED_BALANCE: &str = "Charge Billed Balance";
pub const COL_EXPECTED_85_EM: &str = "Expected Amount (85% E/M)";
pub const COL_FEE_SCHEDULE_EXPECTED: &str = "Fee Schedule Expected Amount";
pub const COL_PAYMENT_PER_VISIT: &str = "Payment per Visit";
pub const COL_COLLECTION_RATE: &str = "Collection Rate*";
pub const COL_ZB_COLLECTION_RATE: &str = "Zero Balance Collection Rate";
pub const COL_DENIAL_PCT: &str = "Denial %";
pub const COL_OPEN_INVOICE_COUNT: &str = "Open Invoice Count";

/// Columns the normalizer requires to identify a row. A row blank in any
/// of these after forward-fill is quarantined.
pub const REQUIRED_KEY_COLUMNS: [&str; 5] = [
    COL_PAYER,
    COL_GROUP_EM,
    COL_GROUP_EM2,
    COL_INVOICE_NUMBER,
    COL_CPT_CODE,
];

/// Every column the pipeline reads. Absent columns are synthesized with
/// type-appropriate defaults and reported.
pub const EXPECTED_COLUMNS: [&str; 17] = [
    COL_YEAR,
    COL_WEEK,
    COL_PAYER,
    COL_GROUP_EM,
    COL_GROUP_EM2,
    COL_INVOICE_NUMBER,
    COL_CPT_CODE,
    COL_CHARGE_AMOUNT,
    COL_PAYMENT_AMOUNT,
    COL_CHARGE_BILLED_BALANCE,
    COL_EXPECTED_85_EM,
    COL_FEE_SCHEDULE_EXPECTED,
    COL_PAYMENT_PER_VISIT,
    COL_COLLECTION_RATE,
    COL_ZB_COLLECTION_RATE,
    COL_DENIAL_PCT,
    COL_OPEN_INVOICE_COUNT,
];

/// Synonyms seen across historical source exports, mapped to their
/// canonical column names.
pub fn column_alias(header: &str) -> &str {
    match header.trim() {
        "Year of Visit Service Date" | "Service Year" | "Visit Year" => COL_YEAR,
        "ISO Week of Visit Service Date" | "Service Week" | "Visit Week" | "Week Number" => {
            COL_WEEK
        }
        "Primary Financial Class" | "Financial Class" | "Insurance Provider" | "Payer Type" => {
            COL_PAYER
        }
        "Chart E/M Code Grouping" | "E/M Code Group" | "Code Group" => COL_GROUP_EM,
        "Chart E/M Code Second Layer" | "E/M Code Subgroup" | "Code Subgroup" => COL_GROUP_EM2,
        "Charge Invoice Number" | "Invoice Number" => COL_INVOICE_NUMBER,
        "CPT Code" | "Procedure Code" => COL_CPT_CODE,
        "Payment Amount" | "Total Payments" | "Actual Payments" | "Collected Amount" => {
            COL_PAYMENT_AMOUNT
        }
        "Total Charges" | "Billed Amount" | "Gross Charges" => COL_CHARGE_AMOUNT,
        "Collection Rate" | "Collection Percentage" => COL_COLLECTION_RATE,
        "Denial Percent" => COL_DENIAL_PCT,
        other => other,
    }
}

/// Header layout of one input file: canonical column name -> position.
/// Columns absent from the header are listed in `synthesized` and read
/// back as blank for every row.
#[derive(Debug)]
pub struct ColumnMap {
    indexes: HashMap<String, usize>,
    pub synthesized: Vec<String>,
}

impl ColumnMap {
    pub fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut indexes: HashMap<String, usize> = HashMap::new();
        for (idx, header) in headers.iter().enumerate() {
            let canonical = column_alias(header);
            indexes.entry(canonical.to_string()).or_insert(idx);
        }
        let synthesized = EXPECTED_COLUMNS
            .iter()
            .filter(|col| !indexes.contains_key(**col))
            .map(|col| col.to_string())
            .collect();
        Self {
            indexes,
            synthesized,
        }
    }

    /// Field value for a canonical column, trimmed. Empty when the column
    /// was synthesized or the cell is blank.
    pub fn field<'a>(&self, record: &'a csv::StringRecord, column: &str) -> &'a str {
        self.indexes
            .get(column)
            .and_then(|idx| record.get(*idx))
            .map(str::trim)
            .unwrap_or("")
    }
}

/// One billed procedure line after normalization. Monetary and rate
/// fields are `None` when the source cell was blank or unparsable;
/// missing and zero are distinct states.
#[derive(Debug, Clone)]
pub struct DetailRow {
    pub year: i32,
    pub week: u32,
    pub payer: String,
    pub group_em: String,
    pub group_em2: String,
    pub invoice_number: String,
    pub cpt_code: String,
    pub charge_amount: Option<f64>,
    pub payment_amount: Option<f64>,
    pub charge_billed_balance: Option<f64>,
    pub expected_amount_85_em: Option<f64>,
    pub fee_schedule_expected_amount: Option<f64>,
    pub payment_per_visit: Option<f64>,
    pub collection_rate: Option<f64>,
    pub zero_balance_collection_rate: Option<f64>,
    pub denial_pct: Option<f64>,
    pub open_invoice_count: Option<f64>,
    /// Billed balance / charge amount; missing when charge is zero.
    pub remaining_charges_pct: Option<f64>,
    /// Billed balance minus payment.
    pub nrv_gap_dollar: Option<f64>,
    /// NRV gap / billed balance; missing when billed balance is zero.
    pub nrv_gap_pct: Option<f64>,
}
