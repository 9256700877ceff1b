// src/overtime.rs
//
// The overtime aggregation engine: deduplication, per-day bucketing,
// period grouping, and monetary valuation. Everything here is a pure
// transformation over already-fetched rows; retrieval lives in
// retrieval.rs and the HTTP surface in server.rs.

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

use crate::interval::parse_minutes;
use crate::rowstore::{EmployeeRow, OvertimeEventRow};

/// Directory entry for one employee, joined onto overtime rows by
/// registration. Supplied by the row store; never mutated here.
#[derive(Debug, Clone, PartialEq)]
pub struct EmployeeContext {
    pub name: Option<String>,
    pub sector: Option<String>,
    pub company: Option<String>,
    pub salary: Decimal,
}

impl From<&EmployeeRow> for EmployeeContext {
    fn from(row: &EmployeeRow) -> Self {
        Self {
            name: non_empty(row.name.as_deref()).map(str::to_string),
            sector: non_empty(row.sector.as_deref()).map(str::to_string),
            company: non_empty(row.company.as_deref()).map(str::to_string),
            salary: row
                .salary
                .and_then(Decimal::from_f64)
                .unwrap_or(Decimal::ZERO),
        }
    }
}

/// One overtime row with its interval columns resolved to minute buckets.
///
/// `hours60_minutes` may be negative on a day that only records offsets;
/// the sign is preserved here and only floored (if at all) at valuation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketedRecord {
    pub id: Option<String>,
    pub registration: String,
    pub date: NaiveDate,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub company: Option<String>,
    pub salary: Decimal,
    pub plus60_minutes: i64,
    pub minus60_minutes: i64,
    pub plus100_minutes: i64,
    pub hours60_minutes: i64,
    pub hours100_minutes: i64,
}

impl BucketedRecord {
    /// Buckets one raw row, joining identity fields from the employee
    /// directory. Denormalized columns on the row itself win over the
    /// directory when present and non-empty.
    ///
    /// Returns `None` when the row's date does not parse: such a row cannot
    /// participate in date-keyed grouping, so it is skipped with a warning
    /// rather than failing the whole view.
    pub fn from_row(
        row: &OvertimeEventRow,
        directory: &HashMap<String, EmployeeContext>,
    ) -> Option<Self> {
        let Ok(date) = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d") else {
            warn!(
                "Skipping overtime row (id={:?}, registration={}): unparseable date '{}'",
                row.id, row.registration, row.date
            );
            return None;
        };

        let plus60 = parse_minutes(row.hrs505.as_ref()) + parse_minutes(row.hrs506.as_ref());
        let minus60 = parse_minutes(row.hrs511.as_ref()) + parse_minutes(row.hrs512.as_ref());
        let plus100 = parse_minutes(row.hrs303.as_ref()) + parse_minutes(row.hrs304.as_ref());

        let context = directory.get(&row.registration);
        let name = non_empty(row.name.as_deref())
            .map(str::to_string)
            .or_else(|| context.and_then(|c| c.name.clone()));
        let sector = non_empty(row.sector.as_deref())
            .map(str::to_string)
            .or_else(|| context.and_then(|c| c.sector.clone()));
        let company = context.and_then(|c| c.company.clone());
        let salary = row
            .salary
            .and_then(Decimal::from_f64)
            .filter(|s| *s > Decimal::ZERO)
            .or_else(|| context.map(|c| c.salary).filter(|s| *s > Decimal::ZERO))
            .unwrap_or(Decimal::ZERO);

        Some(Self {
            id: row.id.clone(),
            registration: row.registration.clone(),
            date,
            name,
            sector,
            company,
            salary,
            plus60_minutes: plus60,
            minus60_minutes: minus60,
            plus100_minutes: plus100,
            hours60_minutes: plus60 - minus60,
            hours100_minutes: plus100,
        })
    }
}

/// Drops repeated rows, unique by `(id, date, registration)`. First
/// occurrence wins. A row with no id is still kept, keyed by its remaining
/// two fields; distinct id-less rows that share a date and registration
/// collapse into one, a known undercount in the historical data.
pub fn dedupe_rows(rows: Vec<OvertimeEventRow>) -> Vec<OvertimeEventRow> {
    let mut seen: HashSet<(Option<String>, String, String)> = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert((row.id.clone(), row.date.clone(), row.registration.clone())))
        .collect()
}

/// Employee-level summary of all contributing days in a date range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodAggregate {
    pub registration: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub company: Option<String>,
    pub salary: Decimal,
    pub min_date: NaiveDate,
    pub max_date: NaiveDate,
    pub plus60_minutes: i64,
    pub minus60_minutes: i64,
    pub plus100_minutes: i64,
    pub hours60_minutes: i64,
    pub hours100_minutes: i64,
}

impl PeriodAggregate {
    /// Label for the implied date range: `DD/MM` for a single day,
    /// `DD-DD/MM` inside one month, `DD/MM - DD/MM` across months.
    pub fn range_label(&self) -> String {
        if self.min_date == self.max_date {
            self.min_date.format("%d/%m").to_string()
        } else if self.min_date.month() == self.max_date.month()
            && self.min_date.year() == self.max_date.year()
        {
            format!(
                "{:02}-{:02}/{:02}",
                self.min_date.day(),
                self.max_date.day(),
                self.min_date.month()
            )
        } else {
            format!(
                "{} - {}",
                self.min_date.format("%d/%m"),
                self.max_date.format("%d/%m")
            )
        }
    }
}

/// Folds bucketed daily records into one aggregate per registration.
///
/// The 60% net is taken once over the summed plus/minus components. Summing
/// per-day net values instead would let an offset day recorded without its
/// counterpart shift the period figure, so that path is never used.
///
/// Identity fields follow the latest record (by the record's own date, with
/// id breaking date ties, never arrival order) that carries a non-empty
/// value; salary follows the latest non-zero value. Output order is numeric
/// by registration where both sides are all digits, lexicographic otherwise.
pub fn group_by_period(records: &[BucketedRecord]) -> Vec<PeriodAggregate> {
    let mut partitions: BTreeMap<&str, Vec<&BucketedRecord>> = BTreeMap::new();
    for record in records {
        partitions
            .entry(record.registration.as_str())
            .or_default()
            .push(record);
    }

    let mut aggregates = Vec::with_capacity(partitions.len());
    for (registration, mut members) in partitions {
        // Date ties break on id so identity resolution does not depend on
        // arrival order; same-date rows with distinct ids survive dedup.
        members.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

        let mut plus60 = 0i64;
        let mut minus60 = 0i64;
        let mut plus100 = 0i64;
        let mut min_date = members[0].date;
        let mut max_date = members[0].date;
        let mut name: Option<String> = None;
        let mut sector: Option<String> = None;
        let mut company: Option<String> = None;
        let mut salary = Decimal::ZERO;

        for record in &members {
            plus60 += record.plus60_minutes;
            minus60 += record.minus60_minutes;
            plus100 += record.plus100_minutes;
            min_date = min_date.min(record.date);
            max_date = max_date.max(record.date);
            if record.name.is_some() {
                name = record.name.clone();
            }
            if record.sector.is_some() {
                sector = record.sector.clone();
            }
            if record.company.is_some() {
                company = record.company.clone();
            }
            if record.salary > Decimal::ZERO {
                salary = record.salary;
            }
        }

        aggregates.push(PeriodAggregate {
            registration: registration.to_string(),
            name,
            sector,
            company,
            salary,
            min_date,
            max_date,
            plus60_minutes: plus60,
            minus60_minutes: minus60,
            plus100_minutes: plus100,
            hours60_minutes: plus60 - minus60,
            hours100_minutes: plus100,
        });
    }

    aggregates.sort_by(|a, b| registration_order(&a.registration, &b.registration));
    aggregates
}

/// Registrations sort numerically when both are all digits, otherwise as
/// plain strings.
pub fn registration_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// The premium multipliers and the monthly-hours divisor used to derive an
/// hourly rate from a monthly salary. Business conventions, not laws of
/// nature, so they are configuration (VALUATION_* env vars) rather than
/// literals in the arithmetic.
#[derive(Debug, Clone, Deserialize)]
pub struct ValuationRates {
    #[serde(default = "default_monthly_hours_divisor")]
    pub monthly_hours_divisor: Decimal,
    #[serde(default = "default_premium60")]
    pub premium60: Decimal,
    #[serde(default = "default_premium100")]
    pub premium100: Decimal,
}

fn default_monthly_hours_divisor() -> Decimal {
    dec!(220)
}

fn default_premium60() -> Decimal {
    dec!(1.6)
}

fn default_premium100() -> Decimal {
    dec!(2.0)
}

impl Default for ValuationRates {
    fn default() -> Self {
        Self {
            monthly_hours_divisor: default_monthly_hours_divisor(),
            premium60: default_premium60(),
            premium100: default_premium100(),
        }
    }
}

impl ValuationRates {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("VALUATION_").from_env()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Valuation {
    pub value60: Decimal,
    pub value100: Decimal,
}

/// Converts minute totals into currency value at the configured premiums,
/// rounded to cents.
///
/// Unless `allow_negative60` is set, a negative 60% total is floored at
/// zero before valuation. A non-positive salary values everything at zero;
/// there is no division by zero and no failure path.
pub fn valuate(
    minutes60: i64,
    minutes100: i64,
    monthly_salary: Decimal,
    allow_negative60: bool,
    rates: &ValuationRates,
) -> Valuation {
    if monthly_salary <= Decimal::ZERO {
        return Valuation {
            value60: Decimal::ZERO,
            value100: Decimal::ZERO,
        };
    }
    let hourly_rate = monthly_salary / rates.monthly_hours_divisor;
    let minutes60 = if allow_negative60 {
        minutes60
    } else {
        minutes60.max(0)
    };
    let value60 = Decimal::from(minutes60) / dec!(60) * hourly_rate * rates.premium60;
    let value100 = Decimal::from(minutes100) / dec!(60) * hourly_rate * rates.premium100;
    Valuation {
        value60: value60.round_dp(2),
        value100: value100.round_dp(2),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Daily,
    Period,
}

#[derive(Debug, Clone, Copy)]
pub struct ViewOptions {
    pub mode: ViewMode,
    pub allow_negative60: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewTotals {
    pub hours60_minutes: i64,
    pub hours100_minutes: i64,
    pub value60: Decimal,
    pub value100: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OvertimeView {
    pub daily: Vec<BucketedRecord>,
    pub grouped: Option<Vec<PeriodAggregate>>,
    pub totals: ViewTotals,
}

/// Computes the full overtime view for one request: dedupe, bucket, group
/// (in period mode), and total.
///
/// Totals always come from the ungrouped daily set, so they match the sum
/// of visible daily rows even when the display is period-grouped. Monetary
/// totals are the sum of per-row valuations, each row valued against its
/// own resolved salary.
pub fn compute_overtime_view(
    raw_rows: Vec<OvertimeEventRow>,
    directory: &HashMap<String, EmployeeContext>,
    options: &ViewOptions,
    rates: &ValuationRates,
) -> OvertimeView {
    let rows = dedupe_rows(raw_rows);

    let mut daily: Vec<BucketedRecord> = rows
        .iter()
        .filter_map(|row| BucketedRecord::from_row(row, directory))
        .collect();
    daily.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| registration_order(&a.registration, &b.registration))
    });

    let mut totals = ViewTotals {
        hours60_minutes: 0,
        hours100_minutes: 0,
        value60: Decimal::ZERO,
        value100: Decimal::ZERO,
    };
    for record in &daily {
        totals.hours60_minutes += record.hours60_minutes;
        totals.hours100_minutes += record.hours100_minutes;
        let valuation = valuate(
            record.hours60_minutes,
            record.hours100_minutes,
            record.salary,
            options.allow_negative60,
            rates,
        );
        totals.value60 += valuation.value60;
        totals.value100 += valuation.value100;
    }

    let grouped = match options.mode {
        ViewMode::Period => Some(group_by_period(&daily)),
        ViewMode::Daily => None,
    };

    OvertimeView {
        daily,
        grouped,
        totals,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
