//! Expense review workflow: status machine, inbox derivation, list cache and
//! the status-transition procedure.

pub mod cache;
pub mod filter;
pub mod gateway;
pub mod status;
pub mod workflow;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Expense;

pub use cache::{CacheKey, ExpenseListCache, ListScope};
pub use filter::{InboxFilter, InboxQuery, InboxSelection, StatusTab, SubmitterFilter};
pub use gateway::{ExpenseGateway, GatewayError, PgExpenseGateway, StatusChange};
pub use status::{ExpenseStatus, ReviewAction};
pub use workflow::{
    AssignmentOutcome, AssignmentRequest, BulkOutcome, ReviewDecision, ReviewError, ReviewService,
};

pub const DEFAULT_CURRENCY: &str = "USD";

/// One row of an expense list as held in the list cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseListItem {
    pub id: Uuid,
    pub company_id: Uuid,
    pub submitter_id: Uuid,
    pub submitter_name: String,
    pub title: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub expense_date: NaiveDate,
    pub category_id: Option<Uuid>,
    pub gl_account_id: Option<Uuid>,
    pub vendor_name: Option<String>,
    pub status: ExpenseStatus,
    pub status_label: String,
    pub assigned_by: Option<Uuid>,
    pub assignment_due_date: Option<NaiveDate>,
    pub assignment_message: Option<String>,
    pub ai_confidence: Option<f64>,
    pub review_notes: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<String>,
    pub submitted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ExpenseListItem {
    pub fn from_row(expense: Expense, submitter_name: String) -> Result<Self, String> {
        let status: ExpenseStatus = expense.status.parse()?;
        Ok(Self {
            id: expense.id,
            company_id: expense.company_id,
            submitter_id: expense.submitter_id,
            submitter_name,
            title: expense.title,
            description: expense.description,
            amount: expense.amount,
            currency: expense.currency,
            expense_date: expense.expense_date,
            category_id: expense.category_id,
            gl_account_id: expense.gl_account_id,
            vendor_name: expense.vendor_name,
            status,
            status_label: status.label().to_string(),
            assigned_by: expense.assigned_by,
            assignment_due_date: expense.assignment_due_date,
            assignment_message: expense.assignment_message,
            ai_confidence: expense.ai_confidence,
            review_notes: expense.review_notes,
            reviewed_by: expense.reviewed_by,
            reviewed_at: expense.reviewed_at.map(to_iso),
            submitted_at: expense.submitted_at.map(to_iso),
            created_at: to_iso(expense.created_at),
            updated_at: to_iso(expense.updated_at),
        })
    }
}

pub fn to_iso(value: NaiveDateTime) -> String {
    value.and_utc().to_rfc3339()
}

/// Normalises a currency code to upper-case ISO form.
pub fn normalize_currency(raw: Option<&str>) -> Result<String, String> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(DEFAULT_CURRENCY.to_string());
    };
    if raw.len() != 3 || !raw.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(format!("currency '{raw}' must be a three letter ISO code"));
    }
    Ok(raw.to_ascii_uppercase())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::{ExpenseListItem, ExpenseStatus};

    pub fn item(status: ExpenseStatus, amount: i64) -> ExpenseListItem {
        ExpenseListItem {
            id: Uuid::new_v4(),
            company_id: Uuid::nil(),
            submitter_id: Uuid::nil(),
            submitter_name: "Sam Submitter".into(),
            title: "Team lunch".into(),
            description: None,
            amount: Decimal::new(amount, 0),
            currency: "USD".into(),
            expense_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            category_id: None,
            gl_account_id: None,
            vendor_name: None,
            status,
            status_label: status.label().into(),
            assigned_by: None,
            assignment_due_date: None,
            assignment_message: None,
            ai_confidence: None,
            review_notes: None,
            reviewed_by: None,
            reviewed_at: None,
            submitted_at: None,
            created_at: "2024-03-15T00:00:00+00:00".into(),
            updated_at: "2024-03-15T00:00:00+00:00".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_currency;

    #[test]
    fn currency_defaults_and_uppercases() {
        assert_eq!(normalize_currency(None).unwrap(), "USD");
        assert_eq!(normalize_currency(Some(" eur ")).unwrap(), "EUR");
        assert!(normalize_currency(Some("euro")).is_err());
        assert!(normalize_currency(Some("U$D")).is_err());
    }
}
