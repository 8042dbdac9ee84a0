use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use rust_decimal::{prelude::FromPrimitive, Decimal};
use serde::Deserialize;
use serde_json::Value;
use tokio::task;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    expenses::ExpenseStatus,
    extraction::invoice::{to_money, AnalyzedInvoice, InvoicePresentation},
    intelligence::{decode, AnalyzerError, DocumentModel},
    jobs::JOB_ANALYZE_RECEIPT,
    models::{Expense, Job, NewExpenseLineItem, Receipt},
    schema::{expense_line_items, expenses, receipts},
    state::AppState,
};

use super::{JobExecution, JobHandler};

const DEFAULT_CLASSIFICATION: &str = "receipt";

#[derive(Debug, Deserialize)]
struct AnalyzePayload {
    receipt_id: Uuid,
}

/// Runs document intelligence over an uploaded receipt and folds the result
/// back into the receipt row and its expense.
pub struct AnalyzeReceiptJob;

impl AnalyzeReceiptJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AnalyzeReceiptJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for AnalyzeReceiptJob {
    fn job_type(&self) -> &'static str {
        JOB_ANALYZE_RECEIPT
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: AnalyzePayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid analyze payload: {err}"),
                }
            }
        };
        let receipt_id = payload.receipt_id;

        let loader = state.clone();
        let loaded = task::spawn_blocking(move || load_receipt(&loader, receipt_id)).await;
        let (receipt, expense) = match loaded {
            Ok(Ok(Some(rows))) => rows,
            Ok(Ok(None)) => {
                return JobExecution::Failed {
                    error: format!("receipt {receipt_id} no longer exists"),
                }
            }
            Ok(Err(error)) => return retry(30, error),
            Err(join_err) => return retry(60, format!("worker panicked: {join_err}")),
        };

        let bytes = match state.buckets.receipts.get_object(&receipt.storage_key).await {
            Ok(bytes) => bytes,
            Err(err) => return retry(30, format!("failed to fetch receipt: {err}")),
        };

        let raw = match state
            .analyzer
            .analyze(DocumentModel::Receipt, bytes, &receipt.mime_type)
            .await
        {
            Ok(raw) => raw,
            Err(err) => return analyzer_failure(err),
        };
        let extracted_text = raw_string(&raw, "content");
        let classification =
            raw_string(&raw, "doc_type").unwrap_or_else(|| DEFAULT_CLASSIFICATION.to_string());
        let invoice: AnalyzedInvoice = match decode(raw) {
            Ok(invoice) => invoice,
            Err(err) => return analyzer_failure(err),
        };
        let extraction = match serde_json::to_value(&invoice) {
            Ok(value) => value,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("failed to serialize extraction: {err}"),
                }
            }
        };
        let outcome = ReceiptAnalysis {
            extraction,
            extracted_text,
            classification,
            presentation: invoice.present(),
        };

        let writer = state.clone();
        let company_id = expense.company_id;
        match task::spawn_blocking(move || store_analysis(&writer, &receipt, outcome))
            .await
        {
            Ok(Ok(line_items)) => {
                state.cache().invalidate_company(company_id).await;
                info!(%receipt_id, line_items, "receipt analyzed");
                JobExecution::Success
            }
            Ok(Err(error)) => retry(30, error),
            Err(join_err) => retry(60, format!("worker panicked: {join_err}")),
        }
    }
}

struct ReceiptAnalysis {
    extraction: Value,
    extracted_text: Option<String>,
    classification: String,
    presentation: InvoicePresentation,
}

fn retry(seconds: u64, error: String) -> JobExecution {
    JobExecution::Retry {
        delay: Duration::from_secs(seconds),
        error,
    }
}

fn analyzer_failure(err: AnalyzerError) -> JobExecution {
    if err.is_transient() {
        warn!(error = %err, "document analysis failed, retrying");
        retry(60, err.to_string())
    } else {
        JobExecution::Failed {
            error: err.to_string(),
        }
    }
}

fn raw_string(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .or_else(|| raw.get("document").and_then(|doc| doc.get(key)))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn load_receipt(state: &AppState, receipt_id: Uuid) -> Result<Option<(Receipt, Expense)>, String> {
    let mut conn = state.db().map_err(|err| err.to_string())?;
    let receipt: Option<Receipt> = receipts::table
        .find(receipt_id)
        .first(&mut conn)
        .optional()
        .map_err(|err| err.to_string())?;
    let Some(receipt) = receipt else {
        return Ok(None);
    };
    let expense: Option<Expense> = expenses::table
        .find(receipt.expense_id)
        .first(&mut conn)
        .optional()
        .map_err(|err| err.to_string())?;
    Ok(expense.map(|expense| (receipt, expense)))
}

/// Writes the extraction back. The expense is re-read under a row lock so a
/// review that lands during analysis is respected. Returns how many line
/// items were created.
fn store_analysis(
    state: &AppState,
    receipt: &Receipt,
    analysis: ReceiptAnalysis,
) -> Result<usize, String> {
    let mut conn = state.db().map_err(|err| err.to_string())?;

    conn.transaction::<usize, diesel::result::Error, _>(|conn| {
        let expense: Option<Expense> = expenses::table
            .find(receipt.expense_id)
            .for_update()
            .first(conn)
            .optional()?;
        let Some(expense) = expense else {
            return Ok(0);
        };
        let editable = expense
            .status
            .parse::<ExpenseStatus>()
            .map(|status| status.is_editable_by_owner())
            .unwrap_or(false);

        diesel::update(receipts::table.find(receipt.id))
            .set((
                receipts::ai_extraction.eq(Some(&analysis.extraction)),
                receipts::ai_extracted_text.eq(analysis.extracted_text.as_deref()),
                receipts::ai_classification.eq(Some(analysis.classification.as_str())),
            ))
            .execute(conn)?;

        if !editable {
            return Ok(0);
        }
        let presentation = &analysis.presentation;
        let vendor_name = match expense.vendor_name.as_deref().map(str::trim) {
            Some(existing) if !existing.is_empty() => None,
            _ => presentation.suggestion().vendor_name,
        };
        diesel::update(expenses::table.find(expense.id))
            .set((
                expenses::ai_confidence.eq(presentation.overall_confidence),
                expenses::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        if let Some(vendor_name) = vendor_name {
            diesel::update(expenses::table.find(expense.id))
                .set(expenses::vendor_name.eq(vendor_name))
                .execute(conn)?;
        }

        let existing: i64 = expense_line_items::table
            .filter(expense_line_items::expense_id.eq(expense.id))
            .count()
            .get_result(conn)?;
        if existing > 0 {
            return Ok(0);
        }
        let rows = extracted_line_items(&expense, presentation);
        if rows.is_empty() {
            return Ok(0);
        }
        diesel::insert_into(expense_line_items::table)
            .values(&rows)
            .execute(conn)
    })
    .map_err(|err| err.to_string())
}

fn extracted_line_items(
    expense: &Expense,
    presentation: &InvoicePresentation,
) -> Vec<NewExpenseLineItem> {
    presentation
        .line_items
        .iter()
        .map(|line| NewExpenseLineItem {
            id: Uuid::new_v4(),
            expense_id: expense.id,
            position: line.position as i32,
            description: line.description.clone(),
            quantity: Decimal::from_f64(line.quantity)
                .map(|qty| qty.round_dp(3))
                .unwrap_or(Decimal::ONE),
            unit_price: to_money(line.unit_price.unwrap_or(line.amount / line.quantity.max(1.0))),
            amount: to_money(line.amount),
            currency: expense.currency.clone(),
        })
        .collect()
}
