use std::time::Duration;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    expenses::ExpenseStatus,
    jobs::{enqueue_job, JOB_ANALYZE_RECEIPT},
    models::{Expense, NewReceipt, Receipt},
    schema::{expenses, receipts},
    state::AppState,
    storage::{inline_content_disposition, sanitize_key_segment},
};

use super::{
    expenses::{ensure_can_view, load_item, to_receipt_summary, ReceiptSummary},
    upload::read_upload,
};

const SIGNED_URL_EXPIRY_SECONDS: u64 = 300;

#[derive(Serialize)]
pub struct SignedUrlResponse {
    pub url: String,
    pub expires_in: u64,
}

#[derive(Serialize)]
pub struct AnalysisQueued {
    pub receipt_id: Uuid,
    pub job_id: Uuid,
}

pub fn receipt_key(
    company_id: Uuid,
    expense_id: Uuid,
    receipt_id: Uuid,
    file_name: &str,
) -> String {
    format!(
        "{company_id}/{expense_id}/{receipt_id}-{}",
        sanitize_key_segment(file_name)
    )
}

pub async fn upload_receipt(
    State(state): State<AppState>,
    Path(expense_id): Path<Uuid>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ReceiptSummary>)> {
    let expense: Expense = {
        let mut conn = state.db()?;
        expenses::table.find(expense_id).first(&mut conn)?
    };
    user.require_company(expense.company_id)?;
    if expense.submitter_id != user.user_id {
        return Err(AppError::forbidden("only the submitter can attach receipts"));
    }
    let status: ExpenseStatus = expense.status.parse().map_err(AppError::internal)?;
    if !status.is_editable_by_owner() {
        return Err(AppError::conflict(format!(
            "receipts cannot be added to a {status} expense"
        )));
    }

    let upload = read_upload(multipart).await?;
    let receipt_id = Uuid::new_v4();
    let storage_key = receipt_key(expense.company_id, expense_id, receipt_id, &upload.file_name);
    let size_bytes = upload.bytes.len() as i64;

    state
        .buckets
        .receipts
        .put_object(
            &storage_key,
            upload.bytes,
            Some(upload.content_type.clone()),
            inline_content_disposition(&upload.file_name),
        )
        .await
        .map_err(|err| {
            error!(%expense_id, error = %err, "receipt upload failed");
            AppError::internal(format!("failed to store receipt: {err}"))
        })?;

    let new_receipt = NewReceipt {
        id: receipt_id,
        expense_id,
        company_id: expense.company_id,
        storage_key,
        file_name: upload.file_name,
        mime_type: upload.content_type,
        size_bytes,
        uploaded_by: user.user_id,
    };
    let mut conn = state.db()?;
    diesel::insert_into(receipts::table)
        .values(&new_receipt)
        .execute(&mut conn)?;
    let receipt: Receipt = receipts::table.find(receipt_id).first(&mut conn)?;

    info!(%expense_id, %receipt_id, size_bytes, "receipt uploaded");
    Ok((StatusCode::CREATED, Json(to_receipt_summary(receipt))))
}

pub async fn list_receipts(
    State(state): State<AppState>,
    Path(expense_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ReceiptSummary>>> {
    let mut conn = state.db()?;
    let item = load_item(&mut conn, expense_id)?;
    ensure_can_view(&user, &item)?;

    let rows: Vec<Receipt> = receipts::table
        .filter(receipts::expense_id.eq(expense_id))
        .order(receipts::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(to_receipt_summary).collect()))
}

pub async fn receipt_url(
    State(state): State<AppState>,
    Path(receipt_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<SignedUrlResponse>> {
    let receipt = load_visible_receipt(&state, &user, receipt_id)?;
    let url = state
        .buckets
        .receipts
        .presign_get_object(
            &receipt.storage_key,
            Duration::from_secs(SIGNED_URL_EXPIRY_SECONDS),
        )
        .await
        .map_err(|err| AppError::internal(format!("failed to sign receipt url: {err}")))?;

    Ok(Json(SignedUrlResponse {
        url,
        expires_in: SIGNED_URL_EXPIRY_SECONDS,
    }))
}

pub async fn request_analysis(
    State(state): State<AppState>,
    Path(receipt_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<(StatusCode, Json<AnalysisQueued>)> {
    if !state.analyzer.is_enabled() {
        return Err(AppError::unavailable("document intelligence is not configured"));
    }
    let receipt = load_visible_receipt(&state, &user, receipt_id)?;

    let mut conn = state.db()?;
    let job = enqueue_job(
        &mut conn,
        JOB_ANALYZE_RECEIPT,
        json!({ "receipt_id": receipt.id }),
        None,
    )
    .map_err(|err| AppError::internal(format!("failed to enqueue analyze job: {err}")))?;

    info!(%receipt_id, job_id = %job.id, "receipt analysis queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(AnalysisQueued {
            receipt_id,
            job_id: job.id,
        }),
    ))
}

pub(crate) fn load_visible_receipt(
    state: &AppState,
    user: &AuthenticatedUser,
    receipt_id: Uuid,
) -> AppResult<Receipt> {
    let mut conn = state.db()?;
    let receipt: Receipt = receipts::table.find(receipt_id).first(&mut conn)?;
    let item = load_item(&mut conn, receipt.expense_id)?;
    ensure_can_view(user, &item)?;
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::receipt_key;
    use uuid::Uuid;

    #[test]
    fn receipt_keys_are_scoped_by_company_and_expense() {
        let key = receipt_key(Uuid::nil(), Uuid::nil(), Uuid::nil(), "Hotel bill.pdf");
        assert_eq!(
            key,
            "00000000-0000-0000-0000-000000000000/00000000-0000-0000-0000-000000000000/00000000-0000-0000-0000-000000000000-Hotel_bill.pdf"
        );
    }
}
