use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    expenses::{
        normalize_currency, to_iso, workflow, AssignmentOutcome, AssignmentRequest, BulkOutcome,
        CacheKey, ExpenseListItem, ExpenseStatus, InboxQuery, InboxSelection, ListScope,
        ReviewDecision,
    },
    models::{Expense, ExpenseLineItem, NewExpense, NewExpenseLineItem, Receipt},
    schema::{expense_categories, expense_line_items, expenses, gl_accounts, profiles, receipts},
    state::AppState,
    utils::json::{nullable_text_change, nullable_uuid_change},
};

#[derive(Debug, Default, Deserialize)]
pub struct ExpenseListParams {
    #[serde(flatten)]
    pub filter: InboxQuery,
    pub expanded: Option<String>,
    pub mine: Option<String>,
}

#[derive(Serialize)]
pub struct ExpenseListResponse {
    pub items: Vec<ExpenseListItem>,
    pub total: usize,
    pub tab_counts: BTreeMap<&'static str, usize>,
    pub expanded: Option<ExpenseDetail>,
}

#[derive(Serialize)]
pub struct LineItemResponse {
    pub id: Uuid,
    pub position: i32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Clone, Serialize)]
pub struct ReceiptSummary {
    pub id: Uuid,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub ai_classification: Option<String>,
    pub analyzed: bool,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ExpenseDetail {
    #[serde(flatten)]
    pub expense: ExpenseListItem,
    pub line_items: Vec<LineItemResponse>,
    pub receipts: Vec<ReceiptSummary>,
    pub active_receipt: Option<ReceiptSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItemInput {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Deserialize)]
pub struct CreateExpenseRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    pub expense_date: NaiveDate,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub gl_account_id: Option<Uuid>,
    #[serde(default)]
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItemInput>,
    #[serde(default)]
    pub submit: bool,
}

#[derive(Deserialize)]
struct UpdateExpenseFields {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    expense_date: Option<NaiveDate>,
    #[serde(default)]
    line_items: Option<Vec<LineItemInput>>,
    #[serde(default)]
    submit: bool,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = expenses)]
struct ExpenseChangeset<'a> {
    title: Option<&'a str>,
    description: Option<Option<&'a str>>,
    amount: Option<Decimal>,
    currency: Option<&'a str>,
    expense_date: Option<NaiveDate>,
    category_id: Option<Option<Uuid>>,
    gl_account_id: Option<Option<Uuid>>,
    vendor_name: Option<Option<&'a str>>,
    status: Option<&'a str>,
    submitted_at: Option<Option<NaiveDateTime>>,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct BulkStatusRequest {
    pub expense_ids: Vec<Uuid>,
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub filter: Option<InboxQuery>,
}

#[derive(Deserialize)]
pub struct AssignmentBody {
    pub assignee_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

pub async fn list_expenses(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ExpenseListParams>,
) -> AppResult<Json<ExpenseListResponse>> {
    let ExpenseListParams {
        filter,
        expanded,
        mine,
    } = params;
    let filter = filter.into_filter().map_err(AppError::bad_request)?;
    let expanded = parse_optional_uuid("expanded", expanded)?;
    let key = CacheKey::new(user.company_id, list_scope(&user, is_flag_set(mine)));

    let items = cached_list(&state, key).await?;
    let visible = filter.apply(&items);

    let mut selection = InboxSelection::default();
    if let Some(id) = expanded {
        selection.toggle_expanded(id);
    }
    selection.retain_visible(&visible);

    let expanded = match selection.expanded() {
        Some(id) => {
            let item = visible
                .iter()
                .find(|item| item.id == id)
                .map(|item| (*item).clone())
                .ok_or_else(AppError::not_found)?;
            let mut conn = state.db()?;
            Some(load_detail(&mut conn, item)?)
        }
        None => None,
    };

    Ok(Json(ExpenseListResponse {
        total: visible.len(),
        tab_counts: filter.tab_counts(&items),
        items: visible.into_iter().cloned().collect(),
        expanded,
    }))
}

pub async fn get_expense(
    State(state): State<AppState>,
    Path(expense_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<ExpenseDetail>> {
    let mut conn = state.db()?;
    let item = load_item(&mut conn, expense_id)?;
    ensure_can_view(&user, &item)?;
    Ok(Json(load_detail(&mut conn, item)?))
}

pub async fn create_expense(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateExpenseRequest>,
) -> AppResult<(StatusCode, Json<ExpenseDetail>)> {
    let title = required_text("title", &payload.title)?;
    let currency = normalize_currency(payload.currency.as_deref()).map_err(AppError::bad_request)?;
    let expense_id = Uuid::new_v4();
    let line_items = build_line_items(expense_id, &currency, &payload.line_items)?;
    let amount = resolve_amount(payload.amount, &line_items)?
        .ok_or_else(|| AppError::bad_request("amount or line items are required"))?;

    let now = Utc::now().naive_utc();
    let status = if payload.submit {
        ExpenseStatus::Submitted
    } else {
        ExpenseStatus::Draft
    };
    let new_expense = NewExpense {
        id: expense_id,
        company_id: user.company_id,
        submitter_id: user.user_id,
        title,
        description: trimmed(payload.description),
        amount,
        currency,
        expense_date: payload.expense_date,
        category_id: payload.category_id,
        gl_account_id: payload.gl_account_id,
        vendor_name: trimmed(payload.vendor_name),
        status: status.as_str().to_string(),
        assigned_by: None,
        assignment_due_date: None,
        assignment_message: None,
        submitted_at: payload.submit.then_some(now),
    };

    let mut conn = state.db()?;
    ensure_references(
        &mut conn,
        user.company_id,
        payload.category_id,
        payload.gl_account_id,
    )?;
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(expenses::table)
            .values(&new_expense)
            .execute(conn)?;
        if !line_items.is_empty() {
            diesel::insert_into(expense_line_items::table)
                .values(&line_items)
                .execute(conn)?;
        }
        Ok(())
    })?;

    let item = load_item(&mut conn, expense_id)?;
    let detail = load_detail(&mut conn, item)?;
    drop(conn);
    state.cache().invalidate_company(user.company_id).await;

    info!(%expense_id, status = %status, line_items = line_items.len(), "expense created");
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn update_expense(
    State(state): State<AppState>,
    Path(expense_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<ExpenseDetail>> {
    let fields: UpdateExpenseFields =
        serde_json::from_value(body.clone()).map_err(|err| AppError::bad_request(err.to_string()))?;
    let description = nullable_text_change(&body, "description").map_err(AppError::bad_request)?;
    let vendor_name = nullable_text_change(&body, "vendor_name").map_err(AppError::bad_request)?;
    let category_id = nullable_uuid_change(&body, "category_id").map_err(AppError::bad_request)?;
    let gl_account_id =
        nullable_uuid_change(&body, "gl_account_id").map_err(AppError::bad_request)?;

    let mut conn = state.db()?;
    let existing: Expense = expenses::table.find(expense_id).first(&mut conn)?;
    user.require_company(existing.company_id)?;
    if existing.submitter_id != user.user_id {
        return Err(AppError::forbidden("only the submitter can edit this expense"));
    }
    let current: ExpenseStatus = existing.status.parse().map_err(AppError::internal)?;
    if !current.is_editable_by_owner() {
        return Err(AppError::conflict(format!(
            "expense in status {current} can no longer be edited"
        )));
    }
    if fields.submit && !current.owner_can_move_to(ExpenseStatus::Submitted) {
        return Err(AppError::conflict(format!(
            "expense in status {current} cannot be submitted"
        )));
    }

    let title = fields
        .title
        .as_deref()
        .map(|title| required_text("title", title))
        .transpose()?;
    let currency = match fields.currency.as_deref() {
        Some(raw) => normalize_currency(Some(raw)).map_err(AppError::bad_request)?,
        None => existing.currency.clone(),
    };
    let line_items = fields
        .line_items
        .as_ref()
        .map(|inputs| build_line_items(expense_id, &currency, inputs))
        .transpose()?;
    let amount = match &line_items {
        Some(items) => resolve_amount(fields.amount, items)?,
        None => resolve_amount(fields.amount, &[])?,
    };
    ensure_references(
        &mut conn,
        existing.company_id,
        category_id.flatten(),
        gl_account_id.flatten(),
    )?;

    let now = Utc::now().naive_utc();
    let changeset = ExpenseChangeset {
        title: title.as_deref(),
        description: description.as_ref().map(|value| value.as_deref()),
        amount,
        currency: fields.currency.is_some().then_some(currency.as_str()),
        expense_date: fields.expense_date,
        category_id,
        gl_account_id,
        vendor_name: vendor_name.as_ref().map(|value| value.as_deref()),
        status: fields
            .submit
            .then_some(ExpenseStatus::Submitted.as_str()),
        submitted_at: fields.submit.then_some(Some(now)),
    };

    // Guarded on the status checked above so a concurrent review wins.
    conn.transaction::<_, AppError, _>(|conn| {
        let updated = diesel::update(
            expenses::table
                .find(expense_id)
                .filter(expenses::status.eq(&existing.status)),
        )
        .set((&changeset, expenses::updated_at.eq(now)))
        .execute(conn)?;
        if updated == 0 {
            return Err(AppError::conflict("expense changed status while it was being edited"));
        }
        if let Some(items) = &line_items {
            diesel::delete(
                expense_line_items::table.filter(expense_line_items::expense_id.eq(expense_id)),
            )
            .execute(conn)?;
            if !items.is_empty() {
                diesel::insert_into(expense_line_items::table)
                    .values(items)
                    .execute(conn)?;
            }
        }
        Ok(())
    })?;

    let item = load_item(&mut conn, expense_id)?;
    let detail = load_detail(&mut conn, item)?;
    drop(conn);
    state.cache().invalidate_company(existing.company_id).await;

    if fields.submit {
        info!(%expense_id, from = %current, "expense submitted");
    }
    Ok(Json(detail))
}

pub async fn delete_expense(
    State(state): State<AppState>,
    Path(expense_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let existing: Expense = expenses::table.find(expense_id).first(&mut conn)?;
    user.require_company(existing.company_id)?;
    if existing.submitter_id != user.user_id {
        return Err(AppError::forbidden("only the submitter can delete this expense"));
    }
    if existing.status != ExpenseStatus::Draft.as_str() {
        return Err(AppError::conflict("only draft expenses can be deleted"));
    }

    let receipt_keys: Vec<String> = receipts::table
        .filter(receipts::expense_id.eq(expense_id))
        .select(receipts::storage_key)
        .load(&mut conn)?;
    let deleted = diesel::delete(
        expenses::table
            .find(expense_id)
            .filter(expenses::status.eq(ExpenseStatus::Draft.as_str())),
    )
    .execute(&mut conn)?;
    drop(conn);
    if deleted == 0 {
        return Err(AppError::conflict("only draft expenses can be deleted"));
    }

    for key in receipt_keys {
        if let Err(err) = state.buckets.receipts.delete_object(&key).await {
            warn!(%expense_id, storage_key = %key, error = %err, "failed to delete receipt object");
        }
    }
    state.cache().invalidate_company(existing.company_id).await;
    info!(%expense_id, "draft expense deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(expense_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<StatusRequest>,
) -> AppResult<Json<ExpenseListItem>> {
    let decision = ReviewDecision::parse(&payload.status, payload.notes.as_deref())?;
    user.require_reviewer()?;
    state.review.review(&user, expense_id, &decision).await?;

    let mut conn = state.db()?;
    Ok(Json(load_item(&mut conn, expense_id)?))
}

pub async fn bulk_update_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<BulkStatusRequest>,
) -> AppResult<Json<BulkOutcome>> {
    let decision = ReviewDecision::parse(&payload.status, payload.notes.as_deref())?;
    user.require_reviewer()?;

    let mut selection = InboxSelection::from_ids(payload.expense_ids);
    if let Some(query) = payload.filter {
        let filter = query.into_filter().map_err(AppError::bad_request)?;
        let items = cached_list(&state, CacheKey::new(user.company_id, ListScope::Company)).await?;
        selection.retain_visible(&filter.apply(&items));
    }

    let outcome = state
        .review
        .bulk_review(&user, &selection.selected_ids(), &decision)
        .await?;
    Ok(Json(outcome))
}

pub async fn create_assignment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<AssignmentBody>,
) -> AppResult<(StatusCode, Json<AssignmentOutcome>)> {
    user.require_reviewer()?;
    let outcome = state
        .review
        .create_assignment(
            &user,
            AssignmentRequest {
                assignee_id: payload.assignee_id,
                title: payload.title,
                message: payload.message,
                due_date: payload.due_date,
            },
            workflow::today(),
            state.config.assignment_default_due_days,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

fn list_scope(user: &AuthenticatedUser, mine: bool) -> ListScope {
    if user.role.is_reviewer() && !mine {
        ListScope::Company
    } else {
        ListScope::Submitter(user.user_id)
    }
}

async fn cached_list(state: &AppState, key: CacheKey) -> AppResult<Arc<Vec<ExpenseListItem>>> {
    state
        .cache()
        .get_or_load(key, || async {
            let mut conn = state.db()?;
            load_expense_list(&mut conn, key)
        })
        .await
}

pub(crate) fn load_expense_list(
    conn: &mut PgConnection,
    key: CacheKey,
) -> AppResult<Vec<ExpenseListItem>> {
    let mut query = expenses::table
        .inner_join(profiles::table.on(profiles::id.eq(expenses::submitter_id)))
        .filter(expenses::company_id.eq(key.company_id))
        .select((expenses::all_columns, profiles::full_name))
        .order((expenses::expense_date.desc(), expenses::created_at.desc()))
        .into_boxed();
    if let ListScope::Submitter(submitter_id) = key.scope {
        query = query.filter(expenses::submitter_id.eq(submitter_id));
    }

    let rows: Vec<(Expense, String)> = query.load(conn)?;
    rows.into_iter()
        .map(|(expense, name)| ExpenseListItem::from_row(expense, name).map_err(AppError::internal))
        .collect()
}

pub(crate) fn load_item(conn: &mut PgConnection, expense_id: Uuid) -> AppResult<ExpenseListItem> {
    let (expense, name): (Expense, String) = expenses::table
        .inner_join(profiles::table.on(profiles::id.eq(expenses::submitter_id)))
        .filter(expenses::id.eq(expense_id))
        .select((expenses::all_columns, profiles::full_name))
        .first(conn)?;
    ExpenseListItem::from_row(expense, name).map_err(AppError::internal)
}

/// Submitters see their own expenses, reviewers the whole company.
pub(crate) fn ensure_can_view(user: &AuthenticatedUser, item: &ExpenseListItem) -> AppResult<()> {
    user.require_company(item.company_id)?;
    if item.submitter_id == user.user_id || user.role.is_reviewer() {
        Ok(())
    } else {
        Err(AppError::not_found())
    }
}

fn load_detail(conn: &mut PgConnection, item: ExpenseListItem) -> AppResult<ExpenseDetail> {
    let line_items: Vec<ExpenseLineItem> = expense_line_items::table
        .filter(expense_line_items::expense_id.eq(item.id))
        .order(expense_line_items::position.asc())
        .load(conn)?;
    let receipt_rows: Vec<Receipt> = receipts::table
        .filter(receipts::expense_id.eq(item.id))
        .order(receipts::created_at.desc())
        .load(conn)?;

    let receipts: Vec<ReceiptSummary> = receipt_rows.into_iter().map(to_receipt_summary).collect();
    let active_receipt = receipts.first().cloned();
    Ok(ExpenseDetail {
        expense: item,
        line_items: line_items
            .into_iter()
            .map(|line| LineItemResponse {
                id: line.id,
                position: line.position,
                description: line.description,
                quantity: line.quantity,
                unit_price: line.unit_price,
                amount: line.amount,
                currency: line.currency,
            })
            .collect(),
        receipts,
        active_receipt,
    })
}

pub(crate) fn to_receipt_summary(receipt: Receipt) -> ReceiptSummary {
    ReceiptSummary {
        id: receipt.id,
        file_name: receipt.file_name,
        mime_type: receipt.mime_type,
        size_bytes: receipt.size_bytes,
        ai_classification: receipt.ai_classification,
        analyzed: receipt.ai_extraction.is_some(),
        created_at: to_iso(receipt.created_at),
    }
}

/// Normalised line items numbered from 1. A missing amount is quantity times
/// unit price.
pub(crate) fn build_line_items(
    expense_id: Uuid,
    currency: &str,
    inputs: &[LineItemInput],
) -> AppResult<Vec<NewExpenseLineItem>> {
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let position = index as i32 + 1;
            let quantity = input.quantity.unwrap_or(Decimal::ONE);
            if quantity <= Decimal::ZERO {
                return Err(AppError::bad_request(format!(
                    "line item {position} quantity must be positive"
                )));
            }
            let (unit_price, amount) = match (input.unit_price, input.amount) {
                (Some(price), Some(amount)) => (price, amount),
                (Some(price), None) => (price, (price * quantity).round_dp(2)),
                (None, Some(amount)) => ((amount / quantity).round_dp(4), amount),
                (None, None) => (Decimal::ZERO, Decimal::ZERO),
            };
            if amount < Decimal::ZERO {
                return Err(AppError::bad_request(format!(
                    "line item {position} amount must not be negative"
                )));
            }
            Ok(NewExpenseLineItem {
                id: Uuid::new_v4(),
                expense_id,
                position,
                description: input
                    .description
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Item {position}")),
                quantity,
                unit_price,
                amount,
                currency: currency.to_string(),
            })
        })
        .collect()
}

/// The explicit amount, or else the sum of the line items when there are any.
pub(crate) fn resolve_amount(
    explicit: Option<Decimal>,
    line_items: &[NewExpenseLineItem],
) -> AppResult<Option<Decimal>> {
    match explicit {
        Some(amount) if amount < Decimal::ZERO => {
            Err(AppError::bad_request("amount must not be negative"))
        }
        Some(amount) => Ok(Some(amount.round_dp(2))),
        None if line_items.is_empty() => Ok(None),
        None => Ok(Some(line_items.iter().map(|line| line.amount).sum())),
    }
}

fn ensure_references(
    conn: &mut PgConnection,
    company_id: Uuid,
    category_id: Option<Uuid>,
    gl_account_id: Option<Uuid>,
) -> AppResult<()> {
    if let Some(category_id) = category_id {
        let found: Option<Uuid> = expense_categories::table
            .find(category_id)
            .filter(expense_categories::company_id.eq(company_id))
            .select(expense_categories::id)
            .first(conn)
            .optional()?;
        if found.is_none() {
            return Err(AppError::bad_request("unknown expense category"));
        }
    }
    if let Some(gl_account_id) = gl_account_id {
        let found: Option<Uuid> = gl_accounts::table
            .find(gl_account_id)
            .filter(gl_accounts::company_id.eq(company_id))
            .select(gl_accounts::id)
            .first(conn)
            .optional()?;
        if found.is_none() {
            return Err(AppError::bad_request("unknown GL account"));
        }
    }
    Ok(())
}

pub(crate) fn required_text(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn is_flag_set(value: Option<String>) -> bool {
    value
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn parse_optional_uuid(field: &str, value: Option<String>) -> AppResult<Option<Uuid>> {
    trimmed(value)
        .map(|raw| {
            Uuid::parse_str(&raw)
                .map_err(|_| AppError::bad_request(format!("{field} must be a valid UUID")))
        })
        .transpose()
}
