use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    expenses::to_iso,
    models::Notification,
    schema::notifications,
    state::AppState,
};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub unread: Option<bool>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct NotificationView {
    pub id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub expense_id: Option<Uuid>,
    pub read: bool,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct NotificationList {
    pub items: Vec<NotificationView>,
    pub unread: i64,
}

#[derive(Serialize)]
pub struct MarkedRead {
    pub updated: usize,
}

impl From<Notification> for NotificationView {
    fn from(row: Notification) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            title: row.title,
            message: row.message,
            expense_id: row.expense_id,
            read: row.read_at.is_some(),
            created_at: to_iso(row.created_at),
        }
    }
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<NotificationQuery>,
) -> AppResult<Json<NotificationList>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let mut conn = state.db()?;

    let mut query = notifications::table
        .filter(notifications::recipient_id.eq(user.user_id))
        .into_boxed();
    if params.unread.unwrap_or(false) {
        query = query.filter(notifications::read_at.is_null());
    }
    let rows: Vec<Notification> = query
        .order(notifications::created_at.desc())
        .limit(limit)
        .load(&mut conn)?;

    let unread: i64 = notifications::table
        .filter(notifications::recipient_id.eq(user.user_id))
        .filter(notifications::read_at.is_null())
        .count()
        .get_result(&mut conn)?;

    Ok(Json(NotificationList {
        items: rows.into_iter().map(NotificationView::from).collect(),
        unread,
    }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let notification: Notification = notifications::table.find(notification_id).first(&mut conn)?;
    if notification.recipient_id != user.user_id {
        return Err(AppError::not_found());
    }
    if notification.read_at.is_none() {
        diesel::update(notifications::table.find(notification_id))
            .set(notifications::read_at.eq(Utc::now().naive_utc()))
            .execute(&mut conn)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MarkedRead>> {
    let mut conn = state.db()?;
    let updated = diesel::update(
        notifications::table
            .filter(notifications::recipient_id.eq(user.user_id))
            .filter(notifications::read_at.is_null()),
    )
    .set(notifications::read_at.eq(Utc::now().naive_utc()))
    .execute(&mut conn)?;
    Ok(Json(MarkedRead { updated }))
}
