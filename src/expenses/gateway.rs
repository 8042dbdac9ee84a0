use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use thiserror::Error;
use tokio::task;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    db::PgPool,
    error::AppError,
    models::{Expense, NewExpense, NewNotification},
    schema::{expenses, notifications, profiles},
};

use super::ExpenseStatus;

pub const NOTIFICATION_STATUS_CHANGED: &str = "expense_status_changed";
pub const NOTIFICATION_ASSIGNMENT: &str = "expense_assignment";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("expense not found")]
    NotFound,
    #[error("{0}")]
    Forbidden(String),
    #[error("cannot move expense from {from} to {to}")]
    InvalidTransition {
        from: ExpenseStatus,
        to: ExpenseStatus,
    },
    #[error("stored expense is invalid: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Connection(String),
}

impl From<GatewayError> for AppError {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::NotFound => AppError::not_found(),
            GatewayError::Forbidden(message) => AppError::forbidden(message),
            GatewayError::InvalidTransition { .. } => AppError::conflict(value.to_string()),
            GatewayError::Database(err) => AppError::from(err),
            other => AppError::internal(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub expense_id: Uuid,
    pub new_status: ExpenseStatus,
    pub notes: Option<String>,
}

/// Writes that make up the review workflow.
///
/// `update_expense_status` is the only way a reviewer changes an expense's
/// status. It is atomic, enforces authorization and transitions, and notifies
/// the submitter. It returns the company of the changed row.
#[async_trait]
pub trait ExpenseGateway: Send + Sync + 'static {
    async fn update_expense_status(
        &self,
        actor: &AuthenticatedUser,
        change: StatusChange,
    ) -> Result<Uuid, GatewayError>;

    async fn insert_expense(&self, expense: NewExpense) -> Result<Uuid, GatewayError>;

    async fn insert_notification(&self, notification: NewNotification)
        -> Result<(), GatewayError>;

    async fn profile_company(&self, profile_id: Uuid) -> Result<Option<Uuid>, GatewayError>;
}

#[derive(Clone)]
pub struct PgExpenseGateway {
    pool: PgPool,
}

impl PgExpenseGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, GatewayError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| GatewayError::Connection(err.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| GatewayError::Connection(format!("database task failed: {err}")))?
    }
}

#[async_trait]
impl ExpenseGateway for PgExpenseGateway {
    async fn update_expense_status(
        &self,
        actor: &AuthenticatedUser,
        change: StatusChange,
    ) -> Result<Uuid, GatewayError> {
        let actor = actor.clone();
        self.with_conn(move |conn| update_expense_status(conn, &actor, &change))
            .await
    }

    async fn insert_expense(&self, expense: NewExpense) -> Result<Uuid, GatewayError> {
        self.with_conn(move |conn| {
            diesel::insert_into(expenses::table)
                .values(&expense)
                .execute(conn)?;
            Ok(expense.id)
        })
        .await
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> Result<(), GatewayError> {
        self.with_conn(move |conn| {
            diesel::insert_into(notifications::table)
                .values(&notification)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn profile_company(&self, profile_id: Uuid) -> Result<Option<Uuid>, GatewayError> {
        self.with_conn(move |conn| {
            let company = profiles::table
                .find(profile_id)
                .select(profiles::company_id)
                .first::<Uuid>(conn)
                .optional()?;
            Ok(company)
        })
        .await
    }
}

/// The status-transition procedure, run in a single transaction.
pub fn update_expense_status(
    conn: &mut PgConnection,
    actor: &AuthenticatedUser,
    change: &StatusChange,
) -> Result<Uuid, GatewayError> {
    conn.transaction(|conn| {
        let expense: Expense = expenses::table
            .find(change.expense_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(GatewayError::NotFound)?;

        if !actor.can_access_company(expense.company_id) {
            return Err(GatewayError::NotFound);
        }
        if !actor.role.is_reviewer() {
            return Err(GatewayError::Forbidden(
                "only reviewers can change an expense status".into(),
            ));
        }

        let current: ExpenseStatus = expense.status.parse().map_err(GatewayError::Corrupt)?;
        if !current.reviewer_can_move_to(change.new_status) {
            return Err(GatewayError::InvalidTransition {
                from: current,
                to: change.new_status,
            });
        }

        let now = Utc::now().naive_utc();
        diesel::update(expenses::table.find(expense.id))
            .set((
                expenses::status.eq(change.new_status.as_str()),
                expenses::review_notes.eq(change.notes.as_deref()),
                expenses::reviewed_by.eq(Some(actor.user_id)),
                expenses::reviewed_at.eq(Some(now)),
                expenses::updated_at.eq(now),
            ))
            .execute(conn)?;

        if expense.submitter_id != actor.user_id {
            let notification = NewNotification {
                id: Uuid::new_v4(),
                company_id: expense.company_id,
                recipient_id: expense.submitter_id,
                kind: NOTIFICATION_STATUS_CHANGED.to_string(),
                title: format!("Expense {}", change.new_status.label().to_lowercase()),
                message: status_message(&expense.title, change),
                expense_id: Some(expense.id),
            };
            diesel::insert_into(notifications::table)
                .values(&notification)
                .execute(conn)?;
        }

        Ok(expense.company_id)
    })
}

fn status_message(title: &str, change: &StatusChange) -> String {
    let headline = match change.new_status {
        ExpenseStatus::Approved => format!("\"{title}\" was approved."),
        ExpenseStatus::Rejected => format!("\"{title}\" was rejected."),
        ExpenseStatus::InfoRequested => format!("More information is needed for \"{title}\"."),
        other => format!("\"{title}\" is now {}.", other.label().to_lowercase()),
    };
    match change.notes.as_deref() {
        Some(notes) if !notes.is_empty() => format!("{headline} Note: {notes}"),
        _ => headline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_message_includes_note() {
        let change = StatusChange {
            expense_id: Uuid::nil(),
            new_status: ExpenseStatus::Rejected,
            notes: Some("Missing receipt".into()),
        };
        assert_eq!(
            status_message("Hotel", &change),
            "\"Hotel\" was rejected. Note: Missing receipt"
        );
    }

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let error: AppError = GatewayError::InvalidTransition {
            from: ExpenseStatus::Approved,
            to: ExpenseStatus::Rejected,
        }
        .into();
        assert_eq!(error.status(), axum::http::StatusCode::CONFLICT);
        assert_eq!(error.message(), "cannot move expense from approved to rejected");
    }
}
