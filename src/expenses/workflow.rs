use std::{collections::BTreeSet, sync::Arc};

use chrono::{Duration, NaiveDate, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::AppError,
    models::{NewExpense, NewNotification},
};

use super::{
    gateway::NOTIFICATION_ASSIGNMENT, ExpenseGateway, ExpenseListCache, ExpenseStatus,
    GatewayError, ReviewAction, StatusChange, DEFAULT_CURRENCY,
};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("reviewers can only approve, reject or request information, not '{0}'")]
    UnsupportedStatus(String),
    #[error("a note is required to {0}")]
    NoteRequired(&'static str),
    #[error("no expenses selected")]
    EmptySelection,
    #[error("{failed} of {total} expense updates failed")]
    PartialBatch { failed: usize, total: usize },
    #[error("assignee is not a member of this company")]
    UnknownAssignee,
    #[error("assignment title is required")]
    EmptyTitle,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl From<ReviewError> for AppError {
    fn from(value: ReviewError) -> Self {
        match value {
            ReviewError::PartialBatch { .. } => AppError::unprocessable(value.to_string()),
            ReviewError::UnknownAssignee => AppError::bad_request(value.to_string()),
            ReviewError::Gateway(err) => err.into(),
            other => AppError::bad_request(other.to_string()),
        }
    }
}

/// A validated reviewer decision, ready for the status procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDecision {
    pub action: ReviewAction,
    pub note: Option<String>,
}

impl ReviewDecision {
    pub fn parse(status: &str, note: Option<&str>) -> Result<Self, ReviewError> {
        let action = status
            .parse::<ExpenseStatus>()
            .ok()
            .and_then(ReviewAction::from_target)
            .ok_or_else(|| ReviewError::UnsupportedStatus(status.to_string()))?;
        let note = note
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        if action.requires_note() && note.is_none() {
            return Err(ReviewError::NoteRequired(action.verb()));
        }
        Ok(Self { action, note })
    }

    fn change_for(&self, expense_id: Uuid) -> StatusChange {
        StatusChange {
            expense_id,
            new_status: self.action.target_status(),
            notes: self.note.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentRequest {
    pub assignee_id: Uuid,
    pub title: String,
    pub message: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentOutcome {
    pub expense_id: Uuid,
    pub due_date: NaiveDate,
    pub notified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub updated: usize,
    pub total: usize,
}

#[derive(Clone)]
pub struct ReviewService {
    gateway: Arc<dyn ExpenseGateway>,
    cache: ExpenseListCache,
}

impl ReviewService {
    pub fn new(gateway: Arc<dyn ExpenseGateway>, cache: ExpenseListCache) -> Self {
        Self { gateway, cache }
    }

    pub fn cache(&self) -> &ExpenseListCache {
        &self.cache
    }

    pub async fn review(
        &self,
        actor: &AuthenticatedUser,
        expense_id: Uuid,
        decision: &ReviewDecision,
    ) -> Result<(), ReviewError> {
        let company_id = self
            .gateway
            .update_expense_status(actor, decision.change_for(expense_id))
            .await?;
        self.cache.invalidate_company(company_id).await;
        info!(
            %expense_id,
            status = %decision.action.target_status(),
            reviewer = %actor.user_id,
            "expense reviewed"
        );
        Ok(())
    }

    /// Applies one decision to many expenses. Calls run concurrently and are
    /// not atomic: successful updates stay applied when others fail.
    pub async fn bulk_review(
        &self,
        actor: &AuthenticatedUser,
        expense_ids: &[Uuid],
        decision: &ReviewDecision,
    ) -> Result<BulkOutcome, ReviewError> {
        let ids: Vec<Uuid> = expense_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Err(ReviewError::EmptySelection);
        }

        let calls = ids.iter().map(|id| {
            let change = decision.change_for(*id);
            let expense_id = change.expense_id;
            async move { (expense_id, self.gateway.update_expense_status(actor, change).await) }
        });
        let results = join_all(calls).await;

        let mut touched = BTreeSet::new();
        let mut failed = 0;
        for (expense_id, result) in results {
            match result {
                Ok(company_id) => {
                    touched.insert(company_id);
                }
                Err(err) => {
                    failed += 1;
                    warn!(%expense_id, error = %err, "bulk status update failed");
                }
            }
        }
        for company_id in touched {
            self.cache.invalidate_company(company_id).await;
        }

        let total = ids.len();
        if failed > 0 {
            return Err(ReviewError::PartialBatch { failed, total });
        }
        info!(
            count = total,
            status = %decision.action.target_status(),
            reviewer = %actor.user_id,
            "bulk review applied"
        );
        Ok(BulkOutcome {
            updated: total,
            total,
        })
    }

    /// Creates a placeholder expense owned by the assignee and notifies them.
    /// A failed notification is logged and does not fail the assignment.
    pub async fn create_assignment(
        &self,
        actor: &AuthenticatedUser,
        request: AssignmentRequest,
        today: NaiveDate,
        default_due_days: i64,
    ) -> Result<AssignmentOutcome, ReviewError> {
        let title = request.title.trim().to_string();
        if title.is_empty() {
            return Err(ReviewError::EmptyTitle);
        }
        if !actor.role.is_reviewer() {
            return Err(GatewayError::Forbidden(
                "only reviewers can assign expense requests".into(),
            )
            .into());
        }

        let company_id = self
            .gateway
            .profile_company(request.assignee_id)
            .await?
            .filter(|company_id| actor.can_access_company(*company_id))
            .ok_or(ReviewError::UnknownAssignee)?;

        let due_date = request
            .due_date
            .unwrap_or(today + Duration::days(default_due_days));
        let message = request
            .message
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let expense_id = self
            .gateway
            .insert_expense(NewExpense {
                id: Uuid::new_v4(),
                company_id,
                submitter_id: request.assignee_id,
                title: title.clone(),
                description: None,
                amount: Decimal::ZERO,
                currency: DEFAULT_CURRENCY.to_string(),
                expense_date: today,
                category_id: None,
                gl_account_id: None,
                vendor_name: None,
                status: ExpenseStatus::AssignmentPending.as_str().to_string(),
                assigned_by: Some(actor.user_id),
                assignment_due_date: Some(due_date),
                assignment_message: message.clone(),
                submitted_at: None,
            })
            .await?;
        self.cache.invalidate_company(company_id).await;

        let notification = NewNotification {
            id: Uuid::new_v4(),
            company_id,
            recipient_id: request.assignee_id,
            kind: NOTIFICATION_ASSIGNMENT.to_string(),
            title: format!("New expense request: {title}"),
            message: match &message {
                Some(message) => format!(
                    "{} asked you to submit an expense by {due_date}. {message}",
                    actor.full_name
                ),
                None => format!(
                    "{} asked you to submit an expense by {due_date}.",
                    actor.full_name
                ),
            },
            expense_id: Some(expense_id),
        };
        let notified = match self.gateway.insert_notification(notification).await {
            Ok(()) => true,
            Err(err) => {
                warn!(%expense_id, error = %err, "assignment created but notification failed");
                false
            }
        };

        info!(
            %expense_id,
            assignee = %request.assignee_id,
            %due_date,
            "expense assignment created"
        );
        Ok(AssignmentOutcome {
            expense_id,
            due_date,
            notified,
        })
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
        time::Duration as StdDuration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        auth::Role,
        expenses::{fixtures::item, CacheKey, ExpenseListItem, InboxFilter, ListScope, StatusTab},
    };

    #[derive(Default)]
    struct FakeGateway {
        company_id: Uuid,
        calls: Mutex<Vec<StatusChange>>,
        failing: HashSet<Uuid>,
        rows: Mutex<Vec<ExpenseListItem>>,
        profiles: HashMap<Uuid, Uuid>,
        inserted: Mutex<Vec<NewExpense>>,
        notifications: Mutex<Vec<NewNotification>>,
        fail_notifications: bool,
    }

    #[async_trait]
    impl ExpenseGateway for FakeGateway {
        async fn update_expense_status(
            &self,
            _actor: &AuthenticatedUser,
            change: StatusChange,
        ) -> Result<Uuid, GatewayError> {
            self.calls.lock().unwrap().push(change.clone());
            if self.failing.contains(&change.expense_id) {
                return Err(GatewayError::NotFound);
            }
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.iter_mut().find(|row| row.id == change.expense_id) {
                row.status = change.new_status;
            }
            Ok(self.company_id)
        }

        async fn insert_expense(&self, expense: NewExpense) -> Result<Uuid, GatewayError> {
            let id = expense.id;
            self.inserted.lock().unwrap().push(expense);
            Ok(id)
        }

        async fn insert_notification(
            &self,
            notification: NewNotification,
        ) -> Result<(), GatewayError> {
            if self.fail_notifications {
                return Err(GatewayError::Connection("pool exhausted".into()));
            }
            self.notifications.lock().unwrap().push(notification);
            Ok(())
        }

        async fn profile_company(&self, profile_id: Uuid) -> Result<Option<Uuid>, GatewayError> {
            Ok(self.profiles.get(&profile_id).copied())
        }
    }

    fn reviewer(company_id: Uuid) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            company_id,
            email: "controller@example.com".into(),
            full_name: "Casey Controller".into(),
            role: Role::Controller,
        }
    }

    fn service(gateway: Arc<FakeGateway>) -> ReviewService {
        ReviewService::new(gateway, ExpenseListCache::new(StdDuration::from_secs(60)))
    }

    #[test]
    fn decisions_validate_notes_and_targets() {
        assert!(matches!(
            ReviewDecision::parse("rejected", Some("   ")),
            Err(ReviewError::NoteRequired("reject"))
        ));
        assert!(matches!(
            ReviewDecision::parse("info_requested", None),
            Err(ReviewError::NoteRequired("request information"))
        ));
        assert!(matches!(
            ReviewDecision::parse("draft", None),
            Err(ReviewError::UnsupportedStatus(_))
        ));
        let approve = ReviewDecision::parse("approved", Some("")).unwrap();
        assert_eq!(approve.action, ReviewAction::Approve);
        assert_eq!(approve.note, None);
        let reject = ReviewDecision::parse("rejected", Some(" No receipt ")).unwrap();
        assert_eq!(reject.note.as_deref(), Some("No receipt"));
    }

    #[tokio::test]
    async fn reject_without_note_never_reaches_gateway() {
        let gateway = Arc::new(FakeGateway::default());
        let service = service(gateway.clone());
        let actor = reviewer(Uuid::new_v4());
        let id = Uuid::new_v4();

        let result = ReviewDecision::parse("rejected", Some(""));
        assert!(result.is_err());
        assert!(gateway.calls.lock().unwrap().is_empty());

        let decision = ReviewDecision::parse("rejected", Some("Duplicate")).unwrap();
        service.review(&actor, id, &decision).await.unwrap();
        let calls = gateway.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![StatusChange {
                expense_id: id,
                new_status: ExpenseStatus::Rejected,
                notes: Some("Duplicate".into()),
            }]
        );
    }

    #[tokio::test]
    async fn bulk_approve_calls_once_per_id_and_reports_failures() {
        let failing = Uuid::new_v4();
        let ids = vec![Uuid::new_v4(), failing, Uuid::new_v4()];
        let gateway = Arc::new(FakeGateway {
            failing: HashSet::from([failing]),
            ..FakeGateway::default()
        });
        let service = service(gateway.clone());
        let actor = reviewer(Uuid::new_v4());
        let decision = ReviewDecision::parse("approved", None).unwrap();

        let err = service
            .bulk_review(&actor, &ids, &decision)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "1 of 3 expense updates failed");
        let app: AppError = err.into();
        assert_eq!(app.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);

        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        let called: HashSet<Uuid> = calls.iter().map(|call| call.expense_id).collect();
        assert_eq!(called, ids.iter().copied().collect());
    }

    #[tokio::test]
    async fn bulk_review_dedupes_and_rejects_empty_selection() {
        let gateway = Arc::new(FakeGateway::default());
        let service = service(gateway.clone());
        let actor = reviewer(Uuid::new_v4());
        let decision = ReviewDecision::parse("approved", None).unwrap();
        let id = Uuid::new_v4();

        assert!(matches!(
            service.bulk_review(&actor, &[], &decision).await,
            Err(ReviewError::EmptySelection)
        ));
        let outcome = service
            .bulk_review(&actor, &[id, id], &decision)
            .await
            .unwrap();
        assert_eq!(outcome.total, 1);
        assert_eq!(gateway.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_review_keeps_cache() {
        let company = Uuid::new_v4();
        let id = Uuid::new_v4();
        let gateway = Arc::new(FakeGateway {
            company_id: company,
            failing: HashSet::from([id]),
            ..FakeGateway::default()
        });
        let service = service(gateway);
        let key = CacheKey::new(company, ListScope::Company);
        service.cache().store(key, 0, vec![]).await;

        let decision = ReviewDecision::parse("approved", None).unwrap();
        assert!(service.review(&reviewer(company), id, &decision).await.is_err());
        assert!(service.cache().get(&key).await.is_some());
    }

    #[tokio::test]
    async fn approving_moves_row_out_of_submitted_tab() {
        let company = Uuid::new_v4();
        let mut first = item(ExpenseStatus::Submitted, 100);
        first.company_id = company;
        let mut second = item(ExpenseStatus::Approved, 50);
        second.company_id = company;
        let first_id = first.id;

        let gateway = Arc::new(FakeGateway {
            company_id: company,
            rows: Mutex::new(vec![first, second]),
            ..FakeGateway::default()
        });
        let service = service(gateway.clone());
        let key = CacheKey::new(company, ListScope::Company);
        let load = || {
            let rows = gateway.rows.lock().unwrap().clone();
            async move { Ok::<_, ()>(rows) }
        };
        let filter = InboxFilter {
            tab: StatusTab::Only(ExpenseStatus::Submitted),
            ..InboxFilter::default()
        };

        let rows = service.cache().get_or_load(key, load).await.unwrap();
        let visible: Vec<Uuid> = filter.apply(&rows).iter().map(|row| row.id).collect();
        assert_eq!(visible, vec![first_id]);

        let decision = ReviewDecision::parse("approved", None).unwrap();
        service
            .review(&reviewer(company), first_id, &decision)
            .await
            .unwrap();
        assert_eq!(
            gateway.calls.lock().unwrap()[0],
            StatusChange {
                expense_id: first_id,
                new_status: ExpenseStatus::Approved,
                notes: None,
            }
        );

        assert!(service.cache().get(&key).await.is_none());
        let rows = service.cache().get_or_load(key, load).await.unwrap();
        assert!(filter.apply(&rows).is_empty());
    }

    #[tokio::test]
    async fn assignment_defaults_due_date_and_survives_notification_failure() {
        let company = Uuid::new_v4();
        let assignee = Uuid::new_v4();
        let gateway = Arc::new(FakeGateway {
            profiles: HashMap::from([(assignee, company)]),
            fail_notifications: true,
            ..FakeGateway::default()
        });
        let service = service(gateway.clone());
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let outcome = service
            .create_assignment(
                &reviewer(company),
                AssignmentRequest {
                    assignee_id: assignee,
                    title: " Conference travel ".into(),
                    message: Some("Please add the hotel".into()),
                    due_date: None,
                },
                today,
                7,
            )
            .await
            .unwrap();

        assert_eq!(outcome.due_date, NaiveDate::from_ymd_opt(2024, 3, 8).unwrap());
        assert!(!outcome.notified);
        let inserted = gateway.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].submitter_id, assignee);
        assert_eq!(inserted[0].status, "assignment_pending");
        assert_eq!(inserted[0].title, "Conference travel");
        assert_eq!(inserted[0].amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn assignment_rejects_foreign_assignee() {
        let gateway = Arc::new(FakeGateway {
            profiles: HashMap::from([(Uuid::from_u128(7), Uuid::new_v4())]),
            ..FakeGateway::default()
        });
        let service = service(gateway.clone());
        let result = service
            .create_assignment(
                &reviewer(Uuid::new_v4()),
                AssignmentRequest {
                    assignee_id: Uuid::from_u128(7),
                    title: "Receipts".into(),
                    message: None,
                    due_date: None,
                },
                today(),
                7,
            )
            .await;
        assert!(matches!(result, Err(ReviewError::UnknownAssignee)));
        assert!(gateway.inserted.lock().unwrap().is_empty());
    }
}
