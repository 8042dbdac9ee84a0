use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Lifecycle state of an expense. A row holds exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    Draft,
    Submitted,
    InfoRequested,
    Approved,
    Rejected,
    AssignmentPending,
}

impl ExpenseStatus {
    pub const ALL: [ExpenseStatus; 6] = [
        ExpenseStatus::Draft,
        ExpenseStatus::Submitted,
        ExpenseStatus::InfoRequested,
        ExpenseStatus::Approved,
        ExpenseStatus::Rejected,
        ExpenseStatus::AssignmentPending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseStatus::Draft => "draft",
            ExpenseStatus::Submitted => "submitted",
            ExpenseStatus::InfoRequested => "info_requested",
            ExpenseStatus::Approved => "approved",
            ExpenseStatus::Rejected => "rejected",
            ExpenseStatus::AssignmentPending => "assignment_pending",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExpenseStatus::Draft => "Draft",
            ExpenseStatus::Submitted => "Submitted",
            ExpenseStatus::InfoRequested => "Info requested",
            ExpenseStatus::Approved => "Approved",
            ExpenseStatus::Rejected => "Rejected",
            ExpenseStatus::AssignmentPending => "Awaiting submission",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExpenseStatus::Approved | ExpenseStatus::Rejected)
    }

    /// Moves a reviewer may make through the status procedure.
    pub fn reviewer_can_move_to(&self, target: ExpenseStatus) -> bool {
        use ExpenseStatus::*;
        matches!(
            (self, target),
            (Draft | Submitted, Approved | Rejected | InfoRequested)
                | (InfoRequested, Approved | Rejected)
        )
    }

    /// Moves the submitter makes when handing an expense in.
    pub fn owner_can_move_to(&self, target: ExpenseStatus) -> bool {
        matches!(
            (self, target),
            (
                ExpenseStatus::Draft | ExpenseStatus::AssignmentPending,
                ExpenseStatus::Submitted
            )
        )
    }

    /// The submitter may still change amounts, line items and receipts.
    pub fn is_editable_by_owner(&self) -> bool {
        matches!(
            self,
            ExpenseStatus::Draft | ExpenseStatus::AssignmentPending | ExpenseStatus::InfoRequested
        )
    }
}

impl fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpenseStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        ExpenseStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("unknown expense status '{value}'"))
    }
}

/// A reviewer decision and the status it leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
    RequestInfo,
}

impl ReviewAction {
    pub fn target_status(&self) -> ExpenseStatus {
        match self {
            ReviewAction::Approve => ExpenseStatus::Approved,
            ReviewAction::Reject => ExpenseStatus::Rejected,
            ReviewAction::RequestInfo => ExpenseStatus::InfoRequested,
        }
    }

    pub fn from_target(status: ExpenseStatus) -> Option<Self> {
        match status {
            ExpenseStatus::Approved => Some(ReviewAction::Approve),
            ExpenseStatus::Rejected => Some(ReviewAction::Reject),
            ExpenseStatus::InfoRequested => Some(ReviewAction::RequestInfo),
            _ => None,
        }
    }

    pub fn requires_note(&self) -> bool {
        !matches!(self, ReviewAction::Approve)
    }

    pub fn verb(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::RequestInfo => "request information",
        }
    }
}
