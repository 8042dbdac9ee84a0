use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ExpenseListItem, ExpenseStatus};

const ALL_SENTINEL: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusTab {
    #[default]
    All,
    Only(ExpenseStatus),
}

impl StatusTab {
    pub fn matches(&self, status: ExpenseStatus) -> bool {
        match self {
            StatusTab::All => true,
            StatusTab::Only(expected) => *expected == status,
        }
    }
}

impl FromStr for StatusTab {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ALL_SENTINEL) {
            return Ok(StatusTab::All);
        }
        trimmed.parse().map(StatusTab::Only)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitterFilter {
    #[default]
    All,
    Only(Uuid),
}

impl SubmitterFilter {
    pub fn matches(&self, submitter_id: Uuid) -> bool {
        match self {
            SubmitterFilter::All => true,
            SubmitterFilter::Only(expected) => *expected == submitter_id,
        }
    }
}

impl FromStr for SubmitterFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ALL_SENTINEL) {
            return Ok(SubmitterFilter::All);
        }
        Uuid::parse_str(trimmed)
            .map(SubmitterFilter::Only)
            .map_err(|_| "submitter must be a valid UUID or 'all'".to_string())
    }
}

/// Composable predicates over an already fetched expense list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboxFilter {
    pub tab: StatusTab,
    pub search: Option<String>,
    pub submitter: SubmitterFilter,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl InboxFilter {
    pub fn matches(&self, item: &ExpenseListItem) -> bool {
        self.tab.matches(item.status) && self.matches_ignoring_tab(item)
    }

    fn matches_ignoring_tab(&self, item: &ExpenseListItem) -> bool {
        self.submitter.matches(item.submitter_id)
            && self.matches_search(item)
            && self.min_amount.map_or(true, |min| item.amount >= min)
            && self.max_amount.map_or(true, |max| item.amount <= max)
            && self.date_from.map_or(true, |from| item.expense_date >= from)
            && self.date_to.map_or(true, |to| item.expense_date <= to)
    }

    fn matches_search(&self, item: &ExpenseListItem) -> bool {
        let Some(needle) = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            return true;
        };
        let needle = needle.to_lowercase();

        [
            item.vendor_name.as_deref(),
            Some(item.title.as_str()),
            item.description.as_deref(),
            Some(item.submitter_name.as_str()),
        ]
        .into_iter()
        .flatten()
        .any(|haystack| haystack.to_lowercase().contains(&needle))
    }

    /// Rows passing every predicate, in source order.
    pub fn apply<'a>(&self, items: &'a [ExpenseListItem]) -> Vec<&'a ExpenseListItem> {
        items.iter().filter(|item| self.matches(item)).collect()
    }

    /// Row counts per tab under the non-tab predicates. `all` holds the total.
    pub fn tab_counts(&self, items: &[ExpenseListItem]) -> BTreeMap<&'static str, usize> {
        let mut counts: BTreeMap<&'static str, usize> = ExpenseStatus::ALL
            .iter()
            .map(|status| (status.as_str(), 0))
            .collect();
        let mut total = 0;
        for item in items.iter().filter(|item| self.matches_ignoring_tab(item)) {
            *counts.entry(item.status.as_str()).or_default() += 1;
            total += 1;
        }
        counts.insert(ALL_SENTINEL, total);
        counts
    }
}

/// Raw query-string form of an [`InboxFilter`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InboxQuery {
    pub tab: Option<String>,
    pub search: Option<String>,
    pub submitter: Option<String>,
    pub min_amount: Option<String>,
    pub max_amount: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

impl InboxQuery {
    pub fn into_filter(self) -> Result<InboxFilter, String> {
        Ok(InboxFilter {
            tab: self.tab.as_deref().unwrap_or_default().parse()?,
            search: non_empty(self.search),
            submitter: self.submitter.as_deref().unwrap_or_default().parse()?,
            min_amount: parse_amount("min_amount", self.min_amount)?,
            max_amount: parse_amount("max_amount", self.max_amount)?,
            date_from: parse_date("date_from", self.date_from)?,
            date_to: parse_date("date_to", self.date_to)?,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_amount(field: &str, value: Option<String>) -> Result<Option<Decimal>, String> {
    non_empty(value)
        .map(|raw| {
            Decimal::from_str(&raw).map_err(|_| format!("{field} must be a decimal number"))
        })
        .transpose()
}

fn parse_date(field: &str, value: Option<String>) -> Result<Option<NaiveDate>, String> {
    non_empty(value)
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map_err(|_| format!("{field} must be a YYYY-MM-DD date"))
        })
        .transpose()
}

/// Selected rows plus the single row whose detail is disclosed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxSelection {
    selected: BTreeSet<Uuid>,
    expanded: Option<Uuid>,
}

impl InboxSelection {
    pub fn from_ids(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            selected: ids.into_iter().collect(),
            expanded: None,
        }
    }

    /// Flips membership of `id` and reports whether it is now selected.
    pub fn toggle(&mut self, id: Uuid) -> bool {
        if self.selected.remove(&id) {
            false
        } else {
            self.selected.insert(id);
            true
        }
    }

    pub fn is_selected(&self, id: Uuid) -> bool {
        self.selected.contains(&id)
    }

    pub fn select_all(&mut self, visible: &[&ExpenseListItem]) {
        self.selected.extend(visible.iter().map(|item| item.id));
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn toggle_expanded(&mut self, id: Uuid) {
        self.expanded = match self.expanded {
            Some(current) if current == id => None,
            _ => Some(id),
        };
    }

    pub fn expanded(&self) -> Option<Uuid> {
        self.expanded
    }

    /// Drops selected and expanded ids that are no longer visible.
    pub fn retain_visible(&mut self, visible: &[&ExpenseListItem]) {
        let visible_ids: BTreeSet<Uuid> = visible.iter().map(|item| item.id).collect();
        self.selected.retain(|id| visible_ids.contains(id));
        if let Some(expanded) = self.expanded {
            if !visible_ids.contains(&expanded) {
                self.expanded = None;
            }
        }
    }

    pub fn selected_ids(&self) -> Vec<Uuid> {
        self.selected.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}
