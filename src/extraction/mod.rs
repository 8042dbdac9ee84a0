//! Presentation models for document-intelligence results.
//!
//! Everything here is a pure transform over an already analyzed payload. No
//! model is called from this module.

pub mod contact;
pub mod invoice;

use std::fmt::Display;

use serde::{Deserialize, Serialize};

pub use contact::{AnalyzedContact, ContactPresentation};
pub use invoice::{AnalyzedInvoice, ExpenseSuggestion, InvoicePresentation};

pub const HIGH_CONFIDENCE: f64 = 0.9;
pub const MEDIUM_CONFIDENCE: f64 = 0.7;

/// One recognised field: typed value, raw text and score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrField<T> {
    #[serde(default)]
    pub value: Option<T>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl<T> Default for OcrField<T> {
    fn default() -> Self {
        Self {
            value: None,
            content: None,
            confidence: None,
        }
    }
}

impl<T> OcrField<T> {
    pub fn is_present(&self) -> bool {
        self.value.is_some() || self.content().is_some()
    }

    fn content(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn badge(&self) -> ConfidenceBadge {
        ConfidenceBadge::classify(self.is_present(), self.confidence)
    }
}

impl<T: Clone + Display> OcrField<T> {
    pub fn view(&self) -> FieldView<T> {
        FieldView {
            value: self.value.clone(),
            text: self
                .content()
                .map(str::to_string)
                .or_else(|| self.value.as_ref().map(ToString::to_string)),
            confidence: self.confidence.filter(|_| self.is_present()),
            badge: self.badge(),
        }
    }

    /// View that falls back to `default` when nothing was recognised. The
    /// badge still reports the field as missing.
    pub fn view_or(&self, default: T) -> FieldView<T> {
        let mut view = self.view();
        if view.value.is_none() && view.text.is_none() {
            view.text = Some(default.to_string());
            view.value = Some(default);
        }
        view
    }
}

impl OcrField<String> {
    /// The recognised text, preferring the typed value.
    pub fn text(&self) -> Option<String> {
        self.value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or_else(|| self.content())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBadge {
    High,
    Medium,
    Low,
    Missing,
}

impl ConfidenceBadge {
    pub fn classify(present: bool, confidence: Option<f64>) -> Self {
        if !present {
            return ConfidenceBadge::Missing;
        }
        match confidence {
            Some(score) if score >= HIGH_CONFIDENCE => ConfidenceBadge::High,
            Some(score) if score >= MEDIUM_CONFIDENCE => ConfidenceBadge::Medium,
            _ => ConfidenceBadge::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldView<T> {
    pub value: Option<T>,
    pub text: Option<String>,
    pub confidence: Option<f64>,
    pub badge: ConfidenceBadge,
}

/// Mean score over the fields that were recognised and scored.
pub(crate) fn mean_confidence(scores: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = scores
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), score| (sum + score, count + 1));
    if count == 0 {
        None
    } else {
        Some(round_to(sum / count as f64, 4))
    }
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn badges_follow_thresholds() {
        assert_eq!(ConfidenceBadge::classify(true, Some(0.95)), ConfidenceBadge::High);
        assert_eq!(ConfidenceBadge::classify(true, Some(0.9)), ConfidenceBadge::High);
        assert_eq!(ConfidenceBadge::classify(true, Some(0.7)), ConfidenceBadge::Medium);
        assert_eq!(ConfidenceBadge::classify(true, Some(0.69)), ConfidenceBadge::Low);
        assert_eq!(ConfidenceBadge::classify(true, None), ConfidenceBadge::Low);
        assert_eq!(ConfidenceBadge::classify(false, Some(0.99)), ConfidenceBadge::Missing);
    }

    #[test]
    fn view_prefers_raw_content_for_text() {
        let field = OcrField {
            value: Some(12.5),
            content: Some("$12.50".into()),
            confidence: Some(0.8),
        };
        let view = field.view();
        assert_eq!(view.text.as_deref(), Some("$12.50"));
        assert_eq!(view.value, Some(12.5));
        assert_eq!(view.badge, ConfidenceBadge::Medium);
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let field: OcrField<String> = OcrField {
            confidence: Some(0.99),
            ..OcrField::default()
        };
        let view = field.view_or("USD".to_string());
        assert_eq!(view.value.as_deref(), Some("USD"));
        assert_eq!(view.badge, ConfidenceBadge::Missing);
        assert_eq!(view.confidence, None);
    }
}
