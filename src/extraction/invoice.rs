use chrono::NaiveDate;
use rust_decimal::{prelude::FromPrimitive, Decimal};
use serde::{Deserialize, Serialize};

use super::{mean_confidence, round_to, ConfidenceBadge, FieldView, OcrField};
use crate::expenses::DEFAULT_CURRENCY;

pub const UNKNOWN_VENDOR: &str = "Unknown vendor";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzedInvoice {
    #[serde(alias = "merchant_name")]
    pub vendor_name: OcrField<String>,
    #[serde(alias = "merchant_address")]
    pub vendor_address: OcrField<String>,
    pub vendor_tax_id: OcrField<String>,
    pub customer_name: OcrField<String>,
    pub invoice_id: OcrField<String>,
    #[serde(alias = "transaction_date")]
    pub invoice_date: OcrField<NaiveDate>,
    pub due_date: OcrField<NaiveDate>,
    pub currency: OcrField<String>,
    pub subtotal: OcrField<f64>,
    pub total_tax: OcrField<f64>,
    #[serde(alias = "total")]
    pub invoice_total: OcrField<f64>,
    pub items: Vec<AnalyzedLineItem>,
    pub tax_details: Vec<AnalyzedTaxLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzedLineItem {
    pub description: OcrField<String>,
    pub quantity: OcrField<f64>,
    #[serde(alias = "price")]
    pub unit_price: OcrField<f64>,
    #[serde(alias = "total_price")]
    pub amount: OcrField<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzedTaxLine {
    pub description: OcrField<String>,
    pub rate: OcrField<f64>,
    pub amount: OcrField<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItemView {
    pub position: usize,
    pub description: String,
    pub quantity: f64,
    pub unit_price: Option<f64>,
    pub amount: f64,
    pub confidence: Option<f64>,
    pub badge: ConfidenceBadge,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxLineView {
    pub description: Option<String>,
    pub rate: Option<f64>,
    pub rate_label: Option<String>,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoicePresentation {
    pub vendor_name: FieldView<String>,
    pub vendor_address: FieldView<String>,
    pub vendor_tax_id: FieldView<String>,
    pub customer_name: FieldView<String>,
    pub invoice_id: FieldView<String>,
    pub invoice_date: FieldView<NaiveDate>,
    pub due_date: FieldView<NaiveDate>,
    pub currency: FieldView<String>,
    pub line_items: Vec<LineItemView>,
    pub tax_lines: Vec<TaxLineView>,
    pub subtotal: f64,
    pub tax_total: f64,
    pub grand_total: f64,
    pub overall_confidence: Option<f64>,
    pub overall_badge: ConfidenceBadge,
}

impl AnalyzedInvoice {
    pub fn present(&self) -> InvoicePresentation {
        let line_items: Vec<LineItemView> = self
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| item.view(index + 1))
            .collect();
        let tax_lines: Vec<TaxLineView> =
            self.tax_details.iter().map(AnalyzedTaxLine::view).collect();

        let subtotal = self
            .subtotal
            .value
            .unwrap_or_else(|| line_items.iter().map(|item| item.amount).sum());
        let tax_total = self
            .total_tax
            .value
            .unwrap_or_else(|| tax_lines.iter().map(|line| line.amount).sum());
        let grand_total = self.invoice_total.value.unwrap_or(subtotal + tax_total);

        let overall_confidence = mean_confidence([
            self.vendor_name.view().confidence,
            self.invoice_id.view().confidence,
            self.invoice_date.view().confidence,
            self.currency.view().confidence,
            self.subtotal.view().confidence,
            self.total_tax.view().confidence,
            self.invoice_total.view().confidence,
        ]);

        InvoicePresentation {
            vendor_name: self.vendor_name.view_or(UNKNOWN_VENDOR.to_string()),
            vendor_address: self.vendor_address.view(),
            vendor_tax_id: self.vendor_tax_id.view(),
            customer_name: self.customer_name.view(),
            invoice_id: self.invoice_id.view(),
            invoice_date: self.invoice_date.view(),
            due_date: self.due_date.view(),
            currency: currency_view(&self.currency),
            line_items,
            tax_lines,
            subtotal: round_to(subtotal, 2),
            tax_total: round_to(tax_total, 2),
            grand_total: round_to(grand_total, 2),
            overall_badge: ConfidenceBadge::classify(
                overall_confidence.is_some(),
                overall_confidence,
            ),
            overall_confidence,
        }
    }
}

fn currency_view(field: &OcrField<String>) -> FieldView<String> {
    let mut view = field.view_or(DEFAULT_CURRENCY.to_string());
    view.value = view.value.map(|code| code.trim().to_ascii_uppercase());
    view
}

impl AnalyzedLineItem {
    fn view(&self, position: usize) -> LineItemView {
        let quantity = self.quantity.value.unwrap_or(1.0);
        let unit_price = self.unit_price.value;
        let amount = self
            .amount
            .value
            .or_else(|| unit_price.map(|price| price * quantity))
            .unwrap_or(0.0);
        let confidence = mean_confidence([
            self.description.view().confidence,
            self.quantity.view().confidence,
            self.unit_price.view().confidence,
            self.amount.view().confidence,
        ]);
        LineItemView {
            position,
            description: self
                .description
                .text()
                .unwrap_or_else(|| format!("Item {position}")),
            quantity,
            unit_price,
            amount: round_to(amount, 2),
            confidence,
            badge: ConfidenceBadge::classify(confidence.is_some(), confidence),
        }
    }
}

impl AnalyzedTaxLine {
    fn view(&self) -> TaxLineView {
        let rate = self.rate.value;
        let amount = self.amount.value.unwrap_or(0.0);
        TaxLineView {
            description: self.description.text(),
            rate,
            rate_label: rate.map(format_tax_rate),
            amount: round_to(amount, 2),
        }
    }
}

/// Formats a tax rate as a percentage. Rates up to 1 are fractions.
pub fn format_tax_rate(rate: f64) -> String {
    let percent = if rate <= 1.0 { rate * 100.0 } else { rate };
    format!("{}%", round_to(percent, 2))
}

/// Expense draft fields derived from an analyzed receipt or invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpenseSuggestion {
    pub title: String,
    pub vendor_name: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub expense_date: Option<NaiveDate>,
    pub ai_confidence: Option<f64>,
    pub line_items: Vec<LineItemView>,
}

impl InvoicePresentation {
    pub fn suggestion(&self) -> ExpenseSuggestion {
        let vendor_name = match self.vendor_name.badge {
            ConfidenceBadge::Missing => None,
            _ => self.vendor_name.value.clone(),
        };
        let title = vendor_name
            .as_deref()
            .map(|vendor| format!("Expense at {vendor}"))
            .unwrap_or_else(|| "Receipt expense".to_string());
        ExpenseSuggestion {
            title,
            vendor_name,
            amount: to_money(self.grand_total),
            currency: self
                .currency
                .value
                .clone()
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            expense_date: self.invoice_date.value,
            ai_confidence: self.overall_confidence,
            line_items: self.line_items.clone(),
        }
    }
}

pub fn to_money(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .map(|amount| amount.round_dp(2))
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> AnalyzedInvoice {
        serde_json::from_value(json!({
            "merchant_name": { "value": "Contoso Ltd", "confidence": 0.95 },
            "invoice_id": { "value": "INV-100", "confidence": 0.72 },
            "invoice_date": { "value": "2024-03-15", "content": "15 Mar 2024", "confidence": 0.91 },
            "items": [
                { "description": { "value": "Widgets" }, "quantity": { "value": 2.0 }, "unit_price": { "value": 12.5 } },
                { "amount": { "value": 5.0, "confidence": 0.5 } }
            ],
            "tax_details": [
                { "rate": { "value": 0.19 }, "amount": { "value": 5.7 } },
                { "rate": { "value": 7.5 }, "amount": { "value": 1.0 } }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn rolls_up_totals_from_lines_and_taxes() {
        let presentation = sample().present();
        assert_eq!(presentation.line_items[0].amount, 25.0);
        assert_eq!(presentation.line_items[1].description, "Item 2");
        assert_eq!(presentation.line_items[1].quantity, 1.0);
        assert_eq!(presentation.subtotal, 30.0);
        assert_eq!(presentation.tax_total, 6.7);
        assert_eq!(presentation.grand_total, 36.7);
    }

    #[test]
    fn reported_totals_win_over_roll_ups() {
        let mut invoice = sample();
        invoice.subtotal.value = Some(31.0);
        invoice.invoice_total.value = Some(40.0);
        let presentation = invoice.present();
        assert_eq!(presentation.subtotal, 31.0);
        assert_eq!(presentation.grand_total, 40.0);
    }

    #[test]
    fn tax_rates_format_as_percentages() {
        assert_eq!(format_tax_rate(0.19), "19%");
        assert_eq!(format_tax_rate(7.5), "7.5%");
        assert_eq!(format_tax_rate(1.0), "100%");
        let presentation = sample().present();
        assert_eq!(presentation.tax_lines[0].rate_label.as_deref(), Some("19%"));
    }

    #[test]
    fn missing_header_fields_get_defaults() {
        let presentation = AnalyzedInvoice::default().present();
        assert_eq!(presentation.vendor_name.value.as_deref(), Some(UNKNOWN_VENDOR));
        assert_eq!(presentation.vendor_name.badge, ConfidenceBadge::Missing);
        assert_eq!(presentation.currency.value.as_deref(), Some("USD"));
        assert_eq!(presentation.grand_total, 0.0);
        assert_eq!(presentation.overall_confidence, None);
        assert_eq!(presentation.overall_badge, ConfidenceBadge::Missing);
    }

    #[test]
    fn presentation_is_idempotent() {
        let invoice = sample();
        assert_eq!(invoice.present(), invoice.present());
    }

    #[test]
    fn suggestion_uses_grand_total_and_vendor() {
        let suggestion = sample().present().suggestion();
        assert_eq!(suggestion.vendor_name.as_deref(), Some("Contoso Ltd"));
        assert_eq!(suggestion.amount, Decimal::new(3670, 2));
        assert_eq!(suggestion.expense_date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(
            AnalyzedInvoice::default().present().suggestion().vendor_name,
            None
        );
    }
}
