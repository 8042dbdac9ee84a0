//! Synchronous document-intelligence endpoints used by the intake dialogs.

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    extraction::{
        contact::ContactPresentation,
        invoice::{ExpenseSuggestion, InvoicePresentation},
    },
    intelligence::{analyze_contact, analyze_invoice, DocumentModel},
    models::{Customer, Vendor},
    state::AppState,
};

use super::{
    customers::{company_customers, CustomerSummary},
    receipts::load_visible_receipt,
    upload::read_upload,
    vendors::{company_vendors, name_key, VendorSummary},
};

#[derive(Deserialize)]
pub struct SmartAddRequest {
    pub receipt_id: Uuid,
}

#[derive(Serialize)]
pub struct SmartAddResponse {
    pub receipt_id: Uuid,
    pub suggestion: ExpenseSuggestion,
    pub extraction: InvoicePresentation,
}

#[derive(Serialize)]
pub struct VendorInvoiceResponse {
    pub file_name: String,
    pub invoice: InvoicePresentation,
    pub suggestion: ExpenseSuggestion,
    pub matched_vendor: Option<VendorSummary>,
}

#[derive(Serialize)]
pub struct CustomerContactResponse {
    pub file_name: String,
    pub contact: ContactPresentation,
    pub contact_person: Option<String>,
    pub matched_customer: Option<CustomerSummary>,
}

fn require_analyzer(state: &AppState) -> AppResult<()> {
    if state.analyzer.is_enabled() {
        Ok(())
    } else {
        Err(AppError::unavailable("document intelligence is not configured"))
    }
}

/// Turns an uploaded receipt into a prefilled expense draft.
pub async fn smart_add_analysis(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<SmartAddRequest>,
) -> AppResult<Json<SmartAddResponse>> {
    require_analyzer(&state)?;
    let receipt = load_visible_receipt(&state, &user, payload.receipt_id)?;
    let bytes = state
        .buckets
        .receipts
        .get_object(&receipt.storage_key)
        .await
        .map_err(|err| AppError::internal(format!("failed to read receipt: {err}")))?;

    let invoice = analyze_invoice(
        state.analyzer.as_ref(),
        DocumentModel::Receipt,
        bytes,
        &receipt.mime_type,
    )
    .await?;
    let extraction = invoice.present();
    let suggestion = extraction.suggestion();

    info!(
        receipt_id = %receipt.id,
        confidence = ?suggestion.ai_confidence,
        "smart add analysis complete"
    );
    Ok(Json(SmartAddResponse {
        receipt_id: receipt.id,
        suggestion,
        extraction,
    }))
}

pub async fn analyze_vendor_invoice(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<Json<VendorInvoiceResponse>> {
    require_analyzer(&state)?;
    let upload = read_upload(multipart).await?;
    let model = match upload.field("model") {
        None | Some("invoice") => DocumentModel::Invoice,
        Some("receipt") => DocumentModel::Receipt,
        Some(other) => {
            return Err(AppError::bad_request(format!("unsupported model: {other}")));
        }
    };

    let analyzed = analyze_invoice(
        state.analyzer.as_ref(),
        model,
        upload.bytes,
        &upload.content_type,
    )
    .await?;
    let invoice = analyzed.present();

    let vendors = {
        let mut conn = state.db()?;
        company_vendors(&mut conn, user.company_id)?
    };
    let extracted_name = analyzed.vendor_name.text();
    let matched_vendor = match_vendor(
        &vendors,
        extracted_name.as_deref(),
        analyzed.vendor_tax_id.text().as_deref(),
    )
    .cloned()
    .map(VendorSummary::from);
    if matched_vendor.is_none() {
        warn!(vendor = ?extracted_name, "no vendor matched analyzed invoice");
    }

    Ok(Json(VendorInvoiceResponse {
        file_name: upload.file_name,
        suggestion: invoice.suggestion(),
        invoice,
        matched_vendor,
    }))
}

pub async fn analyze_customer_contact(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<Json<CustomerContactResponse>> {
    require_analyzer(&state)?;
    let upload = read_upload(multipart).await?;

    let analyzed =
        analyze_contact(state.analyzer.as_ref(), upload.bytes, &upload.content_type).await?;
    let contact = analyzed.present();

    let customers = {
        let mut conn = state.db()?;
        company_customers(&mut conn, user.company_id)?
    };
    let matched_customer = match_customer(
        &customers,
        analyzed.company_name.text().as_deref(),
        contact.email.value.as_deref(),
    )
    .cloned()
    .map(CustomerSummary::from);

    Ok(Json(CustomerContactResponse {
        file_name: upload.file_name,
        contact_person: contact.contact_person(),
        contact,
        matched_customer,
    }))
}

/// Tax id wins over name; names compare case- and spacing-insensitively.
pub fn match_vendor<'a>(
    vendors: &'a [Vendor],
    name: Option<&str>,
    tax_id: Option<&str>,
) -> Option<&'a Vendor> {
    let tax_key = tax_id.map(tax_id_key).filter(|key| !key.is_empty());
    if let Some(tax_key) = tax_key {
        let by_tax = vendors
            .iter()
            .find(|vendor| vendor.tax_id.as_deref().map(tax_id_key).as_ref() == Some(&tax_key));
        if by_tax.is_some() {
            return by_tax;
        }
    }
    let wanted = name.map(name_key).filter(|key| !key.is_empty())?;
    vendors.iter().find(|vendor| name_key(&vendor.name) == wanted)
}

/// Email wins over company name.
pub fn match_customer<'a>(
    customers: &'a [Customer],
    company_name: Option<&str>,
    email: Option<&str>,
) -> Option<&'a Customer> {
    if let Some(email) = email.map(|email| email.trim().to_ascii_lowercase()) {
        let by_email = customers.iter().find(|customer| {
            customer
                .email
                .as_deref()
                .map(|known| known.eq_ignore_ascii_case(&email))
                .unwrap_or(false)
        });
        if by_email.is_some() {
            return by_email;
        }
    }
    let wanted = company_name.map(name_key).filter(|key| !key.is_empty())?;
    customers
        .iter()
        .find(|customer| name_key(&customer.name) == wanted)
}

fn tax_id_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase()
}
