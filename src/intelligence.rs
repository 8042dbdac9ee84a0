use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::{
    config::AppConfig,
    error::AppError,
    extraction::{AnalyzedContact, AnalyzedInvoice},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentModel {
    Receipt,
    Invoice,
    BusinessCard,
}

impl DocumentModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentModel::Receipt => "receipt",
            DocumentModel::Invoice => "invoice",
            DocumentModel::BusinessCard => "business-card",
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("document intelligence is not configured")]
    Disabled,
    #[error("document intelligence request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("document intelligence returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected document intelligence payload: {0}")]
    Decode(String),
}

impl AnalyzerError {
    /// Errors worth retrying from a background job.
    pub fn is_transient(&self) -> bool {
        match self {
            AnalyzerError::Request(_) => true,
            AnalyzerError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<AnalyzerError> for AppError {
    fn from(value: AnalyzerError) -> Self {
        match value {
            AnalyzerError::Disabled => AppError::unavailable(value.to_string()),
            other => AppError::new(StatusCode::BAD_GATEWAY, other.to_string()),
        }
    }
}

/// External OCR service producing field/confidence payloads.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync + 'static {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn analyze(
        &self,
        model: DocumentModel,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Value, AnalyzerError>;
}

pub async fn analyze_invoice(
    analyzer: &dyn DocumentAnalyzer,
    model: DocumentModel,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<AnalyzedInvoice, AnalyzerError> {
    let payload = analyzer.analyze(model, bytes, content_type).await?;
    decode(payload)
}

pub async fn analyze_contact(
    analyzer: &dyn DocumentAnalyzer,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<AnalyzedContact, AnalyzerError> {
    let payload = analyzer
        .analyze(DocumentModel::BusinessCard, bytes, content_type)
        .await?;
    decode(payload)
}

/// Accepts either a bare field object or one wrapped in `document`.
pub fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, AnalyzerError> {
    let document = match payload {
        Value::Object(mut map) if map.contains_key("document") => {
            map.remove("document").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(document).map_err(|err| AnalyzerError::Decode(err.to_string()))
}

pub struct HttpDocumentAnalyzer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpDocumentAnalyzer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, AnalyzerError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl DocumentAnalyzer for HttpDocumentAnalyzer {
    async fn analyze(
        &self,
        model: DocumentModel,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Value, AnalyzerError> {
        let url = format!(
            "{}/analyze/{}",
            self.endpoint.trim_end_matches('/'),
            model.as_str()
        );
        let mut request = self.client.post(&url).json(&json!({
            "content_type": content_type,
            "base64_source": BASE64.encode(&bytes),
        }));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, model = model.as_str(), "document analysis failed");
            return Err(AnalyzerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

pub struct DisabledAnalyzer;

#[async_trait]
impl DocumentAnalyzer for DisabledAnalyzer {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn analyze(
        &self,
        _model: DocumentModel,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<Value, AnalyzerError> {
        Err(AnalyzerError::Disabled)
    }
}

pub fn from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn DocumentAnalyzer>> {
    match &config.document_intelligence_endpoint {
        Some(endpoint) => Ok(Arc::new(HttpDocumentAnalyzer::new(
            endpoint.clone(),
            config.document_intelligence_key.clone(),
        )?)),
        None => Ok(Arc::new(DisabledAnalyzer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_unwraps_document_envelope() {
        let wrapped = json!({ "document": { "vendor_name": { "value": "Fabrikam" } } });
        let invoice: AnalyzedInvoice = decode(wrapped).unwrap();
        assert_eq!(invoice.vendor_name.value.as_deref(), Some("Fabrikam"));

        let bare = json!({ "merchant_name": { "value": "Fabrikam" } });
        let invoice: AnalyzedInvoice = decode(bare).unwrap();
        assert_eq!(invoice.vendor_name.value.as_deref(), Some("Fabrikam"));
    }

    #[test]
    fn only_server_side_failures_are_transient() {
        assert!(AnalyzerError::Status { status: 503, body: String::new() }.is_transient());
        assert!(AnalyzerError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!AnalyzerError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!AnalyzerError::Disabled.is_transient());
    }

    #[tokio::test]
    async fn disabled_analyzer_maps_to_unavailable() {
        let err = analyze_contact(&DisabledAnalyzer, vec![], "image/png")
            .await
            .unwrap_err();
        let app: AppError = err.into();
        assert_eq!(app.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
