use std::collections::HashMap;

use axum::extract::Multipart;
use tracing::error;

use crate::error::{AppError, AppResult};

pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// A file field plus the text fields sent alongside it.
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
    pub fields: HashMap<String, String>,
}

impl UploadedFile {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

pub async fn read_upload(mut multipart: Multipart) -> AppResult<UploadedFile> {
    let mut file: Option<(Vec<u8>, Option<String>, Option<String>)> = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().map(|n| n.to_string());
                let content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file = Some((data.to_vec(), file_name, content_type));
            }
            Some(other) => {
                let other = other.to_string();
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid {other} field: {err}"))
                })?;
                fields.insert(other, value);
            }
            None => {}
        }
    }

    let (bytes, file_name, content_type) =
        file.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::bad_request("file exceeds the 20 MB upload limit"));
    }
    let file_name = file_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::bad_request("filename is required"))?;
    let content_type = content_type
        .filter(|value| value != "application/octet-stream")
        .unwrap_or_else(|| {
            mime_guess::from_path(&file_name)
                .first_or_octet_stream()
                .to_string()
        });

    Ok(UploadedFile {
        bytes,
        file_name,
        content_type,
        fields,
    })
}
