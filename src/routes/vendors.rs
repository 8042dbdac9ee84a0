use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::{prelude::*, result::DatabaseErrorKind, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    expenses::to_iso,
    models::{NewVendor, Vendor},
    schema::vendors,
    state::AppState,
    utils::json::nullable_text_change,
};

use super::expenses::{required_text, trimmed};

#[derive(Debug, Clone, Serialize)]
pub struct VendorSummary {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub tax_id: Option<String>,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Vendor> for VendorSummary {
    fn from(vendor: Vendor) -> Self {
        Self {
            id: vendor.id,
            name: vendor.name,
            email: vendor.email,
            phone: vendor.phone,
            address: vendor.address,
            tax_id: vendor.tax_id,
            metadata: vendor.metadata,
            created_at: to_iso(vendor.created_at),
            updated_at: to_iso(vendor.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateVendorRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub tax_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = vendors)]
struct VendorChangeset<'a> {
    name: Option<&'a str>,
    email: Option<Option<&'a str>>,
    phone: Option<Option<&'a str>>,
    address: Option<Option<&'a str>>,
    tax_id: Option<Option<&'a str>>,
    metadata: Option<&'a Value>,
}

pub async fn list_vendors(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<VendorSummary>>> {
    let mut conn = state.db()?;
    let rows = company_vendors(&mut conn, user.company_id)?;
    Ok(Json(rows.into_iter().map(VendorSummary::from).collect()))
}

pub async fn create_vendor(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateVendorRequest>,
) -> AppResult<(StatusCode, Json<VendorSummary>)> {
    let new_vendor = NewVendor {
        id: Uuid::new_v4(),
        company_id: user.company_id,
        name: required_text("name", &payload.name)?,
        email: trimmed(payload.email).map(|email| email.to_ascii_lowercase()),
        phone: trimmed(payload.phone),
        address: trimmed(payload.address),
        tax_id: trimmed(payload.tax_id),
        metadata: normalize_metadata(payload.metadata),
    };

    let mut conn = state.db()?;
    diesel::insert_into(vendors::table)
        .values(&new_vendor)
        .execute(&mut conn)
        .map_err(duplicate_name)?;
    let vendor: Vendor = vendors::table.find(new_vendor.id).first(&mut conn)?;

    info!(vendor_id = %vendor.id, company_id = %user.company_id, "vendor created");
    Ok((StatusCode::CREATED, Json(vendor.into())))
}

pub async fn update_vendor(
    State(state): State<AppState>,
    Path(vendor_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<VendorSummary>> {
    let name = match body.get("name") {
        None => None,
        Some(Value::String(raw)) => Some(required_text("name", raw)?),
        Some(_) => return Err(AppError::bad_request("name must be a string")),
    };
    let email = nullable_text_change(&body, "email")
        .map_err(AppError::bad_request)?
        .map(|email| email.map(|value| value.to_ascii_lowercase()));
    let phone = nullable_text_change(&body, "phone").map_err(AppError::bad_request)?;
    let address = nullable_text_change(&body, "address").map_err(AppError::bad_request)?;
    let tax_id = nullable_text_change(&body, "tax_id").map_err(AppError::bad_request)?;
    let metadata = body
        .get("metadata")
        .map(|value| normalize_metadata(Some(value.clone())));

    let mut conn = state.db()?;
    let existing = load_vendor(&mut conn, &user, vendor_id)?;

    let changeset = VendorChangeset {
        name: name.as_deref().filter(|name| *name != existing.name),
        email: email.as_ref().map(|value| value.as_deref()),
        phone: phone.as_ref().map(|value| value.as_deref()),
        address: address.as_ref().map(|value| value.as_deref()),
        tax_id: tax_id.as_ref().map(|value| value.as_deref()),
        metadata: metadata.as_ref(),
    };
    diesel::update(vendors::table.find(vendor_id))
        .set((&changeset, vendors::updated_at.eq(Utc::now().naive_utc())))
        .execute(&mut conn)
        .map_err(duplicate_name)?;

    let updated: Vendor = vendors::table.find(vendor_id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

pub async fn delete_vendor(
    State(state): State<AppState>,
    Path(vendor_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let vendor = load_vendor(&mut conn, &user, vendor_id)?;
    diesel::delete(vendors::table.find(vendor.id)).execute(&mut conn)?;
    info!(%vendor_id, "vendor deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) fn company_vendors(conn: &mut PgConnection, company_id: Uuid) -> AppResult<Vec<Vendor>> {
    Ok(vendors::table
        .filter(vendors::company_id.eq(company_id))
        .order(vendors::name.asc())
        .load(conn)?)
}

fn load_vendor(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    vendor_id: Uuid,
) -> AppResult<Vendor> {
    let vendor: Vendor = vendors::table.find(vendor_id).first(conn)?;
    if !user.can_access_company(vendor.company_id) {
        return Err(AppError::not_found());
    }
    Ok(vendor)
}

/// Case- and whitespace-insensitive name comparison key.
pub(crate) fn name_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub(crate) fn duplicate_name(err: diesel::result::Error) -> AppError {
    match err {
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::conflict("a record with this name already exists")
        }
        other => AppError::from(other),
    }
}

pub(crate) fn normalize_metadata(input: Option<Value>) -> Value {
    match input {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(value) => value,
    }
}
