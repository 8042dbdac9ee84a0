use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    expenses::to_iso,
    models::{Customer, NewCustomer},
    schema::customers,
    state::AppState,
    utils::json::nullable_text_change,
};

use super::{
    expenses::{required_text, trimmed},
    vendors::{duplicate_name, normalize_metadata},
};

#[derive(Debug, Clone, Serialize)]
pub struct CustomerSummary {
    pub id: Uuid,
    pub name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Customer> for CustomerSummary {
    fn from(customer: Customer) -> Self {
        Self {
            id: customer.id,
            name: customer.name,
            contact_name: customer.contact_name,
            email: customer.email,
            phone: customer.phone,
            address: customer.address,
            metadata: customer.metadata,
            created_at: to_iso(customer.created_at),
            updated_at: to_iso(customer.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateCustomerRequest {
    pub name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = customers)]
struct CustomerChangeset<'a> {
    name: Option<&'a str>,
    contact_name: Option<Option<&'a str>>,
    email: Option<Option<&'a str>>,
    phone: Option<Option<&'a str>>,
    address: Option<Option<&'a str>>,
    metadata: Option<&'a Value>,
}

pub async fn list_customers(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<CustomerSummary>>> {
    let mut conn = state.db()?;
    let rows = company_customers(&mut conn, user.company_id)?;
    Ok(Json(rows.into_iter().map(CustomerSummary::from).collect()))
}

pub async fn create_customer(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCustomerRequest>,
) -> AppResult<(StatusCode, Json<CustomerSummary>)> {
    let new_customer = NewCustomer {
        id: Uuid::new_v4(),
        company_id: user.company_id,
        name: required_text("name", &payload.name)?,
        contact_name: trimmed(payload.contact_name),
        email: trimmed(payload.email).map(|email| email.to_ascii_lowercase()),
        phone: trimmed(payload.phone),
        address: trimmed(payload.address),
        metadata: normalize_metadata(payload.metadata),
    };

    let mut conn = state.db()?;
    diesel::insert_into(customers::table)
        .values(&new_customer)
        .execute(&mut conn)
        .map_err(duplicate_name)?;
    let customer: Customer = customers::table.find(new_customer.id).first(&mut conn)?;

    info!(customer_id = %customer.id, company_id = %user.company_id, "customer created");
    Ok((StatusCode::CREATED, Json(customer.into())))
}

pub async fn update_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<CustomerSummary>> {
    let name = match body.get("name") {
        None => None,
        Some(Value::String(raw)) => Some(required_text("name", raw)?),
        Some(_) => return Err(AppError::bad_request("name must be a string")),
    };
    let contact_name = nullable_text_change(&body, "contact_name").map_err(AppError::bad_request)?;
    let email = nullable_text_change(&body, "email")
        .map_err(AppError::bad_request)?
        .map(|email| email.map(|value| value.to_ascii_lowercase()));
    let phone = nullable_text_change(&body, "phone").map_err(AppError::bad_request)?;
    let address = nullable_text_change(&body, "address").map_err(AppError::bad_request)?;
    let metadata = body
        .get("metadata")
        .map(|value| normalize_metadata(Some(value.clone())));

    let mut conn = state.db()?;
    let existing = load_customer(&mut conn, &user, customer_id)?;

    let changeset = CustomerChangeset {
        name: name.as_deref().filter(|name| *name != existing.name),
        contact_name: contact_name.as_ref().map(|value| value.as_deref()),
        email: email.as_ref().map(|value| value.as_deref()),
        phone: phone.as_ref().map(|value| value.as_deref()),
        address: address.as_ref().map(|value| value.as_deref()),
        metadata: metadata.as_ref(),
    };
    diesel::update(customers::table.find(customer_id))
        .set((&changeset, customers::updated_at.eq(Utc::now().naive_utc())))
        .execute(&mut conn)
        .map_err(duplicate_name)?;

    let updated: Customer = customers::table.find(customer_id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let customer = load_customer(&mut conn, &user, customer_id)?;
    diesel::delete(customers::table.find(customer.id)).execute(&mut conn)?;
    info!(%customer_id, "customer deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) fn company_customers(
    conn: &mut PgConnection,
    company_id: Uuid,
) -> AppResult<Vec<Customer>> {
    Ok(customers::table
        .filter(customers::company_id.eq(company_id))
        .order(customers::name.asc())
        .load(conn)?)
}

fn load_customer(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    customer_id: Uuid,
) -> AppResult<Customer> {
    let customer: Customer = customers::table.find(customer_id).first(conn)?;
    if !user.can_access_company(customer.company_id) {
        return Err(AppError::not_found());
    }
    Ok(customer)
}
