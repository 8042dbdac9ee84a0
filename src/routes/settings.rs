//! Company settings: module toggles and the accounting reference lists
//! expenses point at.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::{prelude::*, upsert::excluded};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    expenses::to_iso,
    models::{
        ExpenseCategory, GlAccount, ModuleConfiguration, NewExpenseCategory, NewGlAccount,
        NewModuleConfiguration,
    },
    schema::{expense_categories, gl_accounts, module_configurations},
    state::AppState,
};

use super::{
    expenses::required_text,
    vendors::{duplicate_name, normalize_metadata},
};

#[derive(Serialize)]
pub struct ModuleView {
    pub module_key: String,
    pub enabled: bool,
    pub settings: Value,
    pub updated_by: Option<Uuid>,
    pub updated_at: String,
}

impl From<ModuleConfiguration> for ModuleView {
    fn from(row: ModuleConfiguration) -> Self {
        Self {
            module_key: row.module_key,
            enabled: row.enabled,
            settings: row.settings,
            updated_by: row.updated_by,
            updated_at: to_iso(row.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct ModuleUpdate {
    pub enabled: bool,
    #[serde(default)]
    pub settings: Option<Value>,
}

#[derive(Serialize)]
pub struct CategoryView {
    pub id: Uuid,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateCategory {
    pub name: String,
}

#[derive(Serialize)]
pub struct GlAccountView {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateGlAccount {
    pub code: String,
    pub name: String,
}

pub async fn list_modules(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ModuleView>>> {
    let mut conn = state.db()?;
    let rows: Vec<ModuleConfiguration> = module_configurations::table
        .filter(module_configurations::company_id.eq(user.company_id))
        .order(module_configurations::module_key.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(ModuleView::from).collect()))
}

pub async fn upsert_module(
    State(state): State<AppState>,
    Path(module_key): Path<String>,
    user: AuthenticatedUser,
    Json(payload): Json<ModuleUpdate>,
) -> AppResult<Json<ModuleView>> {
    user.require_manager()?;
    let module_key = module_key_of(&module_key)?;
    let settings = normalize_metadata(payload.settings);
    if !settings.is_object() {
        return Err(AppError::bad_request("settings must be a JSON object"));
    }

    let row = NewModuleConfiguration {
        id: Uuid::new_v4(),
        company_id: user.company_id,
        module_key,
        enabled: payload.enabled,
        settings,
        updated_by: Some(user.user_id),
    };
    let mut conn = state.db()?;
    let saved: ModuleConfiguration = diesel::insert_into(module_configurations::table)
        .values(&row)
        .on_conflict((
            module_configurations::company_id,
            module_configurations::module_key,
        ))
        .do_update()
        .set((
            module_configurations::enabled.eq(excluded(module_configurations::enabled)),
            module_configurations::settings.eq(excluded(module_configurations::settings)),
            module_configurations::updated_by.eq(excluded(module_configurations::updated_by)),
            module_configurations::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;

    info!(
        module = %saved.module_key,
        enabled = saved.enabled,
        company_id = %user.company_id,
        "module configuration saved"
    );
    Ok(Json(saved.into()))
}

pub async fn list_categories(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<CategoryView>>> {
    let mut conn = state.db()?;
    let rows: Vec<ExpenseCategory> = expense_categories::table
        .filter(expense_categories::company_id.eq(user.company_id))
        .order(expense_categories::name.asc())
        .load(&mut conn)?;
    Ok(Json(
        rows.into_iter()
            .map(|row| CategoryView {
                id: row.id,
                name: row.name,
            })
            .collect(),
    ))
}

pub async fn create_category(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCategory>,
) -> AppResult<(StatusCode, Json<CategoryView>)> {
    user.require_manager()?;
    let row = NewExpenseCategory {
        id: Uuid::new_v4(),
        company_id: user.company_id,
        name: required_text("name", &payload.name)?,
    };
    let mut conn = state.db()?;
    diesel::insert_into(expense_categories::table)
        .values(&row)
        .execute(&mut conn)
        .map_err(duplicate_name)?;
    Ok((
        StatusCode::CREATED,
        Json(CategoryView {
            id: row.id,
            name: row.name,
        }),
    ))
}

pub async fn list_gl_accounts(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<GlAccountView>>> {
    let mut conn = state.db()?;
    let rows: Vec<GlAccount> = gl_accounts::table
        .filter(gl_accounts::company_id.eq(user.company_id))
        .order(gl_accounts::code.asc())
        .load(&mut conn)?;
    Ok(Json(
        rows.into_iter()
            .map(|row| GlAccountView {
                id: row.id,
                code: row.code,
                name: row.name,
            })
            .collect(),
    ))
}

pub async fn create_gl_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateGlAccount>,
) -> AppResult<(StatusCode, Json<GlAccountView>)> {
    user.require_manager()?;
    let row = NewGlAccount {
        id: Uuid::new_v4(),
        company_id: user.company_id,
        code: required_text("code", &payload.code)?,
        name: required_text("name", &payload.name)?,
    };
    let mut conn = state.db()?;
    diesel::insert_into(gl_accounts::table)
        .values(&row)
        .execute(&mut conn)
        .map_err(|err| match duplicate_name(err) {
            conflict if conflict.status() == StatusCode::CONFLICT => {
                AppError::conflict("a GL account with this code already exists")
            }
            other => other,
        })?;
    Ok((
        StatusCode::CREATED,
        Json(GlAccountView {
            id: row.id,
            code: row.code,
            name: row.name,
        }),
    ))
}

/// Module keys are lowercase slugs such as `expenses` or `ai-intake`.
fn module_key_of(raw: &str) -> AppResult<String> {
    let key = raw.trim().to_ascii_lowercase();
    let valid = !key.is_empty()
        && key.len() <= 64
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(AppError::bad_request(format!("invalid module key '{raw}'")));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::module_key_of;

    #[test]
    fn module_keys_are_slugs() {
        assert_eq!(module_key_of(" AI-Intake ").unwrap(), "ai-intake");
        assert!(module_key_of("").is_err());
        assert!(module_key_of("expenses/../x").is_err());
    }
}
