pub mod jwt;
pub mod password;
pub mod role;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

pub use role::Role;

/// Session context of the caller, decoded from the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn can_access_company(&self, company_id: Uuid) -> bool {
        self.company_id == company_id || self.role.spans_companies()
    }

    pub fn require_company(&self, company_id: Uuid) -> Result<(), AppError> {
        if self.can_access_company(company_id) {
            Ok(())
        } else {
            Err(AppError::not_found())
        }
    }

    pub fn require_reviewer(&self) -> Result<(), AppError> {
        if self.role.is_reviewer() {
            Ok(())
        } else {
            Err(AppError::forbidden("reviewer role required"))
        }
    }

    pub fn require_manager(&self) -> Result<(), AppError> {
        if self.role.is_manager() {
            Ok(())
        } else {
            Err(AppError::forbidden("admin role required"))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            company_id: claims.company_id,
            email: claims.email,
            full_name: claims.full_name,
            role: claims.role,
        })
    }
}
