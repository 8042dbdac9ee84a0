use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel::pg::PgConnection;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{jwt::TokenSubject, password, AuthenticatedUser, Role},
    error::{AppError, AppResult},
    models::{Invitation, NewRefreshToken, Profile, RefreshToken},
    schema::{invitations, profiles, refresh_tokens},
    state::AppState,
};

const REFRESH_COOKIE_NAME: &str = "refresh_token";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
    pub password: String,
    pub full_name: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let mut conn = state.db()?;
    let email = payload.email.trim().to_ascii_lowercase();

    let profile: Profile = profiles::table
        .filter(profiles::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    // Invited profiles have no password until the invitation is accepted.
    let Some(hash) = profile.password_hash.as_deref() else {
        return Err(AppError::unauthorized());
    };
    let valid =
        password::verify_password(&payload.password, hash).map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }

    info!(user_id = %profile.id, "user logged in");
    issue_session(&state, &mut conn, &profile)
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let cookies = jar.ok_or_else(AppError::unauthorized)?;
    let refresh_value = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;

    let hashed = hash_token(refresh_value);
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let token: RefreshToken = refresh_tokens::table
        .filter(refresh_tokens::token_hash.eq(&hashed))
        .filter(refresh_tokens::revoked_at.is_null())
        .filter(refresh_tokens::expires_at.gt(now))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    diesel::update(refresh_tokens::table.find(token.id))
        .set((
            refresh_tokens::revoked_at.eq(now),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let profile: Profile = profiles::table
        .find(token.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    issue_session(&state, &mut conn, &profile)
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let active = refresh_tokens::table
        .filter(refresh_tokens::user_id.eq(user.user_id))
        .filter(refresh_tokens::revoked_at.is_null());

    let presented = jar
        .as_ref()
        .and_then(|cookies| cookies.get(REFRESH_COOKIE_NAME))
        .map(hash_token);
    let revoked = match presented {
        Some(hashed) => diesel::update(active.clone().filter(refresh_tokens::token_hash.eq(hashed)))
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(&mut conn)?,
        None => 0,
    };

    // Without a matching cookie every session of the caller is closed.
    if revoked == 0 {
        diesel::update(active)
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
    }

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, clear_refresh_cookie(&state)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

/// Sets the invited profile's password and signs them in.
pub async fn accept_invitation(
    State(state): State<AppState>,
    Json(payload): Json<AcceptInvitationRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    if payload.password.chars().count() < password::MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {} characters",
            password::MIN_PASSWORD_LENGTH
        )));
    }
    let password_hash = password::hash_password(&payload.password)?;
    let full_name = payload
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    let hashed = hash_token(payload.token.trim());
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let profile = conn.transaction::<Profile, AppError, _>(|conn| {
        let invitation: Invitation = invitations::table
            .filter(invitations::token_hash.eq(&hashed))
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(AppError::not_found)?;
        if invitation.accepted_at.is_some() {
            return Err(AppError::conflict("invitation has already been accepted"));
        }
        if invitation.expires_at <= now {
            return Err(AppError::new(StatusCode::GONE, "invitation has expired"));
        }

        diesel::update(invitations::table.find(invitation.id))
            .set(invitations::accepted_at.eq(now))
            .execute(conn)?;
        diesel::update(profiles::table.find(invitation.profile_id))
            .set((
                profiles::password_hash.eq(Some(&password_hash)),
                profiles::updated_at.eq(now),
            ))
            .execute(conn)?;
        if let Some(full_name) = &full_name {
            diesel::update(profiles::table.find(invitation.profile_id))
                .set(profiles::full_name.eq(full_name))
                .execute(conn)?;
        }
        Ok(profiles::table.find(invitation.profile_id).first(conn)?)
    })?;

    info!(user_id = %profile.id, "invitation accepted");
    issue_session(&state, &mut conn, &profile)
}

/// Mints an access token and a rotated refresh cookie for `profile`.
fn issue_session(
    state: &AppState,
    conn: &mut PgConnection,
    profile: &Profile,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let role: Role = profile.role.parse().map_err(AppError::internal)?;
    let access_token = state.jwt.generate_token(&TokenSubject {
        user_id: profile.id,
        company_id: profile.company_id,
        email: &profile.email,
        full_name: &profile.full_name,
        role,
    })?;

    let now = Utc::now();
    let refresh_value = generate_token_value();
    let refresh_expires_at = now + ChronoDuration::days(state.config.refresh_token_expiry_days);
    diesel::insert_into(refresh_tokens::table)
        .values(&NewRefreshToken {
            id: Uuid::new_v4(),
            user_id: profile.id,
            token_hash: hash_token(&refresh_value),
            issued_at: now.naive_utc(),
            expires_at: refresh_expires_at.naive_utc(),
        })
        .execute(conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        refresh_cookie(state, &refresh_value, refresh_expires_at)?,
    );

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.config.jwt_expiry_minutes * 60,
        }),
    ))
}

pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn generate_token_value() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn cookie_attributes(state: &AppState, mut parts: Vec<String>) -> AppResult<HeaderValue> {
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    if state.config.refresh_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={domain}"));
    }
    HeaderValue::from_str(&parts.join("; "))
        .map_err(|err| AppError::internal(format!("invalid refresh cookie: {err}")))
}

fn refresh_cookie(
    state: &AppState,
    token: &str,
    expires_at: DateTime<Utc>,
) -> AppResult<HeaderValue> {
    let max_age = ChronoDuration::days(state.config.refresh_token_expiry_days).num_seconds();
    cookie_attributes(
        state,
        vec![
            format!("{REFRESH_COOKIE_NAME}={token}"),
            format!("Max-Age={max_age}"),
            format!("Expires={}", expires_at.to_rfc2822()),
        ],
    )
}

fn clear_refresh_cookie(state: &AppState) -> AppResult<HeaderValue> {
    cookie_attributes(
        state,
        vec![
            format!("{REFRESH_COOKIE_NAME}="),
            "Max-Age=0".into(),
            "Expires=Thu, 01 Jan 1970 00:00:00 GMT".into(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::{generate_token_value, hash_token};

    #[test]
    fn generated_tokens_are_unique_hex() {
        let first = generate_token_value();
        let second = generate_token_value();
        assert_eq!(first.len(), 64);
        assert_ne!(first, second);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn token_hash_is_stable_sha256() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
