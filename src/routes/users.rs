use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration as ChronoDuration, Utc};
use diesel::{prelude::*, result::DatabaseErrorKind};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    auth::{AuthenticatedUser, Role},
    error::{AppError, AppResult},
    models::{NewInvitation, NewProfile, Profile},
    schema::{invitations, profiles},
    state::AppState,
    storage::{inline_content_disposition, sanitize_key_segment},
};

use super::{
    auth::{generate_token_value, hash_token},
    expenses::{required_text, trimmed},
    upload::read_upload,
};

const ACCEPT_INVITATION_PATH: &str = "auth/accept-invitation";

#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub id: Uuid,
    pub company_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub avatar_url: Option<String>,
    pub invitation_pending: bool,
}

#[derive(Deserialize)]
pub struct RoleUpdate {
    pub role: String,
}

#[derive(Deserialize)]
pub struct InviteUserRequest {
    pub email: String,
    pub full_name: Option<String>,
    pub role: Option<String>,
}

#[derive(Serialize)]
pub struct InvitationCreated {
    pub profile: ProfileView,
    pub accept_url: String,
    pub expires_at: String,
}

#[derive(Serialize)]
pub struct AvatarUploaded {
    pub avatar_key: String,
    pub avatar_url: String,
}

fn to_view(state: &AppState, profile: Profile) -> ProfileView {
    ProfileView {
        id: profile.id,
        company_id: profile.company_id,
        avatar_url: profile
            .avatar_key
            .as_deref()
            .map(|key| state.buckets.avatars.public_url(key)),
        invitation_pending: profile.password_hash.is_none(),
        email: profile.email,
        full_name: profile.full_name,
        role: profile.role,
    }
}

pub async fn list_profiles(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ProfileView>>> {
    let mut conn = state.db()?;
    let rows: Vec<Profile> = profiles::table
        .filter(profiles::company_id.eq(user.company_id))
        .order(profiles::full_name.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(|row| to_view(&state, row)).collect()))
}

pub async fn update_role(
    State(state): State<AppState>,
    Path(profile_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<RoleUpdate>,
) -> AppResult<Json<ProfileView>> {
    user.require_manager()?;
    let role: Role = payload.role.parse().map_err(AppError::bad_request)?;
    if !user.role.can_grant(role) {
        return Err(AppError::forbidden(format!("you cannot grant the {role} role")));
    }
    if profile_id == user.user_id {
        return Err(AppError::bad_request("you cannot change your own role"));
    }

    let mut conn = state.db()?;
    let target: Profile = profiles::table.find(profile_id).first(&mut conn)?;
    if !user.can_access_company(target.company_id) {
        return Err(AppError::not_found());
    }
    let current: Role = target.role.parse().map_err(AppError::internal)?;
    if !user.role.can_grant(current) {
        return Err(AppError::forbidden("you cannot change the role of this user"));
    }

    diesel::update(profiles::table.find(profile_id))
        .set((
            profiles::role.eq(role.as_str()),
            profiles::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;
    let updated: Profile = profiles::table.find(profile_id).first(&mut conn)?;

    info!(%profile_id, from = %current, to = %role, changed_by = %user.user_id, "role updated");
    Ok(Json(to_view(&state, updated)))
}

/// Creates a passwordless profile and an invitation the invitee accepts to
/// set their password.
pub async fn invite_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<InviteUserRequest>,
) -> AppResult<(StatusCode, Json<InvitationCreated>)> {
    user.require_manager()?;
    let email = required_text("email", &payload.email)?.to_ascii_lowercase();
    if !email.contains('@') {
        return Err(AppError::bad_request("email must be a valid address"));
    }
    let role = match trimmed(payload.role) {
        Some(raw) => raw.parse::<Role>().map_err(AppError::bad_request)?,
        None => Role::User,
    };
    if !user.role.can_grant(role) {
        return Err(AppError::forbidden(format!("you cannot invite a user as {role}")));
    }
    let full_name = trimmed(payload.full_name).unwrap_or_else(|| email.clone());

    let token = generate_token_value();
    let accept_url = invitation_url(&state.config.user_api_url, &token)
        .map_err(|err| AppError::internal(format!("invalid USER_API_URL: {err}")))?;
    let expires_at =
        Utc::now().naive_utc() + ChronoDuration::days(state.config.invitation_expiry_days);

    let new_profile = NewProfile {
        id: Uuid::new_v4(),
        company_id: user.company_id,
        email: email.clone(),
        full_name,
        password_hash: None,
        role: role.as_str().to_string(),
    };
    let invitation = NewInvitation {
        id: Uuid::new_v4(),
        company_id: user.company_id,
        profile_id: new_profile.id,
        email,
        role: role.as_str().to_string(),
        token_hash: hash_token(&token),
        invited_by: user.user_id,
        expires_at,
    };

    let mut conn = state.db()?;
    let profile = conn
        .transaction::<Profile, diesel::result::Error, _>(|conn| {
            diesel::insert_into(profiles::table)
                .values(&new_profile)
                .execute(conn)?;
            diesel::insert_into(invitations::table)
                .values(&invitation)
                .execute(conn)?;
            profiles::table.find(new_profile.id).first(conn)
        })
        .map_err(|err| match err {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::conflict("a user with this email already exists")
            }
            other => AppError::from(other),
        })?;

    info!(profile_id = %profile.id, invited_by = %user.user_id, %role, "user invited");
    Ok((
        StatusCode::CREATED,
        Json(InvitationCreated {
            profile: to_view(&state, profile),
            accept_url,
            expires_at: crate::expenses::to_iso(expires_at),
        }),
    ))
}

pub async fn upload_avatar(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<Json<AvatarUploaded>> {
    let upload = read_upload(multipart).await?;
    if !upload.content_type.starts_with("image/") {
        return Err(AppError::bad_request("avatar must be an image"));
    }
    let avatar_key = format!(
        "{}/{}-{}",
        user.user_id,
        Uuid::new_v4(),
        sanitize_key_segment(&upload.file_name)
    );

    state
        .buckets
        .avatars
        .put_object(
            &avatar_key,
            upload.bytes,
            Some(upload.content_type.clone()),
            inline_content_disposition(&upload.file_name),
        )
        .await
        .map_err(|err| {
            error!(user_id = %user.user_id, error = %err, "avatar upload failed");
            AppError::internal(format!("failed to store avatar: {err}"))
        })?;

    let previous = {
        let mut conn = state.db()?;
        let previous: Option<String> = profiles::table
            .find(user.user_id)
            .select(profiles::avatar_key)
            .first(&mut conn)?;
        diesel::update(profiles::table.find(user.user_id))
            .set((
                profiles::avatar_key.eq(Some(&avatar_key)),
                profiles::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)?;
        previous
    };
    if let Some(previous) = previous {
        if let Err(err) = state.buckets.avatars.delete_object(&previous).await {
            warn!(key = %previous, error = %err, "failed to delete previous avatar");
        }
    }

    Ok(Json(AvatarUploaded {
        avatar_url: state.buckets.avatars.public_url(&avatar_key),
        avatar_key,
    }))
}

/// Acceptance link for an invitation token, relative to the user API base.
pub fn invitation_url(base: &str, token: &str) -> Result<String, url::ParseError> {
    let base = if base.ends_with('/') {
        Url::parse(base)?
    } else {
        Url::parse(&format!("{base}/"))?
    };
    let mut url = base.join(ACCEPT_INVITATION_PATH)?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.to_string())
}
