use crate::shared::error::CalendarError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Identity resolved by the platform's authentication layer and forwarded
/// as a header. A request without a usable identity is rejected outright;
/// this service never synthesizes a fallback user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub i64);

fn resolve_user_id(parts: &Parts) -> Result<i64, CalendarError> {
    let raw = parts
        .headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| CalendarError::Unauthorized("Missing authenticated user".to_string()))?;
    let user_id: i64 = raw
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| CalendarError::Unauthorized("Malformed user id".to_string()))?;
    if user_id <= 0 {
        return Err(CalendarError::Unauthorized("Malformed user id".to_string()));
    }
    Ok(user_id)
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = CalendarError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        resolve_user_id(parts).map(AuthenticatedUser)
    }
}

/// Identity that additionally carries the admin role. Used by the batch
/// and override endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminUser(pub i64);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = CalendarError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = resolve_user_id(parts)?;
        let is_admin = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("admin"))
            .unwrap_or(false);
        if !is_admin {
            return Err(CalendarError::PermissionDenied(
                "Administrator access required".to_string(),
            ));
        }
        Ok(AdminUser(user_id))
    }
}
