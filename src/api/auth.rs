use axum::{
    async_trait,
    extract::{rejection::JsonRejection, ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::net::SocketAddr;
use std::sync::Arc;

use super::error::ApiError;
use crate::auth::{AuthError, Session};
use crate::db::{LoginRequest, LoginResponse, SessionResponse};
use crate::AppState;

/// Session token cookie name
pub const SESSION_COOKIE: &str = "garaged_session";

/// Token from the session cookie, or an `Authorization: Bearer` header
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

/// Login endpoint
///
/// POST /login
pub async fn login(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    // a body that is not a JSON object is as good as no credentials
    let Json(request) = payload.map_err(|_| ApiError::from(AuthError::MissingInput))?;
    let peer = connect_info.map(|ConnectInfo(addr)| addr);

    let outcome = state
        .sessions
        .login(&request.username, &request.password, &headers, peer)
        .await?;

    let cookie = Cookie::build((SESSION_COOKIE, outcome.token.clone()))
        .path("/")
        .http_only(true)
        .secure(state.config.auth.cookie_secure)
        .same_site(SameSite::Lax)
        .build();

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            status: "success",
            token: outcome.token,
        }),
    ))
}

/// Logout endpoint
///
/// POST /logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Json<serde_json::Value>) {
    if let Some(token) = extract_token(&headers) {
        state.sessions.logout(&token);
    }
    // always expire the cookie, even for Bearer callers or an unknown token
    let mut expired = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    expired.make_removal();
    (jar.add(expired), Json(serde_json::json!({ "status": "success" })))
}

/// Who is logged in
///
/// GET /session
pub async fn current_session(session: Session) -> Json<SessionResponse> {
    Json(SessionResponse {
        username: session.username,
        role: session.role,
        created_at: session.created_at.to_rfc3339(),
        expires_at: session.expires_at.to_rfc3339(),
    })
}

/// Extractor for the caller's live session
#[async_trait]
impl FromRequestParts<Arc<AppState>> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Not logged in"))?;
        state
            .sessions
            .authenticate(&token)
            .ok_or_else(|| ApiError::unauthorized("Session expired or invalid"))
    }
}

/// A session whose role is admin
pub struct AdminSession(pub Session);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        if !session.is_admin() {
            tracing::warn!(username = %session.username, "Admin route refused");
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(AdminSession(session))
    }
}
