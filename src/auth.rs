//! 令牌门控、OAuth 回调、登出与令牌失效恢复。

use axum::extract::{Extension, Query, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::{CookieJar, cookie::Cookie, cookie::SameSite};
use cookie::time::Duration as CookieDuration;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{
    GatewayConfig, SESSION_COOKIE_NAME, SESSION_KEY_ACCESS, SESSION_KEY_REFRESH,
};
use crate::dropbox::{DropboxClient, OAuthTokens};
use crate::error::{ApiError, TokenRejectedMarker};
use crate::session::SessionStore;

/// Resolves credentials for the current request: session values first,
/// statically configured fallback second.
pub async fn resolve_tokens(
    config: &GatewayConfig,
    sessions: &SessionStore,
    jar: &CookieJar,
) -> Option<OAuthTokens> {
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME)
        && let Some(access_token) = sessions.get(cookie.value(), SESSION_KEY_ACCESS).await
    {
        let refresh_token = sessions.get(cookie.value(), SESSION_KEY_REFRESH).await;
        return Some(OAuthTokens {
            access_token,
            refresh_token,
            expires_at: None,
        });
    }

    config.fallback_token.clone().map(|access_token| OAuthTokens {
        access_token,
        refresh_token: config.fallback_refresh.clone(),
        expires_at: None,
    })
}

/// 令牌门控：有令牌则构造本次请求的客户端，否则给出授权跳转。
pub async fn ensure_client(
    config: &GatewayConfig,
    sessions: &SessionStore,
    jar: &CookieJar,
) -> Result<DropboxClient, Redirect> {
    match resolve_tokens(config, sessions, jar).await {
        Some(tokens) => Ok(DropboxClient::with_tokens(config, tokens)),
        None => {
            let url = DropboxClient::unauthenticated(config).authorize_url();
            info!("no usable access token, redirecting to authorization url");
            Err(Redirect::to(&url))
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct OAuthCallbackQuery {
    code: Option<String>,
    error: Option<String>,
}

/// OAuth 回调：用授权码换取令牌并写入会话。
pub async fn oauth_callback(
    Query(query): Query<OAuthCallbackQuery>,
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ApiError> {
    if let Some(error) = query.error.filter(|error| !error.is_empty()) {
        warn!(error, "oauth callback returned an error");
        return Err(ApiError::OAuthCallback(error));
    }
    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ApiError::BadRequest("code is required".into()))?;

    let api = DropboxClient::unauthenticated(&config);
    let tokens = api.exchange_code(&code).await?;

    let (session_id, jar) = ensure_session_cookie(jar, &config);
    sessions
        .put(&session_id, SESSION_KEY_ACCESS, &tokens.access_token)
        .await;
    if let Some(refresh_token) = &tokens.refresh_token {
        sessions
            .put(&session_id, SESSION_KEY_REFRESH, refresh_token)
            .await;
    }

    info!("oauth code exchange complete, session authenticated");
    Ok((jar, Redirect::to("/")))
}

/// 登出：删除会话中的令牌并跳转首页，键不存在亦可。
pub async fn logout(
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Redirect {
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        sessions
            .remove(cookie.value(), &[SESSION_KEY_ACCESS, SESSION_KEY_REFRESH])
            .await;
    }
    info!("session tokens cleared");
    Redirect::to("/")
}

/// 令牌失效恢复中间件：命中标记时清空会话令牌并跳转首页。
pub async fn recover_rejected_token(
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    if response.extensions().get::<TokenRejectedMarker>().is_none() {
        return response;
    }

    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        sessions
            .remove(cookie.value(), &[SESSION_KEY_ACCESS, SESSION_KEY_REFRESH])
            .await;
    }
    warn!("remote api rejected the access token, session tokens cleared");
    Redirect::to("/").into_response()
}

/// Reuses the browser's session id when the cookie exists, otherwise
/// issues a fresh one. SameSite is Lax so the cookie survives the
/// provider's top-level redirect back to `/oauth`.
fn ensure_session_cookie(jar: CookieJar, config: &GatewayConfig) -> (String, CookieJar) {
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        return (cookie.value().to_string(), jar);
    }

    let session_id = Uuid::new_v4().to_string();
    let cookie = Cookie::build((SESSION_COOKIE_NAME, session_id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(config.session_ttl.as_secs() as i64))
        .build();
    (session_id, jar.add(cookie))
}
