//! 当前账户信息处理器。

use axum::extract::Extension;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use tracing::info;

use crate::auth::ensure_client;
use crate::config::GatewayConfig;
use crate::error::ApiError;
use crate::http::json_response;
use crate::session::SessionStore;

/// 返回已认证用户信息，`/` 与 `/me` 共用。
pub async fn me(
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let account = api.current_account().await?;
    info!("fetched current account");
    Ok(json_response(account))
}
