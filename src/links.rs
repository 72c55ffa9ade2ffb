//! 共享链接处理器。

use axum::extract::{Extension, Query};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::auth::ensure_client;
use crate::config::{DEFAULT_REMOTE_PATH, GatewayConfig};
use crate::error::ApiError;
use crate::http::json_response;
use crate::session::SessionStore;

#[derive(Deserialize)]
pub(crate) struct ShareQuery {
    path: Option<String>,
}

/// 为指定路径创建共享链接。
pub async fn link_share(
    Query(query): Query<ShareQuery>,
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let path = query
        .path
        .unwrap_or_else(|| DEFAULT_REMOTE_PATH.to_string());
    let link = api.create_shared_link(&path).await?;
    info!(path, "create shared link");
    Ok(json_response(link))
}
