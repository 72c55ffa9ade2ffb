//! 文件夹列举与创建处理器。

use axum::extract::{Extension, Path, Query};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::auth::ensure_client;
use crate::config::GatewayConfig;
use crate::error::ApiError;
use crate::http::json_response;
use crate::session::SessionStore;

#[derive(Deserialize)]
pub(crate) struct FolderListQuery {
    path: Option<String>,
}

/// 列出文件夹内容，路径默认为根。
pub async fn folders_list(
    Query(query): Query<FolderListQuery>,
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let path = query.path.unwrap_or_default();
    let contents = api.list_folder(&path).await?;
    info!(path, "list folder");
    Ok(json_response(contents))
}

/// 创建文件夹，标题不带斜杠时挂到根下。
pub async fn folder_insert(
    Path(title): Path<String>,
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let path = if title.starts_with('/') {
        title
    } else {
        format!("/{title}")
    };
    let contents = api.create_folder(&path).await?;
    info!(path, "create folder");
    Ok(json_response(contents))
}
