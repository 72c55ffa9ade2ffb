//! 文件列举、写入、上传与下载的透传处理器。

use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{info, warn};

use crate::auth::ensure_client;
use crate::config::{DEFAULT_REMOTE_PATH, GatewayConfig};
use crate::error::ApiError;
use crate::http::json_response;
use crate::session::SessionStore;

#[derive(Deserialize)]
pub(crate) struct OptionalPathQuery {
    path: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct RequiredPathQuery {
    path: String,
}

#[derive(Deserialize)]
pub(crate) struct LocalUploadQuery {
    path: String,
    target: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ChildrenQuery {
    id: Option<String>,
}

/// 列出根目录内容。
pub async fn files_list(
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let contents = api.list_folder("").await?;
    info!("list root folder");
    Ok(json_response(contents))
}

/// 获取单个文件的元数据。
pub async fn file_get(
    Path(id): Path<String>,
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let metadata = api.get_metadata(&id).await?;
    info!(id, "get file metadata");
    Ok(json_response(metadata))
}

/// 以 UTF-8 编码写入小段文本内容。
pub async fn file_insert(
    Path(message): Path<String>,
    Query(query): Query<OptionalPathQuery>,
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let target = query
        .path
        .unwrap_or_else(|| DEFAULT_REMOTE_PATH.to_string());
    let contents = api
        .upload_bytes(&target, message.clone().into_bytes())
        .await?;
    info!(target, bytes = message.len(), "insert file");
    Ok(json_response(contents))
}

/// 通过上传会话写入内容：start 与 finish 两次远端调用。
pub async fn file_session_insert(
    Path(message): Path<String>,
    Query(query): Query<OptionalPathQuery>,
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let target = query
        .path
        .unwrap_or_else(|| DEFAULT_REMOTE_PATH.to_string());
    let session_id = api.upload_session_start().await?;
    let contents = api
        .upload_session_finish(&session_id, &target, message.clone().into_bytes())
        .await?;
    info!(
        target,
        session_id,
        bytes = message.len(),
        "upload session finished"
    );
    Ok(json_response(contents))
}

/// 经临时文件中转的大内容上传，临时文件在任一退出路径都会删除。
pub async fn file_large(
    Path(message): Path<String>,
    Query(query): Query<OptionalPathQuery>,
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };

    // NamedTempFile removes the file on drop, so the early returns below
    // never leak it.
    let temp = NamedTempFile::new_in(&config.temp_dir)
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let target = match query.path {
        Some(path) => path,
        None => {
            let base = temp
                .path()
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| ApiError::Internal("temp file has no name".into()))?;
            format!("/{base}")
        }
    };
    fs::write(temp.path(), message.as_bytes())
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let payload = fs::read(temp.path())
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let result = api.upload_bytes(&target, payload).await;
    if let Err(err) = temp.close() {
        warn!(error = %err, "failed to remove upload temp file");
    }
    let contents = result?;
    info!(target, bytes = message.len(), "large upload complete");
    Ok(json_response(contents))
}

/// 上传本地已有文件，目标路径默认取源文件名。
pub async fn file_upload(
    Query(query): Query<LocalUploadQuery>,
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let file_name = std::path::Path::new(&query.path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| ApiError::BadRequest("path has no file name".into()))?;
    let target = query.target.unwrap_or_else(|| format!("/{file_name}"));
    let payload = match fs::read(&query.path).await {
        Ok(payload) => payload,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("no such file: {}", query.path)));
        }
        Err(err) => return Err(ApiError::Internal(err.to_string())),
    };
    let contents = api.upload_bytes(&target, payload).await?;
    info!(source = query.path, target, "upload local file");
    Ok(json_response(contents))
}

/// 下载文件字节，按远端文件名推断响应内容类型。
pub async fn file_download(
    Query(RequiredPathQuery { path }): Query<RequiredPathQuery>,
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let (bytes, name) = api.download(&path).await?;
    let mime = name
        .as_deref()
        .map(|name| mime_guess::from_path(name).first_or_octet_stream())
        .unwrap_or(mime_guess::mime::APPLICATION_OCTET_STREAM);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    info!(path, size = bytes.len(), "download file");
    Ok((headers, bytes).into_response())
}

/// 列出子项，`root` 映射为 Dropbox 根路径。
pub async fn children(
    Query(query): Query<ChildrenQuery>,
    Extension(config): Extension<Arc<GatewayConfig>>,
    Extension(sessions): Extension<Arc<SessionStore>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let api = match ensure_client(&config, &sessions, &jar).await {
        Ok(api) => api,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let id = query.id.unwrap_or_else(|| "root".to_string());
    let path = if id == "root" { String::new() } else { id };
    let contents = api.list_folder(&path).await?;
    info!(path, "list children");
    Ok(json_response(contents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SESSION_COOKIE_NAME, SESSION_KEY_ACCESS};
    use crate::dropbox::mock::{self, Hits};
    use axum::http::StatusCode;
    use tempfile::tempdir;

    async fn spawn_gateway(config: GatewayConfig) -> (String, Arc<SessionStore>) {
        let config = Arc::new(config);
        let sessions = Arc::new(SessionStore::new(config.session_ttl));
        let url = mock::spawn(crate::app_router(config, sessions.clone())).await;
        (url, sessions)
    }

    fn http_client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("http client")
    }

    fn session_cookie() -> String {
        format!("{SESSION_COOKIE_NAME}=sid")
    }

    async fn authenticated_sessions(sessions: &SessionStore) {
        sessions.put("sid", SESSION_KEY_ACCESS, "tok").await;
    }

    #[tokio::test]
    async fn guarded_route_without_token_redirects_instead_of_calling_api() {
        let hits = Hits::default();
        let remote = mock::spawn(mock::canned(hits.clone(), 200, Vec::new(), "{}".into())).await;
        let mut config = GatewayConfig::for_tests();
        config.api_base = remote;
        let (gateway, _sessions) = spawn_gateway(config).await;

        // The uniform guard covers /me as well.
        for route in ["/me", "/", "/files", "/folders/list", "/links/share"] {
            let resp = http_client()
                .get(format!("{gateway}{route}"))
                .send()
                .await
                .expect("request");
            assert!(
                resp.status().is_redirection(),
                "{route} should redirect, got {}",
                resp.status()
            );
            let location = resp
                .headers()
                .get("location")
                .and_then(|value| value.to_str().ok())
                .expect("location header");
            assert!(location.starts_with("https://www.dropbox.com/oauth2/authorize?"));
        }
        assert_eq!(hits.count(), 0, "no remote call may happen without a token");
    }

    #[tokio::test]
    async fn me_with_session_token_forwards_remote_body_verbatim() {
        let hits = Hits::default();
        let body = r#"{"account_id":"dbid:abc","name":{"given_name":"Ada"}}"#;
        let remote = mock::spawn(mock::canned(hits.clone(), 200, Vec::new(), body.into())).await;
        let mut config = GatewayConfig::for_tests();
        config.api_base = remote;
        let (gateway, sessions) = spawn_gateway(config).await;
        authenticated_sessions(&sessions).await;

        let resp = http_client()
            .get(format!("{gateway}/me"))
            .header("cookie", session_cookie())
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text().await.expect("body"), body);
        assert_eq!(
            hits.paths(),
            vec!["/2/users/get_current_account".to_string()]
        );
    }

    #[tokio::test]
    async fn session_insert_performs_exactly_two_sequential_remote_calls() {
        let hits = Hits::default();
        let body = r#"{"session_id":"sess-1","name":"hello"}"#;
        let remote = mock::spawn(mock::canned(hits.clone(), 200, Vec::new(), body.into())).await;
        let mut config = GatewayConfig::for_tests();
        config.content_base = remote;
        let (gateway, sessions) = spawn_gateway(config).await;
        authenticated_sessions(&sessions).await;

        let resp = http_client()
            .get(format!("{gateway}/files/session/hello"))
            .header("cookie", session_cookie())
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            hits.paths(),
            vec![
                "/2/files/upload_session/start".to_string(),
                "/2/files/upload_session/finish".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn large_upload_removes_temp_file_on_success() {
        let temp_root = tempdir().expect("tempdir");
        let hits = Hits::default();
        let remote = mock::spawn(mock::canned(hits.clone(), 200, Vec::new(), "{}".into())).await;
        let mut config = GatewayConfig::for_tests();
        config.content_base = remote;
        config.temp_dir = temp_root.path().to_path_buf();
        let (gateway, sessions) = spawn_gateway(config).await;
        authenticated_sessions(&sessions).await;

        let resp = http_client()
            .get(format!("{gateway}/files/large/payload?path=/big.txt"))
            .header("cookie", session_cookie())
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(hits.count(), 1);

        let leftovers = std::fs::read_dir(temp_root.path())
            .expect("read temp dir")
            .count();
        assert_eq!(leftovers, 0, "temp file must not outlive the request");
    }

    #[tokio::test]
    async fn large_upload_removes_temp_file_on_remote_failure() {
        let temp_root = tempdir().expect("tempdir");
        let hits = Hits::default();
        let remote = mock::spawn(mock::canned(
            hits.clone(),
            500,
            Vec::new(),
            "upstream broke".into(),
        ))
        .await;
        let mut config = GatewayConfig::for_tests();
        config.content_base = remote;
        config.temp_dir = temp_root.path().to_path_buf();
        let (gateway, sessions) = spawn_gateway(config).await;
        authenticated_sessions(&sessions).await;

        let resp = http_client()
            .get(format!("{gateway}/files/large/payload?path=/big.txt"))
            .header("cookie", session_cookie())
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let leftovers = std::fs::read_dir(temp_root.path())
            .expect("read temp dir")
            .count();
        assert_eq!(leftovers, 0, "temp file must be removed on failure too");
    }

    #[tokio::test]
    async fn large_upload_defaults_target_to_temp_base_name() {
        let temp_root = tempdir().expect("tempdir");
        let hits = Hits::default();
        let remote = mock::spawn(mock::canned(hits.clone(), 200, Vec::new(), "{}".into())).await;
        let mut config = GatewayConfig::for_tests();
        config.content_base = remote;
        config.temp_dir = temp_root.path().to_path_buf();
        let (gateway, sessions) = spawn_gateway(config).await;
        authenticated_sessions(&sessions).await;

        http_client()
            .get(format!("{gateway}/files/large/payload"))
            .header("cookie", session_cookie())
            .send()
            .await
            .expect("request");

        let args = hits.api_args();
        assert_eq!(args.len(), 1);
        // Target derived from the temp file name, rooted at "/".
        assert!(args[0].contains(r#""path":"/"#), "arg was {}", args[0]);
        assert!(!args[0].contains("/hello"));
    }

    #[tokio::test]
    async fn insert_defaults_target_path_to_hello() {
        let hits = Hits::default();
        let remote = mock::spawn(mock::canned(hits.clone(), 200, Vec::new(), "{}".into())).await;
        let mut config = GatewayConfig::for_tests();
        config.content_base = remote;
        let (gateway, sessions) = spawn_gateway(config).await;
        authenticated_sessions(&sessions).await;

        let resp = http_client()
            .get(format!("{gateway}/files/insert/greetings"))
            .header("cookie", session_cookie())
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(hits.paths(), vec!["/2/files/upload".to_string()]);
        let args = hits.api_args();
        assert!(args[0].contains(r#""path":"/hello""#), "arg was {}", args[0]);
    }

    #[tokio::test]
    async fn local_upload_defaults_target_to_source_base_name() {
        let source_dir = tempdir().expect("tempdir");
        let source = source_dir.path().join("report.bin");
        std::fs::write(&source, b"data").expect("write source");

        let hits = Hits::default();
        let remote = mock::spawn(mock::canned(hits.clone(), 200, Vec::new(), "{}".into())).await;
        let mut config = GatewayConfig::for_tests();
        config.content_base = remote;
        let (gateway, sessions) = spawn_gateway(config).await;
        authenticated_sessions(&sessions).await;

        let resp = http_client()
            .get(format!(
                "{gateway}/files/upload?path={}",
                source.to_string_lossy()
            ))
            .header("cookie", session_cookie())
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        let args = hits.api_args();
        assert_eq!(args.len(), 1);
        assert!(args[0].contains(r#""path":"/report.bin""#), "arg was {}", args[0]);
    }

    #[tokio::test]
    async fn upload_without_mandatory_path_is_a_client_error() {
        let (gateway, sessions) = spawn_gateway(GatewayConfig::for_tests()).await;
        authenticated_sessions(&sessions).await;

        for route in ["/files/upload", "/files/download"] {
            let resp = http_client()
                .get(format!("{gateway}{route}"))
                .header("cookie", session_cookie())
                .send()
                .await
                .expect("request");
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{route}");
        }
    }

    #[tokio::test]
    async fn download_txt_name_sets_text_plain_content_type() {
        let hits = Hits::default();
        let remote = mock::spawn(mock::canned(
            hits.clone(),
            200,
            vec![(
                "Dropbox-API-Result".to_string(),
                r#"{"name":"notes.txt","size":5}"#.to_string(),
            )],
            "hello".into(),
        ))
        .await;
        let mut config = GatewayConfig::for_tests();
        config.content_base = remote;
        let (gateway, sessions) = spawn_gateway(config).await;
        authenticated_sessions(&sessions).await;

        let resp = http_client()
            .get(format!("{gateway}/files/download?path=/notes.txt"))
            .header("cookie", session_cookie())
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok()),
            Some("text/plain")
        );
        assert_eq!(resp.bytes().await.expect("body").as_ref(), b"hello");
    }

    #[tokio::test]
    async fn download_unknown_extension_keeps_octet_stream() {
        let hits = Hits::default();
        let remote = mock::spawn(mock::canned(
            hits.clone(),
            200,
            vec![(
                "Dropbox-API-Result".to_string(),
                r#"{"name":"blob.zzyzx"}"#.to_string(),
            )],
            "raw".into(),
        ))
        .await;
        let mut config = GatewayConfig::for_tests();
        config.content_base = remote;
        let (gateway, sessions) = spawn_gateway(config).await;
        authenticated_sessions(&sessions).await;

        let resp = http_client()
            .get(format!("{gateway}/files/download?path=/blob.zzyzx"))
            .header("cookie", session_cookie())
            .send()
            .await
            .expect("request");
        assert_eq!(
            resp.headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok()),
            Some("application/octet-stream")
        );
    }

    #[tokio::test]
    async fn rejected_token_clears_session_and_redirects_home() {
        let hits = Hits::default();
        let remote = mock::spawn(mock::canned(hits.clone(), 401, Vec::new(), String::new())).await;
        let mut config = GatewayConfig::for_tests();
        config.api_base = remote;
        let (gateway, sessions) = spawn_gateway(config).await;
        authenticated_sessions(&sessions).await;

        let resp = http_client()
            .get(format!("{gateway}/me"))
            .header("cookie", session_cookie())
            .send()
            .await
            .expect("request");
        assert!(resp.status().is_redirection());
        assert_eq!(
            resp.headers()
                .get("location")
                .and_then(|value| value.to_str().ok()),
            Some("/")
        );
        assert_eq!(sessions.get("sid", SESSION_KEY_ACCESS).await, None);
    }

    #[tokio::test]
    async fn children_defaults_to_root_listing() {
        let hits = Hits::default();
        let remote = mock::spawn(mock::canned(
            hits.clone(),
            200,
            Vec::new(),
            r#"{"entries":[]}"#.into(),
        ))
        .await;
        let mut config = GatewayConfig::for_tests();
        config.api_base = remote;
        let (gateway, sessions) = spawn_gateway(config).await;
        authenticated_sessions(&sessions).await;

        let resp = http_client()
            .get(format!("{gateway}/children"))
            .header("cookie", session_cookie())
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(hits.paths(), vec!["/2/files/list_folder".to_string()]);
    }
}
