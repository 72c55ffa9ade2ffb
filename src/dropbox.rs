//! Dropbox HTTP API client.
//!
//! One client value is built per request from the credentials the route
//! guard resolved; nothing here is shared across requests. Pass-through
//! operations return the remote JSON body verbatim so routes can forward
//! it unmodified.

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::GatewayConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Error)]
pub enum DropboxError {
    #[error("access token rejected by remote api")]
    TokenRejected,
    #[error("remote api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct UploadSessionStartResponse {
    session_id: String,
}

pub struct DropboxClient {
    http: Client,
    app_key: String,
    app_secret: String,
    redirect_uri: String,
    tokens: Option<OAuthTokens>,
    api_base: String,
    content_base: String,
    authorize_base: String,
}

impl DropboxClient {
    /// Client without credentials, usable for the authorize/exchange flow.
    pub fn unauthenticated(config: &GatewayConfig) -> Self {
        Self::build(config, None)
    }

    /// Client carrying the resolved token pair for this request.
    pub fn with_tokens(config: &GatewayConfig, tokens: OAuthTokens) -> Self {
        Self::build(config, Some(tokens))
    }

    fn build(config: &GatewayConfig, tokens: Option<OAuthTokens>) -> Self {
        Self {
            http: Client::new(),
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            tokens,
            api_base: config.api_base.clone(),
            content_base: config.content_base.clone(),
            authorize_base: config.authorize_base.clone(),
        }
    }

    /// URL the browser is sent to when no usable token exists.
    pub fn authorize_url(&self) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&token_access_type=offline",
            self.authorize_base,
            urlencoding::encode(&self.app_key),
            urlencoding::encode(&self.redirect_uri),
        )
    }

    /// Exchanges an authorization code for a token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, DropboxError> {
        let resp = self
            .http
            .post(format!("{}/oauth2/token", self.api_base))
            .form(&[
                ("code", code),
                ("grant_type", "authorization_code"),
                ("client_id", self.app_key.as_str()),
                ("client_secret", self.app_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let token: TokenExchangeResponse = resp.json().await?;
        Ok(OAuthTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|expires_in| chrono::Utc::now().timestamp() + expires_in),
        })
    }

    pub async fn current_account(&self) -> Result<String, DropboxError> {
        let resp = self
            .http
            .post(format!("{}/2/users/get_current_account", self.api_base))
            .bearer_auth(self.bearer()?)
            .send()
            .await?;
        body_text(resp).await
    }

    /// Lists a folder; the empty path is the Dropbox root.
    pub async fn list_folder(&self, path: &str) -> Result<String, DropboxError> {
        let resp = self
            .http
            .post(format!("{}/2/files/list_folder", self.api_base))
            .bearer_auth(self.bearer()?)
            .json(&json!({ "path": path, "recursive": false }))
            .send()
            .await?;
        body_text(resp).await
    }

    pub async fn get_metadata(&self, path: &str) -> Result<String, DropboxError> {
        let resp = self
            .http
            .post(format!("{}/2/files/get_metadata", self.api_base))
            .bearer_auth(self.bearer()?)
            .json(&json!({ "path": path }))
            .send()
            .await?;
        body_text(resp).await
    }

    pub async fn upload_bytes(&self, path: &str, bytes: Vec<u8>) -> Result<String, DropboxError> {
        let arg = http_header_safe_json(&json!({
            "path": path,
            "mode": "overwrite",
            "autorename": false,
        }));
        let resp = self
            .http
            .post(format!("{}/2/files/upload", self.content_base))
            .bearer_auth(self.bearer()?)
            .header("Dropbox-API-Arg", arg)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        body_text(resp).await
    }

    pub async fn upload_session_start(&self) -> Result<String, DropboxError> {
        let arg = http_header_safe_json(&json!({ "close": false }));
        let resp = self
            .http
            .post(format!("{}/2/files/upload_session/start", self.content_base))
            .bearer_auth(self.bearer()?)
            .header("Dropbox-API-Arg", arg)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let started: UploadSessionStartResponse = resp.json().await?;
        Ok(started.session_id)
    }

    /// Finishes an upload session. The whole payload travels in this one
    /// call, so the cursor offset is always zero.
    pub async fn upload_session_finish(
        &self,
        session_id: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<String, DropboxError> {
        let arg = http_header_safe_json(&json!({
            "cursor": { "session_id": session_id, "offset": 0 },
            "commit": { "path": path, "mode": "overwrite" },
        }));
        let resp = self
            .http
            .post(format!(
                "{}/2/files/upload_session/finish",
                self.content_base
            ))
            .bearer_auth(self.bearer()?)
            .header("Dropbox-API-Arg", arg)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        body_text(resp).await
    }

    pub async fn create_folder(&self, path: &str) -> Result<String, DropboxError> {
        let resp = self
            .http
            .post(format!("{}/2/files/create_folder_v2", self.api_base))
            .bearer_auth(self.bearer()?)
            .json(&json!({ "path": path, "autorename": false }))
            .send()
            .await?;
        body_text(resp).await
    }

    /// Downloads raw bytes; the remote file name comes back in the
    /// `Dropbox-API-Result` response header.
    pub async fn download(&self, path: &str) -> Result<(Vec<u8>, Option<String>), DropboxError> {
        let arg = http_header_safe_json(&json!({ "path": path }));
        let resp = self
            .http
            .post(format!("{}/2/files/download", self.content_base))
            .bearer_auth(self.bearer()?)
            .header("Dropbox-API-Arg", arg)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let name = resp
            .headers()
            .get("Dropbox-API-Result")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| serde_json::from_str::<serde_json::Value>(value).ok())
            .and_then(|metadata| metadata["name"].as_str().map(str::to_string));
        let bytes = resp.bytes().await?.to_vec();
        Ok((bytes, name))
    }

    pub async fn create_shared_link(&self, path: &str) -> Result<String, DropboxError> {
        let resp = self
            .http
            .post(format!(
                "{}/2/sharing/create_shared_link_with_settings",
                self.api_base
            ))
            .bearer_auth(self.bearer()?)
            .json(&json!({ "path": path }))
            .send()
            .await?;
        body_text(resp).await
    }

    fn bearer(&self) -> Result<&str, DropboxError> {
        // The guard never lets a tokenless client reach a remote call;
        // an absent token behaves like a rejected one.
        self.tokens
            .as_ref()
            .map(|tokens| tokens.access_token.as_str())
            .ok_or(DropboxError::TokenRejected)
    }
}

async fn check_status(resp: Response) -> Result<Response, DropboxError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(DropboxError::TokenRejected);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(DropboxError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

async fn body_text(resp: Response) -> Result<String, DropboxError> {
    let resp = check_status(resp).await?;
    Ok(resp.text().await?)
}

/// `Dropbox-API-Arg` must stay ASCII; non-ASCII characters are escaped
/// as JSON `\uXXXX` sequences (surrogate pairs above the BMP).
fn http_header_safe_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    let mut buf = [0u16; 2];
    for ch in value.to_string().chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            for unit in ch.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}
