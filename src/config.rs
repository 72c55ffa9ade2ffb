//! CLI arguments and gateway configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;
use std::path::PathBuf;
use std::time::Duration;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    "{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}",
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const SESSION_COOKIE_NAME: &str = "DBX_SESSION";
pub const SESSION_KEY_ACCESS: &str = "dropbox.access_token";
pub const SESSION_KEY_REFRESH: &str = "dropbox.refresh_token";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const SESSION_PRUNE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_REMOTE_PATH: &str = "/hello";

pub const DROPBOX_API_BASE: &str = "https://api.dropboxapi.com";
pub const DROPBOX_CONTENT_BASE: &str = "https://content.dropboxapi.com";
pub const DROPBOX_AUTHORIZE_BASE: &str = "https://www.dropbox.com/oauth2/authorize";

/// CLI arguments and environment configuration for the gateway.
#[derive(Parser, Debug)]
#[command(name = "dbx-gateway", version = VERSION_INFO, about = "Dropbox API gateway")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "DBX_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "DBX_HTTP_PORT",
        default_value_t = 5005,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        long,
        env = "DROPBOX_APP_KEY",
        default_value = "",
        help = "Dropbox app key (OAuth client id)"
    )]
    pub app_key: String,
    #[arg(
        long,
        env = "DROPBOX_APP_SECRET",
        default_value = "",
        help = "Dropbox app secret (OAuth client secret)"
    )]
    pub app_secret: String,
    #[arg(
        long,
        env = "DROPBOX_REDIRECT_URI",
        default_value = "http://localhost:5005/oauth",
        help = "OAuth redirect URI registered with the Dropbox app"
    )]
    pub redirect_uri: String,
    #[arg(
        long,
        env = "DROPBOX_TOKEN",
        help = "Static fallback access token used when no session token exists"
    )]
    pub fallback_token: Option<String>,
    #[arg(
        long,
        env = "DROPBOX_REFRESH",
        help = "Static fallback refresh token"
    )]
    pub fallback_refresh: Option<String>,
    #[arg(
        long,
        env = "DBX_SESSION_TTL_SECS",
        default_value_t = DEFAULT_SESSION_TTL_SECS,
        help = "Session expiration in seconds"
    )]
    pub session_ttl_secs: u64,
    #[arg(
        long,
        env = "DBX_TEMP_DIR",
        help = "Directory for large-upload temp files (defaults to the system temp dir)"
    )]
    pub temp_dir: Option<String>,
    #[arg(long, env = "DBX_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
}

/// Resolved runtime configuration shared with every handler.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub app_key: String,
    pub app_secret: String,
    pub redirect_uri: String,
    pub fallback_token: Option<String>,
    pub fallback_refresh: Option<String>,
    pub session_ttl: Duration,
    pub temp_dir: PathBuf,
    pub api_base: String,
    pub content_base: String,
    pub authorize_base: String,
}

impl GatewayConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            app_key: args.app_key.clone(),
            app_secret: args.app_secret.clone(),
            redirect_uri: args.redirect_uri.clone(),
            fallback_token: args.fallback_token.clone(),
            fallback_refresh: args.fallback_refresh.clone(),
            session_ttl: Duration::from_secs(args.session_ttl_secs),
            temp_dir: args
                .temp_dir
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            api_base: DROPBOX_API_BASE.to_string(),
            content_base: DROPBOX_CONTENT_BASE.to_string(),
            authorize_base: DROPBOX_AUTHORIZE_BASE.to_string(),
        }
    }
}

#[cfg(test)]
impl GatewayConfig {
    /// 测试用配置：无回退令牌，远端地址由调用方改写。
    pub(crate) fn for_tests() -> Self {
        Self {
            app_key: "test-app-key".to_string(),
            app_secret: "test-app-secret".to_string(),
            redirect_uri: "http://localhost:5005/oauth".to_string(),
            fallback_token: None,
            fallback_refresh: None,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            temp_dir: std::env::temp_dir(),
            api_base: DROPBOX_API_BASE.to_string(),
            content_base: DROPBOX_CONTENT_BASE.to_string(),
            authorize_base: DROPBOX_AUTHORIZE_BASE.to_string(),
        }
    }
}
