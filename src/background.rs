//! 过期会话清理的后台任务。

use std::sync::Arc;
use std::time::Duration;

use crate::config::SESSION_PRUNE_INTERVAL_SECS;
use crate::session::SessionStore;

/// 启动会话清理任务。
pub fn spawn_session_prune(sessions: Arc<SessionStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            sessions.prune_expired().await;
        }
    });
}
