//! In-process `ChangeBackend` bound to one user.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collab_core::{ChangeBackend, ChangeLogEntry, ReplayAck, Result};

use crate::service::ChangeService;

/// Backend handle a client session uses to reach a local [`ChangeService`].
#[derive(Clone)]
pub struct LocalBackend {
    service: Arc<ChangeService>,
    user: String,
}

impl LocalBackend {
    pub fn new(service: Arc<ChangeService>, user: impl Into<String>) -> Self {
        Self {
            service,
            user: user.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

#[async_trait]
impl ChangeBackend for LocalBackend {
    async fn submit_change(&self, change: serde_json::Value, user_token: &str) -> Result<ChangeLogEntry> {
        self.service.submit_json(&change, &self.user, user_token)
    }

    async fn server_time(&self) -> Result<DateTime<Utc>> {
        Ok(self.service.server_time())
    }

    async fn request_replay(&self, since: DateTime<Utc>, channel: &str) -> Result<ReplayAck> {
        self.service.request_replay(since, channel)
    }
}
