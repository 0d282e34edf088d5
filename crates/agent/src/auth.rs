// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent's current bearer token, shared between the Session Controller
//! (which sets it after `identify`/re-auth) and every consumer that attaches
//! it to outbound requests (spec §4.4, §4.7's Get Logs handler).

use std::sync::Arc;

use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct SharedToken(Arc<RwLock<String>>);

impl SharedToken {
    pub fn new(token: String) -> Self {
        Self(Arc::new(RwLock::new(token)))
    }

    pub async fn get(&self) -> String {
        self.0.read().await.clone()
    }

    pub async fn set(&self, token: String) {
        *self.0.write().await = token;
    }
}
