// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity Store (spec §4.1): the durable holder of `AgentId`, room config,
//! and the protected (sealed) bearer token. Reads return a fully populated
//! record or its absence; a partial record is a storage error requiring
//! reconfiguration, never silently patched.

pub mod seal;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AgentError;
use seal::TokenSealer;

/// Room placement config chosen during configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomConfig {
    pub name: String,
    pub x: i64,
    pub y: i64,
}

/// On-disk shape of the identity record. The token is stored only in its
/// sealed (base64-free, raw-byte-as-array) form; it is never written in
/// clear text.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityRecord {
    #[serde(default)]
    schema_version: u32,
    agent_id: String,
    room_config: RoomConfig,
    agent_token_protected: Vec<u8>,
}

/// A fully-loaded identity: the stable `AgentId`, room placement, and the
/// token unsealed just long enough to be attached to an outgoing request.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub room_config: RoomConfig,
    token_protected: Vec<u8>,
}

impl AgentIdentity {
    /// Unseal the token for immediate use. Callers should not retain the
    /// returned string longer than the single request it authenticates.
    pub fn unseal_token(&self, sealer: &dyn TokenSealer) -> Result<String, AgentError> {
        let bytes = sealer.unseal(&self.token_protected)?;
        String::from_utf8(bytes)
            .map_err(|_| AgentError::Storage("unsealed token was not valid utf-8".into()))
    }
}

/// Durable, single-writer store for the agent's identity record.
pub struct IdentityStore {
    path: PathBuf,
    sealer: Arc<dyn TokenSealer>,
    write_lock: Mutex<()>,
}

impl IdentityStore {
    pub fn new(dir: &Path, sealer: Arc<dyn TokenSealer>) -> Self {
        Self { path: dir.join("identity.json"), sealer, write_lock: Mutex::new(()) }
    }

    /// Load the current identity. Returns `Ok(None)` if no record exists yet
    /// (fresh install); returns `Err` for a present-but-unparseable record,
    /// since a partial record requires reconfiguration rather than silent
    /// recovery.
    pub fn load(&self) -> Result<Option<AgentIdentity>, AgentError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AgentError::Storage(format!("read identity record: {e}"))),
        };
        let record: IdentityRecord = serde_json::from_slice(&bytes)
            .map_err(|e| AgentError::Storage(format!("identity record is corrupt: {e}")))?;
        Ok(Some(AgentIdentity {
            agent_id: record.agent_id,
            room_config: record.room_config,
            token_protected: record.agent_token_protected,
        }))
    }

    /// Create or overwrite the identity record with a freshly-sealed token.
    /// Writers within this process are serialized by `write_lock`; writers
    /// across processes are excluded by the single-instance lock (spec §5).
    pub async fn store(
        &self,
        agent_id: String,
        room_config: RoomConfig,
        token_plaintext: &str,
    ) -> Result<AgentIdentity, AgentError> {
        let _guard = self.write_lock.lock().await;
        let token_protected = self.sealer.seal(token_plaintext.as_bytes())?;
        let record = IdentityRecord {
            schema_version: 1,
            agent_id: agent_id.clone(),
            room_config: room_config.clone(),
            agent_token_protected: token_protected.clone(),
        };
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| AgentError::Storage(format!("serialize identity record: {e}")))?;
        crate::paths::write_atomic(&self.path, &bytes)?;
        Ok(AgentIdentity { agent_id, room_config, token_protected })
    }

    /// Invalidate the stored identity, forcing re-registration on next
    /// start. Reconfiguration otherwise preserves the `AgentId` (spec §3).
    pub async fn invalidate(&self) -> Result<(), AgentError> {
        let _guard = self.write_lock.lock().await;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::Storage(format!("remove identity record: {e}"))),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
