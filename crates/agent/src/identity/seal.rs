// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine-scoped sealing of the protected token (spec §3, §4.1): the token
//! is opaque outside [`super::IdentityStore`] and unsealable on any machine
//! other than the one that sealed it.

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::AgentError;

/// Seals and unseals the agent's bearer token. Implementations must ensure
/// `unseal(seal(plaintext))) == plaintext` on the machine that sealed it, and
/// must fail closed (return an error, never garbage bytes) on any other
/// machine.
pub trait TokenSealer: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, AgentError>;
    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, AgentError>;
}

/// AEAD-based sealer keyed off a machine identifier persisted next to the
/// identity record. The key file never leaves the machine and is never
/// logged or included in the sealed blob's own serialization.
pub struct MachineSealer {
    key: LessSafeKey,
}

impl MachineSealer {
    /// Load (or create, on first run) the machine key at `key_path` and
    /// build a sealer from it.
    pub fn open_or_create(key_path: &std::path::Path) -> Result<Self, AgentError> {
        let raw = match std::fs::read(key_path) {
            Ok(bytes) if bytes.len() == 32 => bytes,
            Ok(_) | Err(_) => {
                let mut bytes = vec![0u8; 32];
                SystemRandom::new()
                    .fill(&mut bytes)
                    .map_err(|_| AgentError::Storage("rng failure generating machine key".into()))?;
                crate::paths::write_atomic(key_path, &bytes)?;
                bytes
            }
        };
        Self::from_key_bytes(&raw)
    }

    fn from_key_bytes(raw: &[u8]) -> Result<Self, AgentError> {
        let unbound = UnboundKey::new(&aead::AES_256_GCM, raw)
            .map_err(|_| AgentError::Storage("invalid machine key length".into()))?;
        Ok(Self { key: LessSafeKey::new(unbound) })
    }
}

impl TokenSealer for MachineSealer {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, AgentError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| AgentError::Storage("rng failure sealing token".into()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| AgentError::Storage("seal failure".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, AgentError> {
        if sealed.len() < NONCE_LEN {
            return Err(AgentError::Storage("sealed token too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| AgentError::Storage("invalid nonce".into()))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| AgentError::Storage("unseal failed: wrong machine or corrupt data".into()))?;
        Ok(plaintext.to_vec())
    }
}
