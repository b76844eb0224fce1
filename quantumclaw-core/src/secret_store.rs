//! SecretStore — an AES-256-GCM vault of agent-owned secrets, at rest on disk.
//!
//! Each entry is encrypted independently with [`SessionEncryptor`](crate::encryption::SessionEncryptor),
//! keyed by a machine-bound key derived via HKDF-SHA256 from the host's
//! persisted install salt. Unlike `CredentialManager`'s OS-keyring path
//! (reserved for provider API keys), the vault never touches the keyring —
//! it is a single `secrets.enc` file so the runtime works identically on
//! headless servers with no keyring daemon.

use crate::encryption::{EncryptionError, SessionEncryptor};
use hkdf::Hkdf;
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A decrypted secret value. `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Vec<u8>);

impl SecretValue {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.0)
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("vault decryption failed: {0}")]
    Decrypt(#[from] EncryptionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("vault file is corrupt: {0}")]
    Corrupt(String),
    #[error("key not found: {0}")]
    NotFound(String),
}

#[derive(serde::Serialize, serde::Deserialize)]
struct VaultRecord {
    key: String,
    /// base64 of nonce(12) || ciphertext+tag, as produced by `SessionEncryptor`.
    payload: String,
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct VaultFile {
    records: Vec<VaultRecord>,
}

/// A machine-bound, multi-entry AEAD vault.
pub struct SecretStore {
    path: PathBuf,
    encryptor: SessionEncryptor,
    entries: HashMap<String, SecretValue>,
}

impl SecretStore {
    /// Derive the vault key from `machine_salt` via HKDF-SHA256 and load
    /// `vault_path` if it exists. Fails closed: a vault file that exists
    /// but cannot be decrypted is an error, never a silently empty store.
    pub fn load(vault_path: &Path, machine_salt: &[u8]) -> Result<Self, SecretStoreError> {
        let key = derive_key(machine_salt);
        let encryptor = SessionEncryptor::from_key(&key);

        let mut entries = HashMap::new();
        if vault_path.exists() {
            let raw = std::fs::read(vault_path)?;
            let file: VaultFile = serde_json::from_slice(&raw)
                .map_err(|e| SecretStoreError::Corrupt(e.to_string()))?;
            for record in file.records {
                let payload = base64_decode(&record.payload)
                    .map_err(|e| SecretStoreError::Corrupt(e.to_string()))?;
                let plaintext = encryptor.decrypt(&payload)?;
                entries.insert(record.key, SecretValue::new(plaintext));
            }
        }

        Ok(Self {
            path: vault_path.to_path_buf(),
            encryptor,
            entries,
        })
    }

    pub fn get(&self, key: &str) -> Option<&SecretValue> {
        self.entries.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn list(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn set(&mut self, key: impl Into<String>, value: SecretValue) -> Result<(), SecretStoreError> {
        self.entries.insert(key.into(), value);
        self.persist()
    }

    pub fn delete(&mut self, key: &str) -> Result<(), SecretStoreError> {
        if self.entries.remove(key).is_none() {
            return Err(SecretStoreError::NotFound(key.to_string()));
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), SecretStoreError> {
        let mut file = VaultFile::default();
        for (key, value) in &self.entries {
            let ciphertext = self.encryptor.encrypt(value.as_bytes())?;
            file.records.push(VaultRecord {
                key: key.clone(),
                payload: base64_encode(&ciphertext),
            });
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(&file)
            .map_err(|e| SecretStoreError::Corrupt(e.to_string()))?;
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }
}

fn derive_key(machine_salt: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(machine_salt), b"quantumclaw-secret-store-v1");
    let mut key = [0u8; 32];
    hk.expand(b"vault-key", &mut key)
        .expect("32-byte output is always valid for HKDF-SHA256");
    key
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, String> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| e.to_string())
}
