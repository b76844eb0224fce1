//! Agent Identity — Ed25519 self-signed Agent Identity Documents (AID).
//!
//! An AID is the capability token an agent (or a spawned child agent)
//! presents when talking to a remote hub or another node. It is a small
//! signed JSON document; the private signing key never leaves
//! [`SecretStore`](crate::secret_store::SecretStore).

use crate::secret_store::{SecretStore, SecretValue};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("secret store error: {0}")]
    SecretStore(#[from] crate::secret_store::SecretStoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("requested scopes {requested:?} are not a subset of parent scopes {parent:?}")]
    ScopeEscalation {
        requested: Vec<String>,
        parent: Vec<String>,
    },
    #[error("malformed key material: {0}")]
    Key(String),
}

/// Whether an identity has established a live relationship with a remote hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityMode {
    Local,
    Federated,
}

/// A self-signed capability document. Field order is fixed — signing is
/// performed over a canonical byte encoding, not the JSON map, so document
/// equality under re-serialization never changes the signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: Uuid,
    pub name: String,
    pub public_key: [u8; 32],
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub parent: Option<Uuid>,
    pub scopes: Vec<String>,
    pub signature: [u8; 64],
}

impl AgentIdentity {
    fn canonical_bytes(
        id: &Uuid,
        name: &str,
        public_key: &[u8; 32],
        issued_at: &chrono::DateTime<chrono::Utc>,
        parent: &Option<Uuid>,
        scopes: &[String],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(id.as_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(public_key);
        buf.extend_from_slice(issued_at.to_rfc3339().as_bytes());
        if let Some(parent) = parent {
            buf.extend_from_slice(parent.as_bytes());
        }
        for scope in scopes {
            buf.extend_from_slice(scope.as_bytes());
            buf.push(0);
        }
        buf
    }

    /// Verify the document's self-contained signature against its own public key.
    pub fn verify(&self) -> Result<(), IdentityError> {
        let verifying_key = VerifyingKey::from_bytes(&self.public_key)
            .map_err(|e| IdentityError::Key(e.to_string()))?;
        let signature = Signature::from_bytes(&self.signature);
        let bytes = Self::canonical_bytes(
            &self.id,
            &self.name,
            &self.public_key,
            &self.issued_at,
            &self.parent,
            &self.scopes,
        );
        verifying_key
            .verify(&bytes, &signature)
            .map_err(|_| IdentityError::InvalidSignature)
    }
}

/// Tracks the local signing key plus its current identity document, and
/// whether a remote hub relationship has been established.
pub struct IdentityManager {
    signing_key: SigningKey,
    identity: AgentIdentity,
    mode: IdentityMode,
    hub_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IdentityStatus {
    pub mode: IdentityMode,
    pub hub_url: Option<String>,
    pub aid_id: Uuid,
    pub scopes: Vec<String>,
}

impl IdentityManager {
    /// Load an existing AID from `aid_path` (and its signing key from the
    /// vault), or mint a fresh root identity if none exists.
    pub async fn init(
        aid_path: &std::path::Path,
        secret_store: &mut SecretStore,
        name: &str,
        hub_url: Option<String>,
    ) -> Result<Self, IdentityError> {
        let vault_key_name = format!("identity/{name}/signing_key");

        let (signing_key, identity) = if aid_path.exists() && secret_store.has(&vault_key_name) {
            let raw = std::fs::read(aid_path)?;
            let identity: AgentIdentity = serde_json::from_slice(&raw)?;
            let key_bytes = secret_store.get(&vault_key_name).unwrap().as_bytes().to_vec();
            let signing_key = SigningKey::from_bytes(
                &key_bytes
                    .try_into()
                    .map_err(|_| IdentityError::Key("signing key is not 32 bytes".into()))?,
            );
            (signing_key, identity)
        } else {
            let signing_key = SigningKey::generate(&mut rand_core_compat());
            let verifying_key = signing_key.verifying_key();
            let id = Uuid::new_v4();
            let issued_at = chrono::Utc::now();
            let scopes = vec!["*".to_string()];
            let public_key = verifying_key.to_bytes();
            let bytes = AgentIdentity::canonical_bytes(
                &id,
                name,
                &public_key,
                &issued_at,
                &None,
                &scopes,
            );
            let signature = signing_key.sign(&bytes).to_bytes();
            let identity = AgentIdentity {
                id,
                name: name.to_string(),
                public_key,
                issued_at,
                parent: None,
                scopes,
                signature,
            };

            secret_store.set(
                vault_key_name,
                SecretValue::new(signing_key.to_bytes().to_vec()),
            )?;
            if let Some(parent) = aid_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(aid_path, serde_json::to_vec_pretty(&identity)?)?;
            (signing_key, identity)
        };

        let mode = if let Some(url) = &hub_url {
            probe_hub_reachable(url).await
        } else {
            IdentityMode::Local
        };

        Ok(Self {
            signing_key,
            identity,
            mode,
            hub_url,
        })
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn status(&self) -> IdentityStatus {
        IdentityStatus {
            mode: self.mode,
            hub_url: self.hub_url.clone(),
            aid_id: self.identity.id,
            scopes: self.identity.scopes.clone(),
        }
    }

    /// Issue a child AID whose scopes are validated to be a subset of this
    /// identity's scopes at issuance. Not re-checked against the parent on
    /// every subsequent tool call — the child document is itself the
    /// self-contained capability token.
    pub fn issue_child(
        &self,
        child_name: &str,
        requested_scopes: Vec<String>,
    ) -> Result<(SigningKey, AgentIdentity), IdentityError> {
        let parent_has_wildcard = self.identity.scopes.iter().any(|s| s == "*");
        if !parent_has_wildcard
            && !requested_scopes
                .iter()
                .all(|s| self.identity.scopes.contains(s))
        {
            return Err(IdentityError::ScopeEscalation {
                requested: requested_scopes,
                parent: self.identity.scopes.clone(),
            });
        }

        let child_key = SigningKey::generate(&mut rand_core_compat());
        let public_key = child_key.verifying_key().to_bytes();
        let id = Uuid::new_v4();
        let issued_at = chrono::Utc::now();
        let parent = Some(self.identity.id);
        let bytes = AgentIdentity::canonical_bytes(
            &id,
            child_name,
            &public_key,
            &issued_at,
            &parent,
            &requested_scopes,
        );
        let signature = child_key.sign(&bytes).to_bytes();
        let child_identity = AgentIdentity {
            id,
            name: child_name.to_string(),
            public_key,
            issued_at,
            parent,
            scopes: requested_scopes,
            signature,
        };
        Ok((child_key, child_identity))
    }

    pub async fn shutdown(&self) {
        // Federated session teardown is a placeholder hook: the hub client
        // itself lives behind an HTTP connection pool dropped with `self`.
    }
}

fn rand_core_compat() -> impl rand_core::CryptoRngCore {
    rand_core::OsRng
}

async fn probe_hub_reachable(url: &str) -> IdentityMode {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(_) => return IdentityMode::Local,
    };
    match client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => IdentityMode::Federated,
        _ => IdentityMode::Local,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_mints_root_identity() {
        let dir = tempfile::tempdir().unwrap();
        let aid_path = dir.path().join("aid.json");
        let vault_path = dir.path().join("secrets.enc");
        let mut store = SecretStore::load(&vault_path, b"salt").unwrap();
        let mgr = IdentityManager::init(&aid_path, &mut store, "primary", None)
            .await
            .unwrap();
        assert!(mgr.identity().verify().is_ok());
        assert_eq!(mgr.status().mode, IdentityMode::Local);
    }

    #[tokio::test]
    async fn init_reloads_existing_identity() {
        let dir = tempfile::tempdir().unwrap();
        let aid_path = dir.path().join("aid.json");
        let vault_path = dir.path().join("secrets.enc");
        let first_id = {
            let mut store = SecretStore::load(&vault_path, b"salt").unwrap();
            let mgr = IdentityManager::init(&aid_path, &mut store, "primary", None)
                .await
                .unwrap();
            mgr.identity().id
        };
        let mut store = SecretStore::load(&vault_path, b"salt").unwrap();
        let mgr = IdentityManager::init(&aid_path, &mut store, "primary", None)
            .await
            .unwrap();
        assert_eq!(mgr.identity().id, first_id);
    }

    #[tokio::test]
    async fn child_scopes_must_be_subset() {
        let dir = tempfile::tempdir().unwrap();
        let aid_path = dir.path().join("aid.json");
        let vault_path = dir.path().join("secrets.enc");
        let mut store = SecretStore::load(&vault_path, b"salt").unwrap();
        let mgr = IdentityManager::init(&aid_path, &mut store, "primary", None)
            .await
            .unwrap();
        // Root identity carries "*" so any requested scope set is valid.
        let (_, child) = mgr
            .issue_child("scheduler-child", vec!["tools.time".into()])
            .unwrap();
        assert!(child.verify().is_ok());
        assert_eq!(child.parent, Some(mgr.identity().id));
    }
}
