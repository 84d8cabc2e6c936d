//! Encrypted key/value secrets.
//!
//! The whole map is stored as one AES-256-GCM blob: base64 of
//! `iv (12 bytes) | tag (16 bytes) | ciphertext`. The key is the SHA-256
//! digest of the configured master key. Raw values never leave the process
//! through the tool; other tools read them with [`Vault::fetch_raw`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::tool::{Tool, ToolError, ToolInput, ToolOutcome};

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// What `get` returns in place of a stored value.
pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Vault I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Vault could not be decrypted (wrong master key or corrupt file): {0}")]
    Decrypt(String),
    #[error("Vault encryption failed: {0}")]
    Encrypt(String),
    #[error("Vault contents are not a string map: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub struct Vault {
    path: PathBuf,
    key: [u8; 32],
    entries: RwLock<BTreeMap<String, String>>,
}

impl Vault {
    /// Load the vault at `path`. A missing or empty file is an empty vault;
    /// a file that does not decrypt with `master_key` is an error.
    pub async fn open(path: impl Into<PathBuf>, master_key: &str) -> Result<Self, VaultError> {
        let path = path.into();
        let key = derive_key(master_key);
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_slice(&unseal(&key, raw.trim())?)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), entries = entries.len(), "vault loaded");
        Ok(Self {
            path,
            key,
            entries: RwLock::new(entries),
        })
    }

    /// Store `value` under `key`. The file is rewritten through a temp file
    /// and the entry only becomes visible once the write succeeded.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), VaultError> {
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        let sealed = seal(&self.key, &serde_json::to_vec(&next)?)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("enc.tmp");
        tokio::fs::write(&tmp, sealed).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        *entries = next;
        debug!(key, "vault entry stored");
        Ok(())
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// The raw secret, for in-process use by other tools only.
    pub async fn fetch_raw(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

fn derive_key(master_key: &str) -> [u8; 32] {
    Sha256::digest(master_key.as_bytes()).into()
}

fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<String, VaultError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| VaultError::Encrypt(e.to_string()))?;

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    // aes-gcm appends the tag; the file layout puts it before the ciphertext.
    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| VaultError::Encrypt(e.to_string()))?;
    let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut out = Vec::with_capacity(IV_LEN + TAG_LEN + ct.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(tag);
    out.extend_from_slice(ct);
    Ok(BASE64.encode(out))
}

fn unseal(key: &[u8; 32], encoded: &str) -> Result<Vec<u8>, VaultError> {
    let raw = BASE64
        .decode(encoded)
        .map_err(|e| VaultError::Decrypt(e.to_string()))?;
    if raw.len() < IV_LEN + TAG_LEN {
        return Err(VaultError::Decrypt(format!("blob too short ({} bytes)", raw.len())));
    }
    let (iv, rest) = raw.split_at(IV_LEN);
    let (tag, ct) = rest.split_at(TAG_LEN);

    let mut combined = ct.to_vec();
    combined.extend_from_slice(tag);

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| VaultError::Decrypt(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(iv), combined.as_ref())
        .map_err(|e| VaultError::Decrypt(e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VaultOp {
    Set,
    Get,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VaultInput {
    pub op: VaultOp,
    pub key: String,
    /// Secret to store (required for `set`).
    pub value: Option<String>,
}

impl ToolInput for VaultInput {}

pub struct VaultTool {
    vault: Arc<Vault>,
}

impl VaultTool {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl Tool for VaultTool {
    type Input = VaultInput;

    fn name(&self) -> &str {
        "vault"
    }

    fn description(&self) -> &str {
        "Secure key/value secrets vault. Never returns raw values to the LLM."
    }

    async fn execute(&self, input: VaultInput) -> Result<ToolOutcome, ToolError> {
        match input.op {
            VaultOp::Set => {
                let Some(value) = input.value.filter(|v| !v.is_empty()) else {
                    return Ok(ToolOutcome::failure("missing_value"));
                };
                self.vault
                    .set(&input.key, &value)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok(ToolOutcome::ok(json!({ "ok": true })))
            }
            VaultOp::Get => {
                if !self.vault.contains(&input.key).await {
                    return Ok(ToolOutcome::failure("missing_key"));
                }
                Ok(ToolOutcome::ok(json!({ "value": REDACTED })))
            }
        }
    }
}
