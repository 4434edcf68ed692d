use async_trait::async_trait;
use solana_sdk::signature::{Keypair, Signer};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ports::custody::{CustodyError, KeyCustody};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Failed to load keypair from file: {0}")]
    LoadError(String),
    #[error("Invalid keypair bytes: {0}")]
    InvalidKeypair(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Load a keypair from a JSON byte-array file (the `solana-keygen` format)
pub fn read_keypair_file<P: AsRef<Path>>(path: P) -> Result<Keypair, WalletError> {
    let contents = std::fs::read_to_string(path.as_ref())
        .map_err(|e| WalletError::LoadError(format!("Failed to read file: {}", e)))?;
    keypair_from_json(&contents)
}

fn keypair_from_json(contents: &str) -> Result<Keypair, WalletError> {
    let bytes: Vec<u8> = serde_json::from_str(contents)
        .map_err(|e| WalletError::LoadError(format!("Invalid JSON format: {}", e)))?;
    Keypair::try_from(bytes.as_slice()).map_err(|e| WalletError::InvalidKeypair(e.to_string()))
}

/// Key custody backed by a directory of keypair files
///
/// Each wallet lives at `<dir>/<wallet pubkey>.json`. The file's keypair must
/// match the wallet it is named after.
#[derive(Debug, Clone)]
pub struct KeystoreCustody {
    dir: PathBuf,
}

impl KeystoreCustody {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, wallet: &str) -> PathBuf {
        self.dir.join(format!("{}.json", wallet))
    }

    /// Write `keypair` into the keystore under its own pubkey
    pub fn import(&self, keypair: &Keypair) -> Result<PathBuf, WalletError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&keypair.pubkey().to_string());
        let json = serde_json::to_string(&keypair.to_bytes().to_vec())
            .map_err(|e| WalletError::LoadError(format!("Failed to serialize: {}", e)))?;
        std::fs::write(&path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(path)
    }

    /// Wallets with a keypair file present; contents are not validated
    pub fn wallets(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut wallets: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                if path.extension().and_then(|x| x.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            })
            .collect();
        wallets.sort();
        wallets
    }
}

#[async_trait]
impl KeyCustody for KeystoreCustody {
    async fn signing_key(&self, wallet: &str) -> Result<Keypair, CustodyError> {
        // Reject anything that could escape the keystore directory
        if wallet.is_empty() || !wallet.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CustodyError::Unavailable(wallet.to_string()));
        }

        let contents = match tokio::fs::read_to_string(self.path_for(wallet)).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CustodyError::Unavailable(wallet.to_string()));
            }
            Err(e) => {
                tracing::warn!("Keystore read failed for {}: {}", wallet, e);
                return Err(CustodyError::Unavailable(wallet.to_string()));
            }
        };

        let keypair = keypair_from_json(&contents).map_err(|e| CustodyError::Corrupted {
            wallet: wallet.to_string(),
            reason: e.to_string(),
        })?;

        if keypair.pubkey().to_string() != wallet {
            return Err(CustodyError::Corrupted {
                wallet: wallet.to_string(),
                reason: format!("file holds key for {}", keypair.pubkey()),
            });
        }
        Ok(keypair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[tokio::test]
    async fn test_import_and_sign() {
        let dir = TempDir::new().unwrap();
        let custody = KeystoreCustody::new(dir.path());
        let keypair = Keypair::new();
        let wallet = keypair.pubkey().to_string();

        custody.import(&keypair).unwrap();
        let loaded = custody.signing_key(&wallet).await.unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
        assert!(custody.has_key(&wallet).await);
        assert_eq!(custody.wallets(), vec![wallet]);
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let custody = KeystoreCustody::new(dir.path());
        let wallet = Keypair::new().pubkey().to_string();

        assert_eq!(
            custody.signing_key(&wallet).await.unwrap_err(),
            CustodyError::Unavailable(wallet.clone())
        );
        assert!(!custody.has_key(&wallet).await);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let custody = KeystoreCustody::new(dir.path());
        assert!(matches!(
            custody.signing_key("../etc/passwd").await,
            Err(CustodyError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_mismatched_keypair_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let custody = KeystoreCustody::new(dir.path());
        let wallet = Keypair::new().pubkey().to_string();
        let other = Keypair::new();
        let json = serde_json::to_string(&other.to_bytes().to_vec()).unwrap();
        std::fs::write(dir.path().join(format!("{}.json", wallet)), json).unwrap();

        assert!(matches!(
            custody.signing_key(&wallet).await,
            Err(CustodyError::Corrupted { .. })
        ));
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let custody = KeystoreCustody::new(dir.path());
        let wallet = Keypair::new().pubkey().to_string();
        std::fs::write(dir.path().join(format!("{}.json", wallet)), "not valid json").unwrap();

        assert!(matches!(
            custody.signing_key(&wallet).await,
            Err(CustodyError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_read_keypair_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let keypair = Keypair::new();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        temp_file.write_all(json.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let loaded = read_keypair_file(temp_file.path()).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_invalid_bytes() {
        assert!(matches!(keypair_from_json("[1,2,3]"), Err(WalletError::InvalidKeypair(_))));
    }
}
