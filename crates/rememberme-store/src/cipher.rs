//! Sealing of reference embeddings at rest.
//!
//! Embeddings are biometric data, so they are stored AES-256-GCM encrypted
//! with the owning person's id as associated data; a sealed blob copied onto
//! another row fails to open. Blob layout: `nonce (12) || ciphertext+tag`.

use crate::error::{Result, StoreError};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rememberme_core::Embedding;
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub struct EmbeddingCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EmbeddingCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCipher").finish_non_exhaustive()
    }
}

impl EmbeddingCipher {
    pub fn from_key(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Cipher with a fresh random key that is never persisted.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self::from_key(&key)
    }

    /// Read the key at `path`, creating it (mode 0600) if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let key_err = |source| StoreError::KeyFile {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            let bytes = fs::read(path).map_err(key_err)?;
            let key: [u8; KEY_LEN] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::InvalidKey(path.to_path_buf()))?;
            return Ok(Self::from_key(&key));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::DirectoryCreate {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .map_err(key_err)?;
        file.write_all(&key).map_err(key_err)?;

        tracing::info!(path = %path.display(), "generated embedding key");
        Ok(Self::from_key(&key))
    }

    /// Encrypt an embedding bound to `person_id`.
    pub fn seal(&self, person_id: &str, embedding: &Embedding) -> Result<Vec<u8>> {
        let plaintext: Vec<u8> = embedding.values.iter().flat_map(|v| v.to_le_bytes()).collect();

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: person_id.as_bytes(),
                },
            )
            .map_err(|_| StoreError::Crypto(person_id.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a blob produced by [`seal`](Self::seal) for the same person.
    pub fn open(&self, person_id: &str, blob: &[u8], model_version: Option<String>) -> Result<Embedding> {
        if blob.len() < NONCE_LEN {
            return Err(StoreError::Crypto(person_id.to_string()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: person_id.as_bytes(),
                },
            )
            .map_err(|_| StoreError::Crypto(person_id.to_string()))?;

        if plaintext.len() % 4 != 0 {
            return Err(StoreError::Crypto(person_id.to_string()));
        }
        let values = plaintext
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Embedding { values, model_version })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding() -> Embedding {
        Embedding { values: vec![0.25, -1.5, 3.0], model_version: Some("w600k_r50".into()) }
    }

    #[test]
    fn test_seal_open() {
        let cipher = EmbeddingCipher::ephemeral();
        let blob = cipher.seal("p1", &embedding()).unwrap();
        let opened = cipher.open("p1", &blob, Some("w600k_r50".into())).unwrap();
        assert_eq!(opened, embedding());
    }

    #[test]
    fn test_blob_is_bound_to_person() {
        let cipher = EmbeddingCipher::ephemeral();
        let blob = cipher.seal("p1", &embedding()).unwrap();
        assert!(matches!(cipher.open("p2", &blob, None), Err(StoreError::Crypto(_))));
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = EmbeddingCipher::ephemeral().seal("p1", &embedding()).unwrap();
        assert!(EmbeddingCipher::ephemeral().open("p1", &blob, None).is_err());
    }

    #[test]
    fn test_truncated_blob_fails() {
        let cipher = EmbeddingCipher::ephemeral();
        assert!(cipher.open("p1", &[0u8; 5], None).is_err());
    }

    #[test]
    fn test_key_file_created_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/embedding.key");

        let first = EmbeddingCipher::load_or_create(&path).unwrap();
        let blob = first.seal("p1", &embedding()).unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), KEY_LEN as u64);
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);

        let second = EmbeddingCipher::load_or_create(&path).unwrap();
        assert_eq!(second.open("p1", &blob, None).unwrap().values, embedding().values);
    }

    #[test]
    fn test_invalid_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.key");
        fs::write(&path, b"short").unwrap();
        assert!(matches!(EmbeddingCipher::load_or_create(&path), Err(StoreError::InvalidKey(_))));
    }
}
