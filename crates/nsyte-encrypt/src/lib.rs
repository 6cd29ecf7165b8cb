//! Authenticated encryption for the credential vault's encrypted-file
//! fallback.
//!
//! Format: `base64(salt || nonce || ciphertext || auth_tag)`, AES-256-GCM,
//! key derived via PBKDF2-SHA256 with 100,000 iterations. Unlike a
//! general-purpose encrypt-at-rest helper, the passphrase here is never
//! supplied by the user: it is derived once per machine from stable
//! system attributes, because the vault has no interactive prompt of its
//! own (that belongs to the CLI collaborator).
//!
//! ```
//! use nsyte_encrypt::{encrypt, decrypt};
//!
//! let plaintext = b"credential blob";
//! let passphrase = "derived-machine-key";
//!
//! let encrypted = encrypt(plaintext, passphrase).expect("encryption failed");
//! let encrypted_str = String::from_utf8(encrypted).expect("valid UTF-8");
//! let decrypted = decrypt(&encrypted_str, passphrase).expect("decryption failed");
//! assert_eq!(plaintext.to_vec(), decrypted);
//! ```

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Context, Result, bail};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac_array;
use sha2::Sha256;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_SIZE: usize = 32;

/// Fixed application salt mixed into the vault's machine-derived
/// passphrase. Not a secret — it only exists so that two applications
/// deriving a key from the same machine attributes don't collide.
const APP_SALT: &str = "nsyte-credential-vault-v1";

/// Builds the passphrase the vault's encrypted-file backend derives its
/// key from: a concatenation of stable system attributes (hostname, OS,
/// arch, user) with the fixed application salt. Never
/// persisted; recomputed on every vault operation.
pub fn derive_vault_passphrase() -> String {
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();

    format!("{APP_SALT}:{hostname}:{os}:{arch}:{user}")
}

/// Encrypt `data` under `passphrase`. Returns base64-encoded
/// `salt || nonce || ciphertext`.
pub fn encrypt(data: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(passphrase, &salt);

    let cipher = Aes256Gcm::new_from_slice(&key).context("failed to create AES-256-GCM cipher")?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|e| anyhow::anyhow!("encryption failed: {:?}", e))?;

    let mut result = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&result).into_bytes())
}

/// Decrypt base64-encoded `salt || nonce || ciphertext` under
/// `passphrase`.
pub fn decrypt(encrypted_data: impl AsRef<str>, passphrase: &str) -> Result<Vec<u8>> {
    let encrypted_str = encrypted_data.as_ref();
    let data = BASE64
        .decode(encrypted_str)
        .context("invalid base64 encoding")?;

    if data.len() < SALT_SIZE + NONCE_SIZE + 16 {
        bail!("encrypted data too short");
    }

    let salt = &data[..SALT_SIZE];
    let nonce_bytes = &data[SALT_SIZE..SALT_SIZE + NONCE_SIZE];
    let ciphertext = &data[SALT_SIZE + NONCE_SIZE..];

    let key = derive_key(passphrase, salt);

    let cipher = Aes256Gcm::new_from_slice(&key).context("failed to create AES-256-GCM cipher")?;
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|e| {
        anyhow::anyhow!(
            "decryption failed - wrong passphrase or corrupted data: {:?}",
            e
        )
    })?;

    Ok(plaintext)
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    pbkdf2_hmac_array::<Sha256, KEY_SIZE>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS)
}

/// Heuristic: does `content` look like output of [`encrypt`]? Used by
/// the vault's encrypted-file backend to detect whether an existing
/// file was already sealed before this version of the derivation was
/// in place.
pub fn is_encrypted(content: &str) -> bool {
    let Ok(data) = BASE64.decode(content) else {
        return false;
    };
    data.len() >= SALT_SIZE + NONCE_SIZE + 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let plaintext = b"opaque credential blob bytes";
        let passphrase = derive_vault_passphrase();

        let encrypted = encrypt(plaintext, &passphrase).expect("encryption should succeed");
        let encrypted_str = String::from_utf8(encrypted).expect("valid UTF-8");
        let decrypted = decrypt(&encrypted_str, &passphrase).expect("decryption should succeed");

        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[test]
    fn encrypt_produces_different_ciphertext_for_same_plaintext() {
        let plaintext = b"same input";
        let passphrase = "fixed-test-passphrase";

        let a = encrypt(plaintext, passphrase).expect("encrypt");
        let b = encrypt(plaintext, passphrase).expect("encrypt");
        assert_ne!(a, b);

        let da = decrypt(String::from_utf8(a).unwrap(), passphrase).expect("decrypt");
        let db = decrypt(String::from_utf8(b).unwrap(), passphrase).expect("decrypt");
        assert_eq!(da, db);
    }

    #[test]
    fn decrypt_wrong_passphrase_fails() {
        let plaintext = b"secret";
        let encrypted = encrypt(plaintext, "correct").expect("encrypt");
        let encrypted_str = String::from_utf8(encrypted).unwrap();

        assert!(decrypt(&encrypted_str, "wrong").is_err());
    }

    #[test]
    fn is_encrypted_detects_sealed_payload() {
        let encrypted = encrypt(b"data", "pass").expect("encrypt");
        let encrypted_str = String::from_utf8(encrypted).unwrap();
        assert!(is_encrypted(&encrypted_str));
    }

    #[test]
    fn is_encrypted_rejects_plain_json() {
        assert!(!is_encrypted(r#"{"k": "v"}"#));
    }

    #[test]
    fn derive_vault_passphrase_is_stable_across_calls() {
        assert_eq!(derive_vault_passphrase(), derive_vault_passphrase());
    }

    #[test]
    fn derive_key_is_deterministic_for_same_salt() {
        let salt = [0u8; SALT_SIZE];
        assert_eq!(derive_key("p", &salt), derive_key("p", &salt));
    }

    #[test]
    fn derive_key_differs_across_salts() {
        let a = derive_key("p", &[0u8; SALT_SIZE]);
        let mut salt2 = [0u8; SALT_SIZE];
        salt2[0] = 1;
        let b = derive_key("p", &salt2);
        assert_ne!(a, b);
    }
}
