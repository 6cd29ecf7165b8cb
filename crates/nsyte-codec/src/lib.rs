//! Credential codec (C11): encodes/decodes a bundled signer credential
//! blob to a self-describing, human-transferable string.
//!
//! Uses a bech32-like scheme (the same checksummed-base32 family this
//! ecosystem already uses for key material) with a human-readable
//! prefix distinguishing `local-key` from `remote-signer-session`
//! credentials. The payload itself is a JSON object, so the scheme
//! stays bech32's checksum-and-charset guarantees without needing a
//! bespoke binary layout for the remote-signer session's variable-length
//! relay list.

use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Human-readable prefix for a local private key credential.
pub const HRP_LOCAL_KEY: &str = "nsyteseckey";
/// Human-readable prefix for a remote-signer session credential.
pub const HRP_REMOTE_SESSION: &str = "nsytebunker";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialCodecError {
    #[error("malformed credential payload: {0}")]
    Malformed(String),
    #[error("unknown credential prefix: {0}")]
    UnknownPrefix(String),
    #[error("credential checksum mismatch")]
    ChecksumMismatch,
}

/// Decoded form of a credential blob: either a local
/// private key or a remote-signer session binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CredentialMaterial {
    LocalKey {
        /// 64 lowercase hex characters (32-byte secp256k1 scalar).
        secret_key_hex: String,
    },
    RemoteSignerSession {
        remote_signer_pubkey: String,
        relays: Vec<String>,
        ephemeral_client_secret: String,
    },
}

impl CredentialMaterial {
    fn hrp(&self) -> &'static str {
        match self {
            CredentialMaterial::LocalKey { .. } => HRP_LOCAL_KEY,
            CredentialMaterial::RemoteSignerSession { .. } => HRP_REMOTE_SESSION,
        }
    }
}

/// Encodes `material` into its bech32-like credential string.
pub fn encode(material: &CredentialMaterial) -> Result<String, CredentialCodecError> {
    let payload = serde_json::to_vec(material)
        .map_err(|e| CredentialCodecError::Malformed(e.to_string()))?;
    let hrp = Hrp::parse(material.hrp())
        .map_err(|e| CredentialCodecError::Malformed(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, &payload)
        .map_err(|e| CredentialCodecError::Malformed(e.to_string()))
}

/// Decodes a credential string back to its [`CredentialMaterial`].
/// Fails with `ChecksumMismatch` on checksum failure, `UnknownPrefix`
/// on an unrecognised human-readable part, `Malformed` on anything
/// else (bad JSON, truncated payload).
pub fn decode(encoded: &str) -> Result<CredentialMaterial, CredentialCodecError> {
    let (hrp, payload) = bech32::decode(encoded).map_err(|e| {
        use bech32::DecodeError;
        match e {
            DecodeError::Checksum(_) => CredentialCodecError::ChecksumMismatch,
            other => CredentialCodecError::Malformed(other.to_string()),
        }
    })?;

    let hrp_str = hrp.as_str();
    if hrp_str != HRP_LOCAL_KEY && hrp_str != HRP_REMOTE_SESSION {
        return Err(CredentialCodecError::UnknownPrefix(hrp_str.to_string()));
    }

    let material: CredentialMaterial = serde_json::from_slice(&payload)
        .map_err(|e| CredentialCodecError::Malformed(e.to_string()))?;

    let expected_hrp = material.hrp();
    if expected_hrp != hrp_str {
        return Err(CredentialCodecError::Malformed(format!(
            "prefix {hrp_str} does not match payload type"
        )));
    }

    Ok(material)
}
