//! Signer capability (C4): a uniform interface for producing event
//! signatures, backed either by a local private key or by a remote
//! signer reached through the protocol in C10.
//!
//! C10 lives in a separate crate and depends on this one (for the
//! secp256k1 primitives and [`SignerError`]), so the dependency only
//! runs one way: the remote variant here is a trait object the caller
//! supplies, not a concrete dependency on the remote-signer crate.

use std::sync::Arc;

use async_trait::async_trait;
use nsyte_events::compute_id;
use nsyte_types::{EventDraft, SignedEvent};
use secp256k1::rand::rngs::OsRng;
use secp256k1::{Keypair, Message, SECP256K1};
use thiserror::Error;

/// Failure modes of `sign_event`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("remote signer rejected the request: {0}")]
    Rejected(String),
    #[error("remote signer unreachable: {0}")]
    Unreachable(String),
    #[error("remote signer timed out")]
    Timeout,
    #[error("signer produced an unusable result: {0}")]
    Invalid(String),
}

/// A signer backed by a 32-byte secp256k1 scalar held in memory.
#[derive(Clone)]
pub struct LocalKeySigner {
    keypair: Keypair,
}

impl LocalKeySigner {
    /// Builds a signer from a 64-character lowercase hex secret key.
    pub fn from_secret_hex(secret_key_hex: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(secret_key_hex)
            .map_err(|e| SignerError::Invalid(format!("secret key is not valid hex: {e}")))?;
        let keypair = Keypair::from_seckey_slice(SECP256K1, &bytes)
            .map_err(|e| SignerError::Invalid(format!("secret key is invalid: {e}")))?;
        Ok(Self { keypair })
    }

    /// Generates a fresh random signer (`nsyte bunker`/`init` use this
    /// when the user asks for a new local key rather than importing
    /// one).
    pub fn generate() -> Self {
        let (secret_key, _) = SECP256K1.generate_keypair(&mut OsRng);
        let keypair = Keypair::from_secret_key(SECP256K1, &secret_key);
        Self { keypair }
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    /// The underlying keypair, for callers that need raw secp256k1
    /// operations this capability doesn't expose directly (e.g. the
    /// remote-signer protocol's ECDH shared-secret derivation).
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn public_key(&self) -> String {
        hex::encode(self.keypair.x_only_public_key().0.serialize())
    }

    pub fn sign_event(&self, draft: EventDraft) -> Result<SignedEvent, SignerError> {
        let pubkey = self.public_key();
        let id = compute_id(&pubkey, draft.created_at, draft.kind, &draft.tags, &draft.content)
            .map_err(|e| SignerError::Invalid(e.to_string()))?;

        let id_bytes = hex::decode(&id).map_err(|e| SignerError::Invalid(e.to_string()))?;
        let message = Message::from_digest_slice(&id_bytes)
            .map_err(|e| SignerError::Invalid(format!("event id is not a valid digest: {e}")))?;
        let signature = SECP256K1.sign_schnorr(&message, &self.keypair);

        Ok(SignedEvent {
            id,
            pubkey,
            created_at: draft.created_at,
            kind: draft.kind,
            tags: draft.tags,
            content: draft.content,
            sig: hex::encode(signature.as_ref()),
        })
    }

    /// Verifies `event`'s signature against its own pubkey, after
    /// confirming its id matches its fields.
    pub fn verify(event: &SignedEvent) -> bool {
        if !nsyte_events::verify_id(event) {
            return false;
        }
        let Ok(id_bytes) = hex::decode(&event.id) else {
            return false;
        };
        let Ok(message) = Message::from_digest_slice(&id_bytes) else {
            return false;
        };
        let Ok(pubkey_bytes) = hex::decode(&event.pubkey) else {
            return false;
        };
        let Ok(xonly) = secp256k1::XOnlyPublicKey::from_slice(&pubkey_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(&event.sig) else {
            return false;
        };
        let Ok(signature) = secp256k1::schnorr::Signature::from_slice(&sig_bytes) else {
            return false;
        };
        signature.verify(&message, &xonly).is_ok()
    }
}

/// Implemented by the remote-signer protocol crate (C10); kept as a
/// trait object here so C4 has no dependency on that crate.
#[async_trait]
pub trait RemoteSignerTransport: Send + Sync {
    fn public_key(&self) -> String;
    async fn sign_event(&self, draft: EventDraft) -> Result<SignedEvent, SignerError>;
    async fn close(&self);
}

/// Either signer variant. Cloning a `RemoteSigner` shares
/// the underlying session handle.
#[derive(Clone)]
pub enum Signer {
    LocalKey(LocalKeySigner),
    RemoteSigner(Arc<dyn RemoteSignerTransport>),
}

impl Signer {
    pub fn public_key(&self) -> String {
        match self {
            Signer::LocalKey(signer) => signer.public_key(),
            Signer::RemoteSigner(transport) => transport.public_key(),
        }
    }

    pub async fn sign_event(&self, draft: EventDraft) -> Result<SignedEvent, SignerError> {
        match self {
            Signer::LocalKey(signer) => signer.sign_event(draft),
            Signer::RemoteSigner(transport) => transport.sign_event(draft).await,
        }
    }

    pub async fn close(&self) {
        if let Signer::RemoteSigner(transport) = self {
            transport.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsyte_types::kind;

    fn sample_draft() -> EventDraft {
        EventDraft {
            created_at: 1_700_000_000,
            kind: kind::MANIFEST,
            tags: vec![vec!["d".to_string(), "/index.html".to_string()]],
            content: String::new(),
        }
    }

    #[test]
    fn generated_signer_signs_and_verifies() {
        let signer = LocalKeySigner::generate();
        let signed = signer.sign_event(sample_draft()).expect("sign");
        assert_eq!(signed.pubkey, signer.public_key());
        assert!(LocalKeySigner::verify(&signed));
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let signer = LocalKeySigner::generate();
        let mut signed = signer.sign_event(sample_draft()).expect("sign");
        signed.sig = "00".repeat(64);
        assert!(!LocalKeySigner::verify(&signed));
    }

    #[test]
    fn tampered_content_fails_verification_via_id_mismatch() {
        let signer = LocalKeySigner::generate();
        let mut signed = signer.sign_event(sample_draft()).expect("sign");
        signed.content = "tampered".to_string();
        assert!(!LocalKeySigner::verify(&signed));
    }

    #[test]
    fn from_secret_hex_round_trips_to_same_public_key() {
        let original = LocalKeySigner::generate();
        let hex = original.secret_key_hex();
        let restored = LocalKeySigner::from_secret_hex(&hex).expect("restore");
        assert_eq!(original.public_key(), restored.public_key());
    }

    #[test]
    fn invalid_secret_hex_is_rejected() {
        let err = LocalKeySigner::from_secret_hex("not-hex").expect_err("must fail");
        assert!(matches!(err, SignerError::Invalid(_)));
    }

    #[test]
    fn two_generated_signers_have_different_public_keys() {
        let a = LocalKeySigner::generate();
        let b = LocalKeySigner::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[tokio::test]
    async fn signer_enum_dispatches_local_key_variant() {
        let signer = Signer::LocalKey(LocalKeySigner::generate());
        let signed = signer.sign_event(sample_draft()).await.expect("sign");
        assert_eq!(signed.pubkey, signer.public_key());
        signer.close().await;
    }

    struct RejectingTransport;

    #[async_trait]
    impl RemoteSignerTransport for RejectingTransport {
        fn public_key(&self) -> String {
            "b".repeat(64)
        }

        async fn sign_event(&self, _draft: EventDraft) -> Result<SignedEvent, SignerError> {
            Err(SignerError::Rejected("policy denied".to_string()))
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn signer_enum_dispatches_remote_variant_and_propagates_errors() {
        let signer = Signer::RemoteSigner(Arc::new(RejectingTransport));
        assert_eq!(signer.public_key(), "b".repeat(64));
        let err = signer.sign_event(sample_draft()).await.expect_err("must fail");
        assert_eq!(err, SignerError::Rejected("policy denied".to_string()));
    }
}
