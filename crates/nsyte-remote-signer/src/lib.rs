//! Remote-signer protocol (C10): a NIP-46-style request/response state
//! machine over the relay pool.
//!
//! The "at most one outstanding `Pending(id)` per session, serialised"
//! invariant is implemented with one `tokio::sync::Mutex` held for the
//! duration of a request. Holding the guard across the whole round
//! trip makes "only one pending request" automatic rather than a
//! hand-tracked enum, and dropping the guard on timeout or completion
//! gives "reverts to Ready with no residue" for free — there is no
//! separate state to clean up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use secp256k1::{Keypair, Parity, PublicKey, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use nsyte_relay::{Filter, RelayMessage, RelayPool};
use nsyte_signer::{LocalKeySigner, RemoteSignerTransport, SignerError};
use nsyte_types::{EventDraft, SignedEvent, kind};

/// 60s.
const REPLAY_WINDOW_SECS: i64 = 60;
/// Default per-request timeout; a
/// caller that cares to override it passes its own to `connect_bunker`
/// / `PendingNostrConnect::wait`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("malformed bunker url: {0}")]
    MalformedBunkerUrl(String),
    #[error(transparent)]
    Signer(#[from] SignerError),
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    id: &'a str,
    method: &'a str,
    params: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RequestMessageOwned {
    id: String,
    method: String,
    params: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponseMessage {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// `bunker://<remote_pubkey>?relay=…&relay=…&secret=…`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BunkerUrl {
    pub remote_signer_pubkey: String,
    pub relays: Vec<String>,
    pub secret: String,
}

pub fn parse_bunker_url(raw: &str) -> Result<BunkerUrl, HandshakeError> {
    let url = url::Url::parse(raw).map_err(|e| HandshakeError::MalformedBunkerUrl(e.to_string()))?;
    if url.scheme() != "bunker" {
        return Err(HandshakeError::MalformedBunkerUrl(format!("expected scheme bunker://, got {}://", url.scheme())));
    }
    let remote_signer_pubkey = url
        .host_str()
        .ok_or_else(|| HandshakeError::MalformedBunkerUrl("missing remote signer pubkey".to_string()))?
        .to_string();

    let mut relays = Vec::new();
    let mut secret = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "relay" => relays.push(value.into_owned()),
            "secret" => secret = Some(value.into_owned()),
            _ => {}
        }
    }
    if relays.is_empty() {
        return Err(HandshakeError::MalformedBunkerUrl("missing relay parameter".to_string()));
    }
    let secret = secret.ok_or_else(|| HandshakeError::MalformedBunkerUrl("missing secret parameter".to_string()))?;

    Ok(BunkerUrl { remote_signer_pubkey, relays, secret })
}

/// Builds the `nostrconnect://…` URI a client publishes for the
/// signer-initiated handshake.
pub fn build_nostrconnect_uri(client_pubkey: &str, relays: &[String], secret: &str, name: &str) -> String {
    let mut uri = format!("nostrconnect://{client_pubkey}?");
    let mut params: Vec<String> = relays
        .iter()
        .map(|r| format!("relay={}", url::form_urlencoded::byte_serialize(r.as_bytes()).collect::<String>()))
        .collect();
    params.push(format!("secret={}", url::form_urlencoded::byte_serialize(secret.as_bytes()).collect::<String>()));
    if !name.is_empty() {
        params.push(format!("name={}", url::form_urlencoded::byte_serialize(name.as_bytes()).collect::<String>()));
    }
    uri.push_str(&params.join("&"));
    uri
}

/// Derives the secret scalar that, as a point on the curve, matches
/// the BIP-340 `lift_x` convention used to interpret `keypair`'s own
/// x-only public key (negating if that key's actual y is odd). Two
/// peers deriving ECDH shared secrets from x-only nostr pubkeys must
/// both apply this adjustment or their shared secrets diverge whenever
/// either side's real key has odd parity.
fn effective_secret_key(keypair: &Keypair) -> SecretKey {
    let (_, parity) = keypair.x_only_public_key();
    let mut secret = keypair.secret_key();
    if parity == Parity::Odd {
        secret.negate_assign();
    }
    secret
}

fn lift_x(pubkey_hex: &str) -> Result<PublicKey, SignerError> {
    let bytes = hex::decode(pubkey_hex).map_err(|e| SignerError::Invalid(format!("pubkey is not valid hex: {e}")))?;
    let xonly =
        XOnlyPublicKey::from_slice(&bytes).map_err(|e| SignerError::Invalid(format!("invalid x-only pubkey: {e}")))?;
    Ok(xonly.public_key(Parity::Even))
}

fn shared_secret_bytes(keypair: &Keypair, remote_pubkey_hex: &str) -> Result<[u8; 32], SignerError> {
    let secret = effective_secret_key(keypair);
    let remote_point = lift_x(remote_pubkey_hex)?;
    let shared = secp256k1::ecdh::SharedSecret::new(&remote_point, &secret);
    Ok(shared.secret_bytes())
}

fn encrypt_payload(plaintext: &str, shared_secret: &[u8; 32]) -> Result<String, SignerError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(shared_secret));
    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| SignerError::Invalid(format!("encryption failed: {e}")))?;
    let mut out = nonce_bytes.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(out))
}

fn decrypt_payload(encoded: &str, shared_secret: &[u8; 32]) -> Result<String, SignerError> {
    let raw = BASE64.decode(encoded).map_err(|e| SignerError::Invalid(format!("not valid base64: {e}")))?;
    if raw.len() < 12 {
        return Err(SignerError::Invalid("ciphertext too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = raw.split_at(12);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(shared_secret));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| SignerError::Invalid(format!("decryption failed: {e}")))?;
    String::from_utf8(plaintext).map_err(|e| SignerError::Invalid(format!("decrypted payload is not utf-8: {e}")))
}

fn random_request_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A live session with a remote signer: relay pool, ephemeral identity
/// and the shared secret derived from it, plus the mutex that
/// serialises outstanding requests.
pub struct RemoteSignerClient {
    user_pubkey: String,
    remote_signer_pubkey: String,
    ephemeral: LocalKeySigner,
    shared_secret: [u8; 32],
    pool: RelayPool,
    request_timeout: Duration,
    pending: Mutex<()>,
    closed: AtomicBool,
}

impl RemoteSignerClient {
    /// Client-initiated handshake from a `bunker://` URL.
    pub async fn connect_bunker(bunker_url: &str, request_timeout: Duration) -> Result<Self, HandshakeError> {
        let parsed = parse_bunker_url(bunker_url)?;
        let ephemeral = LocalKeySigner::generate();
        let (pool, _report) = RelayPool::connect(&parsed.relays).await;
        pool.subscribe(
            "nsyte-remote-signer",
            vec![Filter {
                kinds: Some(vec![kind::REMOTE_SIGNER]),
                authors: Some(vec![parsed.remote_signer_pubkey.clone()]),
                tag_filters: tag_filter_for(&ephemeral.public_key()),
                ..Filter::default()
            }],
        );
        let shared_secret = shared_secret_bytes(ephemeral.keypair(), &parsed.remote_signer_pubkey)?;

        let mut client = Self {
            user_pubkey: String::new(),
            remote_signer_pubkey: parsed.remote_signer_pubkey,
            ephemeral,
            shared_secret,
            pool,
            request_timeout,
            pending: Mutex::new(()),
            closed: AtomicBool::new(false),
        };

        client.request("connect", vec![parsed.secret]).await?;
        client.user_pubkey = client.request("get_public_key", Vec::new()).await?;
        Ok(client)
    }

    /// Begins a signer-initiated (`nostrconnect://`) handshake. Returns
    /// a pending handle whose `uri()` the caller shows to the user
    /// before awaiting `wait()`.
    pub async fn begin_nostrconnect(
        relays: &[String],
        secret: &str,
        name: &str,
    ) -> PendingNostrConnect {
        let ephemeral = LocalKeySigner::generate();
        let (pool, _report) = RelayPool::connect(relays).await;
        pool.subscribe(
            "nsyte-remote-signer",
            vec![Filter { kinds: Some(vec![kind::REMOTE_SIGNER]), tag_filters: tag_filter_for(&ephemeral.public_key()), ..Filter::default() }],
        );
        PendingNostrConnect { ephemeral, relays: relays.to_vec(), secret: secret.to_string(), name: name.to_string(), pool }
    }

    fn own_draft(&self, content: String) -> EventDraft {
        EventDraft {
            created_at: now_unix(),
            kind: kind::REMOTE_SIGNER,
            tags: vec![vec!["p".to_string(), self.remote_signer_pubkey.clone()]],
            content,
        }
    }

    /// Sends `method(params)` and awaits the matching response,
    /// serialised by `pending` so at most one request is outstanding
    /// at a time.
    async fn request(&self, method: &str, params: Vec<String>) -> Result<String, SignerError> {
        let _guard = self.pending.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignerError::Unreachable("session closed".to_string()));
        }

        let id = random_request_id();
        let request = RequestMessage { id: &id, method, params: &params };
        let plaintext =
            serde_json::to_string(&request).map_err(|e| SignerError::Invalid(e.to_string()))?;
        let encrypted = encrypt_payload(&plaintext, &self.shared_secret)?;
        let event = self.ephemeral.sign_event(self.own_draft(encrypted))?;

        let mut inbound = self.pool.inbound();
        let _ = self.pool.publish(&event, Duration::from_millis(200)).await;

        let deadline = tokio::time::Instant::now() + self.request_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(SignerError::Timeout);
            }
            let next = match tokio::time::timeout(remaining, inbound.recv()).await {
                Ok(Ok(next)) => next,
                Ok(Err(_)) => return Err(SignerError::Unreachable("relay pool closed".to_string())),
                Err(_) => return Err(SignerError::Timeout),
            };
            let (_relay, RelayMessage::Event { event: inbound_event, .. }) = next else { continue };
            match self.decode_response(&inbound_event, &id) {
                Some(Ok(response)) => {
                    return match response.error {
                        Some(err) => Err(SignerError::Rejected(err)),
                        None => response.result.ok_or_else(|| SignerError::Invalid("response has neither result nor error".to_string())),
                    };
                }
                Some(Err(_)) | None => continue,
            }
        }
    }

    /// Authenticity check, replay-window check, decryption and id
    /// match, in that order. `None` means "not a
    /// reply to this request, keep waiting" (discarded silently);
    /// `Some(Err(_))` means "parsed but outside the
    /// replay window or otherwise unusable".
    fn decode_response(&self, event: &SignedEvent, expected_id: &str) -> Option<Result<ResponseMessage, SignerError>> {
        if event.kind != kind::REMOTE_SIGNER || event.pubkey != self.remote_signer_pubkey {
            return None;
        }
        if !LocalKeySigner::verify(event) {
            return None;
        }
        if now_unix() - event.created_at > REPLAY_WINDOW_SECS {
            return Some(Err(SignerError::Invalid("response outside replay window".to_string())));
        }
        let plaintext = decrypt_payload(&event.content, &self.shared_secret).ok()?;
        let response: ResponseMessage = serde_json::from_str(&plaintext).ok()?;
        if response.id != expected_id {
            return None;
        }
        Some(Ok(response))
    }
}

#[async_trait]
impl RemoteSignerTransport for RemoteSignerClient {
    fn public_key(&self) -> String {
        self.user_pubkey.clone()
    }

    async fn sign_event(&self, draft: EventDraft) -> Result<SignedEvent, SignerError> {
        let params = vec![serde_json::to_string(&draft).map_err(|e| SignerError::Invalid(e.to_string()))?];
        let result = self.request("sign_event", params).await?;
        serde_json::from_str(&result).map_err(|e| SignerError::Invalid(format!("remote signer returned an unparsable event: {e}")))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn tag_filter_for(pubkey: &str) -> std::collections::BTreeMap<String, Vec<String>> {
    let mut map = std::collections::BTreeMap::new();
    map.insert("#p".to_string(), vec![pubkey.to_string()]);
    map
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A signer-initiated handshake awaiting the remote signer's first
/// `connect` request.
pub struct PendingNostrConnect {
    ephemeral: LocalKeySigner,
    relays: Vec<String>,
    secret: String,
    name: String,
    pool: RelayPool,
}

impl PendingNostrConnect {
    /// The URI to show the user (as text or QR code).
    pub fn uri(&self) -> String {
        build_nostrconnect_uri(&self.ephemeral.public_key(), &self.relays, &self.secret, &self.name)
    }

    /// Waits for the remote signer's `connect` request, acknowledges
    /// it and returns the now-ready session.
    pub async fn wait(self, timeout: Duration) -> Result<RemoteSignerClient, SignerError> {
        let mut inbound = self.pool.inbound();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(SignerError::Timeout);
            }
            let next = match tokio::time::timeout(remaining, inbound.recv()).await {
                Ok(Ok(next)) => next,
                Ok(Err(_)) => return Err(SignerError::Unreachable("relay pool closed".to_string())),
                Err(_) => return Err(SignerError::Timeout),
            };
            let (_relay, RelayMessage::Event { event, .. }) = next else { continue };
            if event.kind != kind::REMOTE_SIGNER {
                continue;
            }
            if event.tag_value("p") != Some(self.ephemeral.public_key().as_str()) {
                continue;
            }
            if !LocalKeySigner::verify(&event) {
                continue;
            }
            if now_unix() - event.created_at > REPLAY_WINDOW_SECS {
                continue;
            }

            let Ok(shared_secret) = shared_secret_bytes(self.ephemeral.keypair(), &event.pubkey) else { continue };
            let Ok(plaintext) = decrypt_payload(&event.content, &shared_secret) else { continue };
            let Ok(request): Result<RequestMessageOwned, _> = serde_json::from_str(&plaintext) else { continue };
            if request.method != "connect" {
                continue;
            }
            if request.params.first().map(String::as_str) != Some(self.secret.as_str()) {
                continue;
            }

            let remote_signer_pubkey = event.pubkey.clone();
            let client = RemoteSignerClient {
                user_pubkey: remote_signer_pubkey.clone(),
                remote_signer_pubkey,
                ephemeral: self.ephemeral,
                shared_secret,
                pool: self.pool,
                request_timeout: timeout,
                pending: Mutex::new(()),
                closed: AtomicBool::new(false),
            };
            let ack = ResponseMessage { id: request.id, result: Some("ack".to_string()), error: None };
            let ack_json = serde_json::to_string(&ack).map_err(|e| SignerError::Invalid(e.to_string()))?;
            let encrypted = encrypt_payload(&ack_json, &client.shared_secret)?;
            let ack_event = client.ephemeral.sign_event(client.own_draft(encrypted))?;
            let _ = client.pool.publish(&ack_event, Duration::from_millis(200)).await;
            return Ok(client);
        }
    }
}
