//! Turns a project's persisted [`SignerRef`] plus whatever the vault
//! holds for that pubkey into a live [`Signer`], and the reverse
//! direction (bundling a freshly generated or imported credential
//! back into the vault as project state).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use nsyte_codec::CredentialMaterial;
use nsyte_remote_signer::RemoteSignerClient;
use nsyte_signer::{LocalKeySigner, Signer};
use nsyte_types::{ProjectConfig, SignerRef};
use nsyte_vault::Vault;

/// Default per-request timeout for a reconnected remote-signer
/// session.
const REMOTE_SIGNER_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves `config.signer` to a usable [`Signer`] by reading its
/// credential blob from the vault and decoding it. Exit-code 3
/// ("no credentials available") is the caller's to assign when this
/// returns an error and no signer ref is configured at all.
pub async fn resolve_signer(config: &ProjectConfig, vault: &Vault) -> Result<Signer> {
    let signer_ref = config.signer.as_ref().context("no signer configured for this project")?;

    let blob = vault
        .get(signer_ref.pubkey())
        .context("failed to read credential from vault")?
        .with_context(|| format!("no credential stored for pubkey {}", signer_ref.pubkey()))?;

    let material = nsyte_codec::decode(&blob).context("stored credential is not a valid nsyte credential blob")?;

    match (signer_ref, material) {
        (SignerRef::LocalKey { .. }, CredentialMaterial::LocalKey { secret_key_hex }) => {
            let signer = LocalKeySigner::from_secret_hex(&secret_key_hex).context("stored local key is invalid")?;
            Ok(Signer::LocalKey(signer))
        }
        (SignerRef::RemoteSigner { .. }, CredentialMaterial::RemoteSignerSession { remote_signer_pubkey, relays, ephemeral_client_secret }) => {
            let bunker_url = bunker_url_for(&remote_signer_pubkey, &relays, &ephemeral_client_secret);
            let client = RemoteSignerClient::connect_bunker(&bunker_url, REMOTE_SIGNER_TIMEOUT)
                .await
                .context("remote signer unreachable")?;
            Ok(Signer::RemoteSigner(Arc::new(client)))
        }
        _ => bail!("signer reference type does not match stored credential type"),
    }
}

/// Builds the `bunker://` URL [`RemoteSignerClient::connect_bunker`]
/// expects from a previously-stored remote-signer session, so
/// reconnecting on a later run doesn't require the user to paste the
/// bunker URL again.
fn bunker_url_for(remote_signer_pubkey: &str, relays: &[String], secret: &str) -> String {
    let mut params: Vec<String> = relays
        .iter()
        .map(|r| format!("relay={}", url::form_urlencoded::byte_serialize(r.as_bytes()).collect::<String>()))
        .collect();
    params.push(format!("secret={}", url::form_urlencoded::byte_serialize(secret.as_bytes()).collect::<String>()));
    format!("bunker://{remote_signer_pubkey}?{}", params.join("&"))
}

/// Persists a freshly generated local key: stores the secret in the
/// vault under its own pubkey and returns the [`SignerRef`] to save in
/// project state.
pub fn store_local_key(vault: &Vault, signer: &LocalKeySigner) -> Result<SignerRef> {
    let material = CredentialMaterial::LocalKey { secret_key_hex: signer.secret_key_hex() };
    let blob = nsyte_codec::encode(&material).context("failed to encode credential")?;
    vault.store(&signer.public_key(), &blob).context("failed to store credential in vault")?;
    Ok(SignerRef::LocalKey { pubkey: signer.public_key() })
}

/// Persists a remote-signer session so it can be reconnected later.
pub fn store_remote_session(vault: &Vault, user_pubkey: &str, remote_signer_pubkey: &str, relays: &[String], secret: &str) -> Result<SignerRef> {
    let material = CredentialMaterial::RemoteSignerSession {
        remote_signer_pubkey: remote_signer_pubkey.to_string(),
        relays: relays.to_vec(),
        ephemeral_client_secret: secret.to_string(),
    };
    let blob = nsyte_codec::encode(&material).context("failed to encode credential")?;
    vault.store(user_pubkey, &blob).context("failed to store credential in vault")?;
    Ok(SignerRef::RemoteSigner { pubkey: user_pubkey.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bunker_url_round_trips_through_parse_bunker_url() {
        let url = bunker_url_for("abc123", &["wss://relay.example".to_string()], "s3cr3t");
        let parsed = nsyte_remote_signer::parse_bunker_url(&url).expect("parse");
        assert_eq!(parsed.remote_signer_pubkey, "abc123");
        assert_eq!(parsed.relays, vec!["wss://relay.example".to_string()]);
        assert_eq!(parsed.secret, "s3cr3t");
    }
}
