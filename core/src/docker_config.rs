//! Decoding of `.dockerconfigjson`-shaped secrets and matching them against
//! a reference's registry host for per-namespace auth enumeration.

use std::collections::BTreeMap;

use base64::Engine;
use serde::Deserialize;

/// One `auths` entry: username/password or a pre-encoded basic-auth blob.
#[derive(Debug, Clone, Deserialize)]
pub struct DockerAuthEntry {
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub identitytoken: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DockerConfigJson {
    #[serde(default)]
    auths: BTreeMap<String, DockerAuthEntry>,
}

/// A decoded, ready-to-use credential for one registry host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl DockerAuthEntry {
    fn decode(&self) -> Option<Credential> {
        if let (Some(u), Some(p)) = (&self.username, &self.password) {
            return Some(Credential {
                username: u.clone(),
                password: p.clone(),
            });
        }
        let auth = self.auth.as_ref()?;
        let decoded = base64::engine::general_purpose::STANDARD.decode(auth).ok()?;
        let text = String::from_utf8(decoded).ok()?;
        let (user, pass) = text.split_once(':')?;
        Some(Credential {
            username: user.to_string(),
            password: pass.to_string(),
        })
    }
}

/// Parse a raw `.dockerconfigjson` document and return the credential, if
/// any, whose host matches `host` exactly.
pub fn credential_for_host(raw: &[u8], host: &str) -> anyhow::Result<Option<Credential>> {
    let parsed: DockerConfigJson = serde_json::from_slice(raw)?;
    Ok(parsed.auths.get(host).and_then(DockerAuthEntry::decode))
}

/// Enumerate every namespace secret's credential for `host`, in the order
/// the secrets were listed. This does not itself list secrets (that's the
/// cluster-client collaborator's job); it takes the already-fetched raw
/// `.dockerconfigjson` payloads and decodes them.
pub fn enumerate_credentials(secrets: &[Vec<u8>], host: &str) -> Vec<Credential> {
    secrets
        .iter()
        .filter_map(|raw| credential_for_host(raw, host).ok().flatten())
        .collect()
}
