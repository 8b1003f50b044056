//! The Resolver: given an `ImageImport`, produces a digest-pinned
//! `HashReference`, trying registry candidates and credentials in turn and
//! optionally mirroring the result.

use std::sync::Arc;

use chrono::Utc;

use crate::context::SystemContext;
use crate::docker_config::Credential;
use crate::error::{Aggregate, Error};
use crate::registry_store::PullContext;
use crate::types::HashReference;

/// Split `from` into `(domain, remainder)`: the part before the first `/`
/// qualifies as a registry domain iff it contains `.` or `:` or equals
/// `localhost`.
///
/// ```text
/// docker.io/centos:latest  -> ("docker.io", "centos:latest")
/// centos:latest            -> ("", "centos:latest")
/// 10.1.1.1:8080/image:x    -> ("10.1.1.1:8080", "image:x")
/// localhost/x:y            -> ("localhost", "x:y")
/// repo/centos              -> ("", "repo/centos")
/// ```
pub fn split_registry_domain(from: &str) -> (String, String) {
    match from.split_once('/') {
        Some((candidate, rest)) if is_registry_domain(candidate) => {
            (candidate.to_string(), rest.to_string())
        }
        _ => (String::new(), from.to_string()),
    }
}

fn is_registry_domain(candidate: &str) -> bool {
    candidate == "localhost" || candidate.contains('.') || candidate.contains(':')
}

/// Strip a trailing `:tag` or `@sha256:...` digest from a remainder, for
/// forming `.../name@sha256:...` after a successful resolve. A pushed
/// archive's `from` is already digest-pinned (e.g. `ns/name@sha256:...`,
/// itself containing a `:` inside `sha256:...`), so digest stripping takes
/// priority over tag stripping.
fn strip_tag(remainder: &str) -> &str {
    match remainder.find('@') {
        Some(idx) => &remainder[..idx],
        None => match remainder.rfind(':') {
            Some(idx) => &remainder[..idx],
            None => remainder,
        },
    }
}

/// One resolved attempt's context: which registry, which credential.
struct Attempt {
    registry: String,
    credential: Option<Credential>,
}

/// The resolver itself. Stateless beyond the `SystemContext` it wraps.
pub struct Resolver {
    ctx: Arc<SystemContext>,
}

impl Resolver {
    /// Build a resolver over `ctx`.
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self { ctx }
    }

    /// Resolve `from` to a digest-pinned reference, optionally mirroring
    /// the result when `mirror` is true, in namespace `ns` under logical
    /// name `name`.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(
        &self,
        from: &str,
        mirror: bool,
        insecure: bool,
        ns: &str,
        name: &str,
    ) -> Result<HashReference, Error> {
        // A `from` already carrying the `docker://` transport prefix (e.g.
        // the mirror-pinned reference a pushed archive's ImageImport is
        // seeded with) is resolved exactly like a bare one once the prefix
        // is peeled off.
        let bare_from = from.strip_prefix("docker://").unwrap_or(from);
        let (domain, remainder) = split_registry_domain(bare_from);

        let mirror_cfg = self
            .ctx
            .mirror_config()
            .await
            .map_err(|e| Error::ImportFailed(Aggregate(vec![format!("{e:#}")])))?
            .clone();

        let candidates: Vec<String> = if !domain.is_empty() {
            vec![domain]
        } else {
            self.ctx.unqualified_registries().to_vec()
        };
        if candidates.is_empty() {
            return Err(Error::NoRegistry);
        }

        let mut errors = Aggregate::new();
        for registry in candidates {
            let attempts = match self.build_attempts(&registry, ns, &mirror_cfg).await {
                Ok(a) => a,
                Err(e) => {
                    errors.push(format!("{registry}: enumerating credentials"), &e);
                    continue;
                }
            };

            let reference = format!("docker://{registry}/{remainder}");
            for attempt in attempts {
                let use_insecure = insecure || mirror_cfg.as_ref().is_some_and(|m| {
                    m.internal_host == attempt.registry && m.insecure
                });
                let pull = PullContext {
                    reference: reference.clone(),
                    credential: attempt.credential.clone(),
                    insecure: use_insecure,
                };
                let store = match self.ctx.registry_store().await {
                    Ok(s) => s,
                    Err(e) => {
                        errors.push(format!("{registry}: registry store init"), &e);
                        continue;
                    }
                };
                match store.fetch_manifest_digest(&pull).await {
                    Ok(digest) => {
                        let base = strip_tag(&remainder);
                        let mut image_reference = format!("docker://{registry}/{base}@{}", digest.0);
                        if mirror {
                            match store
                                .load(&image_reference, attempt.credential.clone(), use_insecure, ns, name)
                                .await
                            {
                                Ok(mirrored) => image_reference = mirrored,
                                Err(e) => {
                                    errors.push(format!("{registry}: mirror load"), &anyhow::anyhow!("{e}"));
                                    continue;
                                }
                            }
                        }
                        return Ok(HashReference {
                            generation: 0, // assigned by the caller via NextGeneration
                            from: from.to_string(),
                            imported_at: Utc::now(),
                            image_reference,
                        });
                    }
                    Err(e) => {
                        errors.push(format!("{registry}: fetch manifest"), &e);
                        continue;
                    }
                }
            }
        }

        Err(Error::ImportFailed(errors))
    }

    /// Enumerate credential attempts for `registry`: mirror short-circuit
    /// if the reference's host is the mirror host, else namespace secrets
    /// in order, then a final no-credential attempt.
    async fn build_attempts(
        &self,
        registry: &str,
        ns: &str,
        mirror_cfg: &Option<crate::context::MirrorConfig>,
    ) -> anyhow::Result<Vec<Attempt>> {
        if let Some(mirror) = mirror_cfg {
            if mirror.internal_host == registry || mirror.external_host == registry {
                return Ok(vec![Attempt {
                    registry: registry.to_string(),
                    credential: mirror.credential.clone(),
                }]);
            }
        }
        let mut attempts: Vec<Attempt> = self
            .ctx
            .credentials_for(ns, registry)
            .await?
            .into_iter()
            .map(|c| Attempt {
                registry: registry.to_string(),
                credential: Some(c),
            })
            .collect();
        attempts.push(Attempt {
            registry: registry.to_string(),
            credential: None,
        });
        Ok(attempts)
    }
}
