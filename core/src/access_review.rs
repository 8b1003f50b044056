//! The access-review collaborator interface: token → allow/deny
//! for a given namespace/verb/resource/group, used to gate the transport's
//! push/pull streams.

use async_trait::async_trait;

/// Outcome of a token check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The bearer may perform the action.
    Allowed,
    /// The bearer may not perform the action.
    Denied,
}

/// Checks a bearer token against the cluster's access-review endpoint
/// (`SubjectAccessReview` in a real cluster). The core only needs this one
/// call; RBAC itself is delegated entirely to the cluster.
#[async_trait]
pub trait AccessReview: Send + Sync {
    /// Check whether `token` authorizes `verb` on `resource` (in API group
    /// `group`) within `namespace`.
    async fn check_token(
        &self,
        token: &str,
        namespace: &str,
        verb: &str,
        resource: &str,
        group: &str,
    ) -> anyhow::Result<Decision>;
}

/// Denies every token with an empty bearer and allows everything else.
///
/// The real access-review endpoint (`SubjectAccessReview` against the
/// cluster) is an external collaborator the core only consumes through
/// this trait; wiring it up is deployment-specific (it typically also
/// requires a `TokenReview` to resolve the bearer to a user first). This
/// stand-in is what `tagctl serve` falls back to when no
/// real reviewer is configured, and what the transport's own tests use.
#[derive(Debug, Default)]
pub struct BearerPresentAccessReview;

#[async_trait]
impl AccessReview for BearerPresentAccessReview {
    async fn check_token(
        &self,
        token: &str,
        _namespace: &str,
        _verb: &str,
        _resource: &str,
        _group: &str,
    ) -> anyhow::Result<Decision> {
        Ok(if token.is_empty() {
            Decision::Denied
        } else {
            Decision::Allowed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denies_empty_bearer() {
        let review = BearerPresentAccessReview;
        let decision = review.check_token("", "demo", "get", "images", "g").await.unwrap();
        assert_eq!(decision, Decision::Denied);
    }

    #[tokio::test]
    async fn allows_any_nonempty_bearer() {
        let review = BearerPresentAccessReview;
        let decision = review
            .check_token("sometoken", "demo", "get", "images", "g")
            .await
            .unwrap();
        assert_eq!(decision, Decision::Allowed);
    }
}
