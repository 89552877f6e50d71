//! Per-host, per-resource scope accumulation for the Bearer token flow.
//!
//! Each registry host gets an ordered set of `(resource_type, resource_name)`
//! scopes, each carrying a set of actions. A caller that knows in advance it
//! will push several repositories under one host can pre-register scopes so
//! a single token covers all of them, rather than re-authenticating per repo.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::RwLock;

type ScopeKey = (String, String);

#[derive(Debug, Clone, Default)]
struct HostScopes {
    actions: BTreeMap<ScopeKey, BTreeSet<String>>,
}

/// Accumulates and renders registry auth scopes.
#[derive(Clone, Default)]
pub struct ScopeManager {
    hosts: Arc<RwLock<std::collections::HashMap<String, HostScopes>>>,
}

impl ScopeManager {
    /// A manager with no scopes registered yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register that future tokens for `host` should also cover
    /// `resource_type:resource_name` with `actions`. A `"*"` action
    /// supersedes any other action already recorded for that resource.
    pub async fn add_scope(&self, host: &str, resource_type: &str, resource_name: &str, actions: &[&str]) {
        let mut hosts = self.hosts.write().await;
        let host_scopes = hosts.entry(host.to_string()).or_default();
        let entry = host_scopes
            .actions
            .entry((resource_type.to_string(), resource_name.to_string()))
            .or_default();
        if entry.contains("*") {
            return;
        }
        for action in actions {
            if *action == "*" {
                entry.clear();
                entry.insert("*".to_string());
                return;
            }
            entry.insert((*action).to_string());
        }
    }

    /// Merge a raw scope string from a challenge's `scope` auth-param, e.g.
    /// `"repository:library/busybox:pull repository:other:pull,push"`.
    pub async fn add_scope_str(&self, host: &str, scope: &str) {
        for part in scope.split_whitespace() {
            let mut fields = part.splitn(3, ':');
            let (Some(resource_type), Some(resource_name), Some(actions)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let actions: Vec<&str> = actions.split(',').collect();
            self.add_scope(host, resource_type, resource_name, &actions).await;
        }
    }

    /// Render every scope registered for `host` as `type:name:action,action`
    /// strings, in a stable (sorted) order.
    pub async fn render(&self, host: &str) -> Vec<String> {
        let hosts = self.hosts.read().await;
        let Some(host_scopes) = hosts.get(host) else {
            return Vec::new();
        };
        host_scopes
            .actions
            .iter()
            .map(|((resource_type, resource_name), actions)| {
                format!("{resource_type}:{resource_name}:{}", actions.iter().cloned().collect::<Vec<_>>().join(","))
            })
            .collect()
    }

    /// A stable string identifying the current scope set for `host`, used as
    /// the secondary key into the token cache: two requests with the same
    /// rendered scope set can share a cached token.
    pub async fn scope_key(&self, host: &str) -> String {
        self.render(host).await.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_single_scope() {
        let scopes = ScopeManager::new();
        scopes.add_scope("reg.example.com", "repository", "library/busybox", &["pull"]).await;
        assert_eq!(scopes.render("reg.example.com").await, vec!["repository:library/busybox:pull"]);
    }

    #[tokio::test]
    async fn merges_actions_for_same_resource() {
        let scopes = ScopeManager::new();
        scopes.add_scope("reg.example.com", "repository", "a", &["pull"]).await;
        scopes.add_scope("reg.example.com", "repository", "a", &["push"]).await;
        assert_eq!(scopes.render("reg.example.com").await, vec!["repository:a:pull,push"]);
    }

    #[tokio::test]
    async fn wildcard_action_supersedes_others() {
        let scopes = ScopeManager::new();
        scopes.add_scope("reg.example.com", "repository", "a", &["pull"]).await;
        scopes.add_scope("reg.example.com", "repository", "a", &["*"]).await;
        scopes.add_scope("reg.example.com", "repository", "a", &["push"]).await;
        assert_eq!(scopes.render("reg.example.com").await, vec!["repository:a:*"]);
    }

    #[tokio::test]
    async fn scope_key_is_stable_regardless_of_add_order() {
        let a = ScopeManager::new();
        a.add_scope("h", "repository", "a", &["pull"]).await;
        a.add_scope("h", "repository", "b", &["pull"]).await;

        let b = ScopeManager::new();
        b.add_scope("h", "repository", "b", &["pull"]).await;
        b.add_scope("h", "repository", "a", &["pull"]).await;

        assert_eq!(a.scope_key("h").await, b.scope_key("h").await);
    }

    #[tokio::test]
    async fn add_scope_str_parses_challenge_scope_param() {
        let scopes = ScopeManager::new();
        scopes
            .add_scope_str("h", "repository:library/busybox:pull repository:other:pull,push")
            .await;
        assert_eq!(
            scopes.render("h").await,
            vec!["repository:library/busybox:pull".to_string(), "repository:other:pull,push".to_string()]
        );
    }
}
