//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES. Binaries call [`resolve_secrets`]
//! once at startup and hand the result to constructors. Values never appear
//! in `Debug` output or error messages.

use anyhow::{bail, Result};

use crate::settings::WorkshopConfig;

#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    /// Expo access token, when push is enabled and the env var is set.
    pub push_access_token: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "push_access_token",
                &self.push_access_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Resolve secrets through the process environment.
pub fn resolve_secrets(cfg: &WorkshopConfig) -> Result<ResolvedSecrets> {
    resolve_secrets_with(cfg, |name| std::env::var(name).ok())
}

/// Resolve secrets through an arbitrary lookup (tests pass a closure).
pub fn resolve_secrets_with<F>(cfg: &WorkshopConfig, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    if !cfg.push.enabled {
        return Ok(ResolvedSecrets::default());
    }

    let name = cfg.push.access_token_env.trim();
    if name.is_empty() {
        bail!("push.access_token_env must name an env var when push.enabled = true");
    }

    // The Expo access token is optional: unauthenticated sends are accepted
    // unless the project enforces enhanced push security.
    let push_access_token = lookup(name).filter(|v| !v.trim().is_empty());

    Ok(ResolvedSecrets { push_access_token })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_disabled_resolves_nothing() {
        let cfg = WorkshopConfig::default();
        let s = resolve_secrets_with(&cfg, |_| Some("tok".to_string())).unwrap();
        assert!(s.push_access_token.is_none());
    }

    #[test]
    fn debug_output_redacts_the_token() {
        let mut cfg = WorkshopConfig::default();
        cfg.push.enabled = true;
        let s = resolve_secrets_with(&cfg, |name| {
            (name == "ATL_EXPO_ACCESS_TOKEN").then(|| "super-secret-value".to_string())
        })
        .unwrap();
        assert_eq!(s.push_access_token.as_deref(), Some("super-secret-value"));
        let dbg = format!("{s:?}");
        assert!(dbg.contains("<REDACTED>"));
        assert!(!dbg.contains("super-secret-value"));
    }

    #[test]
    fn blank_env_var_is_treated_as_absent() {
        let mut cfg = WorkshopConfig::default();
        cfg.push.enabled = true;
        let s = resolve_secrets_with(&cfg, |_| Some("   ".to_string())).unwrap();
        assert!(s.push_access_token.is_none());
    }
}
