//! Credential and host resolution (spec §6).
//!
//! Grounded on the `crate::config::Config::global().get_secret(...)` /
//! `get_param(...)` pattern used throughout every provider constructor in
//! `examples/block-goose/crates/goose/src/providers/*.rs` (e.g.
//! `anthropic.rs::from_env`), simplified to an environment-variable-backed
//! resolver since that crate's keyring-backed secret store is an
//! out-of-scope collaborator (session/credential persistence) here.

use std::env;

use crate::error::ProviderError;

/// Describes one piece of configuration a provider needs, for a setup
/// surface to render (spec §4.1 "ListModels"/"ValidateAPIKey" companion,
/// spec §6 "Environment inputs").
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigKey {
    pub name: &'static str,
    pub required: bool,
    pub secret: bool,
    pub default: Option<&'static str>,
}

impl ConfigKey {
    pub const fn new(name: &'static str, required: bool, secret: bool, default: Option<&'static str>) -> Self {
        Self {
            name,
            required,
            secret,
            default,
        }
    }
}

/// Resolves a provider API key: an explicit key always wins, otherwise the
/// named environment variable, otherwise (for providers with more than one
/// accepted variable name, e.g. Google) each alias in turn.
pub fn resolve_api_key(
    explicit: Option<String>,
    env_var_aliases: &[&str],
) -> Result<String, ProviderError> {
    if let Some(key) = explicit {
        if !key.trim().is_empty() {
            return Ok(key);
        }
    }
    for var in env_var_aliases {
        if let Ok(value) = env::var(var) {
            if !value.trim().is_empty() {
                return Ok(value);
            }
        }
    }
    Err(ProviderError::Construction(format!(
        "missing API key: set one of {}",
        env_var_aliases.join(", ")
    )))
}

/// Resolves a non-secret parameter (e.g. a host override), returning
/// `default` when unset.
pub fn resolve_param(env_var: &str, default: &str) -> String {
    env::var(env_var).unwrap_or_else(|_| default.to_string())
}

/// An immutable copy of the env-var hint for a provider's API key, for a
/// setup surface to display (spec §6: "Env hints are returned as immutable
/// copies").
pub fn env_hint(env_var_aliases: &[&str]) -> Vec<String> {
    env_var_aliases.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes env-var-mutating tests; std::env is process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn explicit_key_wins_over_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("LPC_TEST_KEY", "from-env");
        let resolved = resolve_api_key(Some("from-arg".to_string()), &["LPC_TEST_KEY"]).unwrap();
        assert_eq!(resolved, "from-arg");
        env::remove_var("LPC_TEST_KEY");
    }

    #[test]
    fn falls_back_to_env_var() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("LPC_TEST_KEY2", "from-env");
        let resolved = resolve_api_key(None, &["LPC_TEST_KEY2"]).unwrap();
        assert_eq!(resolved, "from-env");
        env::remove_var("LPC_TEST_KEY2");
    }

    #[test]
    fn missing_key_fails_construction() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("LPC_TEST_KEY3");
        let err = resolve_api_key(None, &["LPC_TEST_KEY3"]).unwrap_err();
        assert!(matches!(err, ProviderError::Construction(_)));
    }

    #[test]
    fn tries_aliases_in_order() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("LPC_PRIMARY");
        env::set_var("LPC_SECONDARY", "secondary-value");
        let resolved = resolve_api_key(None, &["LPC_PRIMARY", "LPC_SECONDARY"]).unwrap();
        assert_eq!(resolved, "secondary-value");
        env::remove_var("LPC_SECONDARY");
    }
}
