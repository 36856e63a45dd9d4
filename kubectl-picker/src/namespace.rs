//! Namespace scope the picker is currently viewing.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceMode {
    #[default]
    Current,
    All,
    Specific,
}

impl NamespaceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceMode::Current => "current",
            NamespaceMode::All => "all",
            NamespaceMode::Specific => "specific",
        }
    }
}

impl FromStr for NamespaceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "current" => Ok(NamespaceMode::Current),
            "all" => Ok(NamespaceMode::All),
            "specific" => Ok(NamespaceMode::Specific),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

/// Resolved selector used both for the pod query and as the cache scope key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Current,
    All,
    Namespace(String),
}

impl ScopeKey {
    pub fn as_str(&self) -> &str {
        match self {
            ScopeKey::Current => "current",
            ScopeKey::All => "all",
            ScopeKey::Namespace(ns) => ns,
        }
    }

    /// Cache partition for this scope. Namespaces literally named `all` or
    /// `current` get a `namespace/` prefix, which no real namespace name can
    /// carry, so they never share a partition with the modes.
    pub fn cache_key(&self) -> Cow<'_, str> {
        match self {
            ScopeKey::Namespace(ns) if ns == "all" || ns == "current" => {
                Cow::Owned(format!("namespace/{ns}"))
            }
            other => Cow::Borrowed(other.as_str()),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceState {
    mode: NamespaceMode,
    selected_namespace: Option<String>,
    current_namespace_cached: Option<String>,
}

impl NamespaceState {
    pub fn mode(&self) -> NamespaceMode {
        self.mode
    }

    /// The chosen namespace, only while the mode is `specific`. A value kept
    /// from an earlier selection is inert in the other modes.
    pub fn selected_namespace(&self) -> Option<&str> {
        match self.mode {
            NamespaceMode::Specific => self.selected_namespace.as_deref(),
            _ => None,
        }
    }

    pub fn current_namespace_cached(&self) -> Option<&str> {
        self.current_namespace_cached.as_deref()
    }

    pub fn cache_current_namespace(&mut self, namespace: impl Into<String>) {
        self.current_namespace_cached = Some(namespace.into());
    }

    pub fn forget_current_namespace(&mut self) {
        self.current_namespace_cached = None;
    }

    /// Flips between `all` and `current`; leaving `specific` lands on `current`.
    pub fn toggle(&mut self) -> ScopeKey {
        self.mode = match self.mode {
            NamespaceMode::Current => NamespaceMode::All,
            NamespaceMode::All | NamespaceMode::Specific => NamespaceMode::Current,
        };
        self.scope_key()
    }

    pub fn select(&mut self, namespace: impl Into<String>) -> ScopeKey {
        self.selected_namespace = Some(namespace.into());
        self.mode = NamespaceMode::Specific;
        self.scope_key()
    }

    /// Raw setter for modes coming in as strings from the picker.
    pub fn set_mode(&mut self, raw: &str) -> Result<ScopeKey> {
        let mode: NamespaceMode = raw.parse()?;
        if mode == NamespaceMode::Specific && self.selected_namespace.is_none() {
            return Err(Error::InvalidMode(format!(
                "{raw} (no namespace has been selected)"
            )));
        }
        self.mode = mode;
        Ok(self.scope_key())
    }

    pub fn scope_key(&self) -> ScopeKey {
        match (self.mode, &self.selected_namespace) {
            (NamespaceMode::All, _) => ScopeKey::All,
            (NamespaceMode::Specific, Some(ns)) => ScopeKey::Namespace(ns.clone()),
            _ => ScopeKey::Current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_current() {
        let state = NamespaceState::default();
        assert_eq!(state.mode(), NamespaceMode::Current);
        assert_eq!(state.scope_key().as_str(), "current");
    }

    #[test]
    fn test_select_then_toggle() {
        let mut state = NamespaceState::default();
        assert_eq!(
            state.select("kube-system"),
            ScopeKey::Namespace("kube-system".into())
        );
        assert_eq!(state.selected_namespace(), Some("kube-system"));

        assert_eq!(state.toggle(), ScopeKey::Current);
        assert_eq!(state.mode(), NamespaceMode::Current);
        assert_eq!(state.selected_namespace(), None);

        assert_eq!(state.toggle(), ScopeKey::All);
        assert_eq!(state.mode(), NamespaceMode::All);
        assert_eq!(state.selected_namespace(), None);
    }

    #[test]
    fn test_previous_selection_can_be_restored() {
        let mut state = NamespaceState::default();
        state.select("monitoring");
        state.toggle();
        let key = state.set_mode("specific").unwrap();
        assert_eq!(key.as_str(), "monitoring");
    }

    #[test]
    fn test_set_mode_rejects_unknown_modes() {
        let mut state = NamespaceState::default();
        assert!(matches!(
            state.set_mode("everything"),
            Err(Error::InvalidMode(_))
        ));
        assert!(matches!(
            state.set_mode("specific"),
            Err(Error::InvalidMode(_))
        ));
        assert_eq!(state.mode(), NamespaceMode::Current);
        assert_eq!(state.set_mode("all").unwrap(), ScopeKey::All);
    }

    #[test]
    fn test_current_namespace_cache() {
        let mut state = NamespaceState::default();
        assert_eq!(state.current_namespace_cached(), None);
        state.cache_current_namespace("default");
        assert_eq!(state.current_namespace_cached(), Some("default"));
        state.forget_current_namespace();
        assert_eq!(state.current_namespace_cached(), None);
    }

    #[test]
    fn test_mode_names_do_not_collide_with_namespaces() {
        assert_eq!(ScopeKey::All.cache_key(), "all");
        assert_eq!(ScopeKey::Namespace("all".into()).cache_key(), "namespace/all");
        assert_eq!(ScopeKey::Namespace("current".into()).as_str(), "current");
        assert_eq!(ScopeKey::Namespace("prod".into()).cache_key(), "prod");
    }
}
