//! Injection method vocabulary
//!
//! These names are part of the external interface: command servers pass them
//! through verbatim, so spellings must not change.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ProtocolError;

/// Delivery method requested by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionMethod {
    /// Direct event-bus dispatch
    #[serde(alias = "iohid", alias = "direct")]
    Sim,
    /// Low-level connection dispatch
    #[serde(alias = "connection")]
    Conn,
    /// Legacy event posting
    #[serde(alias = "old")]
    Legacy,
    /// Focus-routed dispatch
    Bks,
    /// Accessibility event posting
    #[serde(alias = "a11y")]
    Ax,
    /// Every enabled backend in priority order until one succeeds
    All,
    /// Default priority order with fallback
    #[default]
    Auto,
}

impl InjectionMethod {
    pub const ALL: [InjectionMethod; 7] = [
        InjectionMethod::Sim,
        InjectionMethod::Conn,
        InjectionMethod::Legacy,
        InjectionMethod::Bks,
        InjectionMethod::Ax,
        InjectionMethod::All,
        InjectionMethod::Auto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InjectionMethod::Sim => "sim",
            InjectionMethod::Conn => "conn",
            InjectionMethod::Legacy => "legacy",
            InjectionMethod::Bks => "bks",
            InjectionMethod::Ax => "ax",
            InjectionMethod::All => "all",
            InjectionMethod::Auto => "auto",
        }
    }

    /// Explicitly names a single non-accessibility backend
    pub fn is_strict(&self) -> bool {
        matches!(
            self,
            InjectionMethod::Sim | InjectionMethod::Conn | InjectionMethod::Legacy | InjectionMethod::Bks
        )
    }

    /// Parse an optional method name; missing or blank means `Auto`
    pub fn parse_optional(name: Option<&str>) -> Result<Self, ProtocolError> {
        match name {
            Some(s) => s.parse(),
            None => Ok(InjectionMethod::Auto),
        }
    }
}

impl FromStr for InjectionMethod {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let method = match lower.as_str() {
            "" | "auto" => InjectionMethod::Auto,
            "sim" | "iohid" | "direct" => InjectionMethod::Sim,
            "conn" | "connection" => InjectionMethod::Conn,
            "legacy" | "old" => InjectionMethod::Legacy,
            "bks" => InjectionMethod::Bks,
            "ax" | "a11y" => InjectionMethod::Ax,
            "all" => InjectionMethod::All,
            _ => return Err(ProtocolError::UnknownMethod(s.to_string())),
        };
        Ok(method)
    }
}

impl std::fmt::Display for InjectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_names_round_trip() {
        for method in InjectionMethod::ALL {
            assert_eq!(method.as_str().parse::<InjectionMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_aliases_and_case() {
        assert_eq!("IOHID".parse::<InjectionMethod>().unwrap(), InjectionMethod::Sim);
        assert_eq!(" connection ".parse::<InjectionMethod>().unwrap(), InjectionMethod::Conn);
        assert_eq!("old".parse::<InjectionMethod>().unwrap(), InjectionMethod::Legacy);
        assert_eq!("a11y".parse::<InjectionMethod>().unwrap(), InjectionMethod::Ax);
        assert_eq!("".parse::<InjectionMethod>().unwrap(), InjectionMethod::Auto);
        assert_eq!(InjectionMethod::parse_optional(None).unwrap(), InjectionMethod::Auto);
    }

    #[test]
    fn test_unknown_method_rejected() {
        assert!(matches!(
            "teleport".parse::<InjectionMethod>(),
            Err(ProtocolError::UnknownMethod(name)) if name == "teleport"
        ));
    }

    #[test]
    fn test_strict_methods() {
        assert!(InjectionMethod::Bks.is_strict());
        assert!(!InjectionMethod::Ax.is_strict());
        assert!(!InjectionMethod::Auto.is_strict());
        assert!(!InjectionMethod::All.is_strict());
    }
}
