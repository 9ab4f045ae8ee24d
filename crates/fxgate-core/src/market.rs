//! Identifiers for symbols, liquidity providers and accounts.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum symbol length accepted at any boundary.
pub const MAX_SYMBOL_LEN: usize = 20;

/// Validated trading symbol (e.g. "EURUSD").
///
/// Symbols are restricted to `[A-Z0-9]{1,20}`. The restriction is enforced
/// at construction so storage paths never see path-traversal input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Parse and validate a symbol.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > MAX_SYMBOL_LEN {
            return Err(CoreError::InvalidSymbol(s.to_string()));
        }
        if !s.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
            return Err(CoreError::InvalidSymbol(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Symbol::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Liquidity provider identifier.
///
/// Ordering is lexical; the aggregator uses it as the final tie-break
/// when two LPs quote the same price at the same timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LpId(String);

impl LpId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LpId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Trading account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Connected API client identifier (WebSocket or HTTP caller).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account trading profile consumed by routing-rule filters.
///
/// Toxicity is an externally supplied `[0,1]` proxy for how informed the
/// account's flow is; this core treats it as a static input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountProfile {
    pub account_id: AccountId,
    /// Account group (e.g. "retail", "pro", "demo").
    pub group: String,
    /// Flow toxicity score in [0,1].
    pub toxicity: f64,
}

impl AccountProfile {
    pub fn new(account_id: AccountId, group: impl Into<String>, toxicity: f64) -> Self {
        Self {
            account_id,
            group: group.into(),
            toxicity: toxicity.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_accepts_valid() {
        assert!(Symbol::parse("EURUSD").is_ok());
        assert!(Symbol::parse("XAUUSD").is_ok());
        assert!(Symbol::parse("US30").is_ok());
    }

    #[test]
    fn test_symbol_rejects_invalid() {
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("eurusd").is_err());
        assert!(Symbol::parse("../etc").is_err());
        assert!(Symbol::parse("EUR/USD").is_err());
        assert!(Symbol::parse("A".repeat(21).as_str()).is_err());
    }

    #[test]
    fn test_lp_id_lexical_order() {
        assert!(LpId::from("LP_A") < LpId::from("LP_B"));
    }

    #[test]
    fn test_profile_clamps_toxicity() {
        let p = AccountProfile::new(AccountId::from("a1"), "retail", 1.7);
        assert_eq!(p.toxicity, 1.0);
    }
}
