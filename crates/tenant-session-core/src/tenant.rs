use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Longest accepted institution code.
const MAX_TENANT_LEN: usize = 64;

/// Tenant identifier ("institution code").
///
/// Accepted codes are non-empty ASCII alphanumerics plus `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap an institution code.
    pub fn parse(code: impl Into<String>) -> Result<Self, SessionError> {
        let code = code.into();
        if code.is_empty() || code.len() > MAX_TENANT_LEN {
            return Err(SessionError::InvalidTenant(code));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SessionError::InvalidTenant(code));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Identifies one inbound request for the lifetime of its session registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u128);

impl RequestId {
    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_institution_codes() {
        assert_eq!(TenantId::parse("ACME-01").unwrap().as_str(), "ACME-01");
        assert_eq!(TenantId::parse("core_bank").unwrap().to_string(), "core_bank");
    }

    #[test]
    fn test_parse_rejects_bad_codes() {
        assert!(TenantId::parse("").is_err());
        assert!(TenantId::parse("has space").is_err());
        assert!(TenantId::parse("../etc").is_err());
        assert!(TenantId::parse("x".repeat(65)).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: TenantId = serde_json::from_str("\"T1\"").unwrap();
        assert_eq!(ok.as_str(), "T1");
        assert!(serde_json::from_str::<TenantId>("\"bad/code\"").is_err());
    }

    #[test]
    fn test_request_id_display_is_fixed_width() {
        assert_eq!(RequestId::from_u128(255).to_string().len(), 32);
    }
}
