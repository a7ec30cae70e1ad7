//! Tenant resolution.
//!
//! Every tenant-scoped operation carries an explicit [`TenantCtx`]; there
//! is no ambient tenant state. The code is validated against a strict
//! character class before it is ever interpolated into a `SET search_path`
//! statement.

use crate::error::{ArchiveError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static TENANT_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").unwrap());

/// Header consulted when the tenant is not a path segment.
pub const TENANT_HEADER: &str = "X-Tenant-ID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantCtx {
    pub code: String,
}

impl TenantCtx {
    /// Postgres schema holding this tenant's tables.
    pub fn schema(&self) -> String {
        format!("tenant_{}", self.code)
    }
}

/// Validate a tenant code before it reaches SQL.
pub fn validate_code(code: &str) -> Result<&str> {
    if TENANT_CODE.is_match(code) {
        Ok(code)
    } else {
        Err(ArchiveError::InvalidTenantCode(code.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_codes() {
        assert!(validate_code("h1").is_ok());
        assert!(validate_code("mercy_general_2").is_ok());
    }

    #[test]
    fn rejects_injection_shapes() {
        for bad in ["H1", "h1;drop", "h1, public", "", "h1'--", "tenant h1"] {
            assert!(validate_code(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn schema_name() {
        let ctx = TenantCtx {
            code: "h1".to_string(),
        };
        assert_eq!(ctx.schema(), "tenant_h1");
    }
}
