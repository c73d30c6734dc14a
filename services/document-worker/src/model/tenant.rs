//! Per-tenant policies.

use serde::{Deserialize, Serialize};

/// Document features enabled for a tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenantConfig {
    /// Only formats producing PDF may be generated.
    pub pdf_only: bool,
    /// PDF output is stamped with a watermark.
    pub pdf_watermark: bool,
}

/// Object storage consumed by a tenant, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StorageUsage {
    /// Bytes currently stored.
    pub used: i64,
    /// Quota; `None` means unlimited.
    pub limit: Option<i64>,
}

impl StorageUsage {
    /// Bytes still available, or `None` when unlimited.
    #[must_use]
    pub fn remaining(&self) -> Option<i64> {
        self.limit.map(|limit| (limit - self.used).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_never_negative() {
        let usage = StorageUsage {
            used: 150,
            limit: Some(100),
        };
        assert_eq!(usage.remaining(), Some(0));
        assert_eq!(StorageUsage::default().remaining(), None);
    }
}
