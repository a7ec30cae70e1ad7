use crate::error::{ArchiveError, Result};
use crate::models::Tenant;
use crate::Db;

/// Tenant registry reads. Rows are created by the provisioning tooling;
/// the core only consumes them.
pub async fn list_active(db: &Db) -> Result<Vec<Tenant>> {
    let tenants = sqlx::query_as::<_, Tenant>(
        "SELECT id, code, name, active FROM public.tenant WHERE active ORDER BY code",
    )
    .fetch_all(db.pool())
    .await?;
    Ok(tenants)
}

pub async fn find_active(db: &Db, code: &str) -> Result<Tenant> {
    sqlx::query_as::<_, Tenant>(
        "SELECT id, code, name, active FROM public.tenant WHERE code = $1 AND active",
    )
    .bind(code)
    .fetch_optional(db.pool())
    .await?
    .ok_or_else(|| ArchiveError::TenantNotFound(code.to_string()))
}
