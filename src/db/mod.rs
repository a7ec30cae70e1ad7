//! Database access.
//!
//! One Postgres instance hosts a shared `public` schema (tenant registry,
//! volumes, lifecycle rules, migration tasks) and one `tenant_{code}`
//! schema per tenant. A connection checked out for tenant work gets its
//! `search_path` set to `tenant_{code}, public` so unqualified entity
//! names resolve to the tenant's tables first.

use crate::config::config::DatabaseConfig;
use crate::error::Result;
use crate::tenancy::{validate_code, TenantCtx};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;

pub mod audit;
pub mod bulk;
pub mod corrections;
pub mod lifecycle;
pub mod locations;
pub mod partitions;
pub mod qido;
pub mod tenants;
pub mod volumes;

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(config: &DatabaseConfig) -> Result<Db> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Db { pool })
    }

    #[cfg(test)]
    pub fn from_pool(pool: PgPool) -> Db {
        Db { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check out a connection pinned to a tenant's schema.
    ///
    /// The search path is issued on every checkout; connections returned
    /// to the pool may carry a stale path, so no caller may skip this.
    pub async fn tenant_conn(&self, tenant: &TenantCtx) -> Result<PoolConnection<Postgres>> {
        validate_code(&tenant.code)?;
        let mut conn = self.pool.acquire().await?;
        sqlx::query(&format!(
            "SET search_path TO {}, public",
            tenant.schema()
        ))
        .execute(&mut *conn)
        .await?;
        Ok(conn)
    }

    /// Check out a connection for shared-scope (admin) work.
    pub async fn shared_conn(&self) -> Result<PoolConnection<Postgres>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SET search_path TO public")
            .execute(&mut *conn)
            .await?;
        Ok(conn)
    }
}
