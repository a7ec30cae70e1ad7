//! Monthly partition maintenance for the per-tenant `instance` table.
//!
//! A daily job pre-creates partitions up to `months_ahead` months in
//! advance so ingest never races partition DDL. Partition names and
//! bounds derive from dates, never from user input.

use crate::error::Result;
use crate::tenancy::TenantCtx;
use crate::Db;
use chrono::{Datelike, NaiveDate, Utc};

/// First day of the month `offset` months after `from`.
fn month_start(from: NaiveDate, offset: u32) -> NaiveDate {
    let zero_based = from.year() * 12 + from.month0() as i32 + offset as i32;
    let year = zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start")
}

pub fn partition_name(month: NaiveDate) -> String {
    format!("instance_y{:04}m{:02}", month.year(), month.month())
}

/// Ensure partitions exist for the current month through `months_ahead`.
pub async fn ensure_partitions(db: &Db, tenant: &TenantCtx, months_ahead: u32) -> Result<u32> {
    let mut conn = db.tenant_conn(tenant).await?;
    let today = Utc::now().date_naive();
    let current = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).expect("month start");

    let mut created = 0;
    for offset in 0..=months_ahead {
        let from = month_start(current, offset);
        let to = month_start(current, offset + 1);
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {name} PARTITION OF instance \
             FOR VALUES FROM ('{from}') TO ('{to}')",
            name = partition_name(from),
            from = from,
            to = to,
        );
        let result = sqlx::query(&ddl).execute(&mut *conn).await;
        match result {
            Ok(_) => created += 1,
            Err(e) => {
                tracing::error!(
                    tenant = %tenant.code,
                    partition = %partition_name(from),
                    "partition DDL failed: {}",
                    e
                );
                return Err(e.into());
            }
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_arithmetic_rolls_over_years() {
        let nov = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        assert_eq!(
            month_start(nov, 2),
            NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()
        );
        assert_eq!(
            month_start(nov, 14),
            NaiveDate::from_ymd_opt(2028, 1, 1).unwrap()
        );
    }

    #[test]
    fn partition_names_are_stable() {
        let jan = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(partition_name(jan), "instance_y2026m01");
    }
}
