//! In-memory `(name, bundle_id)` -> id cache for `DataSource`, warmed once
//! per pipeline run and filled in on demand (component C4).
//!
//! `sourceVersion` is used as the bundle identifier proxy: the export format
//! carries no true bundle id, and this crate does not attempt to invent one.

use std::collections::HashMap;
use std::sync::RwLock;

use sqlx::PgPool;

use crate::error::IngestResult;
use crate::models::DataSource;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SourceKey {
    name: String,
    bundle_id: String,
}

pub struct SourceRegistry {
    pool: PgPool,
    cache: RwLock<HashMap<SourceKey, i64>>,
}

impl SourceRegistry {
    /// Load every known source into the cache up front so steady-state
    /// lookups never touch the database.
    pub async fn warm(pool: PgPool) -> IngestResult<Self> {
        let rows = sqlx::query_as::<_, DataSource>("SELECT id, name, bundle_id FROM data_sources")
            .fetch_all(&pool)
            .await?;

        let mut cache = HashMap::with_capacity(rows.len());
        for row in rows {
            cache.insert(
                SourceKey {
                    name: row.name,
                    bundle_id: row.bundle_id,
                },
                row.id,
            );
        }

        Ok(Self {
            pool,
            cache: RwLock::new(cache),
        })
    }

    /// Resolve `(name, bundle_id)` to a source id, inserting a new row if
    /// this is the first time the run has seen this pair. Returns `None`
    /// when no source name was present on the element.
    pub async fn resolve(
        &self,
        name: Option<&str>,
        bundle_id: Option<&str>,
    ) -> IngestResult<Option<i64>> {
        let Some(name) = name else {
            return Ok(None);
        };
        let bundle_id = bundle_id.unwrap_or("");
        let key = SourceKey {
            name: name.to_string(),
            bundle_id: bundle_id.to_string(),
        };

        if let Some(id) = self.cache.read().unwrap().get(&key) {
            return Ok(Some(*id));
        }

        let mut tx = self.pool.begin().await?;
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM data_sources WHERE name = $1 AND bundle_id = $2",
        )
        .bind(&key.name)
        .bind(&key.bundle_id)
        .fetch_optional(&mut *tx)
        .await?;

        let id = match existing {
            Some((id,)) => id,
            None => {
                let (id,): (i64,) = sqlx::query_as(
                    "INSERT INTO data_sources (name, bundle_id) VALUES ($1, $2)
                     ON CONFLICT (name, bundle_id) DO UPDATE SET name = EXCLUDED.name
                     RETURNING id",
                )
                .bind(&key.name)
                .bind(&key.bundle_id)
                .fetch_one(&mut *tx)
                .await?;
                id
            }
        };
        tx.commit().await?;

        self.cache.write().unwrap().insert(key, id);
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_equality_is_name_and_bundle_id() {
        let a = SourceKey {
            name: "Health".to_string(),
            bundle_id: "1.0".to_string(),
        };
        let b = SourceKey {
            name: "Health".to_string(),
            bundle_id: "1.0".to_string(),
        };
        let c = SourceKey {
            name: "Health".to_string(),
            bundle_id: "2.0".to_string(),
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
