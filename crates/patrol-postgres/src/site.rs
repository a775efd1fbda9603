//! `SiteNameLookup` used to enrich terminal-failure payloads (`spec.md` §4.8).

use async_trait::async_trait;
use patrol_core::service::SiteNameLookup;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgSiteNameLookup {
    pool: PgPool,
}

impl PgSiteNameLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteNameLookup for PgSiteNameLookup {
    async fn site_name(&self, site_id: Uuid) -> Option<String> {
        let row = sqlx::query("SELECT name FROM sites WHERE id = $1")
            .bind(site_id)
            .fetch_optional(&self.pool)
            .await
            .ok()??;
        row.try_get("name").ok()
    }
}
