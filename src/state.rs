use std::{sync::Arc, time::Duration};

use moka::future::Cache;
use sqlx::PgPool;

use crate::{
    auth::JwtVerifier, cache::ResponseCache, config::AppConfig, db::build_pool,
    services::views::ViewPolicy,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub jwt: Option<Arc<JwtVerifier>>,
    pub view_policy: ViewPolicy,
    pub admin_flags: Cache<String, bool>,
    pub public_reads_cache: ResponseCache,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = build_pool(&config)?;
        let jwt = JwtVerifier::from_config(&config).map(Arc::new);
        let view_policy = ViewPolicy::from_config(&config);
        let admin_flags = Cache::builder()
            .max_capacity(config.admin_flag_cache_max_entries.max(1))
            .time_to_live(Duration::from_secs(config.admin_flag_cache_ttl_seconds.max(1)))
            .build();
        let public_reads_cache = ResponseCache::new(
            config.public_reads_cache_ttl_seconds,
            config.public_reads_cache_max_entries,
        );

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            jwt,
            view_policy,
            admin_flags,
            public_reads_cache,
        })
    }
}
