use std::env;

use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub dev_auth_overrides_enabled: bool,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub request_timeout_seconds: u64,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub db_run_migrations: bool,
    pub jwt_secret: Option<String>,
    pub jwt_issuer: Option<String>,
    pub view_day_timezone: Tz,
    pub anonymous_view_window_hours: i64,
    pub anonymous_view_retention_days: i64,
    pub admin_flag_cache_ttl_seconds: u64,
    pub admin_flag_cache_max_entries: u64,
    pub public_reads_cache_ttl_seconds: u64,
    pub public_reads_cache_max_entries: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Estate Listings API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/api")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 3000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:5173")),
            dev_auth_overrides_enabled: env_parse_bool_or("DEV_AUTH_OVERRIDES_ENABLED", false),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            request_timeout_seconds: env_parse_or("REQUEST_TIMEOUT_SECONDS", 30),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            db_run_migrations: env_parse_bool_or("DB_RUN_MIGRATIONS", false),
            jwt_secret: env_opt("JWT_SECRET"),
            jwt_issuer: env_opt("JWT_ISSUER"),
            view_day_timezone: parse_timezone(env_opt("VIEW_DAY_TIMEZONE").as_deref()),
            anonymous_view_window_hours: env_parse_or("ANONYMOUS_VIEW_WINDOW_HOURS", 24),
            anonymous_view_retention_days: env_parse_or("ANONYMOUS_VIEW_RETENTION_DAYS", 30),
            admin_flag_cache_ttl_seconds: env_parse_or("ADMIN_FLAG_CACHE_TTL_SECONDS", 30),
            admin_flag_cache_max_entries: env_parse_or("ADMIN_FLAG_CACHE_MAX_ENTRIES", 10000),
            public_reads_cache_ttl_seconds: env_parse_or("PUBLIC_READS_CACHE_TTL_SECONDS", 15),
            public_reads_cache_max_entries: env_parse_or("PUBLIC_READS_CACHE_MAX_ENTRIES", 500),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn auth_dev_overrides_enabled(&self) -> bool {
        if self.is_production() {
            return false;
        }
        self.dev_auth_overrides_enabled
    }
}

#[cfg(test)]
impl AppConfig {
    /// Store-less configuration with dev header overrides, for router tests.
    pub fn for_tests() -> Self {
        Self {
            app_name: "Estate Listings API (test)".to_string(),
            environment: "test".to_string(),
            api_prefix: "/api".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            dev_auth_overrides_enabled: true,
            rate_limit_enabled: false,
            rate_limit_per_second: 10,
            rate_limit_burst_size: 100,
            request_timeout_seconds: 5,
            database_url: None,
            db_pool_max_connections: 1,
            db_pool_min_connections: 0,
            db_pool_acquire_timeout_seconds: 1,
            db_pool_idle_timeout_seconds: 60,
            db_run_migrations: false,
            jwt_secret: Some("test-secret".to_string()),
            jwt_issuer: None,
            view_day_timezone: Tz::UTC,
            anonymous_view_window_hours: 24,
            anonymous_view_retention_days: 30,
            admin_flag_cache_ttl_seconds: 30,
            admin_flag_cache_max_entries: 100,
            public_reads_cache_ttl_seconds: 15,
            public_reads_cache_max_entries: 100,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn parse_timezone(raw: Option<&str>) -> Tz {
    match raw {
        Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(timezone = name, "Unknown VIEW_DAY_TIMEZONE, using UTC");
            Tz::UTC
        }),
        None => Tz::UTC,
    }
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/api".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, parse_csv, parse_timezone};
    use chrono_tz::Tz;

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("api"), "/api");
        assert_eq!(normalize_prefix("/api/"), "/api");
        assert_eq!(normalize_prefix(""), "/api");
        assert_eq!(normalize_prefix("/"), "/");
    }

    #[test]
    fn csv_drops_blank_entries() {
        assert_eq!(
            parse_csv(" http://a.test, ,http://b.test "),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    fn timezone_falls_back_to_utc() {
        assert_eq!(parse_timezone(Some("Africa/Kampala")), Tz::Africa__Kampala);
        assert_eq!(parse_timezone(Some("Mars/Olympus")), Tz::UTC);
        assert_eq!(parse_timezone(None), Tz::UTC);
    }
}
