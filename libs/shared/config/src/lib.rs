use std::env;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_HOLD_TTL_SECONDS: u64 = 600;
pub const DEFAULT_HOLD_SWEEP_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_WAITLIST_SWEEP_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_SERVER_PORT: u16 = 3000;
pub const MAX_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
pub const MAX_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub redis_url: Option<String>,
    pub store_backend: StoreBackend,
    pub hold_ttl_seconds: u64,
    pub hold_sweep_interval_seconds: u64,
    pub waitlist_sweep_interval_seconds: u64,
    pub waitlist_offer_ttl_seconds: u64,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            store_backend: match env::var("RESERVATION_STORE").as_deref() {
                Ok("redis") => StoreBackend::Redis,
                Ok("memory") | Err(_) => StoreBackend::Memory,
                Ok(other) => {
                    warn!("Unknown RESERVATION_STORE '{}', using in-memory store", other);
                    StoreBackend::Memory
                }
            },
            hold_ttl_seconds: parse_seconds_or_default(
                "HOLD_TTL_SECONDS",
                DEFAULT_HOLD_TTL_SECONDS,
                MAX_TTL_SECONDS,
            ),
            hold_sweep_interval_seconds: parse_seconds_or_default(
                "HOLD_SWEEP_INTERVAL_SECONDS",
                DEFAULT_HOLD_SWEEP_INTERVAL_SECONDS,
                MAX_INTERVAL_SECONDS,
            ),
            waitlist_sweep_interval_seconds: parse_seconds_or_default(
                "WAITLIST_SWEEP_INTERVAL_SECONDS",
                DEFAULT_WAITLIST_SWEEP_INTERVAL_SECONDS,
                MAX_INTERVAL_SECONDS,
            ),
            waitlist_offer_ttl_seconds: parse_seconds_or_default(
                "WAITLIST_OFFER_TTL_SECONDS",
                DEFAULT_HOLD_TTL_SECONDS,
                MAX_TTL_SECONDS,
            ),
            server_port: parse_or_default("SERVER_PORT", DEFAULT_SERVER_PORT),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if config.store_backend == StoreBackend::Redis && config.redis_url.is_none() {
            warn!("RESERVATION_STORE=redis but REDIS_URL is not set");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_notification_sink_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            redis_url: None,
            store_backend: StoreBackend::Memory,
            hold_ttl_seconds: DEFAULT_HOLD_TTL_SECONDS,
            hold_sweep_interval_seconds: DEFAULT_HOLD_SWEEP_INTERVAL_SECONDS,
            waitlist_sweep_interval_seconds: DEFAULT_WAITLIST_SWEEP_INTERVAL_SECONDS,
            waitlist_offer_ttl_seconds: DEFAULT_HOLD_TTL_SECONDS,
            server_port: DEFAULT_SERVER_PORT,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

/// Like `parse_or_default`, but zero and anything above `max` also fall back.
fn parse_seconds_or_default(key: &str, default: u64, max: u64) -> u64 {
    let seconds = parse_or_default(key, default);
    if seconds == 0 || seconds > max {
        warn!(
            "{} must be between 1 and {} seconds, got {}, using default {}",
            key, max, seconds, default
        );
        return default;
    }
    seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_reference_timings() {
        let config = AppConfig::default();
        assert_eq!(config.hold_ttl_seconds, 600);
        assert_eq!(config.hold_sweep_interval_seconds, 300);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert!(!config.is_configured());
    }

    #[test]
    fn test_parse_or_default_falls_back_on_garbage() {
        env::set_var("AMAE_TEST_PARSE_GARBAGE", "ten minutes");
        assert_eq!(parse_or_default("AMAE_TEST_PARSE_GARBAGE", 42u64), 42);
        env::set_var("AMAE_TEST_PARSE_GARBAGE", " 90 ");
        assert_eq!(parse_or_default("AMAE_TEST_PARSE_GARBAGE", 42u64), 90);
        env::remove_var("AMAE_TEST_PARSE_GARBAGE");
    }

    #[test]
    fn test_zero_or_oversized_seconds_fall_back() {
        env::set_var("AMAE_TEST_SECONDS_ZERO", "0");
        assert_eq!(parse_seconds_or_default("AMAE_TEST_SECONDS_ZERO", 300, 3600), 300);

        env::set_var("AMAE_TEST_SECONDS_HUGE", "18446744073709551615");
        assert_eq!(parse_seconds_or_default("AMAE_TEST_SECONDS_HUGE", 600, MAX_TTL_SECONDS), 600);

        env::set_var("AMAE_TEST_SECONDS_OK", "45");
        assert_eq!(parse_seconds_or_default("AMAE_TEST_SECONDS_OK", 300, 3600), 45);

        env::remove_var("AMAE_TEST_SECONDS_ZERO");
        env::remove_var("AMAE_TEST_SECONDS_HUGE");
        env::remove_var("AMAE_TEST_SECONDS_OK");
    }
}
