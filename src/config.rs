//! Environment-driven settings

use log::warn;
use std::env;
use std::str::FromStr;

const DEFAULT_DATABASE_URL: &str = "sqlite:storefront_chat.db?mode=rwc";
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:8081,http://localhost:19006";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_address: String,
    /// Broadcast buffer per conversation. A subscriber falling further behind
    /// than this misses pushes and has to reconcile through `list_messages`.
    pub channel_capacity: usize,
    pub allowed_origins: Vec<String>,
}

impl Settings {
    /// Reads settings from the process environment, loading `.env` first if present.
    pub fn from_env() -> Settings {
        dotenvy::dotenv().ok();
        Settings::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Settings {
        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_owned())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_owned)
            .collect();

        Settings {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned()),
            database_max_connections: parse_or_default(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_MAX_CONNECTIONS,
            ),
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_owned()),
            channel_capacity: parse_or_default(&lookup, "CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY)
                .max(1),
            allowed_origins,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from_lookup(|_| None)
    }
}

fn parse_or_default<T: FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => T::from_str(raw.trim()).unwrap_or_else(|_| {
            warn!("ignoring unparseable {key}={raw:?}, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let settings = Settings::default();

        assert_eq!(settings.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(settings.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(settings.database_max_connections, 5);
        assert_eq!(settings.channel_capacity, 256);
        assert_eq!(settings.allowed_origins.len(), 2);
    }

    #[test]
    fn reads_overrides() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("CHANNEL_CAPACITY", "16"),
            ("ALLOWED_ORIGINS", "https://shop.example, ,https://admin.example"),
        ]));

        assert_eq!(settings.database_url, "sqlite::memory:");
        assert_eq!(settings.channel_capacity, 16);
        assert_eq!(
            settings.allowed_origins,
            vec!["https://shop.example", "https://admin.example"]
        );
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("DATABASE_MAX_CONNECTIONS", "lots"),
            ("CHANNEL_CAPACITY", "0"),
        ]));

        assert_eq!(settings.database_max_connections, 5);
        assert_eq!(settings.channel_capacity, 1);
    }
}
