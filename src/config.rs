//! Process configuration from environment variables (optionally seeded from `.env`).

use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone, PartialEq, Eq)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub currency: String,
    pub webhook_tolerance_secs: i64,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base)
            .field("currency", &self.currency)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub auth_token_secret: String,
    pub client_url: String,
    pub static_dir: Option<PathBuf>,
    pub stripe: StripeConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_max_connections", &self.database_max_connections)
            .field("bind_addr", &self.bind_addr)
            .field("client_url", &self.client_url)
            .field("static_dir", &self.static_dir)
            .field("stripe", &self.stripe)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &'static str| lookup(name).filter(|value| !value.trim().is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let bind_addr = parse_or(get("BIND_ADDR"), "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8000)))?;
        let database_max_connections =
            parse_or(get("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", 10)?;
        let webhook_tolerance_secs =
            parse_or(get("WEBHOOK_TOLERANCE_SECS"), "WEBHOOK_TOLERANCE_SECS", 300)?;

        Ok(Self {
            database_url: require("DATABASE_URL")?,
            database_max_connections,
            bind_addr,
            auth_token_secret: require("AUTH_TOKEN_SECRET")?,
            client_url: get("CLIENT_URL")
                .unwrap_or_else(|| "http://localhost:5173".to_owned())
                .trim_end_matches('/')
                .to_owned(),
            static_dir: get("STATIC_DIR").map(PathBuf::from),
            stripe: StripeConfig {
                secret_key: require("STRIPE_SECRET_KEY")?,
                webhook_secret: require("STRIPE_WEBHOOK_SECRET")?,
                api_base: get("STRIPE_API_BASE")
                    .unwrap_or_else(|| "https://api.stripe.com".to_owned())
                    .trim_end_matches('/')
                    .to_owned(),
                currency: get("PAYMENT_CURRENCY")
                    .unwrap_or_else(|| "usd".to_owned())
                    .to_lowercase(),
                webhook_tolerance_secs,
            },
        })
    }
}

fn parse_or<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/rentals"),
            ("AUTH_TOKEN_SECRET", "secret"),
            ("STRIPE_SECRET_KEY", "sk_test_123"),
            ("STRIPE_WEBHOOK_SECRET", "whsec_123"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| vars.get(name).map(|v| (*v).to_owned()))
    }

    #[test]
    fn defaults_fill_optional_values() {
        let config = load(&base_vars()).expect("valid config");
        assert_eq!(config.bind_addr, "127.0.0.1:8000".parse().expect("addr"));
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.stripe.api_base, "https://api.stripe.com");
        assert_eq!(config.stripe.currency, "usd");
        assert_eq!(config.stripe.webhook_tolerance_secs, 300);
        assert_eq!(config.client_url, "http://localhost:5173");
        assert!(config.static_dir.is_none());
    }

    #[test]
    fn missing_secret_is_named() {
        let mut vars = base_vars();
        vars.remove("STRIPE_WEBHOOK_SECRET");
        assert_eq!(load(&vars), Err(ConfigError::Missing("STRIPE_WEBHOOK_SECRET")));
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let mut vars = base_vars();
        vars.insert("DATABASE_URL", "   ");
        assert_eq!(load(&vars), Err(ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn malformed_number_is_invalid() {
        let mut vars = base_vars();
        vars.insert("WEBHOOK_TOLERANCE_SECS", "five minutes");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { name: "WEBHOOK_TOLERANCE_SECS", .. })
        ));
    }

    #[test]
    fn overrides_are_normalised() {
        let mut vars = base_vars();
        vars.insert("PAYMENT_CURRENCY", "EUR");
        vars.insert("CLIENT_URL", "https://rent.example.com/");
        let config = load(&vars).expect("valid config");
        assert_eq!(config.stripe.currency, "eur");
        assert_eq!(config.client_url, "https://rent.example.com");
    }
}
