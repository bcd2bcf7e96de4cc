use std::env;

type ConfigError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub port: u16,
    pub amqp: AmqpConfig,
}

impl Config {
    /// Reads the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or("DATABASE_URL should be set")?;
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let port_of = |key: &str, default: u16| -> Result<u16, ConfigError> {
            match lookup(key) {
                Some(raw) => raw
                    .parse::<u16>()
                    .map_err(|e| format!("{} must be a port number, got '{}': {}", key, raw, e).into()),
                None => Ok(default),
            }
        };

        Ok(Self {
            database_url,
            bind_address: or_default("BIND_ADDRESS", "127.0.0.1"),
            port: port_of("PORT", 8080)?,
            amqp: AmqpConfig {
                host: or_default("AMQP_HOST", "localhost"),
                port: port_of("AMQP_PORT", 5672)?,
                user: or_default("AMQP_USER", "guest"),
                password: or_default("AMQP_PASSWORD", "guest"),
            },
        })
    }
}
