use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Server settings, read from the environment.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    /// `None` keeps the database in a temporary directory.
    pub database_path: Option<PathBuf>,
    pub request_timeout: Duration,
    pub bcrypt_cost: u32,
    pub admin: Option<AdminSeed>,
}

fn parse<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|secret| !secret.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let token_ttl_hours: i64 = parse("TOKEN_TTL_HOURS", lookup("TOKEN_TTL_HOURS"), 1)?;
        if token_ttl_hours <= 0 {
            return Err(ConfigError::Invalid {
                name: "TOKEN_TTL_HOURS",
                value: token_ttl_hours.to_string(),
            });
        }
        let bcrypt_cost = parse("BCRYPT_COST", lookup("BCRYPT_COST"), 10)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                name: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
            });
        }
        let admin = match (
            lookup("ADMIN_USERNAME"),
            lookup("ADMIN_EMAIL"),
            lookup("ADMIN_PASSWORD"),
        ) {
            (Some(username), Some(email), Some(password)) => Some(AdminSeed {
                username,
                email,
                password,
            }),
            (None, None, None) => None,
            (None, _, _) => return Err(ConfigError::Missing("ADMIN_USERNAME")),
            (_, None, _) => return Err(ConfigError::Missing("ADMIN_EMAIL")),
            (_, _, None) => return Err(ConfigError::Missing("ADMIN_PASSWORD")),
        };

        Ok(Config {
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_owned()),
            port: parse("PORT", lookup("PORT"), 5000)?,
            jwt_secret,
            token_ttl: chrono::Duration::hours(token_ttl_hours),
            database_path: lookup("DATABASE_PATH")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            request_timeout: Duration::from_millis(parse(
                "REQUEST_TIMEOUT_MS",
                lookup("REQUEST_TIMEOUT_MS"),
                5000,
            )?),
            bcrypt_cost,
            admin,
        })
    }

    pub fn open_db(&self) -> sled::Result<sled::Db> {
        match &self.database_path {
            Some(path) => sled::Config::new().path(path).open(),
            None => sled::Config::new().temporary(true).open(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("database_path", &self.database_path)
            .field("request_timeout", &self.request_timeout)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("admin", &self.admin.as_ref().map(|admin| &admin.username))
            .finish()
    }
}
