use std::{env, net::SocketAddr, path::PathBuf};

use chrono::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    /// Root directory of the JSON document store (trips, vehicles).
    pub data_root: PathBuf,
    pub cookie_secret: String,
    pub admin_api_key: Option<String>,
    pub driver_api_key: Option<String>,
    /// How long after its start a trip stays editable.
    pub edit_window_days: i64,
    /// Default temporal floor for listing operations.
    pub listing_floor_days: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://fahrtenbuch.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let data_root = env::var("DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        let cookie_secret = env::var("COOKIE_SECRET")
            .unwrap_or_else(|_| "change-me-super-secret-fahrtenbuch-cookie".to_string());

        let admin_api_key = env::var("ADMIN_API_KEY").ok().filter(|k| !k.is_empty());
        let driver_api_key = env::var("DRIVER_API_KEY").ok().filter(|k| !k.is_empty());

        let edit_window_days = parse_days("EDIT_WINDOW_DAYS", 30)?;
        let listing_floor_days = parse_days("LISTING_FLOOR_DAYS", 30)?;

        Ok(Self {
            database_url,
            listen_addr,
            data_root,
            cookie_secret,
            admin_api_key,
            driver_api_key,
            edit_window_days,
            listing_floor_days,
        })
    }

    pub fn edit_window(&self) -> Duration {
        Duration::days(self.edit_window_days)
    }

    pub fn listing_floor(&self) -> Duration {
        Duration::days(self.listing_floor_days)
    }
}

fn parse_days(key: &str, default: i64) -> Result<i64, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<i64>()
            .map_err(|err| AppError::Config(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
