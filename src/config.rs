use std::{env, net::SocketAddr};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://globetrotter.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let jwt_secret = env::var("APP_JWT_SECRET")
            .unwrap_or_else(|_| "change-me-globetrotter-dev-secret".to_string());

        let token_ttl_hours = env::var("APP_TOKEN_TTL_HOURS")
            .ok()
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|err| AppError::Config(format!("invalid APP_TOKEN_TTL_HOURS: {err}")))
            })
            .transpose()?
            .unwrap_or(24 * 7);

        Ok(Self {
            database_url,
            listen_addr,
            jwt_secret,
            token_ttl_hours,
        })
    }
}
