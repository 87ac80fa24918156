use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// HS256 secret for verifying handshake bearer tokens. When unset, tokens
    /// are not checked and the handshake relies on the user id alone.
    pub auth_token_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        let auth_token_secret = env::var("AUTH_TOKEN_SECRET").ok().filter(|s| !s.is_empty());

        Ok(Self {
            database_url,
            port,
            auth_token_secret,
        })
    }
}
