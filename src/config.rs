use clap::Parser;
use std::path::PathBuf;

/// Command-line and environment configuration for the server.
#[derive(Parser, Debug, Clone)]
#[command(name = "occurrence-tracker-server")]
#[command(about = "Aviation safety occurrence and investigation tracker")]
#[command(version)]
pub struct Config {
    /// MongoDB connection string
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// Database holding every collection
    #[arg(long, env = "DATABASE_NAME", default_value = "occurrence-tracker")]
    pub database_name: String,

    #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1")]
    pub bind_address: String,

    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// HMAC secret used to sign session tokens
    #[arg(long, env = "SESSION_SECRET", hide_env_values = true)]
    pub session_secret: String,

    /// Root directory of the attachment bucket
    #[arg(long, env = "STORAGE_DIR", default_value = "./files")]
    pub storage_dir: PathBuf,

    /// Prefix used when building public attachment URLs
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:8000")]
    pub public_base_url: String,

    /// Allowed browser origin; any origin when unset
    #[arg(long, env = "CORS_ORIGIN")]
    pub cors_origin: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_with_defaults() {
        let config = Config::try_parse_from([
            "occurrence-tracker-server",
            "--session-secret",
            "s3cret",
            "--port",
            "9100",
        ])
        .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.session_secret, "s3cret");
        assert_eq!(config.storage_dir, PathBuf::from("./files"));
        assert!(config.cors_origin.is_none());
    }
}
