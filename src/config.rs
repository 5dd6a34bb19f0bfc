use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use std::path::PathBuf;

use crate::http_client::ClientOptions;

/// WebDict session client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the WebDict API
    #[arg(short = 'u', long, env = "API_BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Sign-in endpoint path
    #[arg(long, env = "AUTH_PATH", default_value = "/v1/api/auth/signin")]
    pub auth_path: String,

    /// Refresh endpoint path
    #[arg(long, env = "REFRESH_PATH", default_value = "/v1/api/auth/refresh")]
    pub refresh_path: String,

    /// Path to the session SQLite database
    #[arg(short = 'd', long, env = "SESSION_DB_FILE")]
    pub db_file: Option<String>,

    /// Name of the cookie carrying the refresh token
    #[arg(long, env = "REFRESH_COOKIE_NAME", default_value = "refreshToken")]
    pub refresh_cookie_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Sign in and store the issued credentials
    Login {
        #[arg(short, long)]
        email: Option<String>,

        #[arg(short, long)]
        password: Option<String>,
    },

    /// Drop the stored credentials
    Logout,

    /// Show the current session state
    Status,

    /// Send an authenticated request and print the response body
    Request {
        /// HTTP method (GET, POST, PUT, DELETE, ...)
        method: String,

        /// Path relative to the base URL
        path: String,

        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,
    },
}

/// Upper bound for TOKEN_REFRESH_THRESHOLD (one day)
pub const MAX_REFRESH_THRESHOLD: u64 = 86_400;

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub base_url: String,
    pub auth_path: String,
    pub refresh_path: String,
    pub refresh_cookie_name: String,

    // Storage
    pub session_db_file: PathBuf,

    // Session
    pub token_refresh_threshold: u64,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Load .env, parse the command line and build the config from it
    pub fn load() -> Result<(Self, Command)> {
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let command = args.command.clone();
        Ok((Self::from_args(args)?, command))
    }

    /// Build configuration with priority: CLI > ENV > defaults
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let session_db_file = match args.db_file {
            Some(path) => expand_tilde(&path),
            None => default_db_path()?,
        };

        Ok(Config {
            base_url: args.base_url.trim_end_matches('/').to_string(),
            auth_path: args.auth_path,
            refresh_path: args.refresh_path,
            refresh_cookie_name: args.refresh_cookie_name,

            session_db_file,

            token_refresh_threshold: env_or("TOKEN_REFRESH_THRESHOLD", 0),

            http_max_connections: env_or("HTTP_MAX_CONNECTIONS", 20),
            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 10),
            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!("API_BASE_URL must be an http(s) URL: {}", self.base_url);
        }

        for (name, path) in [("AUTH_PATH", &self.auth_path), ("REFRESH_PATH", &self.refresh_path)] {
            if !path.starts_with('/') {
                anyhow::bail!("{} must start with '/': {}", name, path);
            }
        }

        if self.refresh_cookie_name.is_empty() {
            anyhow::bail!("REFRESH_COOKIE_NAME cannot be empty");
        }

        if self.http_max_connections == 0 {
            anyhow::bail!("HTTP_MAX_CONNECTIONS must be at least 1");
        }

        if self.token_refresh_threshold > MAX_REFRESH_THRESHOLD {
            anyhow::bail!(
                "TOKEN_REFRESH_THRESHOLD must be at most {} seconds: {}",
                MAX_REFRESH_THRESHOLD,
                self.token_refresh_threshold
            );
        }

        Ok(())
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        ClientOptions {
            auth_path: config.auth_path.clone(),
            refresh_path: config.refresh_path.clone(),
            refresh_cookie_name: config.refresh_cookie_name.clone(),
            refresh_threshold: config.token_refresh_threshold,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// `<data dir>/webdict/session.sqlite3`
fn default_db_path() -> Result<PathBuf> {
    let dir = dirs::data_dir().context(
        "Could not determine the data directory (use -d or set SESSION_DB_FILE env var)",
    )?;
    Ok(dir.join("webdict").join("session.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// === Interactive Login ===

/// Ask for whichever sign-in fields were not given on the command line
pub fn prompt_credentials(
    email: Option<String>,
    password: Option<String>,
) -> Result<(String, String)> {
    let email = match email {
        Some(email) => email,
        None => Input::new()
            .with_prompt("Email")
            .interact_text()
            .context("Failed to read email")?,
    };

    let password = match password {
        Some(password) => password,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };

    if email.is_empty() || password.is_empty() {
        anyhow::bail!("Email and password cannot be empty");
    }

    Ok((email, password))
}
