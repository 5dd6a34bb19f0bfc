use anyhow::{Context, Result};
use reqwest::Method;
use std::sync::Arc;

use webdict_session::config::{self, Command, Config};
use webdict_session::http_client::{ClientOptions, SessionClient};
use webdict_session::navigation::LoggingNavigator;
use webdict_session::session::SqliteCredentialStore;
use webdict_session::transport::{ApiRequest, ReqwestTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("API: {}", config.base_url);
    tracing::debug!("Session store: {}", config.session_db_file.display());

    let store = Arc::new(SqliteCredentialStore::open(&config.session_db_file)?);

    let transport = Arc::new(ReqwestTransport::new(
        &config.base_url,
        config.http_max_connections,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);

    let client = SessionClient::new(
        transport,
        store,
        Arc::new(LoggingNavigator),
        ClientOptions::from(&config),
    );

    match command {
        Command::Login { email, password } => {
            let (email, password) = config::prompt_credentials(email, password)?;
            let generation = client.login(&email, &password).await?;
            println!("  Logged in:   {}", email);
            println!("  Session:     {}", generation);
        }

        Command::Logout => {
            client.logout();
            println!("  Session:     {}", client.current_session_state());
        }

        Command::Status => print_status(&client),

        Command::Request { method, path, body } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;

            let mut request = ApiRequest::new(method, path);
            if let Some(body) = body {
                let value: serde_json::Value =
                    serde_json::from_str(&body).context("Request body is not valid JSON")?;
                request = request.json(&value)?;
            }

            let response = client.attach_and_send(request).await?;
            tracing::info!("Response status: {}", response.status);

            match response.json::<serde_json::Value>() {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.text()),
            }
        }
    }

    Ok(())
}

/// Print session state with a masked token
fn print_status(client: &SessionClient) {
    println!("  Session:     {}", client.current_session_state());

    if let Some(pair) = client.credentials() {
        let token = &pair.access_token;
        println!(
            "  Token:       {} {}...",
            pair.token_type,
            &token[..8.min(token.len())]
        );
        println!(
            "  Refreshable: {}",
            if pair.refresh_token.is_some() {
                "yes"
            } else {
                "no"
            }
        );
        if let Some(expires_at) = pair.expires_at {
            println!("  Expires:     {}", expires_at.to_rfc3339());
        }
    }
}
