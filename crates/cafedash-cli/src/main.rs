//! cafedash - command line access to the cafe admin API.
//!
//! Logs in, keeps the session's tokens fresh and sends authenticated
//! requests through the same lifecycle the dashboard uses.

use std::io;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cafedash_core::api::ApiRequest;
use cafedash_core::{AuthService, Config, Credentials, RegistrationRequest};

#[derive(Parser)]
#[command(name = "cafedash", version, about = "Cafe admin API client")]
struct Cli {
    /// API base URL (overrides the config file)
    #[arg(long, env = "CAFEDASH_API_BASE_URL", global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in with an email address or phone number
    Login {
        identifier: String,
        #[arg(long)]
        remember_me: bool,
    },
    /// Create a staff account
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the current session state
    Status,
    /// Fetch the logged in user's profile
    Whoami,
    /// Print a valid access token, refreshing it if needed
    Token,
    /// GET an API path and print the JSON response
    Get {
        path: String,
        /// Keep the session fresh and repeat the request every N seconds
        #[arg(long)]
        watch: Option<u64>,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    init_tracing();

    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = Some(url);
    }

    let service = AuthService::from_config(&config)?;
    let state = service.initialize()?;
    info!(status = ?state.status, base_url = %config.base_url(), "cafedash starting");

    service.on_session_expired(|event| {
        eprintln!(
            "Session ended ({:?}) - run `cafedash login` to sign in again",
            event.reason
        );
    });

    match cli.command {
        Command::Login {
            identifier,
            remember_me,
        } => {
            let password = rpassword::prompt_password("Password: ")?;
            let credentials = Credentials::new(identifier, password).remember_me(remember_me);
            let outcome = service.login(&credentials).await?;
            println!("{}", outcome.message);
            if let Some(user) = outcome.user {
                println!(
                    "Signed in as {}",
                    user.username.or(user.email).unwrap_or_else(|| "unknown user".into())
                );
            }
        }
        Command::Register {
            username,
            phone,
            email,
            first_name,
            last_name,
            address,
        } => {
            let password = rpassword::prompt_password("Password: ")?;
            let password_confirm = rpassword::prompt_password("Confirm password: ")?;
            let request = RegistrationRequest {
                username,
                email,
                first_name,
                last_name,
                password,
                password_confirm,
                phone_number: phone,
                address,
                date_of_birth: None,
            };
            let outcome = service.register(&request).await?;
            println!("{}", outcome.message);
            if !outcome.authenticated {
                println!("Account created - run `cafedash login` to sign in");
            }
        }
        Command::Logout => {
            service.logout()?;
            println!("Logged out");
        }
        Command::Status => {
            let state = service.state();
            println!("Status:        {:?}", state.status);
            println!("Authenticated: {}", state.is_authenticated);
            if let Some(user) = state.current_user {
                println!("User:          {}", user.username.unwrap_or_default());
                println!("Expires at:    {}", user.expires_at.to_rfc3339());
                println!(
                    "Expires in:    {}s",
                    service.manager().time_until_expiry().num_seconds()
                );
            }
            println!("Remember me:   {}", service.manager().remember_me());
        }
        Command::Whoami => {
            let profile = service.me().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Command::Token => {
            println!("{}", service.get_valid_access_token().await?);
        }
        Command::Get { path, watch } => match watch {
            None => print_get(&service, &path).await?,
            Some(0) => bail!("--watch interval must be at least one second"),
            Some(secs) => {
                let interval = config
                    .background_refresh_interval()
                    .unwrap_or(Duration::from_secs(60));
                let _refresh = service.start_background_refresh(interval);
                loop {
                    print_get(&service, &path).await?;
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                }
            }
        },
    }

    Ok(())
}

async fn print_get(service: &AuthService, path: &str) -> Result<()> {
    let response = service
        .gateway()
        .send(&ApiRequest::get(path))
        .await
        .with_context(|| format!("GET {} failed", path))?;
    if !response.is_success() {
        bail!("GET {} returned {}: {}", path, response.status, response.body);
    }
    let body = response.json_value()?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
