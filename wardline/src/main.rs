use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wardline::{ApiServer, AppConfig, AppContext, QueryContext, Severity};

#[derive(Parser)]
#[command(name = "wardline")]
#[command(about = "Ward operations query and alert service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        /// Bind address (overrides WARDLINE_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port (overrides WARDLINE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Route one query against the seeded records and print the result
    Ask {
        /// Free-text query, e.g. "show vitals for John Doe"
        query: String,

        /// Subject id recorded in the audit log
        #[arg(short, long, default_value = "cli")]
        subject: String,
    },

    /// Publish an alert to a running server
    Alert {
        /// low, medium, high or critical
        #[arg(short, long, default_value = "high")]
        severity: String,

        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        message: String,

        /// Patient the alert concerns
        #[arg(long)]
        patient: Option<String>,

        /// Staff ids to notify; none means hospital-wide
        #[arg(long = "to")]
        recipients: Vec<String>,

        /// Staff account to sign in with
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        /// Server base URL (defaults to the configured address)
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "wardline=info,wardline_kv=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env();

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }

            let ctx = Arc::new(AppContext::bootstrap(config).await?);
            ApiServer::new(ctx).start().await?;
        }

        Commands::Ask { query, subject } => {
            config.store = wardline_kv::StoreConfig::small();
            let ctx = AppContext::bootstrap(config).await?;

            let outcome = ctx
                .router
                .route(&query, &QueryContext::for_subject(subject))
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            ctx.shutdown().await;
        }

        Commands::Alert {
            severity,
            title,
            message,
            patient,
            recipients,
            email,
            password,
            url,
        } => {
            if let Err(e) = severity.parse::<Severity>() {
                bail!(e);
            }

            let base = url.unwrap_or_else(|| format!("http://{}", config.addr()));
            let base = base.trim_end_matches('/');
            let client = reqwest::Client::new();

            let login = client
                .post(format!("{}/login", base))
                .json(&serde_json::json!({ "email": email, "password": password }))
                .send()
                .await?;
            let status = login.status();
            let session: serde_json::Value = login.json().await?;
            let Some(token) = session["token"].as_str().filter(|_| status.is_success()) else {
                bail!("Login failed ({}): {}", status, session);
            };

            let response = client
                .post(format!("{}/api/alerts", base))
                .bearer_auth(token)
                .json(&serde_json::json!({
                    "severity": severity,
                    "title": title,
                    "message": message,
                    "patientRef": patient,
                    "recipients": recipients,
                }))
                .send()
                .await?;

            let status = response.status();
            let body: serde_json::Value = response.json().await?;

            // the session is only needed for this one request
            let _ = client
                .post(format!("{}/logout", base))
                .bearer_auth(token)
                .send()
                .await;

            if !status.is_success() {
                bail!("Server rejected alert ({}): {}", status, body);
            }
            println!(
                "Alert {} published to {} subscriber(s)",
                body["alert"]["id"].as_str().unwrap_or("?"),
                body["delivered"]
            );
        }
    }

    Ok(())
}
