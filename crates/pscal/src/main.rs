use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pscal::config::ServiceConfig;
use pscal::schedule::{CalendarAssembler, FeedScope};
use pscal::server::{self, FeedState};
use pscal::term;

/// School calendar and class schedule feeds from a PowerSchool database
#[derive(Parser, Debug)]
#[command(name = "pscal")]
#[command(version)]
struct Args {
    /// JSON configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "pscal.json", env = "PSCAL_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve feeds over HTTP
    Serve {
        /// Listen address, overriding the configuration
        #[arg(long)]
        address: Option<String>,
        /// Cache-Control max-age in seconds, overriding the configuration
        #[arg(long)]
        max_age: Option<u64>,
    },
    /// Print one feed to stdout
    Feed {
        #[command(subcommand)]
        scope: ScopeArg,
    },
    /// Print the student roster as JSON to stdout
    Students,
}

#[derive(Subcommand, Debug)]
enum ScopeArg {
    /// The whole-school calendar
    School,
    /// Meetings taught by one teacher
    Teacher { login: String },
    /// Meetings held in one room
    Room { room: String },
}

impl From<ScopeArg> for FeedScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::School => FeedScope::School,
            ScopeArg::Teacher { login } => FeedScope::Teacher(login),
            ScopeArg::Room { room } => FeedScope::Room(room),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = ServiceConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    if let Command::Serve { address, max_age } = &args.command {
        if let Some(address) = address {
            config.address = address.clone();
        }
        if let Some(max_age) = max_age {
            config.max_age_secs = *max_age;
        }
    }

    let state = FeedState::new(&config).context("Failed to set up feeds")?;
    for problem in config
        .vtimezone
        .check_against(state.settings.tz, Utc::now().year())
    {
        warn!("VTIMEZONE for {} disagrees with tz database: {}", config.timezone, problem);
    }

    match args.command {
        Command::Serve { .. } => serve(&config, state).await,
        Command::Feed { scope } => print_feed(&state, scope.into()).await,
        Command::Students => print_students(&state).await,
    }
}

async fn serve(config: &ServiceConfig, state: FeedState) -> Result<()> {
    state
        .db
        .ping()
        .with_context(|| format!("Cannot read database {}", state.db.path().display()))?;
    info!("Using database {}", state.db.path().display());

    let app = server::create_router(Arc::new(state));
    let addr: SocketAddr = config
        .address
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.address))?;

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn print_feed(state: &FeedState, scope: FeedScope) -> Result<()> {
    let now = (state.clock)();
    let today = term::school_today(now, &state.settings.tz);
    let assembler = CalendarAssembler::new(&state.settings, now);

    let feed = match &scope {
        FeedScope::School => {
            let days = state.db.calendar_days(term::term_id(today)).await?;
            assembler.school(days).await?
        }
        FeedScope::Teacher(login) => {
            let meetings = state
                .db
                .teacher_meetings(login, term::year_id(today), state.settings.tz)
                .await?;
            assembler.meetings(scope.clone(), meetings).await?
        }
        FeedScope::Room(room) => {
            let meetings = state
                .db
                .room_meetings(room, term::year_id(today), state.settings.tz)
                .await?;
            assembler.meetings(scope.clone(), meetings).await?
        }
    };

    info!("Built feed with {} components", feed.component_count());
    std::io::stdout()
        .write_all(feed.to_ics().as_bytes())
        .context("Failed to write feed")?;
    Ok(())
}

async fn print_students(state: &FeedState) -> Result<()> {
    let rows = state.db.students().await?;
    let chunks = server::json_array(rows);
    futures::pin_mut!(chunks);

    let mut out = std::io::stdout().lock();
    while let Some(chunk) = chunks.next().await {
        out.write_all(chunk?.as_bytes())?;
    }
    writeln!(out)?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
