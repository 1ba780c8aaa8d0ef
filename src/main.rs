use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use sqlx::postgres::PgPoolOptions;

use stride_campus::repositories::{MemoryStore, PgStore, Store};
use stride_campus::services::{self, http};
use stride_campus::settings::{BackendKind, Settings};
use stride_campus::utils::clock::SystemClock;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
    /// Overrides `server.listen`.
    #[arg(short, long)]
    listen: Option<String>,
    /// Run against the in-memory backend instead of Postgres.
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_logging(&args.log4rs)?;
    let mut settings = Settings::new(&args.config)?;
    if args.memory {
        settings.backend.kind = BackendKind::Memory;
    }
    if let Some(listen) = args.listen {
        settings.server.listen = listen;
    }

    log::info!("Starting Stride Campus ({:?} backend).", settings.backend.kind);

    let clock = Arc::new(SystemClock);
    let store: Arc<dyn Store> = match settings.backend.kind {
        BackendKind::Postgres => {
            let conn = PgPoolOptions::new()
                .max_connections(settings.postgres.max_connections)
                .connect(&settings.postgres.url)
                .await?;
            let store = PgStore::new(conn);
            store.migrate().await?;
            Arc::new(store)
        }
        BackendKind::Memory => Arc::new(MemoryStore::new(clock.clone())),
    };

    let push = services::push_sender(&settings);
    let channels = services::start_services(store, &settings, clock, push);

    http::start_http_server(
        channels,
        &settings.server.listen,
        Duration::from_millis(settings.requests.timeout_ms),
    )
    .await
}

fn init_logging(path: &str) -> Result<()> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => Ok(()),
        Err(e) => {
            eprintln!("[WARN] Could not load {}: {}. Logging to stdout.", path, e);

            let stdout = ConsoleAppender::builder()
                .encoder(Box::new(PatternEncoder::new(
                    "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}",
                )))
                .build();
            let config = Config::builder()
                .appender(Appender::builder().build("stdout", Box::new(stdout)))
                .build(Root::builder().appender("stdout").build(LevelFilter::Info))?;
            log4rs::init_config(config)?;

            Ok(())
        }
    }
}
