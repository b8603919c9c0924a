use std::sync::Arc;

use chrono::Local;
use tracing_subscriber::EnvFilter;

use duo_planner::{
    calendar::{ColorPalette, EventMapper},
    prompt::TerminalPrompter,
    storage::config::Config,
    sync::{
        offline_store::OfflineStore,
        remote::RemoteStore,
        rest_store::RestStore,
        sync_engine::{EngineSettings, SelectionOptions, SyncEngine},
        todo_sync::TodoSync,
    },
};

mod cli;
use cli::{CliMode, USAGE, local_offset, parse_cli_mode};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    setup_logging();

    let cli_mode = match parse_cli_mode(std::env::args().skip(1), Local::now().date_naive()) {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("Error: {}", err);
            println!("{}", USAGE);
            return Ok(());
        }
    };

    if cli_mode == CliMode::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = cli::config_for_cli()?;
    let store = open_store(&config)?;

    if let Err(err) = run(cli_mode, &config, store).await {
        // Failures have already been shown to the user by the prompter.
        tracing::error!("Command failed: {:#}", err);
        std::process::exit(1);
    }
    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn RemoteStore>> {
    if config.sync.offline_mode || config.backend.url.trim().is_empty() {
        tracing::info!("Using offline store at {}", config.sync.offline_db.display());
        let store = OfflineStore::open(&config.sync.offline_db)?;
        return Ok(Arc::new(store));
    }

    tracing::info!("Using backend at {}", config.backend.url);
    let store = RestStore::new(config.backend.url.clone(), config.backend.api_key.clone())
        .with_access_token(config.session.access_token.clone());
    Ok(Arc::new(store))
}

async fn run(mode: CliMode, config: &Config, store: Arc<dyn RemoteStore>) -> anyhow::Result<()> {
    if let CliMode::Todo(command) = mode {
        let todos = TodoSync::new(
            store,
            config.backend.todos_table.clone(),
            config.session.user_id.clone(),
            Box::new(TerminalPrompter),
        );
        return cli::run_todo_command(&todos, command).await;
    }

    let offset = local_offset();
    let palette = ColorPalette::from(&config.palette);
    let mapper = EventMapper::new(palette, Box::new(config.profiles.clone()))
        .with_default_offset(offset);
    let engine = SyncEngine::new(
        store,
        mapper,
        Box::new(TerminalPrompter),
        EngineSettings::from_config(config, offset),
    );

    match mode {
        CliMode::Agenda(date) => cli::run_agenda_mode(&engine, date).await,
        CliMode::Add {
            title,
            first_day,
            last_day,
            from,
            to,
            together,
        } => {
            let options = SelectionOptions {
                start_time: from,
                end_time: to,
                is_together: together,
                ..SelectionOptions::default()
            };
            cli::run_add(&engine, title, first_day, last_day, options).await
        }
        CliMode::Move { id, start, end } => {
            cli::run_move(&engine, &id, &start, end.as_deref()).await
        }
        CliMode::Delete(id) => cli::run_delete(&engine, &id).await,
        CliMode::Todo(_) | CliMode::Help => Ok(()),
    }
}

fn setup_logging() {
    let log_dir = Config::config_dir();

    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "duo-planner.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .init();

    std::mem::forget(_guard);

    tracing::info!("duo-planner started");
}
