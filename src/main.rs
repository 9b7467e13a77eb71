use anyhow::Result;
use callflow::app::{self, AppStateBuilder};
use callflow::call::client::LoggingCallControl;
use callflow::config::{Cli, Config};
use callflow::flowrecord::FlowRecordManagerBuilder;
use clap::Parser;
use std::fs::File;
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = cli
        .conf
        .map(|conf| Config::load(&conf).expect("Failed to load config"))
        .unwrap_or_default();

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    let mut _log_guard = None;
    if let Some(ref log_file) = config.log_file {
        let file = File::create(log_file).expect("Failed to create log file");
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        _log_guard = Some(guard);
        log_fmt.with_writer(non_blocking).try_init().ok();
    } else {
        log_fmt.try_init().ok();
    }

    let token = CancellationToken::new();
    let mut flowrecord = FlowRecordManagerBuilder::new()
        .with_root(config.flowrecord_path.clone())
        .with_cancel_token(token.child_token())
        .build();
    let flowrecord_sender = flowrecord.sender.clone();
    tokio::spawn(async move { flowrecord.serve().await });

    let state = AppStateBuilder::new()
        .config(config)
        .client(Arc::new(LoggingCallControl::default()))
        .flowrecord_sender(flowrecord_sender)
        .token(token.clone())
        .build()
        .expect("Failed to build app");

    info!("Starting callflow on {}", state.config.http_addr);
    select! {
        result = app::run(state) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
            token.cancel();
        }
    }
    Ok(())
}
