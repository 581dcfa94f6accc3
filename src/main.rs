use chrono::Local;
use color_eyre::Result;
use keytoggle::action::{ActionEvent, ActionSink, BehaviorQueue};
use keytoggle::config::Config;
use keytoggle::controller::spawn_instances;
use keytoggle::pipeline::script::{feed_lines, spawn_line_reader};
use keytoggle::pipeline::InputPipeline;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Reads input events from stdin, one per line:
///
/// ```text
/// rel 0 5      # <type> <code> <value>
/// wait 50      # pause for 50ms
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => Config::default_path()?,
    };
    let config = Config::load(&path).await?;
    info!(
        "Loaded {} instance(s) from {}",
        config.instances.len(),
        path.display()
    );

    let shutdown = CancellationToken::new();

    let (action_tx, action_rx) = mpsc::channel(256);
    let (queue, queue_task) = BehaviorQueue::spawn(Some(config.queue.settings()), action_tx);
    let sink: Arc<dyn ActionSink> = Arc::new(queue);
    let printer = tokio::spawn(log_actions(action_rx));

    let mut pipeline = InputPipeline::new();
    for handle in spawn_instances(&config, sink, &shutdown)? {
        pipeline.add_stage(Box::new(handle));
    }

    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            ctrl_c_token.cancel();
        }
    });

    let lines = spawn_line_reader(BufReader::new(std::io::stdin()))?;
    let processed = feed_lines(lines, &mut pipeline, &shutdown).await;
    info!("Processed {} input event(s)", processed);

    shutdown.cancel();
    drop(pipeline);

    if let Err(e) = queue_task.await {
        error!("Behavior queue task failed: {}", e);
    }
    if let Err(e) = printer.await {
        error!("Action logger task failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

async fn log_actions(mut receiver: mpsc::Receiver<ActionEvent>) {
    while let Some(event) = receiver.recv().await {
        info!(
            "{} {} at {}",
            event.polarity,
            event.step,
            Local::now().format("%H:%M:%S.%3f")
        );
    }
}
