mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use rasa_dispatch::config::{CONFIG_FILE, DispatchConfig};
use rasa_dispatch::harness::{Backend, Harness, ProbeQueue, SimulatedBackend};
use rasa_dispatch::queue::QueueEvent;
use rasa_dispatch::stats::HarnessStats;
use rasa_dispatch::ui::TerminalReporter;
use rasa_dispatch::webhook::WebhookClient;
use tracing_subscriber::EnvFilter;

const DEMO_UTTERANCES: &[&str] = &[
    "hello there --greeting",
    "where is my parcel --order_tracking",
    "I want a refund for my shoes --refund_policy",
    "show me the product catalog --product_master_data",
    "what are your opening hours --faq_general",
    "track order 4411 --order_tracking",
    "can I return this jacket --refund_policy",
    "bye --goodbye",
    "do you ship abroad",
];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let mut config = DispatchConfig::load_from(&config_path)?;
    if let Some(max) = cli.max_concurrent {
        config.max_concurrent = max;
    }

    let (batch, backend) = match cli.command {
        Command::Run {
            file,
            url,
            sender_mode,
        } => {
            if let Some(url) = url {
                config.webhook_url = url;
            }
            if let Some(mode) = sender_mode {
                config.sender_mode = mode.into();
            }
            let batch = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let client = WebhookClient::new(config.webhook_url.as_str(), config.timeout())?;
            (batch, Backend::Webhook(Arc::new(client)))
        }
        Command::Demo { jobs, failure_rate } => {
            let batch = DEMO_UTTERANCES
                .iter()
                .cycle()
                .take(jobs)
                .copied()
                .collect::<Vec<_>>()
                .join("\n");
            let sim = SimulatedBackend {
                failure_rate,
                ..SimulatedBackend::default()
            };
            (batch, Backend::Simulated(sim))
        }
    };
    config.validate()?;

    tracing::info!(
        max_concurrent = config.max_concurrent,
        webhook_url = %config.webhook_url,
        sender_mode = %config.sender_mode,
        "starting session"
    );

    let queue = ProbeQueue::with_config(config.queue_config())?;
    let stats = Arc::new(HarnessStats::new());
    let reporter = Arc::new(TerminalReporter::start(config.max_concurrent));
    queue.subscribe(stats.clone());
    queue.subscribe(reporter.clone());
    let mut events = queue.events();

    let mut harness = Harness::new(queue, backend, config.sender_mode);
    let ids = harness.submit_batch(&batch);

    let mut finished = 0;
    while finished < ids.len() {
        match events.recv().await {
            Some(QueueEvent::Completed(_) | QueueEvent::Failed(_)) => finished += 1,
            Some(_) => {}
            None => break,
        }
    }

    reporter.finish(&stats.metrics());
    Ok(())
}
