//! Process entrypoint for the ease worker runtime.
//!
//! Loads `Settings` from the environment, installs the structured JSON logger,
//! and dispatches to either the test-mode server (`EASE_TEST_MODE=true`) or the
//! production worker loop, mirroring the source's single `start(handlers)`
//! entrypoint. Because the library is meant to be linked against a real
//! handler, this binary additionally ships two demonstration handlers (echo,
//! uppercase) so a deployment can be smoke-tested standalone.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use ease_config::Settings;
use ease_handler::{Handler, HandlerItem};
use ease_worker::{HandlersConfig, WorkerConfig};

#[derive(Copy, Clone, ValueEnum)]
enum DemoHandler {
    /// Returns the request body unchanged.
    Echo,
    /// Upper-cases every string value found in the request body.
    Uppercase,
}

#[derive(Parser)]
#[command(
    name = "ease-worker",
    about = "Worker runtime for serverless GPU task execution",
    version
)]
struct Cli {
    /// Built-in handler to run when no real handler is linked in.
    #[arg(long, value_enum, default_value = "echo")]
    handler: DemoHandler,
}

fn build_handler(kind: DemoHandler) -> Handler {
    match kind {
        DemoHandler::Echo => Handler::plain(|input| Ok(HandlerItem::Value(input))),
        DemoHandler::Uppercase => Handler::plain(|input| Ok(HandlerItem::Value(uppercase_strings(input)))),
    }
}

fn uppercase_strings(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(s.to_uppercase()),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(uppercase_strings).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter().map(|(k, v)| (k, uppercase_strings(v))).collect(),
        ),
        other => other,
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = Settings::from_env();

    ease_logging::init(ease_logging::parse_log_level(&settings.log_level));

    let handler = Arc::new(build_handler(cli.handler));

    if settings.test_mode {
        tracing::info!(port = settings.test_port, "starting test mode server");
        ease_testserver::serve(settings.test_port, handler).await?;
        return Ok(());
    }

    let config = WorkerConfig {
        agent_url: settings.agent_url.clone(),
        heartbeat_interval_secs: settings.heartbeat_interval_secs,
        handlers: HandlersConfig::handler(handler, None),
        test_mode: false,
    };

    if let Err(e) = ease_worker::run(config).await {
        tracing::error!(error = %e, "worker runtime exited with error");
        std::process::exit(1);
    }

    Ok(())
}
