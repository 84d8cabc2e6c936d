mod api;
mod app_config;
mod prompt;
mod router;
mod state;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use errand_scheduler::{JobExecutor, JobRunner};

use crate::app_config::{build_services, load_config, Services};
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "errand", version, about = "LLM task agent with email, web, alarm and vault tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API and the alarm runner (default).
    Serve,
    /// Run the agent once against a goal and print the result.
    Run {
        #[arg(long)]
        goal: String,
        #[arg(long)]
        context: Option<String>,
    },
    /// Call a single tool directly.
    Tool {
        name: String,
        /// JSON arguments, e.g. '{"text": "tomorrow 9am"}'.
        #[arg(long)]
        args: Option<String>,
    },
    /// Print the tool definitions exported to the model.
    Tools,
}

async fn serve(config: &errand_core::Config, services: Services) -> anyhow::Result<()> {
    let executor: Arc<dyn JobExecutor> = services.registry.clone();
    JobRunner::new(services.store.clone(), executor, services.events.clone()).spawn();

    let state = Arc::new(AppState::from(&services));
    let app = router::build_router(state, &config.server.cors_origin);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://localhost:{}/health", config.server.port);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_once(services: &Services, goal: &str, context: Option<&str>) -> anyhow::Result<()> {
    let controller = services
        .controller
        .as_ref()
        .context("agent is not configured (check LLM_PROVIDER and OPENAI_API_KEY)")?;
    let result = controller.run(goal, context).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn call_tool(services: &Services, name: &str, args: Option<&str>) -> anyhow::Result<()> {
    let args = args
        .map(serde_json::from_str)
        .transpose()
        .context("--args must be a JSON object")?;
    let outcome = services.registry.call(name, args).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = load_config();
    config.log_summary();

    let services = build_services(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, services).await?,
        Command::Run { goal, context } => run_once(&services, &goal, context.as_deref()).await?,
        Command::Tool { name, args } => call_tool(&services, &name, args.as_deref()).await?,
        Command::Tools => {
            let tools = services.registry.export_for_model()?;
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
    }

    Ok(())
}
