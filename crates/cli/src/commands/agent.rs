//! `helmsman agent`: interactive or single-message chat.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, bail};
use futures::StreamExt;
use helmsman_agent::{Agent, TurnEvent};
use helmsman_config::AppConfig;
use helmsman_core::message::{ContentBlock, Message, Role};
use helmsman_core::tool::AllowAll;
use helmsman_providers::build_from_config;
use helmsman_telemetry::CostTracker;
use helmsman_tools::{InMemoryTaskStore, default_registry};
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(config: &AppConfig, message: Option<String>) -> anyhow::Result<()> {
    if config.keys_for(&config.default_provider).is_empty() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set HELMSMAN_API_KEY (comma-separated for several keys) or add");
        eprintln!("  api_keys to {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        bail!("No API key found. See above for setup instructions.");
    }

    let router = build_from_config(config);
    let costs = Arc::new(CostTracker::new());
    let client = router
        .default_client(costs.clone())
        .with_context(|| format!("Provider '{}' is not configured", config.default_provider))?;

    let task_store = Arc::new(InMemoryTaskStore::new());
    let registry = Arc::new(default_registry(task_store.clone()));
    let tool_names = registry.names().join(", ");
    let agent = Agent::from_config(config, Arc::new(client), registry, Arc::new(AllowAll), task_store);

    if let Some(msg) = message {
        run_turn(&agent, msg).await?;
    } else {
        println!();
        println!("  Helmsman, interactive mode");
        println!();
        println!("  Provider:  {}", config.default_provider);
        println!("  Model:     {}", config.default_model);
        println!("  Tools:     {tool_names}");
        println!();
        println!("  Type your message and press Enter. Ctrl+C interrupts a turn.");
        println!("  Type 'exit' to quit.");
        println!();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("  You > ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "exit" || line == "quit" {
                break;
            }
            run_turn(&agent, line.to_string()).await?;
        }
    }

    let summary = costs.summary();
    eprintln!(
        "  [{} calls, ${:.4}, {:.1}s in API]",
        summary.llm_calls,
        summary.total_cost_usd,
        summary.total_duration_ms as f64 / 1000.0
    );
    Ok(())
}

async fn run_turn(agent: &Agent, input: String) -> anyhow::Result<()> {
    let (handle, mut events) = agent.start_turn(input)?;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => render(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                agent.cancel(&handle, "user interrupt");
            }
        }
    }
    println!();
    Ok(())
}

fn render(event: &TurnEvent) {
    match event {
        TurnEvent::Progress(message) => eprintln!("  ... {}", message.text()),
        TurnEvent::Result(message) => render_message(message),
    }
}

fn render_message(message: &Message) {
    if message.is_api_error {
        eprintln!("  [Error] {}", message.text());
        return;
    }
    if message.interrupted {
        eprintln!("  [Interrupted]");
        return;
    }

    for block in &message.content {
        match (message.role, block) {
            (Role::Assistant, ContentBlock::Text { text }) => {
                for line in text.lines() {
                    println!("  Assistant > {line}");
                }
            }
            (Role::Assistant, ContentBlock::ToolUse { name, input, .. }) => {
                eprintln!("  [tool] {name} {input}");
            }
            (Role::User, ContentBlock::ToolResult { content, is_error: true, .. }) => {
                eprintln!("  [tool error] {}", first_line(content));
            }
            _ => {}
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
