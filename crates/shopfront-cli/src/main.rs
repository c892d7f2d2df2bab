use std::future::Future;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_stream::StreamExt;

use shopfront_agent::factory::create_tool_runtime;
use shopfront_agent::{Conversation, ProviderKind, create_agent_provider};
use shopfront_core::config::Config;
use shopfront_core::types::StreamEvent;

mod render;

use render::{Target, render};

#[derive(Parser)]
#[command(
    name = "shopfront",
    about = "Chat with the Shopfront shopping assistant from the terminal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant (one-shot or interactive)
    Chat {
        /// Message to send (omit for interactive mode)
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List the tools offered by the tool server
    Tools,

    /// Show provider and tool server status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

fn init_logging(config: &Config, verbose: bool) {
    let logging = config.logging.clone().unwrap_or_default();
    let level = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "warn".into())
    };
    let mut directives = vec![level];
    directives.extend(logging.filters.iter().cloned());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives.join(",")));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (logging.format.as_str(), logging.output.as_str()) {
        ("json", "stdout") => builder.json().with_writer(std::io::stdout).init(),
        ("json", _) => builder.json().with_writer(std::io::stderr).init(),
        (_, "stdout") => builder.with_writer(std::io::stdout).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }
}

fn print_event(event: &StreamEvent) {
    let rendered = render(event);
    match (rendered.target, rendered.newline) {
        (Target::Stderr, _) => eprintln!("{}", rendered.text),
        (Target::Stdout, true) => println!("{}", rendered.text),
        (Target::Stdout, false) => {
            print!("{}", rendered.text);
            let _ = std::io::stdout().flush();
        }
    }
}

/// Stream one turn to the terminal. Ctrl-C abandons the turn.
async fn run_turn(conversation: &mut Conversation, message: &str) {
    let mut events = conversation.send(message);
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n(interrupted)");
                break;
            }
        }
    }
}

/// Next input line. `None` at end of input or when `interrupt` fires first.
async fn next_input<R, F>(lines: &mut Lines<R>, interrupt: F) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}

async fn interactive(conversation: &mut Conversation) -> anyhow::Result<()> {
    println!("Shopfront assistant. Commands: /reset, /reload, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = next_input(&mut lines, tokio::signal::ctrl_c()).await? else {
            println!();
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                conversation.reset().await?;
                println!("Conversation reset.");
            }
            "/reload" => match conversation.reload_tools().await {
                Ok(count) => println!("Reloaded {count} tools."),
                Err(e) => eprintln!("error: failed to reload tools: {e}"),
            },
            message => run_turn(conversation, message).await,
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Chat { message } => {
            let provider = create_agent_provider(&config)?;
            let mut conversation = Conversation::new(provider);
            conversation
                .initialize()
                .await
                .context("failed to initialize the agent provider")?;
            tracing::info!(provider = %conversation.provider().name(), "Chat session started");

            match message {
                Some(message) => run_turn(&mut conversation, &message).await,
                None => interactive(&mut conversation).await?,
            }
        }
        Commands::Tools => {
            let Some(runtime) = create_tool_runtime(&config)? else {
                println!("No tool server configured; tools are disabled.");
                return Ok(());
            };
            let tools = runtime.list_tools().await?;
            if tools.is_empty() {
                println!("The tool server offers no tools.");
            }
            for tool in tools {
                match tool.description {
                    Some(description) => println!("{}: {description}", tool.name),
                    None => println!("{}", tool.name),
                }
            }
        }
        Commands::Status => {
            println!("Shopfront v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            match config.provider_kind() {
                Ok(ProviderKind::OpenAi) => {
                    println!("Provider: openai ({})", config.openai_model());
                    println!("Endpoint: {}", config.openai_base_url());
                }
                Ok(ProviderKind::LlamaStack) => {
                    println!("Provider: llamastack ({})", config.llama_stack_model());
                    println!("Endpoint: {}", config.llama_stack_url());
                    println!("Tool group: {}", config.tool_group());
                }
                Err(e) => println!("Provider: {e}"),
            }
            match (config.tool_server_url(), create_tool_runtime(&config)?) {
                (Some(url), Some(runtime)) => {
                    println!("Tools: enabled ({url})");
                    match runtime.list_tools().await {
                        Ok(tools) => {
                            let names: Vec<String> = tools.into_iter().map(|t| t.name).collect();
                            println!("Loaded tools: {}", names.join(", "));
                        }
                        Err(e) => println!("Tool server unreachable: {e}"),
                    }
                }
                _ => println!("Tools: disabled"),
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("no config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("configuration has {} error(s)", errors.len());
                }
                println!("Configuration OK");
            }
        },
    }

    Ok(())
}
