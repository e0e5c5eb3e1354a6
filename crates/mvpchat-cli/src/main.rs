use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use mvpchat_contracts::chat::{parse_input, Attachment, ChatInput, Turn, CHAT_HELP_COMMANDS};
use mvpchat_contracts::events::EventWriter;
use mvpchat_contracts::models::{Capability, ModelRef};
use mvpchat_contracts::payload::PromptStyle;
use mvpchat_engine::{ChatError, Session, Settings, TurnOutcome, TurnSink};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "mvpchat",
    version,
    about = "Streaming multimodal chat over Replicate models"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session on stdin/stdout.
    Chat(ChatArgs),
    /// Run a single turn and exit.
    Ask(AskArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long, env = "MVPCHAT_PROVIDER", default_value = "replicate")]
    provider: String,
    /// Append session events as JSON lines.
    #[arg(long, env = "MVPCHAT_EVENTS")]
    events: Option<PathBuf>,
    #[arg(long, value_parser = parse_prompt_style)]
    prompt_style: Option<PromptStyle>,
    /// 0 keeps every exchange.
    #[arg(long)]
    history_max_exchanges: Option<usize>,
    #[arg(long)]
    stream_delay_ms: Option<u64>,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    vision_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct AskArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long)]
    image: Option<PathBuf>,
    /// Print the outcome as one JSON object instead of streaming.
    #[arg(long)]
    json: bool,
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    text: Vec<String>,
}

fn parse_prompt_style(raw: &str) -> Result<PromptStyle, String> {
    PromptStyle::parse(raw).ok_or_else(|| format!("unknown prompt style '{raw}' (preamble|raw)"))
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("mvpchat error: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args).await?;
            Ok(0)
        }
        Command::Ask(args) => run_ask(args).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

fn build_settings(args: &SessionArgs) -> Result<Settings> {
    let mut settings = Settings::from_env()?;
    if let Some(style) = args.prompt_style {
        settings.prompt_style = style;
    }
    if let Some(max) = args.history_max_exchanges {
        settings.history_max_exchanges = max;
    }
    if let Some(delay) = args.stream_delay_ms {
        settings.stream_delay = Duration::from_millis(delay);
    }
    let overrides = [
        (Capability::Text, &args.text_model),
        (Capability::Vision, &args.vision_model),
        (Capability::Image, &args.image_model),
    ];
    for (capability, raw) in overrides {
        let Some(raw) = raw.as_deref() else {
            continue;
        };
        let model = ModelRef::parse(raw)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("invalid --{capability}-model"))?;
        settings.models.insert(capability, model);
    }
    Ok(settings)
}

fn open_session(args: &SessionArgs) -> Result<Session> {
    let settings = build_settings(args)?;
    tracing::debug!(?settings, "starting session");
    let session = Session::start_with_provider(&args.provider, &settings)?;
    Ok(match &args.events {
        Some(path) => session.with_events(EventWriter::new(path, "pending")),
        None => session,
    })
}

/// Writes fragments as they arrive; a reply ends with a newline.
struct ConsoleSink<W> {
    out: W,
}

impl<W: AsyncWrite + Unpin + Send> ConsoleSink<W> {
    fn new(out: W) -> Self {
        Self { out }
    }

    async fn write(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.flush().await
    }

    async fn line(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.write("\n").await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TurnSink for ConsoleSink<W> {
    async fn stream_fragment(&mut self, fragment: &str) -> io::Result<()> {
        self.write(fragment).await
    }

    async fn send(&mut self, message: &str) -> io::Result<()> {
        self.write(message).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.write("\n").await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

async fn handle_input<W: AsyncWrite + Unpin + Send>(
    session: &mut Session,
    input: ChatInput,
    console: &mut ConsoleSink<W>,
) -> Result<Flow> {
    match input {
        ChatInput::Noop => {}
        ChatInput::Help => {
            let help = format!("Commands: {}", CHAT_HELP_COMMANDS.join("  "));
            console.line(&help).await?;
        }
        ChatInput::Reset => {
            session.reset_history();
            console.line("History cleared.").await?;
        }
        ChatInput::History => {
            if session.history().is_empty() {
                console.line("(history is empty)").await?;
            }
            for entry in session.history() {
                console.line(entry).await?;
            }
        }
        ChatInput::Quit => return Ok(Flow::Quit),
        ChatInput::SetPromptStyle(style) => {
            session.set_prompt_style(style);
            console.line(&format!("Prompt style set to {}", style.as_str())).await?;
        }
        ChatInput::SetModel { capability, model } => match ModelRef::parse(&model) {
            Ok(model) => {
                console.line(&format!("{capability} model set to {model}")).await?;
                session.set_model(capability, model);
            }
            Err(err) => console.line(&err).await?,
        },
        ChatInput::MissingArgument { usage, .. } => {
            console.line(&format!("Usage: {usage}")).await?;
        }
        ChatInput::Unknown { command, .. } => {
            let message = format!("Unknown command /{command}. Type /help for commands.");
            console.line(&message).await?;
        }
        ChatInput::Turn(turn) => match session.handle_turn(&turn, console).await {
            Ok(_) => {}
            Err(ChatError::Sink(err)) => return Err(err).context("writing to the console"),
            Err(err) => {
                console.line("").await?;
                console.line(&format!("Error: {err}")).await?;
            }
        },
    }
    Ok(Flow::Continue)
}

async fn run_chat(args: ChatArgs) -> Result<()> {
    let mut session = open_session(&args.session)?;
    let mut console = ConsoleSink::new(tokio::io::stdout());
    let banner = format!(
        "mvpchat started with the {} provider. Type /help for commands.",
        session.provider_name()
    );
    console.line(&banner).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        console.write("> ").await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if handle_input(&mut session, parse_input(&line), &mut console).await? == Flow::Quit {
            break;
        }
    }
    Ok(())
}

fn ask_turn(args: &AskArgs) -> Turn {
    let turn = Turn::text(args.text.join(" "));
    match &args.image {
        Some(path) => turn.with_attachment(Attachment::from_path(path)),
        None => turn,
    }
}

fn outcome_json(outcome: &TurnOutcome) -> serde_json::Value {
    json!({
        "route": outcome.route.as_str(),
        "model": outcome.model.to_string(),
        "reply": outcome.reply,
        "fragments": outcome.fragments,
        "image_url": outcome.image_url,
    })
}

async fn run_ask(args: AskArgs) -> Result<i32> {
    let mut session = open_session(&args.session)?;
    let turn = ask_turn(&args);
    if args.json {
        let mut quiet = ConsoleSink::new(tokio::io::sink());
        let outcome = session.handle_turn(&turn, &mut quiet).await?;
        let rendered = serde_json::to_string_pretty(&outcome_json(&outcome))?;
        ConsoleSink::new(tokio::io::stdout()).line(&rendered).await?;
    } else {
        let mut console = ConsoleSink::new(tokio::io::stdout());
        session.handle_turn(&turn, &mut console).await?;
    }
    Ok(0)
}
