use clap::{Parser, Subcommand};
use lib::api::ApiClient;
use lib::config::Config;
use lib::history::{ConversationGroup, HistoryPanel};
use lib::message::{Message, MessageKind, Sender};
use lib::reconcile::SubmitOutcome;
use lib::session::ChatSession;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mindora")]
#[command(about = "Mindora chat client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: MINDORA_CONFIG_PATH or ~/.mindora/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Interactive chat. Type /help inside the session for commands.
    Chat {
        /// Config file path (default: MINDORA_CONFIG_PATH or ~/.mindora/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Ask for image replies instead of text.
        #[arg(long)]
        image: bool,
    },

    /// Send one message and print the reply.
    Send {
        /// Config file path (default: MINDORA_CONFIG_PATH or ~/.mindora/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Ask for an image reply instead of text.
        #[arg(long)]
        image: bool,

        /// Message text.
        text: String,
    },

    /// Print conversation history grouped as (you → AI) pairs, newest first.
    History {
        /// Config file path (default: MINDORA_CONFIG_PATH or ~/.mindora/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Only show groups containing this text (case-insensitive).
        query: Option<String>,
    },

    /// Delete all messages on the server.
    Reset {
        /// Config file path (default: MINDORA_CONFIG_PATH or ~/.mindora/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("mindora {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Chat { config, image }) => run_chat(config, image).await,
        Some(Commands::Send {
            config,
            image,
            text,
        }) => run_send(config, image, text).await,
        Some(Commands::History { config, query }) => run_history(config, query).await,
        Some(Commands::Reset { config, yes }) => run_reset(config, yes).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

fn connect(config_path: Option<PathBuf>) -> anyhow::Result<(Config, ChatSession<ApiClient>)> {
    let (config, _) = lib::config::load_config(config_path)?;
    let client = ApiClient::from_config(&config);
    log::debug!("using backend {}", client.base_url());
    Ok((config, ChatSession::new(client)))
}

fn output_kind(image: bool, config: &Config) -> MessageKind {
    if image {
        MessageKind::Image
    } else {
        config.chat.default_kind
    }
}

async fn run_send(config_path: Option<PathBuf>, image: bool, text: String) -> anyhow::Result<()> {
    let (config, mut session) = connect(config_path)?;
    let outcome = session.submit(&text, output_kind(image, &config)).await?;
    print_outcome(&session, &outcome);
    if matches!(outcome, SubmitOutcome::Failed { .. }) {
        anyhow::bail!("message was not delivered");
    }
    Ok(())
}

async fn run_history(config_path: Option<PathBuf>, query: Option<String>) -> anyhow::Result<()> {
    let (config, session) = connect(config_path)?;
    let mut panel = HistoryPanel::new(config.history.grouping);
    if let Some(q) = query {
        panel.set_query(q);
    }
    session.open_history(&mut panel).await;
    print_groups(&panel, &config);
    Ok(())
}

async fn run_reset(config_path: Option<PathBuf>, yes: bool) -> anyhow::Result<()> {
    let (_, mut session) = connect(config_path)?;
    if !yes && !confirm("Delete all messages on the server?")? {
        println!("cancelled");
        return Ok(());
    }
    session.reset_all().await?;
    println!("all messages deleted");
    Ok(())
}

/// Slash commands understood by the interactive chat.
#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Help,
    Kind(MessageKind),
    History(Option<String>),
    Refresh,
    Open(usize),
    Close,
    Reset,
    Exit,
}

impl ReplCommand {
    /// Parse a line starting with `/`. Returns Err with a message for unknown or malformed
    /// commands.
    fn parse(line: &str) -> Result<Self, String> {
        let rest = line.trim().trim_start_matches('/');
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((n, a)) => (n, a.trim()),
            None => (rest, ""),
        };
        match name.to_ascii_lowercase().as_str() {
            "help" | "?" => Ok(Self::Help),
            "text" => Ok(Self::Kind(MessageKind::Text)),
            "image" => Ok(Self::Kind(MessageKind::Image)),
            "history" | "search" => Ok(Self::History(
                Some(arg.to_string()).filter(|a| !a.is_empty()),
            )),
            "refresh" => Ok(Self::Refresh),
            "open" => arg
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(Self::Open)
                .ok_or_else(|| "usage: /open N (N from the /history list)".to_string()),
            "close" => Ok(Self::Close),
            "reset" => Ok(Self::Reset),
            "exit" | "quit" => Ok(Self::Exit),
            other => Err(format!("unknown command /{}; try /help", other)),
        }
    }
}

const REPL_HELP: &str = "\
/text | /image      choose the reply kind
/history [QUERY]    open history (optionally filtered)
/refresh            reload history
/open N             jump to history entry N
/close              close history
/reset              delete all messages (asks first)
/exit               quit";

async fn run_chat(config_path: Option<PathBuf>, image: bool) -> anyhow::Result<()> {
    let (config, mut session) = connect(config_path)?;
    let mut kind = output_kind(image, &config);
    let mut panel = HistoryPanel::new(config.history.grouping);

    if let Err(e) = session.load().await {
        eprintln!("could not load chat history: {}", e);
    }
    if session.messages().is_empty() {
        println!("Welcome to Mindora! Start typing to begin your conversation.");
    } else {
        for m in session.messages() {
            println!("{}", render_message(m));
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "[{}]> ", kind)?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('/') {
            let cmd = match ReplCommand::parse(input) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("{}", e);
                    continue;
                }
            };
            match cmd {
                ReplCommand::Help => println!("{}", REPL_HELP),
                ReplCommand::Kind(k) => {
                    kind = k;
                    println!("replies will be {}", kind);
                }
                ReplCommand::History(query) => {
                    panel.set_query(query.unwrap_or_default());
                    session.open_history(&mut panel).await;
                    print_groups(&panel, &config);
                }
                ReplCommand::Refresh => {
                    if !panel.is_open() {
                        eprintln!("history is closed; use /history");
                        continue;
                    }
                    session.refresh_history(&mut panel).await;
                    print_groups(&panel, &config);
                }
                ReplCommand::Open(n) => {
                    if !panel.is_open() {
                        eprintln!("history is closed; use /history");
                        continue;
                    }
                    match panel.select(n - 1) {
                        Some(anchor) => print_anchor(&session, &anchor),
                        None => eprintln!("no history entry {}", n),
                    }
                }
                ReplCommand::Close => panel.close(),
                ReplCommand::Reset => {
                    if confirm("Delete all messages on the server?")? {
                        match session.reset_all().await {
                            Ok(()) => println!("all messages deleted"),
                            Err(e) => eprintln!("reset failed: {}", e),
                        }
                    } else {
                        println!("cancelled");
                    }
                }
                ReplCommand::Exit => break,
            }
            continue;
        }

        match session.submit(input, kind).await {
            Ok(outcome) => print_outcome(&session, &outcome),
            Err(e) => eprintln!("{}", e),
        }
    }

    Ok(())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    let mut stdout = io::stdout();
    write!(stdout, "{} [y/N] ", question)?;
    stdout.flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

fn render_message(m: &Message) -> String {
    let who = match m.sender {
        Sender::User => "You",
        Sender::Bot => "AI",
        Sender::Unknown => "?",
    };
    let pending = if m.is_local() && m.sender == Sender::User {
        " (unconfirmed)"
    } else {
        ""
    };
    if m.is_image() {
        format!("{}: [image] {}{}", who, m.text, pending)
    } else {
        format!("{}: {}{}", who, m.text, pending)
    }
}

/// Print what the last submission added to the end of the conversation.
fn print_outcome(session: &ChatSession<ApiClient>, outcome: &SubmitOutcome) {
    let messages = session.messages();
    let added = match outcome {
        SubmitOutcome::Confirmed { appended } => *appended,
        SubmitOutcome::Failed { .. } => 1,
        SubmitOutcome::Stale => 0,
    };
    for m in &messages[messages.len().saturating_sub(added)..] {
        if m.sender != Sender::User {
            println!("{}", render_message(m));
        }
    }
}

fn print_anchor(session: &ChatSession<ApiClient>, anchor: &Message) {
    match session.state().position_of(&anchor.id) {
        Some(i) => println!("→ #{} {}", i + 1, render_message(anchor)),
        None => println!("→ {} (not in the current conversation)", render_message(anchor)),
    }
}

fn print_groups(panel: &HistoryPanel, config: &Config) {
    let visible = panel.visible();
    if visible.is_empty() {
        println!("No history found.");
        return;
    }
    if panel.query().trim().is_empty() {
        println!("Conversation history (you → AI), newest first:");
    } else {
        println!(
            "Conversation history (you → AI) matching \"{}\", newest first:",
            panel.query().trim()
        );
    }
    for (i, g) in visible.iter().enumerate() {
        print_group(i + 1, g, config);
    }
}

fn print_group(n: usize, g: &ConversationGroup, config: &Config) {
    let user = g
        .user_preview(config.history.user_preview_chars)
        .unwrap_or_else(|| "(no user message)".to_string());
    println!("{:>3}. You: {}", n, user);
    let ai = match &g.ai {
        Some(m) if m.is_image() => format!("[image] {}", m.text),
        Some(_) => g
            .ai_preview(config.history.ai_preview_chars)
            .unwrap_or_default(),
        None => "(no reply yet)".to_string(),
    };
    println!("     AI: {}", ai);
    if let Some(t) = g.timestamp() {
        println!("     {}", t.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repl_commands() {
        assert_eq!(ReplCommand::parse("/image"), Ok(ReplCommand::Kind(MessageKind::Image)));
        assert_eq!(ReplCommand::parse("/TEXT"), Ok(ReplCommand::Kind(MessageKind::Text)));
        assert_eq!(ReplCommand::parse("/history"), Ok(ReplCommand::History(None)));
        assert_eq!(
            ReplCommand::parse("/history  rust lang "),
            Ok(ReplCommand::History(Some("rust lang".to_string())))
        );
        assert_eq!(ReplCommand::parse("/open 2"), Ok(ReplCommand::Open(2)));
        assert!(ReplCommand::parse("/open 0").is_err());
        assert!(ReplCommand::parse("/open x").is_err());
        assert_eq!(ReplCommand::parse("/quit"), Ok(ReplCommand::Exit));
        assert!(ReplCommand::parse("/bogus").is_err());
    }

    #[test]
    fn renders_messages() {
        let mut m = Message::optimistic("hi", MessageKind::Text);
        assert_eq!(render_message(&m), "You: hi (unconfirmed)");
        m.id = "srv-1".to_string();
        assert_eq!(render_message(&m), "You: hi");
        m.sender = Sender::Bot;
        m.kind = MessageKind::Image;
        m.text = "https://x/y.png".to_string();
        assert_eq!(render_message(&m), "AI: [image] https://x/y.png");
    }
}
