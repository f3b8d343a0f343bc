use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use codesphere::ChatError;
use codesphere::chat::ChatSession;
use codesphere::collaboration::{CollaborationRoom, SendOutcome};
use codesphere::notify::NotificationCenter;
use codesphere::settings::{AppSettings, SettingsStore};
use codesphere_llm::{ChatProxy, ProxyError, create_proxy};
use codesphere_storage::{
    CollaborationId, CollaborationStore, ConversationId, MessageAuthor, NewCollaboration,
    SqliteStorage, StorageError,
};
use codesphere_stream::{MessageId, StreamObserver};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "codesphere", version, about = "Terminal client for CodeSphere chat")]
struct Cli {
    /// Settings file; defaults to the user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Chat with the assistant, one line per message.
    Chat(ChatArgs),
    /// Join a collaboration; start a line with `@ai` to ask the assistant.
    Collab(CollabArgs),
}

#[derive(Debug, Args)]
struct ChatArgs {
    /// Continue an existing conversation instead of starting a new one.
    #[arg(long)]
    conversation: Option<String>,
    /// Send a single message and exit.
    #[arg(long)]
    message: Option<String>,
}

#[derive(Debug, Args)]
struct CollabArgs {
    #[arg(long, conflicts_with = "name")]
    collaboration: Option<String>,
    /// Create a new collaboration with this name.
    #[arg(long)]
    name: Option<String>,
    /// Author id for typed messages; overrides settings.
    #[arg(long)]
    member: Option<String>,
    #[arg(long)]
    message: Option<String>,
}

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("proxy setup failed on `{stage}`: {source}"))]
    Proxy {
        stage: &'static str,
        source: ProxyError,
    },
    #[snafu(display("chat failed on `{stage}`: {source}"))]
    Chat {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("pass --collaboration <id> or --name <name>"))]
    MissingCollaboration { stage: &'static str },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings_store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    let settings = settings_store.settings();
    init_tracing(&settings.log_filter);

    match run(cli.command, &settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "codesphere exited with an error");
            eprintln!("codesphere error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_filter: &str) {
    // RUST_LOG wins over the configured filter.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Command, settings: &AppSettings) -> Result<(), AppError> {
    let storage = Arc::new(
        SqliteStorage::open(&settings.database_path)
            .await
            .context(StorageSnafu {
                stage: "open-storage",
            })?,
    );
    let proxy = create_proxy(settings.to_proxy_config()).context(ProxySnafu {
        stage: "create-proxy",
    })?;
    let notifications = Arc::new(NotificationCenter::new());

    let outcome = match command {
        Command::Chat(args) => run_chat(args, Arc::clone(&storage), proxy, notifications).await,
        Command::Collab(args) => {
            let member_id = args
                .member
                .clone()
                .unwrap_or_else(|| settings.member_id.clone());
            run_collab(args, member_id, Arc::clone(&storage), proxy, notifications).await
        }
    };
    storage.close().await;
    outcome
}

async fn run_chat(
    args: ChatArgs,
    storage: Arc<SqliteStorage>,
    proxy: Arc<dyn ChatProxy>,
    notifications: Arc<NotificationCenter>,
) -> Result<(), AppError> {
    let session = match args.conversation {
        Some(raw) => {
            let conversation_id = ConversationId::parse(&raw).context(StorageSnafu {
                stage: "parse-conversation-id",
            })?;
            ChatSession::open(conversation_id, storage, proxy, notifications.clone()).await
        }
        None => ChatSession::start(storage, proxy, notifications.clone()).await,
    }
    .context(ChatSnafu { stage: "open-chat" })?;

    println!("conversation {}", session.conversation_id());
    for message in session.snapshot().messages() {
        println!("{}: {}", message.role.as_str(), message.content);
    }

    if let Some(message) = args.message {
        submit_line(&session, &message, &notifications).await;
        return Ok(());
    }

    let mut lines = stdin_lines();
    while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
        stage: "read-chat-input",
    })? {
        submit_line(&session, &line, &notifications).await;
    }
    Ok(())
}

async fn submit_line(session: &ChatSession, line: &str, notifications: &NotificationCenter) {
    let mut echo = TerminalEcho::default();
    match session.submit_with(line, &mut echo).await {
        Ok(_) => println!(),
        Err(error) if error.is_rejection() => {
            tracing::debug!(error = %error, "input ignored");
        }
        Err(error) => {
            echo.finish_line();
            tracing::debug!(error = %error, "submit failed");
        }
    }
    print_notifications(notifications);
}

async fn run_collab(
    args: CollabArgs,
    member_id: String,
    storage: Arc<SqliteStorage>,
    proxy: Arc<dyn ChatProxy>,
    notifications: Arc<NotificationCenter>,
) -> Result<(), AppError> {
    let collaboration_id = match (args.collaboration, args.name) {
        (Some(raw), _) => CollaborationId::parse(&raw).context(StorageSnafu {
            stage: "parse-collaboration-id",
        })?,
        (None, Some(name)) => {
            storage
                .create_collaboration(NewCollaboration { name })
                .await
                .context(StorageSnafu {
                    stage: "create-collaboration",
                })?
                .id
        }
        (None, None) => {
            return MissingCollaborationSnafu {
                stage: "resolve-collaboration",
            }
            .fail();
        }
    };

    let room = CollaborationRoom::open(
        collaboration_id,
        member_id,
        storage,
        proxy,
        notifications.clone(),
    )
    .await
    .context(ChatSnafu {
        stage: "open-collaboration",
    })?;
    println!(
        "collaboration {} as {}",
        room.collaboration_id(),
        room.member_id()
    );

    let mut printer = TimelinePrinter::default();
    printer.flush(&room, true);

    if let Some(message) = args.message {
        send_line(&room, &message, &mut printer, &notifications).await;
        return Ok(());
    }

    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context(ReadInputSnafu { stage: "read-collaboration-input" })? else {
                    break;
                };
                send_line(&room, &line, &mut printer, &notifications).await;
            }
            Some(_) = room.next_insert() => printer.flush(&room, false),
        }
    }
    Ok(())
}

async fn send_line(
    room: &CollaborationRoom,
    line: &str,
    printer: &mut TimelinePrinter,
    notifications: &NotificationCenter,
) {
    let mut echo = TerminalEcho::default();
    match room.send_with(line, &mut echo).await {
        Ok(SendOutcome::AiReplied { reply, .. }) => {
            println!();
            printer.echoed_reply = Some(reply.content);
        }
        Ok(SendOutcome::Posted(_)) => {}
        Err(error) if error.is_rejection() => {
            tracing::debug!(error = %error, "input ignored");
        }
        Err(error) => {
            echo.finish_line();
            tracing::debug!(error = %error, "send failed");
        }
    }
    printer.flush(room, false);
    print_notifications(notifications);
}

fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

fn print_notifications(notifications: &NotificationCenter) {
    for notification in notifications.drain() {
        eprintln!("{notification}");
    }
}

/// Prints only the suffix each update adds.
#[derive(Default)]
struct TerminalEcho {
    printed: usize,
}

impl TerminalEcho {
    fn finish_line(&mut self) {
        if self.printed > 0 {
            println!();
            self.printed = 0;
        }
    }
}

impl StreamObserver for TerminalEcho {
    fn content_updated(&mut self, _message_id: MessageId, content: &str) {
        if let Some(suffix) = content.get(self.printed..)
            && !suffix.is_empty()
        {
            if self.printed == 0 {
                print!("assistant: ");
            }
            print!("{suffix}");
            if let Err(error) = std::io::stdout().flush() {
                tracing::debug!(error = %error, "failed to flush streamed text");
            }
            self.printed = content.len();
        }
    }
}

#[derive(Default)]
struct TimelinePrinter {
    shown: usize,
    echoed_reply: Option<String>,
}

impl TimelinePrinter {
    fn flush(&mut self, room: &CollaborationRoom, include_own: bool) {
        let timeline = room.snapshot();
        let own = MessageAuthor::member(room.member_id());
        for entry in timeline.entries().iter().skip(self.shown) {
            if !include_own && entry.author == own {
                continue;
            }
            if entry.author.is_ai() && self.echoed_reply.as_deref() == Some(entry.content.as_str())
            {
                self.echoed_reply = None;
                continue;
            }
            println!("{}: {}", entry.author.user_id(), entry.content);
        }
        self.shown = timeline.entries().len();
    }
}
