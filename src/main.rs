use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt};

use charla::chat::Sender;
use charla::provider::{HardcodedProvider, RemoteProvider};
use charla::session::SessionStore;
use charla::settings::{ApiConfig, Settings};
use charla::speech::SpeechService;
use charla::storage::{ChatRepository, SqliteChatRepository};

#[derive(Debug, Parser)]
#[command(name = "charla")]
#[command(about = "Voice-enabled chat assistant client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive chat loop on the local store.
    Chat {
        /// Database URL, e.g. sqlite:///tmp/charla.db
        #[arg(long)]
        db: Option<String>,
        /// Answer from the local phrase table instead of the remote API.
        #[arg(long)]
        hardcoded: bool,
        /// Speak bot replies aloud.
        #[arg(long)]
        speak: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Chat { db, hardcoded, speak } => run_chat(db, hardcoded, speak).await?,
    }
    Ok(())
}

async fn run_chat(db: Option<String>, hardcoded: bool, speak: bool) -> anyhow::Result<()> {
    let config = ApiConfig::from_env();
    let repo = Arc::new(SqliteChatRepository::initialize(db).await?);
    let store = SessionStore::new(
        repo,
        Arc::new(RemoteProvider::new(config.clone())),
        Arc::new(HardcodedProvider::default()),
        Arc::new(SpeechService::headless(config)),
        Settings { audio_responses: speak, use_hardcoded_responses: hardcoded, ..Settings::default() },
    );
    store.initialize_chats().await?;

    println!("charla — /new /list /switch <id> /delete /quit");
    print_prompt(&store).await;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/new" => {
                let chat = store.create_chat(None).await?;
                println!("created chat {} ({})", chat.id, chat.title);
            }
            "/list" => {
                for chat in store.chats().await {
                    println!("  {}  {}", chat.id, chat.title);
                }
            }
            "/delete" => {
                if let Some(chat) = store.current_chat().await {
                    store.delete_chat(chat.id).await?;
                }
            }
            cmd if cmd.starts_with("/switch ") => match cmd["/switch ".len()..].trim().parse() {
                Ok(id) => store.switch_chat(id).await?,
                Err(_) => println!("usage: /switch <id>"),
            },
            text => {
                store.send_message(text).await?;
                let reply = store
                    .messages()
                    .await
                    .into_iter()
                    .rev()
                    .find(|m| m.sender == Sender::Bot)
                    .and_then(|m| m.text);
                if let Some(reply) = reply {
                    println!("Bot: {reply}");
                }
            }
        }
        print_prompt(&store).await;
    }
    Ok(())
}

async fn print_prompt<R: ChatRepository>(store: &SessionStore<R>) {
    if let Some(chat) = store.current_chat().await {
        print!("[{}] > ", chat.title);
    } else {
        print!("> ");
    }
    use std::io::Write;
    std::io::stdout().flush().ok();
}
