use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::consumer::{Completion, StreamConsumer};
use crate::core::ClientConfig;
use crate::sessions::{LocalStorage, MessageType, SessionMessage, SessionStore};

const SEND_FAILED: &str =
    "Sorry, something went wrong while processing your request. Please check your network connection and API settings.";
const RETRY_FAILED: &str = "Regeneration failed, please try again later.";

const HELP: &str = "Commands: /new, /sessions, /switch <id>, /delete <id>, /retry, /quit";

/// Stream a reply into the last message of the current session, which
/// must already be an empty `ai` placeholder.
async fn respond(
    consumer: &StreamConsumer,
    store: &mut SessionStore,
    user_message: &str,
    history: &[SessionMessage],
    failure_message: &str,
) -> Result<()> {
    let system_role = store
        .current()
        .map(|chat| chat.system_role.clone())
        .unwrap_or_default();

    let mut printed = 0;
    let mut stdout = io::stdout();
    let result = consumer
        .call_api(user_message, history, Some(&system_role), |text| {
            // Each update is the whole reply so far
            let _ = write!(stdout, "{}", &text[printed..]);
            let _ = stdout.flush();
            printed = text.len();
            store.set_last_message(text);
        })
        .await;
    println!();

    // Fragments only update memory, the reply is written out once here
    if let Err(e) = store.save() {
        tracing::error!("Failed to save message: {:#}", e);
    }

    match result {
        Ok(Completion::Finished(_)) => {}
        Ok(Completion::Cancelled { .. }) => println!("[generation stopped]"),
        Ok(Completion::Interrupted { error, .. }) => {
            println!("[generation interrupted: {}]", error);
        }
        Err(e) => {
            tracing::error!("API call failed: {}", e);
            eprintln!("{}", e);
            println!("{}", failure_message);
            store.update_last_message(failure_message)?;
        }
    }
    Ok(())
}

async fn send(consumer: &StreamConsumer, store: &mut SessionStore, input: &str) -> Result<()> {
    let history = store
        .current()
        .map(|chat| chat.messages.clone())
        .unwrap_or_default();

    store.add_message(SessionMessage::user(input))?;
    store.add_message(SessionMessage::ai(""))?;

    respond(consumer, store, input, &history, SEND_FAILED).await
}

/// Drop everything after the last user message and ask again.
async fn retry(consumer: &StreamConsumer, store: &mut SessionStore) -> Result<()> {
    let Some(messages) = store.current().map(|chat| chat.messages.clone()) else {
        return Ok(());
    };
    let Some(index) = messages.iter().rposition(|m| m.kind == MessageType::User) else {
        println!("Nothing to regenerate");
        return Ok(());
    };

    store.truncate_messages_to(index)?;
    store.add_message(SessionMessage::ai(""))?;

    let user_message = &messages[index].content;
    respond(consumer, store, user_message, &messages[..index], RETRY_FAILED).await
}

fn print_sessions(store: &SessionStore) {
    for (id, chat) in store.list() {
        let marker = if id == store.current_id() { "*" } else { " " };
        println!(
            "{} {}  {}  ({} messages)",
            marker,
            id,
            chat.name,
            chat.messages.len()
        );
    }
}

fn print_current(store: &SessionStore) {
    let Some(chat) = store.current() else {
        return;
    };
    println!("== {} ==", chat.name);
    for message in &chat.messages {
        let who = match message.kind {
            MessageType::User => ">>>",
            MessageType::Ai => "ai>",
        };
        println!("{} {}", who, message.content);
    }
}

pub async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = ClientConfig::default();
    let consumer = Arc::new(StreamConsumer::from_config(&config));
    let mut store = SessionStore::open(LocalStorage::new(&config.storage_path), &config.system_role)?;

    // Ctrl-C while a reply is streaming stops it. At the prompt the
    // editor handles Ctrl-C itself.
    let stopper = Arc::clone(&consumer);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if stopper.stop_generation() {
                tracing::debug!("Generation stopped from keyboard");
            }
        }
    });

    let mut rl = DefaultEditor::new()?;
    println!("{}", HELP);
    print_current(&store);

    loop {
        let readline = rl.readline(">>> ");
        let line = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        let (command, arg) = match input.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (input, ""),
        };

        match command {
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/new" => {
                let id = store.create_new_chat(None)?;
                println!("Started chat {}", id);
            }
            "/sessions" => print_sessions(&store),
            "/switch" => match store.set_current(arg) {
                Ok(()) => print_current(&store),
                Err(e) => println!("{}", e),
            },
            "/delete" => {
                if store.remove_chat(arg)? {
                    println!("Deleted chat {}", arg);
                    print_current(&store);
                } else {
                    println!("No chat with id {}", arg);
                }
            }
            "/retry" => retry(&consumer, &mut store).await?,
            _ => send(&consumer, &mut store, input).await?,
        }
    }

    Ok(())
}
