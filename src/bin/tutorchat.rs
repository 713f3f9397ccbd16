//! Tutorchat headless client
//!
//! Line-oriented chat over stdin/stdout for the logged-in session.
//!
//! Usage: `tutorchat [config.json] [--with <username>]`
//!
//! Commands: `/search <keyword>`, `/start <user id>`, `/open <conversation id>`,
//! `/unlock [job id]`, `/status <user id>`, `/dismiss`, `/back`, `/quit`. Anything else is sent
//! as a message in the open conversation.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tutorchat::auth::SessionManager;
use tutorchat::config::ClientConfig;
use tutorchat::controller::{format_time, MessagingController, Notice};
use tutorchat::gating::GatePrompt;
use tutorchat::protocol::Id;
use tutorchat::session::{MessagingSession, UserAction};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tutorchat::init();

    let mut config_path = "tutorchat.json".to_string();
    let mut deep_link = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--with" => deep_link = args.next(),
            _ => config_path = arg,
        }
    }

    let mut config = ClientConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    let sessions = SessionManager::load(&config.session_path)
        .with_context(|| format!("Failed to load session from {}", config.session_path))?;

    let session = MessagingSession::connect(&config, sessions, deep_link)
        .await
        .context("Failed to start chat")?;

    let (action_tx, action_rx) = mpsc::unbounded_channel();
    let input_tx = action_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(action) = parse_command(&line) else {
                continue;
            };
            let quit = action == UserAction::Quit;
            if input_tx.send(action).is_err() || quit {
                break;
            }
        }
        let _ = input_tx.send(UserAction::Quit);
    });

    let mut shown = 0usize;
    session
        .run(action_rx, |controller, notices| {
            for notice in notices {
                print_notice(&notice);
                if matches!(notice, Notice::SessionExpired(_)) {
                    let _ = action_tx.send(UserAction::Quit);
                }
            }
            shown = print_new_messages(controller, shown);
        })
        .await;

    Ok(())
}

fn parse_command(line: &str) -> Option<UserAction> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let action = match command {
        "/search" => UserAction::Search(rest.to_string()),
        "/start" if !rest.is_empty() => UserAction::StartConversation(Id::from(rest)),
        "/open" if !rest.is_empty() => UserAction::SelectConversation(Id::from(rest)),
        "/unlock" if rest.is_empty() => UserAction::UnlockContact,
        "/unlock" => UserAction::UnlockJob(Id::from(rest)),
        "/status" if !rest.is_empty() => UserAction::CheckUnlock(Id::from(rest)),
        "/dismiss" => UserAction::DismissGate,
        "/back" => UserAction::BackToList,
        "/quit" => UserAction::Quit,
        _ if command.starts_with('/') => {
            eprintln!("Unknown command: {}", command);
            return None;
        }
        _ => UserAction::SendMessage(line.to_string()),
    };
    Some(action)
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::Connected => println!("* connected"),
        Notice::Reconnecting(delay) => println!("* connection lost, retrying in {:?}", delay),
        Notice::Gate(GatePrompt::UnlockContact { tutor_id, message }) => println!(
            "* {} - type /unlock to spend 1 point on tutor {}",
            message.as_deref().unwrap_or("Contact is locked"),
            tutor_id
        ),
        Notice::Gate(GatePrompt::UnlockJob { student_id, message }) => println!(
            "* {} - unlock a job of student {} with /unlock <job id>",
            message.as_deref().unwrap_or("Unlock a job first"),
            student_id
        ),
        Notice::ContactUnlocked(info) => println!(
            "* contact unlocked: {} {}",
            info.email.as_deref().unwrap_or("-"),
            info.phone.as_deref().unwrap_or("-")
        ),
        Notice::PurchaseUpsell(message) => println!("* {} - buy points to continue", message),
        Notice::UnlockFailed(message) => println!("* unlock failed: {}", message),
        Notice::UnlockStatus { target, unlocked } => println!(
            "* contact of {} is {}",
            target,
            if *unlocked { "unlocked" } else { "locked" }
        ),
        Notice::SessionExpired(reason) => println!("* session expired ({}), please log in again", reason),
    }
}

fn print_new_messages(controller: &MessagingController, shown: usize) -> usize {
    let store = controller.store();
    let messages = store.messages();

    // History was replaced or the conversation changed
    let start = if shown > messages.len() { 0 } else { shown };

    for message in &messages[start..] {
        let own = message.sender.id == store.viewer().id;
        println!(
            "[{}] {}: {} {}",
            format_time(message.timestamp),
            message.sender.username,
            message.content,
            if own { message.status_indicator() } else { "" }
        );
    }
    messages.len()
}
