//! Console substrate: stdin/stdout stand-in for the chat fabric, for local
//! testing against a real voip.ms account.
//!
//! Inbound messages print as `[<account>/<number>] <body>`. Commands:
//!
//! ```text
//! link <account> <user> <api_secret> <did>
//! unlink <account>
//! send <account> <number> <body...>
//! list
//! quit
//! ```

use std::io::Write;
use std::str::FromStr;

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{BridgeAdapter, ReceiveParams, RemoteRoom, Substrate};
use crate::error::BridgeError;
use crate::provider::AccountId;
use crate::router::Outbound;

const HELP: &str = "commands: link <account> <user> <api_secret> <did> | unlink <account> | \
send <account> <number> <body> | list | quit";

/// Prints delivered messages to stdout.
pub struct ConsoleSubstrate;

impl ConsoleSubstrate {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Substrate for ConsoleSubstrate {
    async fn send_message(&self, params: &ReceiveParams, body: &str) -> Result<(), BridgeError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "[{}/{}] {}", params.room.puppet_id, params.user.user_id, body)
            .map_err(|e| delivery_failed(&params.room, e))
    }

    async fn send_status(&self, room: &RemoteRoom, text: &str) -> Result<(), BridgeError> {
        let mut err = std::io::stderr().lock();
        writeln!(err, "[{}/{}] ! {}", room.puppet_id, room.room_id, text)
            .map_err(|e| delivery_failed(room, e))
    }
}

fn delivery_failed(room: &RemoteRoom, e: std::io::Error) -> BridgeError {
    BridgeError::DeliveryFailed {
        room_id: room.room_id.clone(),
        reason: e.to_string(),
    }
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `request` is the `<user> <api_secret> <did>` remainder.
    Link { account_id: AccountId, request: String },
    Unlink { account_id: AccountId },
    Send {
        account_id: AccountId,
        number: String,
        body: String,
    },
    List,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim_start();

        match verb {
            "link" => {
                let (id, request) = split_account(rest)?;
                Ok(ConsoleCommand::Link {
                    account_id: id,
                    request: request.to_string(),
                })
            }
            "unlink" => {
                let (id, _) = split_account(rest)?;
                Ok(ConsoleCommand::Unlink { account_id: id })
            }
            "send" => {
                let (id, rest) = split_account(rest)?;
                let (number, body) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| "usage: send <account> <number> <body>".to_string())?;
                let body = body.trim_start();
                if body.is_empty() {
                    return Err("usage: send <account> <number> <body>".to_string());
                }
                Ok(ConsoleCommand::Send {
                    account_id: id,
                    number: number.to_string(),
                    body: body.to_string(),
                })
            }
            "list" => Ok(ConsoleCommand::List),
            "quit" | "exit" | "/quit" => Ok(ConsoleCommand::Quit),
            _ => Err(HELP.to_string()),
        }
    }
}

fn split_account(rest: &str) -> Result<(AccountId, &str), String> {
    let (id, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let id = id
        .parse::<AccountId>()
        .map_err(|_| format!("invalid account id {id:?}"))?;
    Ok((id, tail.trim_start()))
}

/// Non-empty stdin lines until EOF.
fn stdin_lines() -> impl Stream<Item = String> {
    let lines = BufReader::new(tokio::io::stdin()).lines();
    stream::unfold(lines, |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some((line, lines)),
                Ok(None) => return None,
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    return None;
                }
            }
        }
    })
}

/// Read commands from stdin and drive `adapter` until EOF or `quit`.
pub async fn run(adapter: &BridgeAdapter) {
    eprintln!("{HELP}");
    let mut lines = Box::pin(stdin_lines());

    while let Some(line) = lines.next().await {
        let command = match line.parse::<ConsoleCommand>() {
            Ok(c) => c,
            Err(msg) => {
                eprintln!("{msg}");
                continue;
            }
        };

        match command {
            ConsoleCommand::Link {
                account_id,
                request,
            } => match adapter.get_data_from_str(&request) {
                Ok(credentials) => {
                    let description = adapter.get_description(&credentials);
                    match adapter.new_puppet(account_id, credentials).await {
                        Ok(()) => eprintln!("linked {account_id}: {description}"),
                        Err(e) => eprintln!("link failed: {e}"),
                    }
                }
                Err(e) => eprintln!("{e}"),
            },
            ConsoleCommand::Unlink { account_id } => {
                adapter.delete_puppet(account_id).await;
                eprintln!("unlinked {account_id}");
            }
            ConsoleCommand::Send {
                account_id,
                number,
                body,
            } => {
                let room = RemoteRoom {
                    room_id: number,
                    puppet_id: account_id,
                    is_direct: true,
                };
                match adapter.handle_chat_message(&room, &body).await {
                    Ok(Outbound::Sent) => eprintln!("sent"),
                    Ok(Outbound::NoAccount) => eprintln!("no account {account_id}, dropped"),
                    // Already reported through send_status.
                    Err(_) => {}
                }
            }
            ConsoleCommand::List => {
                for id in adapter.accounts().account_ids().await {
                    if let Some(credentials) = adapter.accounts().credentials(id).await {
                        eprintln!("{id}: {}", adapter.get_description(&credentials));
                    }
                }
            }
            ConsoleCommand::Quit => break,
        }
    }
}
