//! Line commands of the chat loop.

use anyhow::{bail, Context, Result};
use convo_core::MessageHash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Older,
    Refresh,
    Retry(MessageHash),
    Fork(MessageHash),
    Kill,
    Rename(String),
    Remove,
    Quit,
    Send(String),
}

/// `None` for a blank line. Anything not starting with `/` is a message;
/// `//` escapes a message that starts with a slash.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    if let Some(escaped) = line.strip_prefix("//") {
        return Ok(Some(Command::Send(format!("/{escaped}"))));
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));
    let parsed = match name {
        "older" => Command::Older,
        "refresh" => Command::Refresh,
        "retry" => Command::Retry(message_arg("retry", rest)?),
        "fork" => Command::Fork(message_arg("fork", rest)?),
        "kill" => Command::Kill,
        "rename" if !rest.is_empty() => Command::Rename(rest.to_string()),
        "rename" => bail!("usage: /rename <name>"),
        "remove" => Command::Remove,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command /{other}; try /older /refresh /retry /fork /kill /rename /remove /quit"),
    };
    Ok(Some(parsed))
}

fn message_arg(command: &str, raw: &str) -> Result<MessageHash> {
    if raw.is_empty() {
        bail!("usage: /{command} <message id>");
    }
    MessageHash::parse(raw).with_context(|| format!("/{command} needs a message id"))
}
