//! The interactive loop: stdin lines in, conversation changes out.

use anyhow::{Context, Result};
use convo_core::{ConversationKind, InboxId};
use convo_engine::{SessionError, Subscription, SyncClient};
use convo_logging::{convo_info, convo_warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::{self, Command};
use crate::render::Renderer;

enum Flow {
    Continue,
    Switch(InboxId),
    Quit,
}

pub async fn run(client: SyncClient, inbox: InboxId, kind: ConversationKind) -> Result<()> {
    let mut subscription = open(&client, inbox, kind).await?;
    let mut renderer = Renderer::default();
    let mut changes = subscription.changes();
    print_view(&subscription, &mut renderer);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let command = match commands::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(err) => {
                        println!("{err:#}");
                        continue;
                    }
                };
                match execute(&subscription, command).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Switch(forked)) => {
                        println!("-- switched to {forked}");
                        subscription = open(&client, forked, kind).await?;
                        changes = subscription.changes();
                        renderer.reset();
                    }
                    Err(SessionError::Closed) => {
                        println!("-- conversation closed");
                        break;
                    }
                    Err(err) => println!("! {err}"),
                }
                print_view(&subscription, &mut renderer);
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                print_view(&subscription, &mut renderer);
            }
        }
    }

    subscription.unsubscribe();
    Ok(())
}

async fn open(client: &SyncClient, inbox: InboxId, kind: ConversationKind) -> Result<Subscription> {
    convo_info!("Opening {inbox}");
    let subscription = client
        .subscribe(inbox.clone(), kind)
        .await
        .with_context(|| format!("failed to subscribe to {inbox}"))?;
    // A fresh cache has nothing yet; a fork seed already fetched on subscribe.
    let empty = subscription
        .snapshot()
        .is_some_and(|view| view.messages.is_empty() && !view.exhausted);
    if empty {
        subscription
            .load_older()
            .await
            .with_context(|| format!("failed to load {inbox}"))?;
    }
    Ok(subscription)
}

async fn execute(subscription: &Subscription, command: Command) -> Result<Flow, SessionError> {
    match command {
        Command::Older => subscription.load_older().await?,
        Command::Refresh => subscription.refresh().await?,
        Command::Retry(message_id) => {
            subscription.retry(message_id).await?;
        }
        Command::Fork(message_id) => {
            let forked = subscription.fork(message_id).await?;
            return Ok(Flow::Switch(forked));
        }
        Command::Kill => subscription.kill().await?,
        Command::Rename(name) => {
            subscription.rename(name.as_str()).await?;
            println!("-- renamed to {name}");
        }
        Command::Remove => {
            subscription.remove().await?;
            println!("-- job removed");
            return Ok(Flow::Quit);
        }
        Command::Quit => return Ok(Flow::Quit),
        Command::Send(content) => {
            if let Err(err) = subscription.send(content, Vec::new()).await {
                convo_warn!("Send failed: {err}");
                return Err(err);
            }
        }
    }
    Ok(Flow::Continue)
}

fn print_view(subscription: &Subscription, renderer: &mut Renderer) {
    if let Some(view) = subscription.snapshot() {
        for line in renderer.render(&view) {
            println!("{line}");
        }
    }
}
