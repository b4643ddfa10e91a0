use std::sync::Arc;

use anyhow::{Context, Result};
use serenity::all::{ChannelId, GatewayIntents, Http, Mentionable as _, Message, Ready};
use serenity::async_trait;
use serenity::client::Context as SerenityContext;
use serenity::prelude::*;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use crate::command::{self, InboundMessage, Mention};
use crate::registry::TimezoneRegistry;

/// Delivery target for the replies of one message event.
#[async_trait]
trait ReplySink: Send + Sync {
    async fn send(&self, text: String);
}

struct ChannelSink {
    http: Arc<Http>,
    channel_id: ChannelId,
}

#[async_trait]
impl ReplySink for ChannelSink {
    /// A failed send is logged; later replies for the same command are
    /// still attempted.
    async fn send(&self, text: String) {
        if let Err(e) = self.channel_id.say(&self.http, text).await {
            error!(error = %e, channel = %self.channel_id, "Failed to send reply");
        }
    }
}

struct MessageEvent {
    inbound: InboundMessage,
    sink: Box<dyn ReplySink>,
}

pub struct Handler {
    events: mpsc::Sender<MessageEvent>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: SerenityContext, ready: Ready) {
        info!(user = %ready.user.name, "Bot connected");
    }

    async fn message(&self, ctx: SerenityContext, msg: Message) {
        let author_is_self = msg.author.id == ctx.cache.current_user().id;
        let inbound = InboundMessage {
            content: msg.content.clone(),
            author_uid: msg.author.id.to_string(),
            author_is_self,
            mentions: msg
                .mentions
                .iter()
                .map(|user| Mention {
                    uid: user.id.to_string(),
                    display: user.mention().to_string(),
                })
                .collect(),
        };
        let event = MessageEvent {
            inbound,
            sink: Box::new(ChannelSink {
                http: ctx.http.clone(),
                channel_id: msg.channel_id,
            }),
        };
        if self.events.send(event).await.is_err() {
            warn!("Interpreter is gone, dropping message event");
        }
    }
}

/// Single consumer of the event queue. All registry access happens here,
/// one command at a time, and the loop keeps draining until every sender
/// (the client and any in-flight handler) is gone. Mutations enqueued
/// before shutdown are therefore applied before the final flush.
async fn run_interpreter(
    registry: Arc<Mutex<TimezoneRegistry>>,
    mut events: mpsc::Receiver<MessageEvent>,
) {
    while let Some(event) = events.recv().await {
        let replies = {
            let mut registry = registry.lock().await;
            command::handle_message(&mut registry, &event.inbound, chrono::Utc::now())
        };
        for reply in replies {
            event.sink.send(reply).await;
        }
    }
    info!("Message queue drained");
}

/// Runs the gateway session until a termination signal arrives, then shuts
/// the shards down, drains the interpreter queue, and returns so the
/// caller can flush the registry.
pub async fn run(token: &str, registry: Arc<Mutex<TimezoneRegistry>>) -> Result<()> {
    let (events_tx, events_rx) = mpsc::channel(64);
    let interpreter = tokio::spawn(run_interpreter(registry, events_rx));

    let result = run_client(token, events_tx).await;

    // The client and its handler are dropped by now; once in-flight
    // dispatch tasks finish, the queue closes and the interpreter exits.
    if let Err(e) = interpreter.await {
        error!(error = %e, "Interpreter task failed");
    }

    result
}

async fn run_client(token: &str, events: mpsc::Sender<MessageEvent>) -> Result<()> {
    let intents = GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(token, intents)
        .event_handler(Handler { events })
        .await
        .context("Failed to create client")?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("Shutdown signal received, closing gateway session");
        shard_manager.shutdown_all().await;
    });

    info!("Starting bot");
    client.start().await.context("Client error")?;

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct RecordingSink {
        replies: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn send(&self, text: String) {
            let _ = self.replies.send(text);
        }
    }

    fn event(
        content: &str,
        author_uid: &str,
        replies: mpsc::UnboundedSender<String>,
    ) -> MessageEvent {
        MessageEvent {
            inbound: InboundMessage {
                content: content.to_string(),
                author_uid: author_uid.to_string(),
                author_is_self: false,
                mentions: Vec::new(),
            },
            sink: Box::new(RecordingSink { replies }),
        }
    }

    #[tokio::test]
    async fn interpreter_drains_queued_events_before_exiting() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Mutex::new(
            TimezoneRegistry::load(dir.path().join("timezones.json")).unwrap(),
        ));

        let (events_tx, events_rx) = mpsc::channel(8);
        let (replies_tx, mut replies_rx) = mpsc::unbounded_channel();
        let interpreter = tokio::spawn(run_interpreter(registry.clone(), events_rx));

        for uid in ["A1", "A2", "A3"] {
            events_tx
                .send(event("!settime Europe/Berlin", uid, replies_tx.clone()))
                .await
                .unwrap();
        }
        drop(events_tx);
        drop(replies_tx);

        interpreter.await.unwrap();

        // Mutations enqueued before the queue closed are applied by the
        // time the interpreter exits, so the final flush sees them.
        let registry = registry.lock().await;
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("A2"), Some("Europe/Berlin"));

        let mut replies = Vec::new();
        while let Ok(reply) = replies_rx.try_recv() {
            replies.push(reply);
        }
        assert_eq!(replies, vec!["Set timezone to Europe/Berlin"; 3]);
    }
}
