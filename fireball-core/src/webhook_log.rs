//! Optional webhook log sink: a `tracing_subscriber::Layer` that forwards
//! `INFO`-and-above events to a webhook URL, coalescing messages that arrive
//! while a post is already in flight so a burst of events produces one
//! request instead of one-per-event.
//!
//! Enqueuing is a non-blocking unbounded send — the layer never waits on the
//! network, matching the original `DiscordHandler`'s `emit`/`_worker` split.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Coalescing window between receiving the first queued message and posting
/// it. Mirrors the rate limit in the original Discord-webhook handler.
const COALESCE_WINDOW: Duration = Duration::from_millis(33);

pub struct WebhookLogLayer {
    sender: mpsc::UnboundedSender<String>,
}

impl WebhookLogLayer {
    /// Spawns the background poster task. `webhook_url = None` keeps the
    /// layer installed but silently drops every message — same as the
    /// original, which no-ops `send_message` when its URL is unset.
    pub fn new(webhook_url: Option<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(worker(webhook_url, receiver));
        Self { sender }
    }
}

impl<S: Subscriber> Layer<S> for WebhookLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().level() > &Level::INFO {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = format!("[{}] {}: {}", event.metadata().level(), event.metadata().target(), visitor.message);
        let _ = self.sender.send(line);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

async fn worker(webhook_url: Option<String>, mut receiver: mpsc::UnboundedReceiver<String>) {
    let client = reqwest::Client::new();

    while let Some(first) = receiver.recv().await {
        let mut buffer = first;
        let deadline = sleep(COALESCE_WINDOW);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                maybe_next = receiver.recv() => match maybe_next {
                    Some(next) => {
                        buffer.push('\n');
                        buffer.push_str(&next);
                    }
                    None => break,
                },
            }
        }

        let Some(url) = &webhook_url else { continue };
        if let Err(e) = client.post(url).json(&serde_json::json!({ "content": buffer })).send().await {
            eprintln!("failed to post log message to webhook: {e}");
        }
    }
}
