//! Notifications: domain events leave the process after their commit.

use async_trait::async_trait;
use tokio::sync::Mutex;
use crate::domain::events::DomainEvent;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Publishes JSON events to `<prefix>.<subject>` on NATS.
pub struct NatsPublisher {
    client: async_nats::Client,
    prefix: String,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client, prefix: "medixmall".into() } }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let subject = format!("{}.{}", self.prefix, event.subject());
        let payload = serde_json::to_vec(event)?;
        self.client.publish(subject, payload.into()).await?;
        Ok(())
    }
}

/// Used when no broker is configured.
#[derive(Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()> {
        tracing::info!(subject = event.subject(), ?event, "domain event");
        Ok(())
    }
}

/// Keeps published events in memory.
#[derive(Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemoryPublisher {
    pub async fn events(&self) -> Vec<DomainEvent> { self.events.lock().await.clone() }
    pub async fn subjects(&self) -> Vec<&'static str> { self.events.lock().await.iter().map(DomainEvent::subject).collect() }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// Publishes each event; failures are logged because the state change is already committed.
pub async fn publish_all(publisher: &dyn EventPublisher, events: Vec<DomainEvent>) {
    for event in events {
        if let Err(error) = publisher.publish(&event).await {
            tracing::warn!(subject = event.subject(), %error, "failed to publish domain event");
        }
    }
}
