//! In-process bus used for tests and dry runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::debug;

use super::{BusAdapter, MessageHandler};
use crate::error::{BusError, BusResult};
use crate::topic;

/// A message published through a [`MemoryBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
}

/// Bus that keeps published messages and delivers injected ones to the
/// subscribed handlers.
pub struct MemoryBus {
    subscriptions: RwLock<Vec<(String, Arc<dyn MessageHandler>)>>,
    published: RwLock<Vec<PublishedMessage>>,
    disconnected: AtomicBool,
    fail_publish: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            published: RwLock::new(Vec::new()),
            disconnected: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
        }
    }

    /// Deliver a message to every handler whose pattern matches the topic,
    /// concurrently. Returns the number of handlers invoked.
    pub async fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .subscriptions
            .read()
            .iter()
            .filter(|(pattern, _)| topic::matches(pattern, topic))
            .map(|(_, handler)| handler.clone())
            .collect();

        join_all(handlers.iter().map(|handler| handler.handle(topic, payload))).await;
        handlers.len()
    }

    /// Messages published so far, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.read().clone()
    }

    /// Subscribed patterns.
    pub fn patterns(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .iter()
            .map(|(pattern, _)| pattern.clone())
            .collect()
    }

    /// Make subsequent publishes fail.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusAdapter for MemoryBus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn subscribe(&self, patterns: Vec<String>, handler: Arc<dyn MessageHandler>) -> BusResult<()> {
        if self.is_disconnected() {
            return Err(BusError::Stopped);
        }
        let mut subscriptions = self.subscriptions.write();
        for pattern in patterns {
            debug!("Subscribed to {}", pattern);
            subscriptions.push((pattern, handler.clone()));
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> BusResult<()> {
        if self.is_disconnected() {
            return Err(BusError::Stopped);
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::Communication(format!("publish to {} refused", topic)));
        }
        self.published.write().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn disconnect(&self) -> BusResult<()> {
        self.subscriptions.write().clear();
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
