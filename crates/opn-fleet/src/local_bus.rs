//! In-process coordination channel.
//!
//! Delivers every published payload to every live subscriber of the same
//! stream, including the publisher's own subscription. Used by tests and by
//! the node's local mode.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use opn_protocol::{CoordinationChannel, ProtocolError, StreamId};
use tokio::sync::{mpsc, RwLock};

const SUBSCRIPTION_BUFFER: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    topics: Arc<RwLock<HashMap<StreamId, Vec<mpsc::Sender<Vec<u8>>>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscriber_count(&self, stream: &StreamId) -> usize {
        self.topics
            .read()
            .await
            .get(stream)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl CoordinationChannel for LocalBus {
    fn subscribe<'a>(
        &'a self,
        stream: &'a StreamId,
    ) -> BoxFuture<'a, Result<mpsc::Receiver<Vec<u8>>, ProtocolError>> {
        async move {
            let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
            self.topics.write().await.entry(stream.clone()).or_default().push(tx);
            Ok(rx)
        }
        .boxed()
    }

    fn publish<'a>(&'a self, stream: &'a StreamId, payload: Vec<u8>) -> BoxFuture<'a, Result<(), ProtocolError>> {
        async move {
            let mut topics = self.topics.write().await;
            let Some(subscribers) = topics.get_mut(stream) else {
                return Ok(());
            };
            subscribers.retain(|s| !s.is_closed());
            for subscriber in subscribers.iter() {
                if let Err(e) = subscriber.try_send(payload.clone()) {
                    tracing::warn!(stream = %stream, error = %e, "Dropping payload for slow subscriber");
                }
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers_of_stream() {
        let bus = LocalBus::new();
        let stream = StreamId::new("a");
        let other = StreamId::new("b");
        let mut first = bus.subscribe(&stream).await.unwrap();
        let mut second = bus.subscribe(&stream).await.unwrap();
        let mut unrelated = bus.subscribe(&other).await.unwrap();

        bus.publish(&stream, b"hello".to_vec()).await.unwrap();
        assert_eq!(first.recv().await.unwrap(), b"hello".to_vec());
        assert_eq!(second.recv().await.unwrap(), b"hello".to_vec());
        assert!(unrelated.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_subscription_is_released() {
        let bus = LocalBus::new();
        let stream = StreamId::new("a");
        let rx = bus.subscribe(&stream).await.unwrap();
        assert_eq!(bus.subscriber_count(&stream).await, 1);
        drop(rx);
        bus.publish(&stream, b"x".to_vec()).await.unwrap();
        assert_eq!(bus.subscriber_count(&stream).await, 0);
    }
}
