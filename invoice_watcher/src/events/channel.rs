//! Async event handlers
//!
//! An [`EventHandler`] drives a single bus subscription through an async closure. Events are handled one at a time,
//! in the order they were published, so a handler never observes its own events out of order.
use std::{future::Future, pin::Pin, sync::Arc};

use log::*;

use crate::{events::Subscription, shutdown::Shutdown};

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + 'static> {
    subscription: Subscription<E>,
    handler: Handler<E>,
}

impl<E: Send + 'static> EventHandler<E> {
    pub fn new(subscription: Subscription<E>, handler: Handler<E>) -> Self {
        Self { subscription, handler }
    }

    /// Handles events until shutdown is signalled or the bus goes away.
    pub async fn start_handler(mut self, shutdown: Shutdown) {
        debug!("📬️ Starting event handler for {}", std::any::type_name::<E>());
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                ev = self.subscription.recv() => match ev {
                    Some(ev) => {
                        trace!("📬️ Handling event");
                        (self.handler)(ev).await;
                        trace!("📬️ Event handled");
                    },
                    None => break,
                },
            }
        }
        debug!("📬️ Event handler for {} has shut down", std::any::type_name::<E>());
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{atomic::AtomicU64, Mutex},
        time::Duration,
    };

    use super::*;
    use crate::{events::EventBus, shutdown::shutdown_channel};

    #[tokio::test]
    async fn test_event_handler() {
        let _ = env_logger::try_init();
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let c2 = count.clone();
        let s2 = seen.clone();
        let handler: Handler<u64> = Arc::new(move |v: u64| {
            let count = count.clone();
            let seen = seen.clone();
            Box::pin(async move {
                debug!("Handler received {v}");
                // Slow handlers must not let later events overtake earlier ones
                tokio::time::sleep(Duration::from_millis(10 - v)).await;
                let _ = count.fetch_add(v, std::sync::atomic::Ordering::SeqCst);
                seen.lock().unwrap().push(v);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        let event_handler = EventHandler::new(bus.subscribe::<u64>(), handler);
        let (trigger, shutdown) = shutdown_channel();
        let task = tokio::spawn(event_handler.start_handler(shutdown));
        for v in 0..10u64 {
            bus.publish(v);
        }
        while c2.load(std::sync::atomic::Ordering::SeqCst) < 45 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        trigger.trigger();
        task.await.unwrap();
        assert_eq!(*s2.lock().unwrap(), (0..10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn handler_stops_on_shutdown() {
        let bus = EventBus::new();
        let handler: Handler<u64> =
            Arc::new(|_: u64| Box::pin(async {}) as Pin<Box<dyn Future<Output = ()> + Send>>);
        let event_handler = EventHandler::new(bus.subscribe::<u64>(), handler);
        let (trigger, shutdown) = shutdown_channel();
        let task = tokio::spawn(event_handler.start_handler(shutdown));
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(bus.subscriber_count::<u64>(), 0);
    }
}
