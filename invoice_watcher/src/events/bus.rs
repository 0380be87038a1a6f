use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::*;
use tokio::sync::mpsc;

type Topics = HashMap<TypeId, Box<dyn Any + Send>>;

struct Topic<E> {
    subscribers: Vec<mpsc::UnboundedSender<E>>,
}

impl<E> Default for Topic<E> {
    fn default() -> Self {
        Self { subscribers: Vec::new() }
    }
}

/// An in-process event bus, keyed by event type.
///
/// Cloning the bus is cheap; all clones share the same subscribers. Publishing never blocks.
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<Mutex<Topics>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event of type `E` published from now on.
    pub fn subscribe<E: Clone + Send + 'static>(&self) -> Subscription<E> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut topics = self.lock();
        let topic = topics
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::<Topic<E>>::default() as Box<dyn Any + Send>);
        if let Some(topic) = (**topic).downcast_mut::<Topic<E>>() {
            topic.subscribers.push(sender);
        }
        trace!("📬️ New subscription to {}", std::any::type_name::<E>());
        Subscription { receiver }
    }

    /// Deliver `event` to every live subscriber of its type. Returns the number of subscribers that received it.
    pub fn publish<E: Clone + Send + 'static>(&self, event: E) -> usize {
        let mut topics = self.lock();
        let topic = match topics.get_mut(&TypeId::of::<E>()).and_then(|t| (**t).downcast_mut::<Topic<E>>()) {
            Some(topic) => topic,
            None => {
                trace!("📬️ No subscribers for {}", std::any::type_name::<E>());
                return 0;
            },
        };
        topic.subscribers.retain(|s| !s.is_closed());
        topic.subscribers.iter().filter(|s| s.send(event.clone()).is_ok()).count()
    }

    /// The number of live subscribers for events of type `E`.
    pub fn subscriber_count<E: Send + 'static>(&self) -> usize {
        let mut topics = self.lock();
        match topics.get_mut(&TypeId::of::<E>()).and_then(|t| (**t).downcast_mut::<Topic<E>>()) {
            Some(topic) => topic.subscribers.iter().filter(|s| !s.is_closed()).count(),
            None => 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The receiving end of a subscription. Dropping it unsubscribes.
pub struct Subscription<E> {
    receiver: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    /// Waits for the next event. Returns `None` once the bus has been dropped and the queue is drained.
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }
}
