use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Application lifecycle notifications forwarded by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppLifecycle {
    DidEnterBackground,
    WillEnterForeground,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<(u64, Sender<AppLifecycle>)>,
}

/// Fan-out point for lifecycle notifications.
///
/// The host posts signals from whatever thread the OS delivers them on;
/// each subscriber queues them until its owner drains the [`Subscription`].
#[derive(Debug, Clone, Default)]
pub struct LifecycleHub(Arc<Mutex<Registry>>);

impl LifecycleHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = unbounded();
        let mut registry = self.0.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.push((id, tx));
        log::debug!("Lifecycle subscriber {} registered", id);

        Subscription {
            id,
            events: rx,
            hub: Arc::downgrade(&self.0),
        }
    }

    /// Delivers `event` to every live subscriber; returns how many received it.
    pub fn post(&self, event: AppLifecycle) -> usize {
        let registry = self.0.lock();
        registry
            .subscribers
            .iter()
            .filter(|(_, tx)| tx.send(event).is_ok())
            .count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.lock().subscribers.len()
    }
}

/// Registration with a [`LifecycleHub`]. Unregisters when dropped.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    events: Receiver<AppLifecycle>,
    hub: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn try_next(&self) -> Option<AppLifecycle> {
        self.events.try_recv().ok()
    }

    pub fn drain(&self) -> Vec<AppLifecycle> {
        self.events.try_iter().collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.hub.upgrade() {
            registry.lock().subscribers.retain(|(id, _)| *id != self.id);
            log::debug!("Lifecycle subscriber {} released", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_reaches_each_subscriber() {
        let hub = LifecycleHub::new();
        let a = hub.subscribe();
        let b = hub.subscribe();

        assert_eq!(hub.post(AppLifecycle::DidEnterBackground), 2);
        assert_eq!(a.try_next(), Some(AppLifecycle::DidEnterBackground));
        assert_eq!(b.drain(), vec![AppLifecycle::DidEnterBackground]);
        assert_eq!(a.try_next(), None);
    }

    #[test]
    fn drop_unsubscribes_exactly_once() {
        let hub = LifecycleHub::new();
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(a);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.post(AppLifecycle::WillEnterForeground), 1);

        drop(b);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn subscription_outliving_hub_is_harmless() {
        let hub = LifecycleHub::new();
        let sub = hub.subscribe();
        drop(hub);
        assert_eq!(sub.try_next(), None);
        drop(sub);
    }
}
