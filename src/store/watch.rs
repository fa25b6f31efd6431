//! Generic watcher fan-out shared by every entity store (§4.B, §5).
//!
//! A watcher is a bounded, non-blocking `embassy_sync` channel: on replay
//! attach it is fed a synthetic `None` event per currently-present entity,
//! then every subsequent mutation is pushed with `try_send`. A full buffer
//! drops the event and logs a warning — liveness over completeness, as the
//! spec requires. Mirrors the teacher's use of leaked `'static` embassy
//! channels for cross-task fan-out (see `simulation::types`).

use crate::model::{Event, EventKind};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use std::sync::RwLock;

/// Depth of each watcher's channel. A small, fixed bound: watchers that
/// cannot keep up lose events rather than stalling the store.
pub const WATCH_CHANNEL_CAPACITY: usize = 256;

type WatchChannel<K, V> = Channel<CriticalSectionRawMutex, Event<K, V>, WATCH_CHANNEL_CAPACITY>;
pub type WatchReceiver<K, V> = Receiver<'static, CriticalSectionRawMutex, Event<K, V>, WATCH_CHANNEL_CAPACITY>;
type WatchSender<K, V> = Sender<'static, CriticalSectionRawMutex, Event<K, V>, WATCH_CHANNEL_CAPACITY>;

pub struct WatcherRegistry<K, V> {
    senders: RwLock<Vec<WatchSender<K, V>>>,
}

impl<K, V> Default for WatcherRegistry<K, V> {
    fn default() -> Self {
        WatcherRegistry { senders: RwLock::new(Vec::new()) }
    }
}

impl<K, V> WatcherRegistry<K, V>
where
    K: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new watcher. `replay` is streamed as `None` events before
    /// the sender is added to the live fan-out list, which guarantees a
    /// total per-watcher order: every event this watcher ever observes
    /// after `watch` returns was either part of this replay or happened
    /// (in commit order) after replay completed.
    pub fn watch<I>(&self, replay: I) -> WatchReceiver<K, V>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let channel: &'static WatchChannel<K, V> = Box::leak(Box::new(Channel::new()));
        let sender = channel.sender();

        for (key, value) in replay {
            if sender.try_send(Event { key, value, kind: EventKind::None }).is_err() {
                log::warn!("watcher replay buffer full, dropping a replay event");
            }
        }

        self.senders.write().unwrap().push(sender);
        channel.receiver()
    }

    /// Publish a mutation to every registered watcher.
    pub fn notify(&self, key: K, value: V, kind: EventKind) {
        let senders = self.senders.read().unwrap();
        for sender in senders.iter() {
            let event = Event { key: key.clone(), value: value.clone(), kind };
            if sender.try_send(event).is_err() {
                log::warn!("watcher channel full, dropping a live event");
            }
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.senders.read().unwrap().len()
    }
}
