//! Single-writer versioned reading cell with publish/subscribe fan-out.
//!
//! The cell holds the canonical "current reading". Exactly one [`CellWriter`]
//! exists per cell and it is not `Clone`; every other handle is a
//! [`CellReader`], which can only look at the current value or subscribe.
//!
//! Publishing bumps the version and pushes the new snapshot to every
//! subscriber while holding the fan-out lock, so all subscribers receive
//! versions in the same order. Subscriber queues are bounded: when a
//! subscriber falls behind, its oldest queued version is dropped to make room,
//! so it misses intermediate versions but always receives the latest one and
//! never sees an older version after a newer one.

use crate::core::types::{LinkState, VersionedReading, WeightReading};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Per-subscriber queue depth
const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

struct Shared {
    current: RwLock<VersionedReading>,
    /// Fan-out list. Lock order: `subscribers` before `current`.
    subscribers: Mutex<Vec<Subscriber>>,
}

/// Fan-out end of one subscription
struct Subscriber {
    tx: Sender<VersionedReading>,
    /// Second receiver on the same queue, used to evict the oldest entry
    evict: Receiver<VersionedReading>,
    /// Gone once the [`Subscription`] is dropped
    alive: Weak<()>,
}

/// Constructor namespace for a reading cell
pub struct ReadingCell;

impl ReadingCell {
    /// Create a cell holding [`VersionedReading::initial`]
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (CellWriter, CellReader) {
        let shared = Arc::new(Shared {
            current: RwLock::new(VersionedReading::initial()),
            subscribers: Mutex::new(Vec::new()),
        });
        (
            CellWriter {
                shared: Arc::clone(&shared),
            },
            CellReader { shared },
        )
    }
}

/// The only handle allowed to change the current reading
pub struct CellWriter {
    shared: Arc<Shared>,
}

impl CellWriter {
    /// Publish a new reading as the next version
    pub fn publish(&mut self, reading: WeightReading, link: LinkState) -> VersionedReading {
        let mut subscribers = self.shared.subscribers.lock();
        let next = {
            let mut current = self.shared.current.write();
            *current = VersionedReading {
                version: current.version + 1,
                reading,
                link,
            };
            *current
        };
        fan_out(&mut subscribers, next);
        next
    }

    /// Apply an update produced by another hub, keeping its version number.
    ///
    /// Returns `false` (and changes nothing) unless `update` is newer than the
    /// current version.
    pub fn mirror(&mut self, update: VersionedReading) -> bool {
        let mut subscribers = self.shared.subscribers.lock();
        {
            let mut current = self.shared.current.write();
            if update.version <= current.version {
                return false;
            }
            *current = update;
        }
        fan_out(&mut subscribers, update);
        true
    }

    /// Re-publish the current reading under a new link state
    pub fn relabel(&mut self, link: LinkState) -> VersionedReading {
        let reading = self.shared.current.read().reading;
        self.publish(reading, link)
    }

    pub fn current(&self) -> VersionedReading {
        *self.shared.current.read()
    }

    /// Read-only handle onto this cell
    pub fn reader(&self) -> CellReader {
        CellReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for CellWriter {
    fn drop(&mut self) {
        // Dropping the senders ends every subscription
        self.shared.subscribers.lock().clear();
    }
}

fn fan_out(subscribers: &mut Vec<Subscriber>, update: VersionedReading) {
    subscribers.retain(|sub| {
        if sub.alive.strong_count() == 0 {
            return false;
        }
        let mut pending = update;
        loop {
            match sub.tx.try_send(pending) {
                Ok(()) => return true,
                Err(TrySendError::Full(returned)) => {
                    // Writers hold the fan-out lock, so the slot freed here stays free
                    if let Ok(dropped) = sub.evict.try_recv() {
                        log::trace!("Subscriber lagging, dropping version {}", dropped.version);
                    }
                    pending = returned;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    });
}

/// Shared read-only handle
#[derive(Clone)]
pub struct CellReader {
    shared: Arc<Shared>,
}

impl CellReader {
    pub fn current(&self) -> VersionedReading {
        *self.shared.current.read()
    }

    /// Subscribe to every version published after the current one
    pub fn subscribe(&self) -> Subscription {
        self.snapshot_and_subscribe().1
    }

    /// Current version plus a subscription starting right after it, taken
    /// atomically so nothing published in between is lost
    pub fn snapshot_and_subscribe(&self) -> (VersionedReading, Subscription) {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_QUEUE_DEPTH);
        let mut subscribers = self.shared.subscribers.lock();
        let snapshot = *self.shared.current.read();
        let alive = Arc::new(());
        subscribers.push(Subscriber {
            tx,
            evict: rx.clone(),
            alive: Arc::downgrade(&alive),
        });
        (
            snapshot,
            Subscription {
                rx,
                last_version: snapshot.version,
                _alive: alive,
            },
        )
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .iter()
            .filter(|sub| sub.alive.strong_count() > 0)
            .count()
    }
}

/// Ordered stream of published versions
pub struct Subscription {
    rx: Receiver<VersionedReading>,
    last_version: u64,
    _alive: Arc<()>,
}

impl Subscription {
    /// Highest version this subscription has yielded (or the snapshot it started from)
    pub fn last_version(&self) -> u64 {
        self.last_version
    }

    /// Block until the next newer version; `None` once the writer is gone
    pub fn recv(&mut self) -> Option<VersionedReading> {
        loop {
            let update = self.rx.recv().ok()?;
            if let Some(update) = self.accept(update) {
                return Some(update);
            }
        }
    }

    pub fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<VersionedReading, RecvTimeoutError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let update = self.rx.recv_deadline(deadline)?;
            if let Some(update) = self.accept(update) {
                return Ok(update);
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<VersionedReading, TryRecvError> {
        loop {
            let update = self.rx.try_recv()?;
            if let Some(update) = self.accept(update) {
                return Ok(update);
            }
        }
    }

    fn accept(&mut self, update: VersionedReading) -> Option<VersionedReading> {
        if update.version <= self.last_version {
            return None;
        }
        self.last_version = update.version;
        Some(update)
    }
}

impl Iterator for Subscription {
    type Item = VersionedReading;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Measurement, Unit};
    use std::thread;

    fn reading(kg: f64) -> WeightReading {
        WeightReading::new(Measurement::new(kg, Unit::Kg, true))
    }

    #[test]
    fn test_publish_increments_version() {
        let (mut writer, reader) = ReadingCell::new();
        assert_eq!(reader.current().version, 0);

        let v1 = writer.publish(reading(1.0), LinkState::Connected);
        let v2 = writer.publish(reading(2.0), LinkState::Connected);
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(reader.current().reading.value(), Some(2.0));
    }

    #[test]
    fn test_subscription_starts_after_snapshot() {
        let (mut writer, reader) = ReadingCell::new();
        writer.publish(reading(1.0), LinkState::Connected);

        let mut sub = reader.subscribe();
        assert_eq!(sub.last_version(), 1);
        writer.publish(reading(2.0), LinkState::Connected);

        let update = sub.try_recv().unwrap();
        assert_eq!(update.version, 2);
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn test_subscribers_observe_same_order() {
        let (mut writer, reader) = ReadingCell::new();
        let subs: Vec<_> = (0..3).map(|_| reader.subscribe()).collect();

        let publisher = thread::spawn(move || {
            for i in 0..50 {
                writer.publish(reading(i as f64), LinkState::Connected);
            }
        });

        let handles: Vec<_> = subs
            .into_iter()
            .map(|sub| thread::spawn(move || sub.map(|u| u.version).collect::<Vec<_>>()))
            .collect();

        publisher.join().unwrap();
        for handle in handles {
            let versions = handle.join().unwrap();
            assert!(versions.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(versions.last(), Some(&50));
        }
    }

    #[test]
    fn test_slow_subscriber_misses_but_never_reorders() {
        let (mut writer, reader) = ReadingCell::new();
        let mut sub = reader.subscribe();

        for i in 0..(SUBSCRIBER_QUEUE_DEPTH * 2) {
            writer.publish(reading(i as f64), LinkState::Connected);
        }

        let mut versions = Vec::new();
        while let Ok(update) = sub.try_recv() {
            versions.push(update.version);
        }
        assert_eq!(versions.len(), SUBSCRIBER_QUEUE_DEPTH);
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_lagging_subscriber_keeps_latest() {
        let (mut writer, reader) = ReadingCell::new();
        let mut sub = reader.subscribe();

        let total = SUBSCRIBER_QUEUE_DEPTH * 2 + 5;
        for i in 0..total {
            writer.publish(reading(i as f64), LinkState::Connected);
        }

        // Oldest entries were dropped, the newest survived
        let first = sub.try_recv().unwrap();
        assert_eq!(first.version, (total - SUBSCRIBER_QUEUE_DEPTH + 1) as u64);
        let last = std::iter::from_fn(|| sub.try_recv().ok()).last().unwrap();
        assert_eq!(last.version, total as u64);
        assert_eq!(last.reading.value(), Some((total - 1) as f64));
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let (mut writer, reader) = ReadingCell::new();
        let kept = reader.subscribe();
        let dropped = reader.subscribe();
        assert_eq!(reader.subscriber_count(), 2);

        drop(dropped);
        assert_eq!(reader.subscriber_count(), 1);
        writer.publish(reading(1.0), LinkState::Connected);
        assert_eq!(writer.shared.subscribers.lock().len(), 1);
        drop(kept);
    }

    #[test]
    fn test_mirror_rejects_older_versions() {
        let (mut writer, reader) = ReadingCell::new();
        let newer = VersionedReading {
            version: 10,
            reading: reading(5.0),
            link: LinkState::Connected,
        };
        assert!(writer.mirror(newer));

        let older = VersionedReading {
            version: 7,
            reading: reading(9.0),
            link: LinkState::Connected,
        };
        assert!(!writer.mirror(older));
        assert_eq!(reader.current().version, 10);
        assert_eq!(reader.current().reading.value(), Some(5.0));
    }

    #[test]
    fn test_relabel_keeps_reading() {
        let (mut writer, _reader) = ReadingCell::new();
        writer.publish(reading(3.0), LinkState::Connected);
        let relabeled = writer.relabel(LinkState::Degraded);
        assert_eq!(relabeled.version, 2);
        assert_eq!(relabeled.link, LinkState::Degraded);
        assert_eq!(relabeled.reading.value(), Some(3.0));
    }

    #[test]
    fn test_dropping_writer_ends_subscriptions() {
        let (writer, reader) = ReadingCell::new();
        let mut sub = reader.subscribe();
        drop(writer);
        assert_eq!(sub.recv(), None);
    }
}
