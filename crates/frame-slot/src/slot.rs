//! Single-slot channel

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Counters shared by both halves of a slot
#[derive(Debug, Default)]
struct SlotCounters {
    /// Values written by the producer
    published: AtomicU64,
    /// Values the reader picked up via `take_update`
    taken: AtomicU64,
}

/// Create a connected writer/reader pair with an empty slot
pub fn slot<T: Clone>() -> (SlotWriter<T>, SlotReader<T>) {
    let (tx, rx) = watch::channel(None);
    let counters = Arc::new(SlotCounters::default());
    (
        SlotWriter {
            tx,
            counters: counters.clone(),
        },
        SlotReader { rx, counters },
    )
}

/// Producer half. Never blocks.
#[derive(Debug)]
pub struct SlotWriter<T> {
    tx: watch::Sender<Option<T>>,
    counters: Arc<SlotCounters>,
}

impl<T: Clone> SlotWriter<T> {
    /// Replace the slot content, returning the value that was overwritten
    pub fn publish(&self, value: T) -> Option<T> {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        // send_replace succeeds even with no live reader
        self.tx.send_replace(Some(value))
    }

    /// Total values published
    pub fn published(&self) -> u64 {
        self.counters.published.load(Ordering::Relaxed)
    }

    /// Create a new reader. It treats the current content as already seen.
    pub fn subscribe(&self) -> SlotReader<T> {
        SlotReader {
            rx: self.tx.subscribe(),
            counters: self.counters.clone(),
        }
    }
}

/// Consumer half
#[derive(Debug, Clone)]
pub struct SlotReader<T> {
    rx: watch::Receiver<Option<T>>,
    counters: Arc<SlotCounters>,
}

impl<T: Clone> SlotReader<T> {
    /// Most recent value, whether or not it was seen before
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Value published since the last call, if any
    ///
    /// A value published just before the writer was dropped is still
    /// delivered once.
    pub fn take_update(&mut self) -> Option<T> {
        let current = self.rx.borrow_and_update();
        if !current.has_changed() {
            return None;
        }
        let value = current.clone();
        drop(current);
        if value.is_some() {
            self.counters.taken.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// True once the writer is gone
    pub fn is_closed(&self) -> bool {
        self.rx.has_changed().is_err()
    }

    /// Values published that the reader never picked up
    pub fn skipped(&self) -> u64 {
        let published = self.counters.published.load(Ordering::Relaxed);
        let taken = self.counters.taken.load(Ordering::Relaxed);
        published.saturating_sub(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_slot() {
        let (_writer, mut reader) = slot::<u32>();
        assert_eq!(reader.latest(), None);
        assert_eq!(reader.take_update(), None);
        assert!(!reader.is_closed());
    }

    #[test]
    fn test_latest_wins() {
        let (writer, mut reader) = slot();
        assert_eq!(writer.publish(1), None);
        assert_eq!(writer.publish(2), Some(1));
        assert_eq!(writer.publish(3), Some(2));

        assert_eq!(reader.take_update(), Some(3));
        // Nothing new since the last take
        assert_eq!(reader.take_update(), None);
        // ...but the value stays visible
        assert_eq!(reader.latest(), Some(3));
        assert_eq!(reader.skipped(), 2);
    }

    #[test]
    fn test_writer_drop_keeps_last_value() {
        let (writer, mut reader) = slot();
        writer.publish(7u8);
        drop(writer);

        assert!(reader.is_closed());
        // The final value is still delivered, exactly once
        assert_eq!(reader.take_update(), Some(7));
        assert_eq!(reader.take_update(), None);
        assert_eq!(reader.latest(), Some(7));
        assert_eq!(reader.skipped(), 0);
    }

    #[test]
    fn test_writer_drop_after_take() {
        let (writer, mut reader) = slot();
        writer.publish(1u8);
        assert_eq!(reader.take_update(), Some(1));
        drop(writer);
        assert_eq!(reader.take_update(), None);
    }

    #[test]
    fn test_subscribe_starts_seen() {
        let (writer, _reader) = slot();
        writer.publish("a");
        let mut late = writer.subscribe();
        assert_eq!(late.take_update(), None);
        writer.publish("b");
        assert_eq!(late.take_update(), Some("b"));
    }

    #[test]
    fn test_cross_thread_handoff() {
        let (writer, mut reader) = slot();
        let handle = std::thread::spawn(move || {
            for i in 0..100u32 {
                writer.publish(i);
            }
        });
        handle.join().unwrap();

        assert_eq!(reader.take_update(), Some(99));
    }

    proptest! {
        #[test]
        fn prop_reader_sees_last_published(
            values in proptest::collection::vec(any::<u16>(), 1..64)
        ) {
            let (writer, mut reader) = slot();
            for v in &values {
                writer.publish(*v);
            }
            prop_assert_eq!(reader.take_update(), values.last().copied());
            prop_assert_eq!(writer.published(), values.len() as u64);
        }
    }
}
