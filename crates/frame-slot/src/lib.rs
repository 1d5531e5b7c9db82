//! Latest-Wins Frame Slot
//!
//! Provides the single-value hand-off between the acquisition thread and the
//! render thread. A publish overwrites whatever the reader has not looked at
//! yet; the reader always sees the most recent value or nothing.

mod slot;

pub use slot::{slot, SlotReader, SlotWriter};
