//! Interlaced field pairing

use crate::format::FieldTag;
use std::time::Instant;
use tracing::{debug, warn};

/// Buffers making up one displayable frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBuffers {
    Progressive(usize),
    Interlaced { top: usize, bottom: usize },
}

impl FrameBuffers {
    /// Buffer indices, top first
    pub fn indices(&self) -> impl Iterator<Item = usize> {
        let (first, second) = match *self {
            FrameBuffers::Progressive(index) => (index, None),
            FrameBuffers::Interlaced { top, bottom } => (top, Some(bottom)),
        };
        std::iter::once(first).chain(second)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices().any(|i| i == index)
    }
}

/// Frame ready for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayFrame {
    pub buffers: FrameBuffers,
    /// Publish order, starting at 1
    pub sequence: u64,
    pub captured_at: Instant,
}

/// Pairing state between dequeues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingState {
    #[default]
    Idle,
    /// Top field waiting for its bottom
    PendingTop(usize),
    /// Last completed pair
    Paired { top: usize, bottom: usize },
}

/// Result of feeding one buffer to the pairer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairEvent {
    /// Buffer forms a frame on its own
    Single(usize),
    /// Top field is now pending
    Pending,
    /// Top field replaced an older pending top, which is free again
    Replaced { superseded: usize },
    /// Bottom field completed a pair
    Complete { top: usize, bottom: usize },
    /// Bottom field with no top to pair with
    Underrun { dropped: usize },
}

/// Field pairing state machine
#[derive(Debug, Default)]
pub struct FieldPairer {
    interlaced: bool,
    state: PairingState,
}

impl FieldPairer {
    pub fn new(interlaced: bool) -> Self {
        Self {
            interlaced,
            state: PairingState::Idle,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Buffer held back waiting for its partner
    pub fn pending(&self) -> Option<usize> {
        match self.state {
            PairingState::PendingTop(index) => Some(index),
            _ => None,
        }
    }

    /// Feed a dequeued buffer
    pub fn push(&mut self, index: usize, field: FieldTag) -> PairEvent {
        if !self.interlaced {
            return PairEvent::Single(index);
        }

        match (field, self.state) {
            (FieldTag::Top, PairingState::PendingTop(superseded)) => {
                debug!("Top field {} replaces pending top {}", index, superseded);
                self.state = PairingState::PendingTop(index);
                PairEvent::Replaced { superseded }
            }
            (FieldTag::Top, _) => {
                self.state = PairingState::PendingTop(index);
                PairEvent::Pending
            }
            (FieldTag::Bottom, PairingState::PendingTop(top)) => {
                self.state = PairingState::Paired { top, bottom: index };
                PairEvent::Complete { top, bottom: index }
            }
            (FieldTag::Bottom, _) => {
                warn!("Top field not received, dropping bottom field {}", index);
                PairEvent::Underrun { dropped: index }
            }
            // Whole frame in an interlaced stream; leave any pending top alone
            (FieldTag::None, _) => PairEvent::Single(index),
        }
    }
}
