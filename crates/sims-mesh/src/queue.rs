//! Bounded queues between the router, the bridge and the phone
//!
//! The [`Inbox`] carries frames the router delivered locally to whoever
//! consumes them (the bridge, or the application on unbridged nodes). It is
//! shared with BLE read callbacks and therefore lock protected.
//!
//! The [`Outbox`] stages pre-encoded blobs for the phone, one blob per read.

use bytes::Bytes;
use parking_lot::Mutex;
use sims_core::config::{MAX_BLOB_SIZE, OUTBOX_CAPACITY};
use sims_core::{MeshError, MeshFrame, Priority, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
struct InboxState {
    frames: VecDeque<MeshFrame>,
    dropped: u64,
    // Sticky until taken; several empty-to-ready edges before a take read as one
    became_ready: bool,
}

/// Shared bounded FIFO of locally delivered frames
///
/// On overflow the oldest frame is dropped. Cloning yields another handle to
/// the same queue.
#[derive(Debug, Clone)]
pub struct Inbox {
    state: Arc<Mutex<InboxState>>,
    capacity: usize,
}

impl Inbox {
    /// Create an inbox holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Arc::new(Mutex::new(InboxState {
                frames: VecDeque::with_capacity(capacity),
                dropped: 0,
                became_ready: false,
            })),
            capacity,
        }
    }

    /// Append a frame, returning the head frame if it had to be dropped
    pub fn push(&self, frame: MeshFrame) -> Option<MeshFrame> {
        let mut state = self.state.lock();
        let dropped = if state.frames.len() >= self.capacity {
            state.dropped += 1;
            state.frames.pop_front()
        } else {
            None
        };
        if state.frames.is_empty() {
            state.became_ready = true;
        }
        state.frames.push_back(frame);
        if let Some(old) = &dropped {
            warn!(
                source = format_args!("{:08x}", old.source),
                seq = old.sequence,
                "Inbox full, dropped oldest frame"
            );
        }
        dropped
    }

    /// Take the oldest frame
    pub fn pop(&self) -> Option<MeshFrame> {
        self.state.lock().frames.pop_front()
    }

    /// Consume the "went from empty to non-empty" edge
    ///
    /// Returns `true` at most once per transition. Transitions coalesce until
    /// consumed, so a reader must drain the inbox after each `true`.
    pub fn take_became_ready(&self) -> bool {
        std::mem::take(&mut self.state.lock().became_ready)
    }

    /// Frames waiting
    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// Whether no frames are waiting
    pub fn is_empty(&self) -> bool {
        self.state.lock().frames.is_empty()
    }

    /// Maximum frames held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped for overflow since creation
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

/// Priority-ordered staging area for pre-encoded phone blobs
///
/// FIFO within a class, more urgent classes drain first. Holds at most
/// [`OUTBOX_CAPACITY`] blobs in total, each at most [`MAX_BLOB_SIZE`] bytes.
#[derive(Debug, Default)]
pub struct Outbox {
    classes: [VecDeque<Bytes>; 4],
    len: usize,
}

impl Outbox {
    /// Create an empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a blob under `priority`
    pub fn push(&mut self, priority: Priority, blob: Bytes) -> Result<()> {
        if blob.len() > MAX_BLOB_SIZE {
            return Err(MeshError::BufferOverflow {
                needed: blob.len(),
                available: MAX_BLOB_SIZE,
            });
        }
        if self.len >= OUTBOX_CAPACITY {
            return Err(MeshError::QueueFull {
                capacity: OUTBOX_CAPACITY,
            });
        }
        self.classes[priority.index()].push_back(blob);
        self.len += 1;
        Ok(())
    }

    /// Take the next blob
    pub fn pop(&mut self) -> Option<Bytes> {
        let blob = self.classes.iter_mut().find_map(|class| class.pop_front())?;
        self.len -= 1;
        Some(blob)
    }

    /// Blobs staged
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop everything staged
    pub fn clear(&mut self) {
        if self.len > 0 {
            debug!(discarded = self.len, "Outbox cleared");
        }
        self.classes.iter_mut().for_each(VecDeque::clear);
        self.len = 0;
    }
}
