//! Strictly serialized FIFO of pending device operations.
//!
//! The queue itself performs no I/O. It decides *which* operation may run
//! next; the owner hands that operation to the active transport and calls
//! [`CommandQueue::complete`] when the transport reports completion. At
//! most one operation is in flight at any time.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use tracing::debug;

use crate::error::LinkError;
use crate::frame::FrameKind;

// ── PendingOperation ─────────────────────────────────────────────

/// What a pending operation asks the transport to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// Read one frame of the given kind.
    Read(FrameKind),
    /// Write encoded command bytes.
    Write(Bytes),
}

/// An enqueued read or write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    /// Session-unique id; completions are matched against it.
    pub id: u64,
    pub kind: OperationKind,
}

impl PendingOperation {
    pub fn read(id: u64, frame: FrameKind) -> Self {
        Self {
            id,
            kind: OperationKind::Read(frame),
        }
    }

    pub fn write(id: u64, payload: Bytes) -> Self {
        Self {
            id,
            kind: OperationKind::Write(payload),
        }
    }

    /// The frame kind this operation targets.
    pub fn frame_kind(&self) -> FrameKind {
        match &self.kind {
            OperationKind::Read(kind) => *kind,
            OperationKind::Write(_) => FrameKind::Cmd,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self.kind, OperationKind::Read(_))
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperationKind::Read(kind) => write!(f, "#{} read {kind}", self.id),
            OperationKind::Write(bytes) => write!(f, "#{} write {:?}", self.id, bytes.as_ref()),
        }
    }
}

// ── CommandQueue ─────────────────────────────────────────────────

/// FIFO of [`PendingOperation`]s with a single in-flight slot.
#[derive(Debug, Default)]
pub struct CommandQueue {
    queue: VecDeque<PendingOperation>,
    in_flight: Option<u64>,
    next_id: u64,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the id for a new operation.
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Append an operation and return the operation to dispatch now, if
    /// the queue was idle.
    pub fn enqueue(&mut self, op: PendingOperation) -> Option<PendingOperation> {
        debug!(op = %op, queued = self.queue.len(), "enqueue");
        self.queue.push_back(op);
        self.process_next()
    }

    /// Dequeue the head if nothing is in flight.
    ///
    /// No-op when the queue is empty or an operation is already running.
    pub fn process_next(&mut self) -> Option<PendingOperation> {
        if self.in_flight.is_some() {
            return None;
        }
        let op = self.queue.pop_front()?;
        self.in_flight = Some(op.id);
        Some(op)
    }

    /// Mark operation `id` complete (success or failure) and return the
    /// next operation to dispatch.
    ///
    /// Fails with [`LinkError::StaleCompletion`] when `id` is not the
    /// in-flight operation, e.g. a late completion for an operation
    /// discarded by [`clear`](Self::clear).
    pub fn complete(&mut self, id: u64) -> Result<Option<PendingOperation>, LinkError> {
        if self.in_flight != Some(id) {
            return Err(LinkError::StaleCompletion(id));
        }
        self.in_flight = None;
        Ok(self.process_next())
    }

    /// Discard every queued operation and forget the in-flight one.
    ///
    /// Returns the number of queued operations dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.in_flight = None;
        if dropped > 0 {
            debug!(dropped, "queue cleared");
        }
        dropped
    }

    /// Id of the operation currently in flight.
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Number of operations waiting behind the in-flight one.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────
