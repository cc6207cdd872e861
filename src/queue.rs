use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use agent_api::{ApprovalReply, ContentPart, InputMessage, TurnRequest};
use agent_wire::{
    BlockedReason, ClearReason, DropReason, OutboundEvent, QueueBatchDequeued, QueueBlocked,
    QueueCleared, QueueItemDropped, QueueItemEnqueued, QueueItemKind, QueueSource,
};

use crate::collaborators::EventSink;
use crate::lock_unpoisoned;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueItemId(pub u64);

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePayload {
    Text(String),
    Approvals(Vec<ApprovalReply>),
}

/// An item as submitted by a producer, before the queue assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueItem {
    pub source: QueueSource,
    pub kind: QueueItemKind,
    pub payload: QueuePayload,
    pub client_message_id: Option<String>,
    /// Queue generation the producer observed; older generations are stale.
    pub generation: Option<u64>,
}

impl NewQueueItem {
    pub fn user_message(text: impl Into<String>) -> Self {
        Self {
            source: QueueSource::User,
            kind: QueueItemKind::Message,
            payload: QueuePayload::Text(text.into()),
            client_message_id: None,
            generation: None,
        }
    }

    pub fn task_notification(text: impl Into<String>) -> Self {
        Self {
            source: QueueSource::TaskNotification,
            kind: QueueItemKind::TaskNotification,
            payload: QueuePayload::Text(text.into()),
            client_message_id: None,
            generation: None,
        }
    }

    pub fn overlay_action(text: impl Into<String>) -> Self {
        Self {
            source: QueueSource::User,
            kind: QueueItemKind::OverlayAction,
            payload: QueuePayload::Text(text.into()),
            client_message_id: None,
            generation: None,
        }
    }

    pub fn approval_results(replies: Vec<ApprovalReply>) -> Self {
        Self {
            source: QueueSource::System,
            kind: QueueItemKind::ApprovalResult,
            payload: QueuePayload::Approvals(replies),
            client_message_id: None,
            generation: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: QueueSource) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_client_message_id(mut self, id: impl Into<String>) -> Self {
        self.client_message_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub source: QueueSource,
    pub kind: QueueItemKind,
    pub payload: QueuePayload,
    pub client_message_id: Option<String>,
}

/// Items removed together by one dequeue, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DequeuedBatch {
    pub batch_id: BatchId,
    pub item_ids: Vec<QueueItemId>,
    pub merged_count: usize,
    pub queue_len_after: usize,
    pub items: Vec<QueueItem>,
}

impl DequeuedBatch {
    /// Builds the request that starts a turn for this batch: text items
    /// become parts of one user message, approval results one approval
    /// message.
    pub fn to_request(&self) -> TurnRequest {
        let mut parts = Vec::new();
        let mut approvals = Vec::new();

        for item in &self.items {
            match &item.payload {
                QueuePayload::Text(text) => parts.push(ContentPart::Text { text: text.clone() }),
                QueuePayload::Approvals(replies) => approvals.extend(replies.iter().cloned()),
            }
        }

        let mut messages = Vec::new();
        if !approvals.is_empty() {
            messages.push(InputMessage::Approval { approvals });
        }
        if !parts.is_empty() {
            messages.push(InputMessage::user_parts(parts));
        }
        TurnRequest::new(messages)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    next_item_id: u64,
    next_batch_id: u64,
    blocked_notified: bool,
    generation: u64,
}

/// Arrival-ordered input buffer with atomic coalescing dequeue.
///
/// Every state change is reported to the sink as a queue lifecycle event.
/// Events are emitted under the queue lock, so their order matches the
/// order of the operations that caused them. Backpressure is expressed
/// only through events: no operation blocks or fails.
pub struct InputQueue {
    state: Mutex<QueueState>,
    sink: Arc<dyn EventSink>,
    capacity: usize,
}

impl fmt::Debug for InputQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock_unpoisoned(&self.state);
        f.debug_struct("InputQueue")
            .field("len", &state.items.len())
            .field("generation", &state.generation)
            .field("blocked_notified", &state.blocked_notified)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl InputQueue {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_capacity(sink, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(sink: Arc<dyn EventSink>, capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            sink,
            capacity: capacity.max(1),
        }
    }

    pub fn enqueue(&self, item: NewQueueItem) -> Option<QueueItemId> {
        let mut state = lock_unpoisoned(&self.state);
        state.next_item_id += 1;
        let id = QueueItemId(state.next_item_id);

        let drop_reason = if item
            .generation
            .is_some_and(|generation| generation < state.generation)
        {
            Some(DropReason::StaleGeneration)
        } else if state.items.len() >= self.capacity {
            Some(DropReason::BufferLimit)
        } else {
            None
        };

        if let Some(reason) = drop_reason {
            tracing::warn!(item_id = %id, ?reason, "dropping queue item");
            self.sink
                .emit(OutboundEvent::QueueItemDropped(QueueItemDropped {
                    item_id: id.to_string(),
                    reason,
                    queue_len: state.items.len(),
                }));
            return None;
        }

        let NewQueueItem {
            source,
            kind,
            payload,
            client_message_id,
            ..
        } = item;
        state.items.push_back(QueueItem {
            id,
            source,
            kind,
            payload,
            client_message_id: client_message_id.clone(),
        });

        self.sink
            .emit(OutboundEvent::QueueItemEnqueued(QueueItemEnqueued {
                item_id: id.to_string(),
                client_message_id,
                source,
                kind,
                queue_len: state.items.len(),
            }));
        Some(id)
    }

    /// Dequeues the next batch, or reports why it cannot.
    ///
    /// With `blocked` set the caller is busy: nothing is removed, and the
    /// first refusal of a busy period emits one blocked event. Otherwise
    /// the maximal run of coalescable items at the head is removed as one
    /// batch; a non-coalescable head item is removed alone.
    pub fn try_dequeue(&self, blocked: Option<BlockedReason>) -> Option<DequeuedBatch> {
        let mut state = lock_unpoisoned(&self.state);
        if state.items.is_empty() {
            return None;
        }

        if let Some(reason) = blocked {
            if !state.blocked_notified {
                state.blocked_notified = true;
                self.sink.emit(OutboundEvent::QueueBlocked(QueueBlocked {
                    reason,
                    queue_len: state.items.len(),
                }));
            }
            return None;
        }

        let count = coalescable_prefix_len(&state.items);
        self.consume_locked(&mut state, count)
    }

    /// Removes the first `count` items as one batch. Returns `None` when
    /// `count` is zero or the queue is empty.
    pub fn consume_items(&self, count: usize) -> Option<DequeuedBatch> {
        let mut state = lock_unpoisoned(&self.state);
        self.consume_locked(&mut state, count)
    }

    fn consume_locked(&self, state: &mut QueueState, count: usize) -> Option<DequeuedBatch> {
        let count = count.min(state.items.len());
        if count == 0 {
            return None;
        }

        state.next_batch_id += 1;
        let batch_id = BatchId(state.next_batch_id);
        let items: Vec<QueueItem> = state.items.drain(..count).collect();
        let item_ids: Vec<QueueItemId> = items.iter().map(|item| item.id).collect();
        let queue_len_after = state.items.len();

        self.sink
            .emit(OutboundEvent::QueueBatchDequeued(QueueBatchDequeued {
                batch_id: batch_id.to_string(),
                item_ids: item_ids.iter().map(ToString::to_string).collect(),
                merged_count: items.len(),
                queue_len_after,
            }));
        tracing::debug!(%batch_id, merged = items.len(), queue_len_after, "dequeued batch");

        Some(DequeuedBatch {
            batch_id,
            item_ids,
            merged_count: items.len(),
            queue_len_after,
            items,
        })
    }

    /// Re-arms the one-shot blocked notification. Call when a turn ends.
    pub fn reset_blocked_state(&self) {
        lock_unpoisoned(&self.state).blocked_notified = false;
    }

    /// Drops every pending item and emits exactly one cleared event.
    pub fn clear(&self, reason: ClearReason) -> usize {
        let mut state = lock_unpoisoned(&self.state);
        self.clear_locked(&mut state, reason)
    }

    fn clear_locked(&self, state: &mut QueueState, reason: ClearReason) -> usize {
        let cleared_count = state.items.len();
        state.items.clear();
        self.sink.emit(OutboundEvent::QueueCleared(QueueCleared {
            reason,
            cleared_count,
        }));
        cleared_count
    }

    /// Starts a new generation: pending items are cleared as stale, and
    /// later submissions tagged with an older generation are dropped.
    pub fn advance_generation(&self) -> u64 {
        let mut state = lock_unpoisoned(&self.state);
        state.generation += 1;
        self.clear_locked(&mut state, ClearReason::StaleGeneration);
        state.generation
    }

    pub fn generation(&self) -> u64 {
        lock_unpoisoned(&self.state).generation
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        lock_unpoisoned(&self.state).items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn coalescable_prefix_len(items: &VecDeque<QueueItem>) -> usize {
    match items.front() {
        Some(head) if head.kind.is_coalescable() => items
            .iter()
            .take_while(|item| item.kind.is_coalescable())
            .count(),
        Some(_) => 1,
        None => 0,
    }
}
