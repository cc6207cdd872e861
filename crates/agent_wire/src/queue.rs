use serde::{Deserialize, Serialize};

/// Who produced a queued input item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueSource {
    User,
    TaskNotification,
    Subagent,
    System,
}

/// What a queued input item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemKind {
    Message,
    TaskNotification,
    ApprovalResult,
    OverlayAction,
}

impl QueueItemKind {
    /// Kinds that may be merged with neighbours into one batch.
    #[must_use]
    pub fn is_coalescable(self) -> bool {
        matches!(self, Self::Message | Self::TaskNotification)
    }
}

/// Why a dequeue attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    TurnActive,
    PendingApprovals,
    InterruptInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    Processed,
    Error,
    Cancelled,
    Shutdown,
    StaleGeneration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    BufferLimit,
    StaleGeneration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItemEnqueued {
    pub item_id: String,
    pub client_message_id: Option<String>,
    pub source: QueueSource,
    pub kind: QueueItemKind,
    pub queue_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBatchDequeued {
    pub batch_id: String,
    pub item_ids: Vec<String>,
    pub merged_count: usize,
    pub queue_len_after: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBlocked {
    pub reason: BlockedReason,
    pub queue_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCleared {
    pub reason: ClearReason,
    pub cleared_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItemDropped {
    pub item_id: String,
    pub reason: DropReason,
    pub queue_len: usize,
}
