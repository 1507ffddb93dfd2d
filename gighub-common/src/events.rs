//! Broadcast event types and EventBus
//!
//! Every event belongs to exactly one broadcast channel:
//! - `team.channel.{uuid}`: chat messages, typing indicators, read receipts
//! - `meeting.{roomId}`: signalling and presence for a meeting room
//! - `user.{id}`: notifications addressed to one user
//! - `workflows`: AI generation status of workflows
//!
//! Subscribers receive all events and filter by [`HubEvent::channel`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::db::{AiStatus, TeamMessage};

/// Broadcast channel name, parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelName {
    Team(String),
    Meeting(String),
    User(i64),
    Workflows,
}

impl ChannelName {
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(uuid) = name.strip_prefix("team.channel.") {
            return (!uuid.is_empty()).then(|| ChannelName::Team(uuid.to_string()));
        }
        if let Some(room) = name.strip_prefix("meeting.") {
            return (!room.is_empty()).then(|| ChannelName::Meeting(room.to_string()));
        }
        if let Some(id) = name.strip_prefix("user.") {
            return id.parse().ok().map(ChannelName::User);
        }
        (name == "workflows").then_some(ChannelName::Workflows)
    }

    pub fn as_string(&self) -> String {
        match self {
            ChannelName::Team(uuid) => format!("team.channel.{}", uuid),
            ChannelName::Meeting(room) => format!("meeting.{}", room),
            ChannelName::User(id) => format!("user.{}", id),
            ChannelName::Workflows => "workflows".to_string(),
        }
    }
}

/// GigHub broadcast events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubEvent {
    /// New chat message posted to a team channel
    MessageSent {
        channel_uuid: String,
        message: TeamMessage,
    },

    /// A member started or stopped typing
    UserTyping {
        channel_uuid: String,
        user_id: i64,
        user_name: String,
        typing: bool,
    },

    /// A member read a message
    MessageRead {
        channel_uuid: String,
        message_id: i64,
        user_id: i64,
        read_at: DateTime<Utc>,
    },

    /// WebRTC-style signal relayed between meeting participants
    ///
    /// `to_user_id = None` addresses every participant in the room.
    MeetingSignal {
        room_id: String,
        from_user_id: i64,
        to_user_id: Option<i64>,
        signal_type: String,
        payload: Value,
    },

    /// Notification for a single user
    UserNotification {
        user_id: i64,
        kind: String,
        title: String,
        body: String,
        timestamp: DateTime<Utc>,
    },

    /// Workflow AI generation status changed
    WorkflowAiStatusChanged {
        workflow_id: i64,
        status: AiStatus,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl HubEvent {
    /// Channel this event is delivered on
    pub fn channel(&self) -> ChannelName {
        match self {
            HubEvent::MessageSent { channel_uuid, .. }
            | HubEvent::UserTyping { channel_uuid, .. }
            | HubEvent::MessageRead { channel_uuid, .. } => ChannelName::Team(channel_uuid.clone()),
            HubEvent::MeetingSignal { room_id, .. } => ChannelName::Meeting(room_id.clone()),
            HubEvent::UserNotification { user_id, .. } => ChannelName::User(*user_id),
            HubEvent::WorkflowAiStatusChanged { .. } => ChannelName::Workflows,
        }
    }

    /// Whether a subscriber of this event's channel may receive it
    ///
    /// Channel authorization covers everything except signals addressed to a
    /// single participant.
    pub fn visible_to(&self, user_id: i64) -> bool {
        match self {
            HubEvent::MeetingSignal {
                to_user_id: Some(to),
                ..
            } => *to == user_id,
            _ => true,
        }
    }

    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            HubEvent::MessageSent { .. } => "MessageSent",
            HubEvent::UserTyping { .. } => "UserTyping",
            HubEvent::MessageRead { .. } => "MessageRead",
            HubEvent::MeetingSignal { .. } => "MeetingSignal",
            HubEvent::UserNotification { .. } => "UserNotification",
            HubEvent::WorkflowAiStatusChanged { .. } => "WorkflowAiStatusChanged",
        }
    }
}

/// In-process broadcast bus shared by HTTP handlers and queue workers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HubEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: HubEvent) -> Result<usize, broadcast::error::SendError<HubEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: HubEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
