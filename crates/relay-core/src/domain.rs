use serde::{Deserialize, Serialize};

/// Platform user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Channel / chat id (numeric, platform-signed).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

/// Message id within a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i32);

/// Kind of addressable endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerKind {
    User,
    Chat,
    Channel,
}

/// Who authored an inbound message.
///
/// Only `User` senders can pass an allow-list; anonymous admins and linked
/// channels show up as `Chat`/`Channel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SenderPeer {
    User(UserId),
    Chat(ChannelId),
    Channel(ChannelId),
}

impl SenderPeer {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            SenderPeer::User(id) => Some(*id),
            _ => None,
        }
    }
}

/// A peer the transport has resolved and can address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerHandle {
    pub id: i64,
    pub kind: PeerKind,
    pub title: Option<String>,
}

/// A stable reference to a delivered message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}
