use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::AttachmentKind;
use crate::error::DuetError;
use crate::message::ReplyRef;
use crate::types::{MessageId, Participant, RoomId, UserId};

/// Event name for plain text messages.
pub const EVENT_SEND_MESSAGE: &str = "sendMessage";

/// Receipt for an inbound message, relayed to its sender. The server
/// expects this exact spelling.
pub const EVENT_RECEIPT: &str = "recivedMessage";

/// Message envelope emitted on the messaging channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "_id")]
    pub id: MessageId,
    /// Sealed text: empty, or the JSON cipher/iv object.
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub user: Participant,
    pub room_id: RoomId,
    /// Whether the server keeps a copy for offline delivery.
    #[serde(rename = "isIntractDB")]
    pub persist_on_server: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
}

/// Tells the sender of `message_id` that it arrived on this device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub message_id: MessageId,
    pub room_id: RoomId,
    /// The receiving user.
    pub contact: Participant,
    /// The original sender, who gets the receipt.
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum OutboundPayload {
    Message(Envelope),
    Receipt(Receipt),
}

/// A named outbound channel event.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub name: &'static str,
    pub payload: OutboundPayload,
}

impl OutboundEvent {
    pub fn text(envelope: Envelope) -> Self {
        Self {
            name: EVENT_SEND_MESSAGE,
            payload: OutboundPayload::Message(envelope),
        }
    }

    pub fn attachment(kind: AttachmentKind, envelope: Envelope) -> Self {
        Self {
            name: kind.send_event(),
            payload: OutboundPayload::Message(envelope),
        }
    }

    pub fn receipt(receipt: Receipt) -> Self {
        Self {
            name: EVENT_RECEIPT,
            payload: OutboundPayload::Receipt(receipt),
        }
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        match &self.payload {
            OutboundPayload::Message(envelope) => Some(envelope),
            OutboundPayload::Receipt(_) => None,
        }
    }

    /// The message this event carries or acknowledges.
    pub fn message_id(&self) -> &MessageId {
        match &self.payload {
            OutboundPayload::Message(envelope) => &envelope.id,
            OutboundPayload::Receipt(receipt) => &receipt.message_id,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.payload)
    }
}

/// Message as delivered by the server. Attachment references are paths
/// relative to the server base URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    #[serde(rename = "_id", alias = "uuid")]
    pub id: MessageId,
    pub room_id: RoomId,
    #[serde(default)]
    pub text: String,
    pub user: Participant,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Base64 image preview or video thumbnail.
    #[serde(default, rename = "preView", alias = "thumbnail", skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
}

impl InboundEnvelope {
    /// Parse a message payload from the channel.
    pub fn from_json(raw: &str) -> Result<Self, DuetError> {
        let envelope: Self = serde_json::from_str(raw)?;
        if envelope.id.as_str().is_empty() {
            return Err(DuetError::Protocol("message without id".into()));
        }
        if envelope.room_id.as_str().is_empty() {
            return Err(DuetError::Protocol(format!("message {} without room", envelope.id)));
        }
        Ok(envelope)
    }

    /// The attachment reference and its kind, if the message carries one.
    /// When several fields are set the first of image, video, audio, file wins.
    pub fn attachment_ref(&self) -> Option<(AttachmentKind, &str)> {
        [
            (AttachmentKind::Image, &self.image),
            (AttachmentKind::Video, &self.video),
            (AttachmentKind::Audio, &self.audio),
            (AttachmentKind::File, &self.file),
        ]
        .into_iter()
        .find_map(|(kind, path)| path.as_deref().filter(|p| !p.is_empty()).map(|p| (kind, p)))
    }
}

/// Resolve a server-relative attachment path against the base URL.
pub fn remote_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    let path = path.replace('\\', "/");
    format!("{}/{}", base, path.trim_start_matches('/'))
}

/// Non-message notifications from the messaging channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelNotification {
    Message(InboundEnvelope),
    /// The recipient confirmed an outbound message arrived.
    Delivered { id: MessageId, room_id: RoomId },
    PeerConnected { room_id: RoomId },
    PeerDisconnected { room_id: RoomId },
}
