//! Chat data model: messages, their attachment payloads, and rooms.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::AttachmentKind;
use crate::transfer::{affordance, Affordance, InvalidTransition, Ownership, TransferEvent, TransferStatus};
use crate::types::{MessageId, Participant, RoomId, UserId};

/// Where an attachment's bytes currently live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
    Local(PathBuf),
    Remote(String),
}

impl MediaSource {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn local_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Local(path) => Some(path),
            Self::Remote(_) => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Self::Local(path) => path.display().to_string(),
            Self::Remote(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub source: MediaSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Human-readable size, e.g. `"2.4 MB"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Image preview or video thumbnail, as a local path or URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl Attachment {
    pub fn new(source: MediaSource) -> Self {
        Self {
            source,
            file_name: None,
            mime_type: None,
            size: None,
            duration_secs: None,
            preview: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioAttachment {
    pub media: Attachment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Artwork extracted from the file's tags, persisted next to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<PathBuf>,
}

/// Message payload. At most one attachment, by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Body {
    Text,
    Image(Attachment),
    Video(Attachment),
    Audio(AudioAttachment),
    File(Attachment),
}

impl Body {
    pub fn kind(&self) -> Option<AttachmentKind> {
        match self {
            Self::Text => None,
            Self::Image(_) => Some(AttachmentKind::Image),
            Self::Video(_) => Some(AttachmentKind::Video),
            Self::Audio(_) => Some(AttachmentKind::Audio),
            Self::File(_) => Some(AttachmentKind::File),
        }
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        match self {
            Self::Text => None,
            Self::Image(a) | Self::Video(a) | Self::File(a) => Some(a),
            Self::Audio(audio) => Some(&audio.media),
        }
    }

    pub fn attachment_mut(&mut self) -> Option<&mut Attachment> {
        match self {
            Self::Text => None,
            Self::Image(a) | Self::Video(a) | Self::File(a) => Some(a),
            Self::Audio(audio) => Some(&mut audio.media),
        }
    }

    /// Wrap an attachment in the variant matching `kind`.
    pub fn from_kind(kind: AttachmentKind, attachment: Attachment) -> Self {
        match kind {
            AttachmentKind::Image => Self::Image(attachment),
            AttachmentKind::Video => Self::Video(attachment),
            AttachmentKind::File => Self::File(attachment),
            AttachmentKind::Audio => Self::Audio(AudioAttachment {
                media: attachment,
                title: None,
                artist: None,
                artwork: None,
            }),
        }
    }
}

/// What a reply bubble shows of the message it quotes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReplySummary {
    Text { value: String },
    Image { value: String, label: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyRef {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub summary: ReplySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Participant,
    pub created_at: DateTime<Utc>,
    /// Plain text as shown to the user. Empty for pure attachments.
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
    pub status: TransferStatus,
    pub body: Body,
    /// The recipient confirmed this message reached their device.
    #[serde(default)]
    pub received: bool,
}

/// Affordance together with the attachment kind it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AffordanceView {
    pub kind: AttachmentKind,
    pub affordance: Affordance,
}

impl Message {
    pub fn text(sender: Participant, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            sender,
            created_at: Utc::now(),
            text: text.into(),
            reply: None,
            status: TransferStatus::Available,
            body: Body::Text,
            received: false,
        }
    }

    /// A new outbound attachment message, starting in `uploading`.
    pub fn outbound(sender: Participant, body: Body, text: impl Into<String>) -> Self {
        let status = if body.kind().is_some() {
            TransferStatus::OUTBOUND
        } else {
            TransferStatus::Available
        };
        Self {
            id: MessageId::generate(),
            sender,
            created_at: Utc::now(),
            text: text.into(),
            reply: None,
            status,
            body,
            received: false,
        }
    }

    pub fn kind(&self) -> Option<AttachmentKind> {
        self.body.kind()
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.body.attachment()
    }

    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender.id == user
    }

    pub fn ownership(&self, viewer: &UserId) -> Ownership {
        Ownership::of(self.is_from(viewer))
    }

    /// Move the transfer status; rejects events the state machine does not allow.
    pub fn apply(&mut self, event: TransferEvent, viewer: &UserId) -> Result<TransferStatus, InvalidTransition> {
        let next = self.status.apply(event, self.ownership(viewer))?;
        self.status = next;
        Ok(next)
    }

    pub fn affordance(&self, viewer: &UserId) -> Option<AffordanceView> {
        let kind = self.kind()?;
        Some(AffordanceView {
            kind,
            affordance: affordance(self.status, self.ownership(viewer)),
        })
    }

    /// Reference used when the user replies to this message.
    pub fn reply_ref(&self) -> ReplyRef {
        ReplyRef {
            id: self.id.clone(),
            name: Some(self.sender.name.clone()),
            summary: self.reply_summary(),
        }
    }

    fn reply_summary(&self) -> ReplySummary {
        if !self.text.is_empty() {
            return ReplySummary::Text {
                value: self.text.clone(),
            };
        }

        let label = |value: &str| ReplySummary::Text {
            value: value.to_string(),
        };

        match &self.body {
            Body::Audio(audio) if audio.title.is_some() => label("Music"),
            Body::Image(a) => ReplySummary::Image {
                value: a.preview.clone().unwrap_or_else(|| a.source.display()),
                label: "Image".to_string(),
            },
            Body::Video(a) => match &a.preview {
                Some(thumb) => ReplySummary::Image {
                    value: thumb.clone(),
                    label: "Video".to_string(),
                },
                None => label("Video"),
            },
            other => match other.attachment().and_then(|a| a.mime_type.as_deref()) {
                Some(mime) => label(mime),
                None => label("Some Reply"),
            },
        }
    }

    /// One-line preview used in the room list.
    pub fn preview_line(&self) -> String {
        match self.kind() {
            Some(kind) => format!("New {}", kind.label()),
            None => self.text.clone(),
        }
    }
}

/// Conversation between exactly two users, messages newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub users: [Participant; 2],
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Room {
    pub fn new(id: RoomId, user: Participant, contact: Participant) -> Self {
        Self {
            id,
            users: [user, contact],
            messages: Vec::new(),
        }
    }

    /// The participant that is not `me`.
    pub fn contact(&self, me: &UserId) -> &Participant {
        if &self.users[0].id == me {
            &self.users[1]
        } else {
            &self.users[0]
        }
    }

    /// Insert at the head of the list. Returns `false` for a duplicate id.
    pub fn prepend(&mut self, message: Message) -> bool {
        if self.find(&message.id).is_some() {
            return false;
        }
        self.messages.insert(0, message);
        true
    }

    pub fn find(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Apply `f` to the message with `id`. Updates for ids no longer in the
    /// list are dropped and return `None`.
    pub fn update<R>(&mut self, id: &MessageId, f: impl FnOnce(&mut Message) -> R) -> Option<R> {
        self.messages.iter_mut().find(|m| &m.id == id).map(f)
    }

    pub fn last_preview(&self) -> Option<String> {
        self.messages.first().map(Message::preview_line)
    }
}
