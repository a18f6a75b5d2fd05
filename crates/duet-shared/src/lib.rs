//! # duet-shared
//!
//! Types shared by every duet crate: identifiers, the message/room data
//! model, the attachment transfer state machine, the per-room crypto layer,
//! and the envelopes exchanged over the messaging channel.

pub mod attachment;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod format;
pub mod message;
pub mod protocol;
pub mod transfer;
pub mod types;

pub use attachment::{classify, AttachmentKind};
pub use crypto::RoomKey;
pub use error::{CryptoError, DuetError};
pub use message::{Attachment, AudioAttachment, Body, MediaSource, Message, ReplyRef, Room};
pub use protocol::{ChannelNotification, Envelope, InboundEnvelope, OutboundEvent, OutboundPayload, Receipt};
pub use transfer::{affordance, Affordance, Direction, InvalidTransition, Ownership, TransferEvent, TransferStatus};
pub use types::{MessageId, Participant, RoomId, UserId};
