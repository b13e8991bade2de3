//! Core contract of the realtime chat client.
//!
//! This crate defines the event protocol, data model, session lifecycle and the
//! synchronous reconciliation components (rooms, messages, reactions,
//! membership, subscriptions) that the dispatch bridge drives.

/// Realtime connection handle (outbound queue, inbound fan-out).
pub mod channel;
/// Stable error taxonomy.
pub mod error;
/// Group membership merge functions.
pub mod membership;
/// Active-room message log with load generations.
pub mod message_log;
/// Negative-acknowledgement normalization.
pub mod normalization;
/// Reaction toggle rules and palette derivation.
pub mod reactions;
/// Room registry and direct-message resolution.
pub mod rooms;
/// Session lifecycle state machine.
pub mod state_machine;
/// Session/room subscription bookkeeping.
pub mod subscriptions;
/// Protocol events and data model.
pub mod types;

pub use channel::{ChannelError, InboundStream, RealtimeChannels};
pub use error::{ChatError, ChatErrorCategory};
pub use membership::{add_member, remove_member};
pub use message_log::{LoadTicket, MessageLog};
pub use normalization::normalize_negative_ack;
pub use reactions::ReactionSummary;
pub use rooms::{OpponentCheckOutcome, PrivateRoomLookup, RoomRegistry, RoomRemoval};
pub use state_machine::SessionStateMachine;
pub use subscriptions::{RoomSubscription, SubscriptionSwitch, SubscriptionTable};
pub use types::{
    ClientEvent, DirectCandidate, EventScope, Group, GroupCredentialsPatch, HEART_REACTION,
    InboundEvent, MAX_MESSAGE_IMAGES, Message, MessageId, MessagePatch, OperatedMessage,
    PrivateRoom, ProfileField, Reaction, RepliedMessage, Room, RoomId, RoomKind, SelectedImage,
    ServerEvent, SessionState, User, UserId, UserStatus,
};
