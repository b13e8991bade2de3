use serde::{Deserialize, Serialize};

/// Stable user identifier assigned by the server.
pub type UserId = String;
/// Room identifier. Private rooms may carry a locally generated value.
pub type RoomId = String;
/// Message identifier, generated by the sending client.
pub type MessageId = String;

/// Heart glyph sent by the double-tap shortcut.
pub const HEART_REACTION: &str = "❤️";
/// Maximum number of images attached to one outgoing message.
pub const MAX_MESSAGE_IMAGES: usize = 5;

/// Presence reported for a user or for the opponent of a private room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    /// User has a live connection.
    Online,
    /// User has no live connection.
    #[default]
    Offline,
}

/// Client-side session lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    /// No identity has been requested yet.
    Anonymous,
    /// A `create_user` request is in flight.
    Creating,
    /// A `get_user` request for a persisted identity is in flight.
    Restoring,
    /// The current user is resolved and room/message traffic is allowed.
    Active,
    /// Identity resolution was rejected; the user must retry manually.
    Failed,
    /// The user disconnected and all local state was cleared.
    LoggedOut,
}

/// Current user profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Server-assigned user ID.
    pub id: UserId,
    /// Display name, unique per server.
    pub name: String,
    /// Avatar display handle, when set.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Presence status.
    #[serde(default)]
    pub status: UserStatus,
    /// Free-form profile text.
    #[serde(default)]
    pub bio: Option<String>,
    /// Rooms the user belongs to. Treated as a set.
    #[serde(default)]
    pub room_ids: Vec<RoomId>,
}

impl User {
    /// Add a room ID if not already present. Returns `true` when inserted.
    pub fn add_room_id(&mut self, room_id: &str) -> bool {
        if self.room_ids.iter().any(|id| id == room_id) {
            return false;
        }
        self.room_ids.push(room_id.to_owned());
        true
    }
}

/// Profile fields editable through `user_update_field`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProfileField {
    /// Display name.
    Name,
    /// Profile text.
    Bio,
    /// Presence status.
    Status,
}

/// Image attached to a message or used as avatar material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectedImage {
    /// Client-generated image ID.
    pub id: String,
    /// Original file name.
    pub name: String,
    /// Display handle (URL or data URI).
    pub src: String,
    /// Compressed binary payload.
    #[serde(default)]
    pub data: Vec<u8>,
}

/// 1:1 room between the current user and one opponent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateRoom {
    /// Local room ID. May differ from the opponent's ID for the same channel.
    pub id: RoomId,
    /// Display name (the opponent's name).
    pub name: String,
    /// Avatar display handle.
    #[serde(default)]
    pub avatar: Option<String>,
    /// `[self, opponent]` for locally created rooms.
    #[serde(default)]
    pub creators: Vec<UserId>,
    /// Shared channel key both participants join.
    pub common_id: String,
    /// The opponent's room ID, once known.
    #[serde(default)]
    pub opponent_room_id: Option<RoomId>,
    /// Opponent profile text.
    #[serde(default)]
    pub description: Option<String>,
    /// Opponent presence.
    #[serde(default)]
    pub status: UserStatus,
}

/// Multi-member room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Server-assigned group ID, also used as the channel key.
    pub id: RoomId,
    /// Group name, unique case-insensitively among the user's rooms.
    pub name: String,
    /// Avatar display handle.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Administrators. `creators[0]` is the founder.
    #[serde(default)]
    pub creators: Vec<UserId>,
    /// Member user IDs.
    #[serde(default)]
    pub members: Vec<UserId>,
    /// Group description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the group is discoverable by search.
    #[serde(default)]
    pub is_public: bool,
}

impl Group {
    /// Whether `user_id` may edit group credentials.
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.creators.iter().any(|id| id == user_id)
    }

    /// Whether `user_id` is in the member list.
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|id| id == user_id)
    }
}

/// Room discriminant used wherever behavior differs per room kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Multi-member group.
    Group,
    /// 1:1 private room.
    PrivateRoom,
}

/// Room registry entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Room {
    /// Multi-member group.
    Group(Group),
    /// 1:1 private room.
    #[serde(rename = "private_room")]
    Private(PrivateRoom),
}

impl Room {
    pub fn id(&self) -> &str {
        match self {
            Room::Group(group) => &group.id,
            Room::Private(room) => &room.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Room::Group(group) => &group.name,
            Room::Private(room) => &room.name,
        }
    }

    pub fn creators(&self) -> &[UserId] {
        match self {
            Room::Group(group) => &group.creators,
            Room::Private(room) => &room.creators,
        }
    }

    /// Channel key used for messaging: `commonId` for private rooms, `id` for groups.
    pub fn key(&self) -> &str {
        match self {
            Room::Group(group) => &group.id,
            Room::Private(room) => &room.common_id,
        }
    }

    pub fn kind(&self) -> RoomKind {
        match self {
            Room::Group(_) => RoomKind::Group,
            Room::Private(_) => RoomKind::PrivateRoom,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Room::Group(group) => Some(group),
            Room::Private(_) => None,
        }
    }
}

/// A user offered for a direct message (search result or group member).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectCandidate {
    /// The candidate user's ID.
    pub id: UserId,
    /// The candidate user's name.
    pub name: String,
    /// Avatar display handle.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Candidate profile text.
    #[serde(default)]
    pub description: Option<String>,
    /// Candidate presence.
    #[serde(default)]
    pub status: UserStatus,
    /// Room the candidate already holds with the current user, if any.
    #[serde(default)]
    pub opponent_room_id: Option<RoomId>,
}

/// Reply reference embedded in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepliedMessage {
    /// ID of the message being replied to.
    pub id: MessageId,
    /// Author name of the replied message.
    pub author: String,
    /// Text of the replied message.
    pub message: String,
    /// Images of the replied message.
    #[serde(default)]
    pub images: Option<Vec<SelectedImage>>,
}

/// One reaction placed on a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    /// Client-generated reaction ID.
    pub id: String,
    /// Author of the reaction.
    pub author_id: UserId,
    /// Emoji grapheme.
    pub reaction: String,
    /// Message the reaction belongs to.
    pub message_id: MessageId,
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Client-generated message ID.
    pub id: MessageId,
    /// Author user ID.
    pub author_id: UserId,
    /// Author display name at send time.
    pub author_name: String,
    /// Author avatar at send time.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Message text. May be empty for image-only messages.
    #[serde(default)]
    pub content: String,
    /// Local send time formatted as `HH:MM`.
    pub date: String,
    /// Attached images.
    #[serde(default)]
    pub images: Option<Vec<SelectedImage>>,
    /// Reply reference.
    #[serde(default)]
    pub replied_message: Option<RepliedMessage>,
    /// Reactions; `None` when cleared.
    #[serde(default)]
    pub reactions: Option<Vec<Reaction>>,
}

impl Message {
    /// Reply reference pointing at this message.
    pub fn reply_reference(&self) -> RepliedMessage {
        RepliedMessage {
            id: self.id.clone(),
            author: self.author_name.clone(),
            message: self.content.clone(),
            images: self.images.clone(),
        }
    }
}

/// Shallow overwrite applied by message edits. Absent fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MessagePatch {
    /// Replacement text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Replacement images. An empty list clears the images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<SelectedImage>>,
}

/// Partial group profile update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupCredentialsPatch {
    /// Target group ID.
    pub id: RoomId,
    /// New name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New avatar display handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// New visibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

impl GroupCredentialsPatch {
    /// Whether the patch carries no field changes.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.avatar.is_none()
            && self.is_public.is_none()
    }
}

/// What the compose bar is currently acting on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OperatedMessage {
    /// Composing a fresh message.
    #[default]
    Idle,
    /// Editing an existing message.
    Editing(Message),
    /// Replying to an existing message.
    Replying(Message),
}

impl OperatedMessage {
    pub fn is_idle(&self) -> bool {
        matches!(self, OperatedMessage::Idle)
    }

    pub fn edited(&self) -> Option<&Message> {
        match self {
            OperatedMessage::Editing(message) => Some(message),
            _ => None,
        }
    }

    pub fn replied(&self) -> Option<&Message> {
        match self {
            OperatedMessage::Replying(message) => Some(message),
            _ => None,
        }
    }
}

/// Outbound realtime events emitted by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Request a new identity.
    CreateUser {
        /// Requested display name.
        name: String,
    },
    /// Restore a persisted identity.
    GetUser {
        /// Persisted user ID.
        id: UserId,
    },
    /// Bulk-fetch the user's rooms.
    GetRooms {
        /// Rooms to fetch.
        room_ids: Vec<RoomId>,
    },
    /// Subscribe the connection to a room channel.
    JoinRoom {
        /// `commonId` for private rooms, `id` for groups.
        room_key: String,
    },
    /// Request group creation.
    CreateGroup {
        /// Validated group name.
        name: String,
        /// `[self]`.
        creators: Vec<UserId>,
        /// `[self, ...invited]`.
        member_ids: Vec<UserId>,
    },
    /// Ask whether the candidate already holds a room with the current user.
    CheckForExistingOpponentRoom {
        /// User the direct message is addressed to.
        candidate: DirectCandidate,
        /// Current user ID.
        self_id: UserId,
    },
    /// Fetch history for a room.
    GetMessages {
        /// Channel key.
        room_key: String,
        /// Load generation echoed back in the response.
        load_id: u64,
    },
    /// Send a new message.
    CreateMessage {
        /// Target room (creates private rooms server-side on first send).
        room: Room,
        /// Sending user ID.
        user_id: UserId,
        /// Message ID generated by the client.
        message_id: MessageId,
        /// Message text.
        content: String,
        /// Local send time, `HH:MM`.
        date: String,
        /// Reply reference.
        replied_message: Option<RepliedMessage>,
        /// Attached images.
        images: Option<Vec<SelectedImage>>,
    },
    /// Edit a message.
    UpdateMessage {
        /// Channel key.
        room_key: String,
        /// Edited message.
        message_id: MessageId,
        /// Fields to overwrite.
        patch: MessagePatch,
    },
    /// Delete a message.
    DeleteMessage {
        /// Channel key.
        room_key: String,
        /// Deleted message.
        message_id: MessageId,
    },
    /// Replace the reaction array of a message; `None` clears it.
    MessageUpdateReactions {
        /// Channel key.
        room_key: String,
        /// Target message.
        message_id: MessageId,
        /// Full replacement array.
        reactions: Option<Vec<Reaction>>,
    },
    /// Typing signal.
    TypingTrigger {
        /// Name shown to other participants.
        user_name: String,
        /// Channel key.
        room_key: String,
    },
    /// Join a group the user is not yet a member of.
    UpdateGroupMembers {
        /// Target group.
        group_id: RoomId,
        /// Joining user (self).
        member_id: UserId,
    },
    /// Remove a member from a group.
    RemoveMember {
        /// Target group.
        group_id: RoomId,
        /// Removed user.
        member_id: UserId,
    },
    /// Invite members to a group.
    AddMembers {
        /// Target group.
        group_id: RoomId,
        /// Invited users.
        member_ids: Vec<UserId>,
    },
    /// Edit group credentials.
    UpdateGroupCredentials {
        /// Target group.
        group_id: RoomId,
        /// Current member list, used for server fan-out.
        members: Vec<UserId>,
        /// Group as it was before the edit.
        original: Group,
        /// Changed fields.
        patch: GroupCredentialsPatch,
    },
    /// Delete (leave) a group.
    DeleteGroup {
        /// Room being deleted.
        room: Room,
        /// Requesting user.
        user_id: UserId,
    },
    /// Delete a private room.
    #[serde(rename = "delete_private-room")]
    DeletePrivateRoom {
        /// Room being deleted.
        room: Room,
        /// Requesting user.
        user_id: UserId,
    },
    /// Logout.
    UserDisconnect {
        /// Disconnecting user.
        user_id: UserId,
    },
    /// Update one profile field.
    UserUpdateField {
        /// Target user.
        user_id: UserId,
        /// Field to update.
        field: ProfileField,
        /// New value.
        value: String,
    },
    /// Replace the avatar.
    UserUpdateAvatar {
        /// Target user.
        user_id: UserId,
        /// New avatar image.
        image: SelectedImage,
    },
    /// Replace the user's room set.
    #[serde(rename = "user_update_roomIds")]
    UserUpdateRoomIds {
        /// Target user.
        user_id: UserId,
        /// Full room set.
        room_ids: Vec<RoomId>,
    },
}

/// Subscription scope an inbound event is delivered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    /// Active for the whole session.
    Session,
    /// Active only while the event's channel is the active room.
    Room,
}

/// Inbound realtime events received from the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// New identity created.
    UserCreated {
        /// Resolved user.
        user: User,
    },
    /// Name already registered; the existing identity is returned.
    UserExists {
        /// Resolved user.
        user: User,
    },
    /// Identity creation rejected.
    UserCreationFailed {
        /// Server message.
        message: String,
    },
    /// Persisted identity restored.
    UserGot {
        /// Server-side user state.
        user: User,
    },
    /// Persisted identity could not be restored.
    FailedGetUser {
        /// Server message.
        message: String,
    },
    /// Bulk room fetch result.
    RoomsGot {
        /// Rooms in server order.
        rooms: Vec<Room>,
    },
    /// Group created (sent to the requester and to invitees).
    GroupCreated {
        /// New group.
        group: Group,
    },
    /// Passive group addition for an invited user.
    SendGroup {
        /// Group the user was added to.
        group: Group,
    },
    /// Group creation rejected.
    GroupCreationFailed {
        /// Server message.
        message: String,
    },
    /// Opponent-room check: no room exists yet.
    OpponentRoomNotExist,
    /// Opponent-room check: the canonical shared room.
    #[serde(rename = "send_private-room")]
    SendPrivateRoom {
        /// Canonical room.
        room: PrivateRoom,
    },
    /// Private room pushed to the other participant.
    #[serde(rename = "send_private-room_to_opponent")]
    SendPrivateRoomToOpponent {
        /// Room created by the opponent.
        room: PrivateRoom,
    },
    /// Server confirmation of a private room created by this client.
    #[serde(rename = "private-room_created")]
    PrivateRoomCreated {
        /// Canonical room.
        room: PrivateRoom,
    },
    /// History fetch result.
    MessagesGot {
        /// Echoed load generation.
        load_id: u64,
        /// Messages in display order.
        messages: Vec<Message>,
    },
    /// History fetch failed.
    FailedGetMessages {
        /// Echoed load generation.
        load_id: u64,
    },
    /// A message was posted to the room.
    ReceiveMessage {
        /// Delivered message.
        message: Message,
    },
    /// Acknowledgement for this client's own send. Sent directly to the sender.
    MessageCreated,
    /// A message was edited.
    ReceiveUpdatedMessage {
        /// Edited message.
        message_id: MessageId,
        /// Fields to overwrite.
        patch: MessagePatch,
    },
    /// A message was deleted.
    #[serde(rename = "receive_deleted_message-id")]
    ReceiveDeletedMessageId {
        /// Deleted message.
        message_id: MessageId,
    },
    /// Reaction array replaced.
    MessageUpdatedReactions {
        /// Target message.
        message_id: MessageId,
        /// Full replacement array.
        reactions: Option<Vec<Reaction>>,
    },
    /// A participant toggled a reaction.
    SendAddedReaction {
        /// Toggled reaction.
        reaction: Reaction,
        /// Target message.
        message: Message,
        /// Kind of the room the message lives in.
        room_type: RoomKind,
        /// Room the message lives in.
        room_id: RoomId,
    },
    /// Someone is typing in the room.
    TypingReceive {
        /// Typing user's name.
        user_name: String,
    },
    /// A member joined a group.
    SendUpdatedGroupMembers {
        /// Target group.
        group_id: RoomId,
        /// Joined user.
        member_id: UserId,
    },
    /// A member left or was removed from a group.
    MemberRemoved {
        /// Target group.
        group_id: RoomId,
        /// Removed user.
        member_id: UserId,
    },
    /// Optimistic join rejected.
    FailedUpdateMembers {
        /// Server message.
        message: String,
    },
    /// Group credentials changed.
    GroupCredentialsUpdated {
        /// Changed fields.
        patch: GroupCredentialsPatch,
    },
    /// A group was deleted.
    GroupDeleted {
        /// Deleted room ID.
        id: RoomId,
    },
    /// Group deletion rejected.
    FailedDeleteGroup {
        /// Server message.
        message: String,
    },
    /// Private-room deletion rejected.
    #[serde(rename = "failed_delete_private-room")]
    FailedDeletePrivateRoom {
        /// Server message.
        message: String,
    },
}

impl ServerEvent {
    /// Subscription scope this event is routed under.
    pub fn scope(&self) -> EventScope {
        match self {
            ServerEvent::ReceiveMessage { .. }
            | ServerEvent::ReceiveUpdatedMessage { .. }
            | ServerEvent::ReceiveDeletedMessageId { .. }
            | ServerEvent::MessageUpdatedReactions { .. }
            | ServerEvent::SendAddedReaction { .. }
            | ServerEvent::TypingReceive { .. }
            | ServerEvent::SendUpdatedGroupMembers { .. }
            | ServerEvent::MemberRemoved { .. } => EventScope::Room,
            _ => EventScope::Session,
        }
    }
}

/// Inbound event together with the channel it arrived on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundEvent {
    /// Room channel key for room-scoped broadcasts; `None` for direct replies.
    pub channel: Option<String>,
    /// Event payload.
    pub event: ServerEvent,
}

impl InboundEvent {
    /// Direct reply addressed to this connection.
    pub fn session(event: ServerEvent) -> Self {
        Self {
            channel: None,
            event,
        }
    }

    /// Broadcast on a room channel.
    pub fn room(channel: impl Into<String>, event: ServerEvent) -> Self {
        Self {
            channel: Some(channel.into()),
            event,
        }
    }
}
