//! Client state reducer: user actions and inbound events funnel through here.

use chat_core::{
    ChatError, ChatErrorCategory, ClientEvent, DirectCandidate, EventScope, GroupCredentialsPatch,
    InboundEvent, MAX_MESSAGE_IMAGES, Message, MessageLog, MessagePatch, OperatedMessage,
    OpponentCheckOutcome, PrivateRoomLookup, ProfileField, Reaction, ReactionSummary,
    RepliedMessage, Room, RoomKind, RoomRegistry, SelectedImage, ServerEvent, SessionState,
    SessionStateMachine, SubscriptionTable, User, UserStatus, membership, normalize_negative_ack,
    reactions,
};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Sidebar room row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomView {
    pub room_id: String,
    pub name: String,
    pub kind: RoomKind,
    pub is_active: bool,
}

/// Message row with derived reaction palette.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub message_id: String,
    pub author_name: String,
    pub content: String,
    pub date: String,
    pub image_count: usize,
    pub replied_message: Option<RepliedMessage>,
    pub reactions: Vec<ReactionSummary>,
    pub is_own: bool,
    pub is_pending: bool,
}

/// Full UI snapshot emitted after state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub session: SessionState,
    pub user: Option<User>,
    pub rooms: Vec<RoomView>,
    pub rooms_revision: u64,
    pub active_room_id: Option<String>,
    pub messages: Vec<MessageView>,
    pub messages_loading: bool,
    pub typing_user_name: Option<String>,
    pub operated_message: OperatedMessage,
    pub error_text: Option<String>,
    pub unseen_message_id: Option<String>,
    pub scroll_to_bottom_requested: bool,
}

/// Text and images in the compose bar at send time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeInput {
    pub text: String,
    pub images: Vec<SelectedImage>,
}

/// Scroll position of the message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportState {
    /// Viewer is at (or close to) the newest message.
    pub near_bottom: bool,
    /// Message list is taller than the viewport.
    pub overflowing: bool,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            near_bottom: true,
            overflowing: false,
        }
    }
}

/// Identity transition the bridge must persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityChange {
    /// User resolved; persist it.
    Resolved(User),
    /// Persisted identity was rejected; forget it.
    Rejected,
}

/// Result of feeding one inbound event to the reducer.
#[derive(Debug, Default)]
pub struct InboundOutcome {
    /// Scope the event was delivered under; `None` when no live handler matched.
    pub scope: Option<EventScope>,
    /// Events to emit in response.
    pub outbound: Vec<ClientEvent>,
    /// Typing epoch to expire after the debounce window.
    pub typing_epoch: Option<u64>,
    /// Identity change to persist.
    pub identity: Option<IdentityChange>,
}

/// First step of opening a direct message.
#[derive(Debug)]
pub enum DirectMessageStart {
    /// Room resolved locally and entered.
    Entered(Vec<ClientEvent>),
    /// The opponent check was emitted; await its single outcome.
    AwaitOpponent {
        outbound: Vec<ClientEvent>,
        outcome: oneshot::Receiver<OpponentCheckOutcome>,
    },
}

#[derive(Debug, Default, Clone)]
struct TypingIndicator {
    user_name: Option<String>,
    epoch: u64,
}

impl TypingIndicator {
    fn observe(&mut self, user_name: String) -> u64 {
        self.epoch += 1;
        self.user_name = Some(user_name);
        self.epoch
    }

    fn expire(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || self.user_name.is_none() {
            return false;
        }
        self.user_name = None;
        true
    }

    fn clear(&mut self) {
        self.epoch += 1;
        self.user_name = None;
    }
}

/// Mutable client state. Every mutation goes through the methods below.
#[derive(Debug)]
pub struct ChatState {
    session: SessionStateMachine,
    user: Option<User>,
    registry: RoomRegistry,
    log: MessageLog,
    subscriptions: SubscriptionTable,
    operated: OperatedMessage,
    typing: TypingIndicator,
    viewport: ViewportState,
    unseen_message_id: Option<String>,
    scroll_to_bottom_requested: bool,
    error_text: Option<String>,
    opponent_check: Option<oneshot::Sender<OpponentCheckOutcome>>,
}

impl ChatState {
    pub fn new(message_log_max_items: usize) -> Self {
        Self {
            session: SessionStateMachine::default(),
            user: None,
            registry: RoomRegistry::new(),
            log: MessageLog::new(message_log_max_items),
            subscriptions: SubscriptionTable::new(),
            operated: OperatedMessage::Idle,
            typing: TypingIndicator::default(),
            viewport: ViewportState::default(),
            unseen_message_id: None,
            scroll_to_bottom_requested: false,
            error_text: None,
            opponent_check: None,
        }
    }

    /// Current immutable snapshot for UI rendering.
    pub fn snapshot(&self) -> ChatSnapshot {
        let self_id = self.user.as_ref().map(|user| user.id.as_str()).unwrap_or("");
        let active_id = self.registry.active_id();
        let kind = self
            .registry
            .active()
            .map(Room::kind)
            .unwrap_or(RoomKind::Group);

        ChatSnapshot {
            session: self.session.state(),
            user: self.user.clone(),
            rooms: self
                .registry
                .rooms()
                .iter()
                .map(|room| RoomView {
                    room_id: room.id().to_owned(),
                    name: room.name().to_owned(),
                    kind: room.kind(),
                    is_active: active_id == Some(room.id()),
                })
                .collect(),
            rooms_revision: self.registry.revision(),
            active_room_id: active_id.map(str::to_owned),
            messages: self
                .log
                .items()
                .iter()
                .map(|message| MessageView {
                    message_id: message.id.clone(),
                    author_name: message.author_name.clone(),
                    content: message.content.clone(),
                    date: message.date.clone(),
                    image_count: message.images.as_ref().map_or(0, Vec::len),
                    replied_message: message.replied_message.clone(),
                    reactions: reactions::reaction_palette(
                        message.reactions.as_deref().unwrap_or_default(),
                        self_id,
                        kind,
                    ),
                    is_own: message.author_id == self_id,
                    is_pending: self.log.pending_message_id() == Some(message.id.as_str()),
                })
                .collect(),
            messages_loading: self.log.is_loading(),
            typing_user_name: self.typing.user_name.clone(),
            operated_message: self.operated.clone(),
            error_text: self.error_text.clone(),
            unseen_message_id: self.unseen_message_id.clone(),
            scroll_to_bottom_requested: self.scroll_to_bottom_requested,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn message_log(&self) -> &MessageLog {
        &self.log
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn set_error_text(&mut self, text: impl Into<String>) {
        self.error_text = Some(text.into());
    }

    pub fn clear_error(&mut self) {
        self.error_text = None;
    }

    /// Restore a persisted identity or request a new one.
    pub fn restore_or_create(
        &mut self,
        persisted: Option<&User>,
        name: Option<&str>,
    ) -> Result<Vec<ClientEvent>, ChatError> {
        let event = match persisted {
            Some(user) => ClientEvent::GetUser {
                id: user.id.clone(),
            },
            None => {
                let name = name.map(str::trim).unwrap_or_default();
                if name.is_empty() {
                    return Err(ChatError::validation(
                        "user_name_required",
                        "enter a name to start chatting",
                    ));
                }
                ClientEvent::CreateUser {
                    name: name.to_owned(),
                }
            }
        };

        let mut out = Vec::new();
        self.emit(&mut out, event)?;
        self.subscriptions.open_session();
        info!(state = ?self.session.state(), "identity requested");
        Ok(out)
    }

    /// Feed one inbound event: route it through the live subscriptions, then apply it.
    pub fn handle_inbound(&mut self, inbound: InboundEvent) -> InboundOutcome {
        let mut outcome = InboundOutcome {
            scope: self.subscriptions.route(&inbound),
            ..Default::default()
        };
        if outcome.scope.is_none() {
            return outcome;
        }

        if let Some(err) = normalize_negative_ack(&inbound.event) {
            warn!(code = %err.code, message = %err.message, "negative acknowledgement");
        }

        match inbound.event {
            ServerEvent::UserCreated { user }
            | ServerEvent::UserExists { user }
            | ServerEvent::UserGot { user } => {
                outcome.identity = Some(IdentityChange::Resolved(user.clone()));
                self.resolve_user(user, &mut outcome.outbound);
            }
            ServerEvent::UserCreationFailed { message } => {
                self.reject_identity(message);
            }
            ServerEvent::FailedGetUser { message } => {
                self.reject_identity(message);
                outcome.identity = Some(IdentityChange::Rejected);
            }
            ServerEvent::RoomsGot { rooms } => {
                if self.registry.replace_all(rooms) {
                    self.close_active_room();
                }
            }
            ServerEvent::GroupCreated { group } => {
                let is_founder = self
                    .user
                    .as_ref()
                    .is_some_and(|user| group.creators.first() == Some(&user.id));
                let group_id = group.id.clone();
                self.registry.upsert_local(Room::Group(group));
                if let Some(user) = self.user.as_mut() {
                    user.add_room_id(&group_id);
                }
                if is_founder
                    && let Err(err) = self.open_room(&group_id, false, &mut outcome.outbound)
                {
                    warn!(room_id = %group_id, error = %err, "failed to open created group");
                }
            }
            ServerEvent::SendGroup { group } => {
                self.registry.upsert_local(Room::Group(group));
            }
            ServerEvent::GroupCreationFailed { message } => {
                self.error_text = Some(format!("group creation failed: {message}"));
            }
            ServerEvent::OpponentRoomNotExist => {
                self.resolve_opponent_check(OpponentCheckOutcome::NotExist);
            }
            ServerEvent::SendPrivateRoom { room } => {
                self.resolve_opponent_check(OpponentCheckOutcome::Existing(room));
            }
            ServerEvent::SendPrivateRoomToOpponent { room } => {
                self.registry.upsert_local(Room::Private(room));
            }
            ServerEvent::PrivateRoomCreated { room } => {
                self.confirm_private_room(room, &mut outcome.outbound);
            }
            ServerEvent::MessagesGot { load_id, messages } => {
                trace!(load_id, count = messages.len(), "received message history");
                self.log.complete_load(load_id, messages);
            }
            ServerEvent::FailedGetMessages { load_id } => {
                self.log.fail_load(load_id);
            }
            ServerEvent::ReceiveMessage { message } => {
                self.receive_message(message);
            }
            ServerEvent::MessageCreated => {
                if let Some(message_id) = self.log.acknowledge() {
                    debug!(message_id = %message_id, "own message acknowledged");
                }
            }
            ServerEvent::ReceiveUpdatedMessage { message_id, patch } => {
                self.log.apply_edit(&message_id, &patch);
            }
            ServerEvent::ReceiveDeletedMessageId { message_id } => {
                self.log.remove(&message_id);
            }
            ServerEvent::MessageUpdatedReactions {
                message_id,
                reactions,
            } => {
                self.log.set_reactions(&message_id, reactions);
            }
            ServerEvent::SendAddedReaction {
                reaction,
                message,
                room_type,
                ..
            } => {
                let current = self
                    .log
                    .get(&message.id)
                    .and_then(|existing| existing.reactions.clone());
                let next = reactions::toggle(room_type, current.as_deref(), reaction);
                self.log.set_reactions(&message.id, next);
            }
            ServerEvent::TypingReceive { user_name } => {
                outcome.typing_epoch = Some(self.typing.observe(user_name));
            }
            ServerEvent::SendUpdatedGroupMembers {
                group_id,
                member_id,
            } => {
                membership::add_member(&mut self.registry, &group_id, &member_id);
            }
            ServerEvent::MemberRemoved {
                group_id,
                member_id,
            } => {
                membership::remove_member(&mut self.registry, &group_id, &member_id);
            }
            ServerEvent::GroupCredentialsUpdated { patch } => {
                self.registry.reconcile_credentials_update(&patch);
            }
            ServerEvent::GroupDeleted { id } => {
                self.remove_room_locally(&id);
            }
            ServerEvent::FailedUpdateMembers { .. }
            | ServerEvent::FailedDeleteGroup { .. }
            | ServerEvent::FailedDeletePrivateRoom { .. } => {}
        }

        outcome
    }

    /// Make `room` the active room: optimistic join, subscription switch and history fetch.
    pub fn enter_room(&mut self, room: Room) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("enter_room")?;
        if self.registry.active_id() == Some(room.id()) {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        self.registry.append_if_absent(room.clone());

        if let Some(current) = self.user.as_mut()
            && current.add_room_id(room.id())
        {
            let room_ids = current.room_ids.clone();
            self.emit(
                &mut out,
                ClientEvent::UserUpdateRoomIds {
                    user_id: user.id.clone(),
                    room_ids,
                },
            )?;
        }

        if let Room::Group(group) = &room
            && !group.has_member(&user.id)
        {
            membership::add_member(&mut self.registry, &group.id, &user.id);
            self.emit(
                &mut out,
                ClientEvent::UpdateGroupMembers {
                    group_id: group.id.clone(),
                    member_id: user.id.clone(),
                },
            )?;
        }

        self.open_room(room.id(), true, &mut out)?;
        Ok(out)
    }

    /// Enter a room already present in the registry.
    pub fn enter_room_by_id(&mut self, room_id: &str) -> Result<Vec<ClientEvent>, ChatError> {
        let room = self
            .registry
            .get(room_id)
            .cloned()
            .ok_or_else(|| ChatError::unknown_room(room_id))?;
        self.enter_room(room)
    }

    /// Validate and request a new group with the current user as founder.
    pub fn create_group(
        &mut self,
        name: &str,
        member_ids: &[String],
    ) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("create_group")?;
        let name = self.registry.validate_group_name(name)?;

        let mut members = vec![user.id.clone()];
        for id in member_ids {
            if !members.contains(id) {
                members.push(id.clone());
            }
        }

        let mut out = Vec::new();
        self.emit(
            &mut out,
            ClientEvent::CreateGroup {
                name,
                creators: vec![user.id],
                member_ids: members,
            },
        )?;
        Ok(out)
    }

    /// Resolve a direct-message candidate, entering a known room or starting the opponent check.
    pub fn start_direct_message(
        &mut self,
        candidate: &DirectCandidate,
    ) -> Result<DirectMessageStart, ChatError> {
        let user = self.current_user("direct_message")?;

        match self.registry.lookup_private_room(candidate) {
            PrivateRoomLookup::Known(room) => {
                debug!(room_id = %room.id(), "direct message resolved to known room");
                Ok(DirectMessageStart::Entered(self.enter_room(room)?))
            }
            PrivateRoomLookup::CreateLocal => {
                let room = self.registry.create_local_private_room(candidate, &user.id);
                let mut out = Vec::new();
                self.open_room(room.id(), false, &mut out)?;
                Ok(DirectMessageStart::Entered(out))
            }
            PrivateRoomLookup::CheckOpponent => {
                if self.opponent_check.is_some() {
                    return Err(ChatError::validation(
                        "opponent_check_in_flight",
                        "another direct message is being resolved",
                    ));
                }
                let mut out = Vec::new();
                self.emit(
                    &mut out,
                    ClientEvent::CheckForExistingOpponentRoom {
                        candidate: candidate.clone(),
                        self_id: user.id,
                    },
                )?;
                let (tx, rx) = oneshot::channel();
                self.opponent_check = Some(tx);
                Ok(DirectMessageStart::AwaitOpponent {
                    outbound: out,
                    outcome: rx,
                })
            }
        }
    }

    /// Finish a direct message once the opponent check resolved.
    pub fn finish_direct_message(
        &mut self,
        candidate: &DirectCandidate,
        outcome: OpponentCheckOutcome,
    ) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("direct_message")?;
        let fetch_history = matches!(outcome, OpponentCheckOutcome::Existing(_));
        let room = self
            .registry
            .complete_private_room(candidate, &user.id, outcome);

        let mut out = Vec::new();
        self.open_room(room.id(), fetch_history, &mut out)?;
        Ok(out)
    }

    /// Forget a pending opponent check (timeout or abandoned request).
    pub fn cancel_opponent_check(&mut self) {
        if self.opponent_check.take().is_some() {
            debug!("opponent check cancelled");
        }
    }

    /// Delete a room locally and request the deletion server-side.
    pub fn delete_room(&mut self, room_id: &str) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("delete_room")?;
        let room = self
            .remove_room_locally(room_id)
            .ok_or_else(|| ChatError::unknown_room(room_id))?;

        let event = match room.kind() {
            RoomKind::Group => ClientEvent::DeleteGroup {
                room,
                user_id: user.id,
            },
            RoomKind::PrivateRoom => ClientEvent::DeletePrivateRoom {
                room,
                user_id: user.id,
            },
        };
        let mut out = Vec::new();
        self.emit(&mut out, event)?;
        Ok(out)
    }

    /// Send the compose input, or apply it as an edit when one is in progress.
    ///
    /// Returns no events when the input is empty and nothing is being edited.
    pub fn send_message(
        &mut self,
        input: ComposeInput,
        date: impl Into<String>,
    ) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("send_message")?;
        let room = self
            .registry
            .active()
            .cloned()
            .ok_or_else(|| ChatError::no_active_room("send_message"))?;

        let text = input.text.trim().to_owned();
        let editing = self.operated.edited().cloned();
        if text.is_empty() && input.images.is_empty() && editing.is_none() {
            trace!("ignoring empty send request");
            return Ok(Vec::new());
        }
        if input.images.len() > MAX_MESSAGE_IMAGES {
            return Err(ChatError::validation(
                "too_many_images",
                format!("attach at most {MAX_MESSAGE_IMAGES} images"),
            ));
        }

        let mut out = Vec::new();
        if let Some(edited) = editing {
            let patch = MessagePatch {
                content: Some(text),
                images: Some(input.images),
            };
            self.emit(
                &mut out,
                ClientEvent::UpdateMessage {
                    room_key: room.key().to_owned(),
                    message_id: edited.id.clone(),
                    patch: patch.clone(),
                },
            )?;
            self.log.apply_edit(&edited.id, &patch);
            self.operated = OperatedMessage::Idle;
            debug!(message_id = %edited.id, "message edited");
            return Ok(out);
        }

        let images = (!input.images.is_empty()).then_some(input.images);
        let replied_message = self.operated.replied().map(Message::reply_reference);
        let message = Message {
            id: Uuid::new_v4().to_string(),
            author_id: user.id.clone(),
            author_name: user.name.clone(),
            avatar: user.avatar.clone(),
            content: text,
            date: date.into(),
            images,
            replied_message,
            reactions: None,
        };

        self.emit(
            &mut out,
            ClientEvent::CreateMessage {
                room: room.clone(),
                user_id: user.id,
                message_id: message.id.clone(),
                content: message.content.clone(),
                date: message.date.clone(),
                replied_message: message.replied_message.clone(),
                images: message.images.clone(),
            },
        )?;
        info!(
            room_id = %room.id(),
            message_id = %message.id,
            body_len = message.content.len(),
            "queueing message send"
        );
        self.log.mark_pending(message.id.clone());
        self.log.append(message);
        self.operated = OperatedMessage::Idle;
        self.scroll_to_bottom_requested = true;
        Ok(out)
    }

    /// Delete a message locally and request the deletion server-side.
    pub fn delete_message(&mut self, message_id: &str) -> Result<Vec<ClientEvent>, ChatError> {
        self.current_user("delete_message")?;
        let room_key = self.active_room_key("delete_message")?;
        if !self.log.remove(message_id) {
            return Err(unknown_message(message_id));
        }
        if matches!(
            &self.operated,
            OperatedMessage::Editing(m) | OperatedMessage::Replying(m) if m.id == message_id
        ) {
            self.operated = OperatedMessage::Idle;
        }

        let mut out = Vec::new();
        self.emit(
            &mut out,
            ClientEvent::DeleteMessage {
                room_key,
                message_id: message_id.to_owned(),
            },
        )?;
        Ok(out)
    }

    /// Start editing one of the current user's messages.
    pub fn begin_edit(&mut self, message_id: &str) -> Result<(), ChatError> {
        let user = self.current_user("begin_edit")?;
        let message = self
            .log
            .get(message_id)
            .cloned()
            .ok_or_else(|| unknown_message(message_id))?;
        if message.author_id != user.id {
            return Err(ChatError::validation(
                "not_message_author",
                "only your own messages can be edited",
            ));
        }
        self.operated = OperatedMessage::Editing(message);
        Ok(())
    }

    /// Start replying to a message.
    pub fn begin_reply(&mut self, message_id: &str) -> Result<(), ChatError> {
        self.current_user("begin_reply")?;
        let message = self
            .log
            .get(message_id)
            .cloned()
            .ok_or_else(|| unknown_message(message_id))?;
        self.operated = OperatedMessage::Replying(message);
        Ok(())
    }

    pub fn cancel_operation(&mut self) {
        self.operated = OperatedMessage::Idle;
    }

    /// Typing signal for a compose-bar change. Suppressed while editing or replying.
    pub fn compose_input_changed(&mut self) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("typing_trigger")?;
        let Some(room_key) = self.registry.active().map(|room| room.key().to_owned()) else {
            return Ok(Vec::new());
        };
        if !self.operated.is_idle() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        self.emit(
            &mut out,
            ClientEvent::TypingTrigger {
                user_name: user.name,
                room_key,
            },
        )?;
        Ok(out)
    }

    /// Toggle `glyph` on a message with the active room's reaction rule.
    pub fn toggle_reaction(
        &mut self,
        message_id: &str,
        glyph: &str,
    ) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("toggle_reaction")?;
        let reaction = reactions::new_reaction(&user.id, message_id, glyph);
        self.apply_reaction(message_id, reaction)
    }

    /// Double-tap shortcut: heart reaction on someone else's message.
    pub fn double_tap(&mut self, message_id: &str) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("double_tap")?;
        let message = self
            .log
            .get(message_id)
            .ok_or_else(|| unknown_message(message_id))?;
        match reactions::heart_reaction(&user.id, message) {
            Some(reaction) => self.apply_reaction(message_id, reaction),
            None => Ok(Vec::new()),
        }
    }

    /// Invite members to a group, applied optimistically.
    pub fn add_members(
        &mut self,
        group_id: &str,
        member_ids: &[String],
    ) -> Result<Vec<ClientEvent>, ChatError> {
        self.current_user("add_members")?;
        self.require_group(group_id)?;
        if member_ids.is_empty() {
            return Ok(Vec::new());
        }

        for member_id in member_ids {
            membership::add_member(&mut self.registry, group_id, member_id);
        }
        let mut out = Vec::new();
        self.emit(
            &mut out,
            ClientEvent::AddMembers {
                group_id: group_id.to_owned(),
                member_ids: member_ids.to_vec(),
            },
        )?;
        Ok(out)
    }

    /// Remove a member (or leave, when `member_id` is the current user).
    pub fn remove_member(
        &mut self,
        group_id: &str,
        member_id: &str,
    ) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("remove_member")?;
        let group = self.require_group(group_id)?;
        if member_id != user.id && !group.is_admin(&user.id) {
            return Err(not_group_admin());
        }

        membership::remove_member(&mut self.registry, group_id, member_id);
        let mut out = Vec::new();
        self.emit(
            &mut out,
            ClientEvent::RemoveMember {
                group_id: group_id.to_owned(),
                member_id: member_id.to_owned(),
            },
        )?;
        Ok(out)
    }

    /// Request a credentials edit. Applied only once the broadcast arrives.
    pub fn update_group_credentials(
        &mut self,
        patch: GroupCredentialsPatch,
    ) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("update_group_credentials")?;
        let group = self.require_group(&patch.id)?;
        if !group.is_admin(&user.id) {
            return Err(not_group_admin());
        }

        let changes = GroupCredentialsPatch {
            id: group.id.clone(),
            name: patch
                .name
                .map(|name| name.trim().to_owned())
                .filter(|name| !name.is_empty() && *name != group.name),
            description: patch
                .description
                .filter(|value| group.description.as_ref() != Some(value)),
            avatar: patch
                .avatar
                .filter(|value| group.avatar.as_ref() != Some(value)),
            is_public: patch.is_public.filter(|value| *value != group.is_public),
        };
        if changes.is_empty() {
            debug!(room_id = %group.id, "credentials unchanged; nothing to send");
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        self.emit(
            &mut out,
            ClientEvent::UpdateGroupCredentials {
                group_id: group.id.clone(),
                members: group.members.clone(),
                original: group,
                patch: changes,
            },
        )?;
        Ok(out)
    }

    /// Update one profile field locally and server-side.
    pub fn update_profile_field(
        &mut self,
        field: ProfileField,
        value: &str,
    ) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("user_update_field")?;
        let value = value.trim().to_owned();

        let mut updated = user.clone();
        match field {
            ProfileField::Name => {
                if value.is_empty() {
                    return Err(ChatError::validation(
                        "user_name_required",
                        "name cannot be empty",
                    ));
                }
                updated.name = value.clone();
            }
            ProfileField::Bio => {
                updated.bio = (!value.is_empty()).then(|| value.clone());
            }
            ProfileField::Status => {
                updated.status = parse_status(&value)?;
            }
        }

        let mut out = Vec::new();
        self.emit(
            &mut out,
            ClientEvent::UserUpdateField {
                user_id: user.id,
                field,
                value,
            },
        )?;
        self.user = Some(updated);
        Ok(out)
    }

    /// Replace the current user's avatar.
    pub fn update_avatar(&mut self, image: SelectedImage) -> Result<Vec<ClientEvent>, ChatError> {
        let user = self.current_user("user_update_avatar")?;
        let mut out = Vec::new();
        self.emit(
            &mut out,
            ClientEvent::UserUpdateAvatar {
                user_id: user.id,
                image: image.clone(),
            },
        )?;
        if let Some(current) = self.user.as_mut() {
            current.avatar = Some(image.src);
        }
        Ok(out)
    }

    /// Disconnect and clear every piece of session state.
    pub fn logout(&mut self) -> Result<Vec<ClientEvent>, ChatError> {
        let Some(user_id) = self.user.as_ref().map(|user| user.id.clone()) else {
            return Err(ChatError::invalid_state(self.session.state(), "logout"));
        };

        let mut out = Vec::new();
        self.emit(&mut out, ClientEvent::UserDisconnect { user_id })?;

        self.user = None;
        self.registry.clear();
        self.close_active_room();
        self.subscriptions.close_session();
        self.opponent_check = None;
        self.error_text = None;
        info!("logged out; local state cleared");
        Ok(out)
    }

    pub fn set_viewport(&mut self, viewport: ViewportState) {
        self.viewport = viewport;
        if viewport.near_bottom {
            self.unseen_message_id = None;
        }
    }

    /// Clear the new-message notice once the view reached the bottom.
    pub fn mark_scrolled_to_bottom(&mut self) {
        self.unseen_message_id = None;
        self.scroll_to_bottom_requested = false;
    }

    /// Clear the typing name if no newer typing event arrived since `epoch`.
    pub fn expire_typing(&mut self, epoch: u64) -> bool {
        self.typing.expire(epoch)
    }

    fn emit(&mut self, out: &mut Vec<ClientEvent>, event: ClientEvent) -> Result<(), ChatError> {
        self.session.apply(&event)?;
        out.push(event);
        Ok(())
    }

    fn current_user(&self, action: &str) -> Result<User, ChatError> {
        match &self.user {
            Some(user) if self.session.is_active() => Ok(user.clone()),
            _ => Err(ChatError::invalid_state(self.session.state(), action)),
        }
    }

    fn active_room_key(&self, action: &str) -> Result<String, ChatError> {
        self.registry
            .active()
            .map(|room| room.key().to_owned())
            .ok_or_else(|| ChatError::no_active_room(action))
    }

    fn require_group(&self, group_id: &str) -> Result<chat_core::Group, ChatError> {
        self.registry
            .get(group_id)
            .and_then(Room::as_group)
            .cloned()
            .ok_or_else(|| ChatError::unknown_room(group_id))
    }

    fn resolve_user(&mut self, user: User, out: &mut Vec<ClientEvent>) {
        if self.session.is_active() {
            debug!(user_id = %user.id, "refreshing resolved user");
            self.user = Some(user);
            return;
        }
        if let Err(err) = self.session.on_identity_result(true) {
            warn!(error = %err, "ignoring identity result outside of a pending request");
            return;
        }

        info!(user_id = %user.id, rooms = user.room_ids.len(), "user resolved");
        let room_ids = user.room_ids.clone();
        self.user = Some(user);
        self.error_text = None;
        if let Err(err) = self.emit(out, ClientEvent::GetRooms { room_ids }) {
            warn!(error = %err, "failed to request rooms after identity resolution");
        }
    }

    fn reject_identity(&mut self, message: String) {
        if let Err(err) = self.session.on_identity_result(false) {
            warn!(error = %err, "ignoring identity rejection outside of a pending request");
            return;
        }
        self.user = None;
        self.error_text = Some(message);
    }

    fn resolve_opponent_check(&mut self, outcome: OpponentCheckOutcome) {
        match self.opponent_check.take() {
            Some(responder) => {
                if responder.send(outcome).is_err() {
                    debug!("opponent check resolved after the requester gave up");
                }
            }
            None => debug!("ignoring opponent check outcome without a pending request"),
        }
    }

    fn confirm_private_room(&mut self, room: chat_core::PrivateRoom, out: &mut Vec<ClientEvent>) {
        let room_id = room.id.clone();
        let key = room.common_id.clone();
        self.registry.confirm_private_room(room);

        if self.registry.active_id() == Some(room_id.as_str())
            && self.log.room_key() != Some(key.as_str())
            && let Err(err) = self.open_room(&room_id, true, out)
        {
            warn!(room_id = %room_id, error = %err, "failed to reopen confirmed private room");
        }
    }

    fn receive_message(&mut self, message: Message) {
        let from_opponent = self
            .user
            .as_ref()
            .is_none_or(|user| user.id != message.author_id);
        let message_id = message.id.clone();
        self.log.append(message);

        if !from_opponent {
            return;
        }
        if self.viewport.overflowing && !self.viewport.near_bottom {
            self.unseen_message_id = Some(message_id);
        } else {
            self.scroll_to_bottom_requested = true;
        }
    }

    fn apply_reaction(
        &mut self,
        message_id: &str,
        reaction: Reaction,
    ) -> Result<Vec<ClientEvent>, ChatError> {
        let room = self
            .registry
            .active()
            .cloned()
            .ok_or_else(|| ChatError::no_active_room("message_update_reactions"))?;
        let current = self
            .log
            .get(message_id)
            .ok_or_else(|| unknown_message(message_id))?
            .reactions
            .clone();

        let next = reactions::toggle(room.kind(), current.as_deref(), reaction);
        let mut out = Vec::new();
        self.emit(
            &mut out,
            ClientEvent::MessageUpdateReactions {
                room_key: room.key().to_owned(),
                message_id: message_id.to_owned(),
                reactions: next.clone(),
            },
        )?;
        self.log.set_reactions(message_id, next);
        Ok(out)
    }

    fn open_room(
        &mut self,
        room_id: &str,
        fetch_history: bool,
        out: &mut Vec<ClientEvent>,
    ) -> Result<(), ChatError> {
        let key = self.registry.set_active(room_id)?.key().to_owned();
        self.subscriptions.switch_room(key.clone());
        self.operated = OperatedMessage::Idle;
        self.typing.clear();
        self.unseen_message_id = None;
        self.scroll_to_bottom_requested = false;

        self.emit(
            out,
            ClientEvent::JoinRoom {
                room_key: key.clone(),
            },
        )?;
        if fetch_history {
            let ticket = self.log.begin_load(key);
            self.emit(
                out,
                ClientEvent::GetMessages {
                    room_key: ticket.room_key,
                    load_id: ticket.generation,
                },
            )?;
        } else {
            self.log.open_empty(key);
        }
        info!(%room_id, fetch_history, "room opened");
        Ok(())
    }

    fn remove_room_locally(&mut self, room_id: &str) -> Option<Room> {
        let removal = self.registry.remove(room_id)?;
        if removal.was_active {
            self.close_active_room();
        }
        if let Some(user) = self.user.as_mut() {
            user.room_ids.retain(|id| id != room_id);
        }
        Some(removal.room)
    }

    fn close_active_room(&mut self) {
        self.registry.clear_active();
        self.log.clear();
        self.subscriptions.clear_room();
        self.operated = OperatedMessage::Idle;
        self.typing.clear();
        self.unseen_message_id = None;
        self.scroll_to_bottom_requested = false;
    }
}

fn unknown_message(message_id: &str) -> ChatError {
    ChatError::validation(
        "unknown_message",
        format!("message '{message_id}' is not in the active room"),
    )
}

fn not_group_admin() -> ChatError {
    ChatError::new(
        ChatErrorCategory::Validation,
        "not_group_admin",
        "only group administrators can do this",
    )
}

fn parse_status(value: &str) -> Result<UserStatus, ChatError> {
    match value.to_ascii_lowercase().as_str() {
        "online" => Ok(UserStatus::Online),
        "offline" => Ok(UserStatus::Offline),
        _ => Err(ChatError::validation(
            "invalid_status",
            format!("unknown status '{value}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::{Group, PrivateRoom};

    fn alice() -> User {
        User {
            id: "u1".to_owned(),
            name: "Alice".to_owned(),
            avatar: None,
            status: UserStatus::Online,
            bio: None,
            room_ids: vec!["g1".to_owned()],
        }
    }

    fn group(id: &str, name: &str, members: &[&str]) -> Group {
        Group {
            id: id.to_owned(),
            name: name.to_owned(),
            avatar: None,
            creators: vec!["u1".to_owned()],
            members: members.iter().map(|m| (*m).to_owned()).collect(),
            description: None,
            is_public: true,
        }
    }

    fn message(id: &str, author_id: &str) -> Message {
        Message {
            id: id.to_owned(),
            author_id: author_id.to_owned(),
            author_name: author_id.to_owned(),
            avatar: None,
            content: format!("body of {id}"),
            date: "10:00".to_owned(),
            images: None,
            replied_message: None,
            reactions: None,
        }
    }

    fn candidate(opponent_room_id: Option<&str>) -> DirectCandidate {
        DirectCandidate {
            id: "u2".to_owned(),
            name: "Bob".to_owned(),
            avatar: None,
            description: None,
            status: UserStatus::Online,
            opponent_room_id: opponent_room_id.map(str::to_owned),
        }
    }

    fn active_state() -> ChatState {
        let mut state = ChatState::new(100);
        state
            .restore_or_create(None, Some("Alice"))
            .expect("create should be accepted");
        let outcome = state.handle_inbound(InboundEvent::session(ServerEvent::UserCreated {
            user: alice(),
        }));
        assert_eq!(
            outcome.outbound,
            vec![ClientEvent::GetRooms {
                room_ids: vec!["g1".to_owned()]
            }]
        );
        state.handle_inbound(InboundEvent::session(ServerEvent::RoomsGot {
            rooms: vec![Room::Group(group("g1", "Rust", &["u1", "u2"]))],
        }));
        state
    }

    fn entered_group_state() -> ChatState {
        let mut state = active_state();
        let out = state.enter_room_by_id("g1").expect("enter should succeed");
        let load_id = match out.last() {
            Some(ClientEvent::GetMessages { load_id, .. }) => *load_id,
            other => panic!("expected get_messages, got {other:?}"),
        };
        state.handle_inbound(InboundEvent::session(ServerEvent::MessagesGot {
            load_id,
            messages: vec![message("m1", "u2"), message("m2", "u1")],
        }));
        state
    }

    #[test]
    fn cold_start_requires_a_name() {
        let mut state = ChatState::new(10);
        let err = state
            .restore_or_create(None, Some("   "))
            .expect_err("blank name must be rejected");
        assert_eq!(err.code, "user_name_required");
        assert_eq!(state.session_state(), SessionState::Anonymous);
    }

    #[test]
    fn persisted_identity_is_restored_with_get_user() {
        let mut state = ChatState::new(10);
        let out = state
            .restore_or_create(Some(&alice()), None)
            .expect("restore should be accepted");
        assert_eq!(out, vec![ClientEvent::GetUser { id: "u1".into() }]);
        assert_eq!(state.session_state(), SessionState::Restoring);
    }

    #[test]
    fn failed_restore_surfaces_error_and_requests_forgetting() {
        let mut state = ChatState::new(10);
        state
            .restore_or_create(Some(&alice()), None)
            .expect("restore should be accepted");
        let outcome = state.handle_inbound(InboundEvent::session(ServerEvent::FailedGetUser {
            message: "unknown user".into(),
        }));

        assert_eq!(outcome.identity, Some(IdentityChange::Rejected));
        assert_eq!(state.session_state(), SessionState::Failed);
        assert_eq!(state.snapshot().error_text.as_deref(), Some("unknown user"));
        assert!(state.user().is_none());
    }

    #[test]
    fn actions_before_activation_are_rejected() {
        let mut state = ChatState::new(10);
        let err = state
            .create_group("Rust", &[])
            .expect_err("anonymous session cannot create groups");
        assert_eq!(err.category, ChatErrorCategory::Session);
        assert_eq!(err.code, "invalid_session_state");
    }

    #[test]
    fn entering_room_emits_join_then_history_request() {
        let mut state = active_state();
        let out = state.enter_room_by_id("g1").expect("enter should succeed");

        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0],
            ClientEvent::JoinRoom {
                room_key: "g1".into()
            }
        );
        assert!(matches!(&out[1], ClientEvent::GetMessages { room_key, .. } if room_key == "g1"));
        assert!(state.snapshot().messages_loading);
        assert_eq!(state.snapshot().active_room_id.as_deref(), Some("g1"));
    }

    #[test]
    fn entering_unknown_group_joins_optimistically() {
        let mut state = active_state();
        let out = state
            .enter_room(Room::Group(group("g2", "Go", &["u3"])))
            .expect("enter should succeed");

        assert_eq!(
            out[0],
            ClientEvent::UserUpdateRoomIds {
                user_id: "u1".into(),
                room_ids: vec!["g1".into(), "g2".into()],
            }
        );
        assert_eq!(
            out[1],
            ClientEvent::UpdateGroupMembers {
                group_id: "g2".into(),
                member_id: "u1".into(),
            }
        );
        let joined = state
            .registry()
            .get("g2")
            .and_then(Room::as_group)
            .expect("group should be registered");
        assert!(joined.has_member("u1"));
    }

    #[test]
    fn stale_history_response_is_discarded() {
        let mut state = active_state();
        state
            .enter_room(Room::Group(group("g2", "Go", &["u1"])))
            .expect("enter g2");
        let stale_load = state.message_log().generation();
        state.enter_room_by_id("g1").expect("enter g1");

        state.handle_inbound(InboundEvent::session(ServerEvent::MessagesGot {
            load_id: stale_load,
            messages: vec![message("old", "u3")],
        }));

        assert!(state.message_log().items().is_empty());
        assert!(state.message_log().is_loading());
    }

    #[test]
    fn room_events_for_other_channels_are_dropped() {
        let mut state = entered_group_state();
        let outcome = state.handle_inbound(InboundEvent::room(
            "g9",
            ServerEvent::ReceiveMessage {
                message: message("m3", "u2"),
            },
        ));
        assert_eq!(outcome.scope, None);
        assert_eq!(state.message_log().items().len(), 2);
    }

    #[test]
    fn send_message_appends_pending_and_acknowledges() {
        let mut state = entered_group_state();
        let out = state
            .send_message(
                ComposeInput {
                    text: "  hello  ".into(),
                    images: vec![],
                },
                "12:34",
            )
            .expect("send should succeed");

        let message_id = match &out[0] {
            ClientEvent::CreateMessage {
                message_id,
                content,
                date,
                ..
            } => {
                assert_eq!(content, "hello");
                assert_eq!(date, "12:34");
                message_id.clone()
            }
            other => panic!("expected create_message, got {other:?}"),
        };
        let snapshot = state.snapshot();
        let last = snapshot.messages.last().expect("message appended");
        assert!(last.is_pending);
        assert!(last.is_own);
        assert!(snapshot.scroll_to_bottom_requested);

        assert_eq!(
            state.message_log().pending_message_id(),
            Some(message_id.as_str())
        );

        let outcome = state.handle_inbound(InboundEvent::session(ServerEvent::MessageCreated));
        assert_eq!(outcome.scope, Some(EventScope::Session));
        assert_eq!(state.message_log().pending_message_id(), None);
        assert!(!state.snapshot().messages.iter().any(|m| m.is_pending));
    }

    #[test]
    fn empty_send_is_suppressed_unless_editing() {
        let mut state = entered_group_state();
        let out = state
            .send_message(ComposeInput::default(), "12:00")
            .expect("empty send is not an error");
        assert!(out.is_empty());

        state.begin_edit("m2").expect("own message is editable");
        let out = state
            .send_message(ComposeInput::default(), "12:00")
            .expect("edit send should succeed");
        assert!(matches!(
            &out[0],
            ClientEvent::UpdateMessage { message_id, patch, .. }
                if message_id == "m2" && patch.content.as_deref() == Some("")
        ));
        assert!(state.snapshot().operated_message.is_idle());
    }

    #[test]
    fn too_many_images_is_rejected() {
        let mut state = entered_group_state();
        let images = (0..=MAX_MESSAGE_IMAGES)
            .map(|i| SelectedImage {
                id: format!("i{i}"),
                name: format!("{i}.png"),
                src: format!("blob:{i}"),
                data: vec![],
            })
            .collect();
        let err = state
            .send_message(
                ComposeInput {
                    text: String::new(),
                    images,
                },
                "12:00",
            )
            .expect_err("six images must be rejected");
        assert_eq!(err.code, "too_many_images");
    }

    #[test]
    fn reply_carries_reference_to_original() {
        let mut state = entered_group_state();
        state.begin_reply("m1").expect("reply target exists");
        let out = state
            .send_message(
                ComposeInput {
                    text: "sure".into(),
                    images: vec![],
                },
                "12:00",
            )
            .expect("send should succeed");
        assert!(matches!(
            &out[0],
            ClientEvent::CreateMessage { replied_message: Some(reply), .. } if reply.id == "m1"
        ));
    }

    #[test]
    fn editing_foreign_message_is_rejected() {
        let mut state = entered_group_state();
        let err = state.begin_edit("m1").expect_err("m1 belongs to u2");
        assert_eq!(err.code, "not_message_author");
    }

    #[test]
    fn typing_trigger_is_suppressed_while_replying() {
        let mut state = entered_group_state();
        assert_eq!(
            state.compose_input_changed().expect("typing accepted"),
            vec![ClientEvent::TypingTrigger {
                user_name: "Alice".into(),
                room_key: "g1".into(),
            }]
        );

        state.begin_reply("m1").expect("reply target exists");
        assert!(state.compose_input_changed().expect("typing accepted").is_empty());
    }

    #[test]
    fn typing_indicator_expires_only_for_latest_epoch() {
        let mut state = entered_group_state();
        let first = state
            .handle_inbound(InboundEvent::room(
                "g1",
                ServerEvent::TypingReceive {
                    user_name: "Bob".into(),
                },
            ))
            .typing_epoch
            .expect("typing epoch");
        let second = state
            .handle_inbound(InboundEvent::room(
                "g1",
                ServerEvent::TypingReceive {
                    user_name: "Bob".into(),
                },
            ))
            .typing_epoch
            .expect("typing epoch");

        assert!(!state.expire_typing(first));
        assert_eq!(state.snapshot().typing_user_name.as_deref(), Some("Bob"));
        assert!(state.expire_typing(second));
        assert_eq!(state.snapshot().typing_user_name, None);
    }

    #[test]
    fn incoming_message_while_scrolled_up_sets_notice() {
        let mut state = entered_group_state();
        state.set_viewport(ViewportState {
            near_bottom: false,
            overflowing: true,
        });
        state.handle_inbound(InboundEvent::room(
            "g1",
            ServerEvent::ReceiveMessage {
                message: message("m3", "u2"),
            },
        ));
        assert_eq!(state.snapshot().unseen_message_id.as_deref(), Some("m3"));

        state.mark_scrolled_to_bottom();
        assert_eq!(state.snapshot().unseen_message_id, None);
    }

    #[test]
    fn incoming_message_at_bottom_requests_scroll() {
        let mut state = entered_group_state();
        state.handle_inbound(InboundEvent::room(
            "g1",
            ServerEvent::ReceiveMessage {
                message: message("m3", "u2"),
            },
        ));
        let snapshot = state.snapshot();
        assert!(snapshot.scroll_to_bottom_requested);
        assert_eq!(snapshot.unseen_message_id, None);
    }

    #[test]
    fn group_reactions_toggle_and_show_palette() {
        let mut state = entered_group_state();
        let out = state.toggle_reaction("m1", "👍").expect("toggle accepted");
        assert!(matches!(
            &out[0],
            ClientEvent::MessageUpdateReactions { reactions: Some(list), .. } if list.len() == 1
        ));
        let palette = &state.snapshot().messages[0].reactions;
        assert_eq!(palette.len(), 1);
        assert!(palette[0].selected);
        assert!(palette[0].show_count);

        let out = state.toggle_reaction("m1", "👍").expect("toggle accepted");
        assert!(matches!(
            &out[0],
            ClientEvent::MessageUpdateReactions { reactions: Some(list), .. } if list.is_empty()
        ));
    }

    #[test]
    fn double_tap_ignores_own_messages() {
        let mut state = entered_group_state();
        assert!(state.double_tap("m2").expect("double tap accepted").is_empty());

        let out = state.double_tap("m1").expect("double tap accepted");
        assert!(matches!(
            &out[0],
            ClientEvent::MessageUpdateReactions { reactions: Some(list), .. }
                if list[0].reaction == chat_core::HEART_REACTION
        ));
    }

    #[test]
    fn added_reaction_broadcast_is_applied_without_reemitting() {
        let mut state = entered_group_state();
        let reaction = reactions::new_reaction("u2", "m2", "🔥");
        let outcome = state.handle_inbound(InboundEvent::room(
            "g1",
            ServerEvent::SendAddedReaction {
                reaction,
                message: message("m2", "u1"),
                room_type: RoomKind::Group,
                room_id: "g1".into(),
            },
        ));

        assert!(outcome.outbound.is_empty());
        let reactions = state
            .message_log()
            .get("m2")
            .and_then(|m| m.reactions.clone())
            .expect("reaction applied");
        assert_eq!(reactions.len(), 1);
    }

    #[test]
    fn deleting_active_room_clears_log() {
        let mut state = entered_group_state();
        let out = state.delete_room("g1").expect("delete accepted");

        assert!(matches!(&out[0], ClientEvent::DeleteGroup { user_id, .. } if user_id == "u1"));
        let snapshot = state.snapshot();
        assert!(snapshot.rooms.is_empty());
        assert_eq!(snapshot.active_room_id, None);
        assert!(snapshot.messages.is_empty());
    }

    #[test]
    fn group_deleted_broadcast_clears_active_room() {
        let mut state = entered_group_state();
        state.handle_inbound(InboundEvent::session(ServerEvent::GroupDeleted {
            id: "g1".into(),
        }));
        assert_eq!(state.snapshot().active_room_id, None);
        assert!(state.user().is_some_and(|u| u.room_ids.is_empty()));
    }

    #[test]
    fn created_group_opens_for_its_founder() {
        let mut state = active_state();
        state.create_group("Zig", &["u2".into()]).expect("create accepted");

        let outcome = state.handle_inbound(InboundEvent::session(ServerEvent::GroupCreated {
            group: group("g5", "Zig", &["u1", "u2"]),
        }));

        assert_eq!(
            outcome.outbound,
            vec![ClientEvent::JoinRoom {
                room_key: "g5".into()
            }]
        );
        assert_eq!(state.snapshot().active_room_id.as_deref(), Some("g5"));
        assert!(!state.snapshot().messages_loading);
    }

    #[test]
    fn duplicate_group_name_is_rejected() {
        let mut state = active_state();
        let err = state
            .create_group(" rust ", &[])
            .expect_err("name already taken");
        assert_eq!(err.code, "group_name_taken");
    }

    #[test]
    fn direct_message_waits_for_single_opponent_outcome() {
        let mut state = active_state();
        let bob = candidate(None);

        let mut outcome = match state.start_direct_message(&bob).expect("start accepted") {
            DirectMessageStart::AwaitOpponent { outbound, outcome } => {
                assert!(matches!(
                    &outbound[0],
                    ClientEvent::CheckForExistingOpponentRoom { self_id, .. } if self_id == "u1"
                ));
                outcome
            }
            other => panic!("expected opponent check, got {other:?}"),
        };

        state.handle_inbound(InboundEvent::session(ServerEvent::OpponentRoomNotExist));
        state.handle_inbound(InboundEvent::session(ServerEvent::OpponentRoomNotExist));
        assert_eq!(outcome.try_recv(), Ok(OpponentCheckOutcome::NotExist));

        let out = state
            .finish_direct_message(&bob, OpponentCheckOutcome::NotExist)
            .expect("finish accepted");
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], ClientEvent::JoinRoom { .. }));

        let snapshot = state.snapshot();
        let active = snapshot.active_room_id.expect("private room active");
        let room = state.registry().get(&active).expect("room registered");
        assert_eq!(room.kind(), RoomKind::PrivateRoom);
        assert_eq!(room.creators(), ["u1".to_owned(), "u2".to_owned()]);
    }

    #[test]
    fn second_opponent_check_is_rejected_while_pending() {
        let mut state = active_state();
        let _first = state.start_direct_message(&candidate(None)).expect("first accepted");
        let err = state
            .start_direct_message(&candidate(None))
            .expect_err("second check must wait");
        assert_eq!(err.code, "opponent_check_in_flight");

        state.cancel_opponent_check();
        assert!(state.start_direct_message(&candidate(None)).is_ok());
    }

    #[test]
    fn candidate_with_opponent_room_creates_local_room() {
        let mut state = active_state();
        match state
            .start_direct_message(&candidate(Some("r-bob")))
            .expect("start accepted")
        {
            DirectMessageStart::Entered(out) => {
                assert!(matches!(&out[0], ClientEvent::JoinRoom { .. }));
            }
            other => panic!("expected direct entry, got {other:?}"),
        }
    }

    #[test]
    fn private_room_confirmation_supersedes_local_room() {
        let mut state = active_state();
        state
            .start_direct_message(&candidate(Some("r-bob")))
            .expect("start accepted");
        let local_id = state.snapshot().active_room_id.expect("local room active");
        let common_id = state
            .registry()
            .get(&local_id)
            .map(|room| room.key().to_owned())
            .expect("local room key");

        state.handle_inbound(InboundEvent::session(ServerEvent::PrivateRoomCreated {
            room: PrivateRoom {
                id: "server-room".into(),
                name: "Bob".into(),
                avatar: None,
                creators: vec!["u1".into(), "u2".into()],
                common_id,
                opponent_room_id: Some("r-bob".into()),
                description: None,
                status: UserStatus::Online,
            },
        }));

        assert_eq!(
            state.snapshot().active_room_id.as_deref(),
            Some("server-room")
        );
        assert!(!state.registry().contains(&local_id));
    }

    #[test]
    fn only_admins_update_credentials_and_only_changes_are_sent() {
        let mut state = active_state();
        let unchanged = state
            .update_group_credentials(GroupCredentialsPatch {
                id: "g1".into(),
                name: Some("Rust".into()),
                ..Default::default()
            })
            .expect("no-op accepted");
        assert!(unchanged.is_empty());

        let out = state
            .update_group_credentials(GroupCredentialsPatch {
                id: "g1".into(),
                name: Some("Rustaceans".into()),
                is_public: Some(true),
                ..Default::default()
            })
            .expect("rename accepted");
        assert!(matches!(
            &out[0],
            ClientEvent::UpdateGroupCredentials { patch, .. }
                if patch.name.as_deref() == Some("Rustaceans") && patch.is_public.is_none()
        ));
        assert_eq!(state.registry().get("g1").map(Room::name), Some("Rust"));
    }

    #[test]
    fn non_admin_cannot_remove_others() {
        let mut state = active_state();
        state.handle_inbound(InboundEvent::session(ServerEvent::RoomsGot {
            rooms: vec![Room::Group(Group {
                creators: vec!["u9".into()],
                ..group("g1", "Rust", &["u1", "u2"])
            })],
        }));

        let err = state
            .remove_member("g1", "u2")
            .expect_err("non-admin removal");
        assert_eq!(err.code, "not_group_admin");
        assert!(state.remove_member("g1", "u1").is_ok());
    }

    #[test]
    fn profile_updates_apply_locally() {
        let mut state = active_state();
        state
            .update_profile_field(ProfileField::Bio, "  hello there ")
            .expect("bio accepted");
        state
            .update_profile_field(ProfileField::Status, "offline")
            .expect("status accepted");

        let user = state.user().expect("user present");
        assert_eq!(user.bio.as_deref(), Some("hello there"));
        assert_eq!(user.status, UserStatus::Offline);
        assert!(state.update_profile_field(ProfileField::Name, " ").is_err());
    }

    #[test]
    fn logout_clears_everything() {
        let mut state = entered_group_state();
        let out = state.logout().expect("logout accepted");
        assert_eq!(out, vec![ClientEvent::UserDisconnect { user_id: "u1".into() }]);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.session, SessionState::LoggedOut);
        assert!(snapshot.user.is_none());
        assert!(snapshot.rooms.is_empty());
        assert!(snapshot.messages.is_empty());

        let outcome = state.handle_inbound(InboundEvent::session(ServerEvent::GroupDeleted {
            id: "g1".into(),
        }));
        assert_eq!(outcome.scope, None);
    }

    #[test]
    fn failed_member_update_is_logged_without_rollback() {
        let mut state = active_state();
        state
            .enter_room(Room::Group(group("g2", "Go", &["u3"])))
            .expect("enter should succeed");

        let outcome =
            state.handle_inbound(InboundEvent::session(ServerEvent::FailedUpdateMembers {
                message: "group is closed".into(),
            }));

        assert_eq!(outcome.scope, Some(EventScope::Session));
        assert!(outcome.outbound.is_empty());
        let joined = state
            .registry()
            .get("g2")
            .and_then(Room::as_group)
            .expect("group stays registered");
        assert!(joined.has_member("u1"));
        assert_eq!(state.snapshot().active_room_id.as_deref(), Some("g2"));
    }

    #[test]
    fn edit_broadcast_merges_like_a_local_edit() {
        let mut state = entered_group_state();
        state.begin_edit("m2").expect("own message is editable");
        state
            .send_message(
                ComposeInput {
                    text: "fixed typo".into(),
                    ..Default::default()
                },
                "12:00",
            )
            .expect("edit accepted");

        state.handle_inbound(InboundEvent::room(
            "g1",
            ServerEvent::ReceiveUpdatedMessage {
                message_id: "m1".into(),
                patch: MessagePatch {
                    content: Some("remote fix".into()),
                    images: None,
                },
            },
        ));

        let local = state.message_log().get("m2").expect("m2 kept");
        assert_eq!(local.content, "fixed typo");
        assert_eq!(local.date, "10:00");
        assert_eq!(local.images, None);

        let remote = state.message_log().get("m1").expect("m1 kept");
        assert_eq!(remote.content, "remote fix");
        assert_eq!(remote.author_id, "u2");
        assert_eq!(remote.date, "10:00");
        assert_eq!(state.message_log().items().len(), 2);
    }

    #[test]
    fn reaction_broadcast_replaces_reaction_array() {
        let mut state = entered_group_state();
        let heart = Reaction {
            id: "r1".into(),
            author_id: "u2".into(),
            reaction: "❤️".into(),
            message_id: "m2".into(),
        };

        state.handle_inbound(InboundEvent::room(
            "g1",
            ServerEvent::MessageUpdatedReactions {
                message_id: "m2".into(),
                reactions: Some(vec![heart.clone()]),
            },
        ));
        let reactions = state
            .message_log()
            .get("m2")
            .and_then(|m| m.reactions.clone());
        assert_eq!(reactions, Some(vec![heart]));

        state.handle_inbound(InboundEvent::room(
            "g1",
            ServerEvent::MessageUpdatedReactions {
                message_id: "m2".into(),
                reactions: None,
            },
        ));
        let cleared = state.message_log().get("m2").expect("m2 kept");
        assert_eq!(cleared.reactions, None);
    }

    #[test]
    fn join_echo_after_optimistic_join_is_idempotent() {
        let mut state = active_state();
        state
            .enter_room(Room::Group(group("g2", "Go", &["u3"])))
            .expect("enter should succeed");
        let after_join = state.snapshot().rooms_revision;

        let outcome = state.handle_inbound(InboundEvent::room(
            "g2",
            ServerEvent::SendUpdatedGroupMembers {
                group_id: "g2".into(),
                member_id: "u1".into(),
            },
        ));
        assert_eq!(outcome.scope, Some(EventScope::Room));

        let members = |state: &ChatState| {
            state
                .registry()
                .get("g2")
                .and_then(Room::as_group)
                .map(|group| group.members.clone())
                .expect("group registered")
        };
        assert_eq!(members(&state), vec!["u3".to_owned(), "u1".to_owned()]);
        assert!(state.snapshot().rooms_revision > after_join);

        state.handle_inbound(InboundEvent::room(
            "g2",
            ServerEvent::MemberRemoved {
                group_id: "g2".into(),
                member_id: "u3".into(),
            },
        ));
        state.handle_inbound(InboundEvent::room(
            "g2",
            ServerEvent::MemberRemoved {
                group_id: "g2".into(),
                member_id: "u3".into(),
            },
        ));
        assert_eq!(members(&state), vec!["u1".to_owned()]);
    }

    #[test]
    fn credentials_broadcast_overwrites_only_provided_fields() {
        let mut state = active_state();
        state.handle_inbound(InboundEvent::session(ServerEvent::GroupCredentialsUpdated {
            patch: GroupCredentialsPatch {
                id: "g1".into(),
                name: Some("Rustaceans".into()),
                ..Default::default()
            },
        }));

        let updated = state
            .registry()
            .get("g1")
            .and_then(Room::as_group)
            .expect("group registered");
        assert_eq!(updated.name, "Rustaceans");
        assert_eq!(updated.description, None);
        assert!(updated.is_public);
        assert_eq!(updated.members, vec!["u1".to_owned(), "u2".to_owned()]);
    }

    #[test]
    fn existing_opponent_room_is_adopted_with_history() {
        let mut state = active_state();
        let bob = candidate(None);
        let mut outcome = match state.start_direct_message(&bob).expect("start accepted") {
            DirectMessageStart::AwaitOpponent { outcome, .. } => outcome,
            other => panic!("expected opponent check, got {other:?}"),
        };

        let canonical = PrivateRoom {
            id: "srv-dm".into(),
            name: "Bob".into(),
            avatar: None,
            creators: vec!["u2".into(), "u1".into()],
            common_id: "dm-common".into(),
            opponent_room_id: None,
            description: None,
            status: UserStatus::Online,
        };
        state.handle_inbound(InboundEvent::session(ServerEvent::SendPrivateRoom {
            room: canonical.clone(),
        }));
        let resolved = outcome.try_recv().expect("outcome delivered");
        assert_eq!(resolved, OpponentCheckOutcome::Existing(canonical));

        let out = state
            .finish_direct_message(&bob, resolved)
            .expect("finish accepted");
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0],
            ClientEvent::JoinRoom {
                room_key: "dm-common".into()
            }
        );
        assert!(matches!(
            &out[1],
            ClientEvent::GetMessages { room_key, .. } if room_key == "dm-common"
        ));
        assert_eq!(state.snapshot().active_room_id.as_deref(), Some("srv-dm"));
        assert!(state.message_log().is_loading());
    }
}
