//! Dispatch bridge that wires realtime channel traffic into UI state snapshots.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chat_core::{
    ChatError, ChatErrorCategory, ClientEvent, DirectCandidate, GroupCredentialsPatch,
    InboundEvent, InboundStream, ProfileField, RealtimeChannels, SelectedImage, ServerEvent,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::ChatConfig,
    identity_store::IdentityStore,
    state::{
        ChatSnapshot, ChatState, ComposeInput, DirectMessageStart, IdentityChange, ViewportState,
    },
};

/// Callback used to publish new UI snapshots.
///
/// Runs while the state lock is held, so it must not call back into the bridge.
pub type UiUpdateCallback = Arc<dyn Fn(ChatSnapshot) + Send + Sync + 'static>;

/// Restartable debounce that clears the typing indicator after inactivity.
#[derive(Clone)]
struct TypingTimer {
    current: Arc<Mutex<Option<CancellationToken>>>,
    debounce: Duration,
}

impl TypingTimer {
    fn new(debounce: Duration) -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
            debounce,
        }
    }

    fn restart(&self, epoch: u64, state: Arc<Mutex<ChatState>>, ui_update: UiUpdateCallback) {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .current
            .lock()
            .expect("typing timer lock poisoned while restarting")
            .replace(token.clone())
        {
            previous.cancel();
        }

        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    trace!(epoch, "typing timer superseded");
                }
                _ = tokio::time::sleep(debounce) => {
                    let mut state = state
                        .lock()
                        .expect("chat state lock poisoned while expiring typing indicator");
                    if !state.expire_typing(epoch) {
                        return;
                    }
                    debug!(epoch, "typing indicator expired");
                    (ui_update)(state.snapshot());
                }
            }
        });
    }

    fn cancel(&self) {
        if let Some(token) = self
            .current
            .lock()
            .expect("typing timer lock poisoned while cancelling")
            .take()
        {
            token.cancel();
        }
    }
}

/// Event worker context: everything needed to apply one inbound event.
struct EventWorker {
    state: Arc<Mutex<ChatState>>,
    ui_update: UiUpdateCallback,
    outbound_tx: mpsc::UnboundedSender<ClientEvent>,
    identity_store: Arc<dyn IdentityStore>,
    typing_timer: TypingTimer,
}

impl EventWorker {
    async fn run(self, mut events: InboundStream) {
        debug!("chat event worker started");
        while let Ok(inbound) = recv_event(&mut events).await {
            self.handle(inbound);
        }
        warn!("chat event worker exiting: inbound event stream closed");
    }

    fn handle(&self, inbound: InboundEvent) {
        let kind = server_event_kind(&inbound.event);
        debug!(
            event = kind,
            channel = inbound.channel.as_deref().unwrap_or(""),
            "received server event"
        );

        let mut state = self
            .state
            .lock()
            .expect("chat state lock poisoned while handling server event");
        let outcome = state.handle_inbound(inbound);
        if outcome.scope.is_none() {
            trace!(event = kind, "server event had no live handler");
            return;
        }

        match outcome.identity {
            Some(IdentityChange::Resolved(user)) => {
                if let Err(err) = self.identity_store.save(&user) {
                    warn!(error = %err, "failed persisting resolved identity");
                }
            }
            Some(IdentityChange::Rejected) => {
                if let Err(err) = self.identity_store.clear() {
                    warn!(error = %err, "failed clearing rejected identity");
                }
            }
            None => {}
        }

        if let Some(epoch) = outcome.typing_epoch {
            self.typing_timer.restart(
                epoch,
                Arc::clone(&self.state),
                Arc::clone(&self.ui_update),
            );
        }

        (self.ui_update)(state.snapshot());
        drop(state);

        for event in outcome.outbound {
            debug!(event = client_event_kind(&event), "enqueue follow-up event");
            if self.outbound_tx.send(event).is_err() {
                error!("failed to enqueue follow-up event: outbound worker stopped");
                break;
            }
        }
    }
}

/// Bridges UI actions and server events over one realtime connection.
pub struct ChatBridge {
    outbound_tx: mpsc::UnboundedSender<ClientEvent>,
    state: Arc<Mutex<ChatState>>,
    ui_update: UiUpdateCallback,
    identity_store: Arc<dyn IdentityStore>,
    typing_timer: TypingTimer,
    opponent_check_timeout: Duration,
    outbound_task: tokio::task::JoinHandle<()>,
    event_task: tokio::task::JoinHandle<()>,
}

impl ChatBridge {
    /// Start outbound/event workers and request the startup identity.
    pub fn spawn(
        config: ChatConfig,
        channels: RealtimeChannels,
        identity_store: Arc<dyn IdentityStore>,
        runtime_handle: tokio::runtime::Handle,
        ui_update: UiUpdateCallback,
    ) -> Arc<Self> {
        info!(
            message_log_max_items = config.message_log_max_items,
            typing_debounce_ms = config.typing_debounce_ms,
            "spawning chat bridge"
        );

        let persisted = match identity_store.load() {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "failed loading persisted identity; starting cold");
                None
            }
        };

        let state = Arc::new(Mutex::new(ChatState::new(config.message_log_max_items)));
        let typing_timer = TypingTimer::new(config.typing_debounce());

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let channels_for_outbound = channels.clone();
        let outbound_task = runtime_handle.spawn(async move {
            debug!("chat outbound worker started");
            while let Some(event) = outbound_rx.recv().await {
                trace!(event = client_event_kind(&event), "sending client event");
                if let Err(err) = channels_for_outbound.send(event).await {
                    error!(error = %err, "realtime outbound channel closed");
                    break;
                }
            }
            debug!("chat outbound worker exiting");
        });

        let worker = EventWorker {
            state: Arc::clone(&state),
            ui_update: Arc::clone(&ui_update),
            outbound_tx: outbound_tx.clone(),
            identity_store: Arc::clone(&identity_store),
            typing_timer: typing_timer.clone(),
        };
        let event_task = runtime_handle.spawn(worker.run(channels.subscribe()));

        let bridge = Arc::new(Self {
            outbound_tx,
            state,
            ui_update,
            identity_store,
            typing_timer,
            opponent_check_timeout: config.opponent_check_timeout(),
            outbound_task,
            event_task,
        });

        if persisted.is_some() || config.user_name.is_some() {
            bridge.apply("restore_or_create", |state| {
                state.restore_or_create(persisted.as_ref(), config.user_name.as_deref())
            });
        } else {
            bridge.publish_snapshot();
        }

        bridge
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.state
            .lock()
            .expect("chat state lock poisoned while reading snapshot")
            .snapshot()
    }

    /// Request a new identity from the name form.
    pub fn create_user(&self, name: String) -> bool {
        self.apply("create_user", |state| state.restore_or_create(None, Some(&name)))
    }

    pub fn enter_room(&self, room_id: &str) -> bool {
        self.apply("enter_room", |state| state.enter_room_by_id(room_id))
    }

    /// Enter a room found through search, registering it when unknown.
    pub fn enter_discovered_room(&self, room: chat_core::Room) -> bool {
        self.apply("enter_room", |state| state.enter_room(room))
    }

    pub fn create_group(&self, name: String, member_ids: Vec<String>) -> bool {
        self.apply("create_group", |state| state.create_group(&name, &member_ids))
    }

    /// Open (or create) the private room with `candidate`.
    ///
    /// When no local room matches and the candidate lacks an opponent room, this
    /// waits for the server's single check outcome, bounded by the configured timeout.
    pub async fn open_direct_message(&self, candidate: DirectCandidate) -> Result<(), ChatError> {
        let start = {
            let mut state = self
                .state
                .lock()
                .expect("chat state lock poisoned while opening direct message");
            state.start_direct_message(&candidate)
        };

        let receiver = match start {
            Ok(DirectMessageStart::Entered(events)) => {
                self.finish_action(Ok(events), "open_direct_message");
                return Ok(());
            }
            Ok(DirectMessageStart::AwaitOpponent { outbound, outcome }) => {
                self.finish_action(Ok(outbound), "open_direct_message");
                outcome
            }
            Err(err) => {
                self.finish_action(Err(err.clone()), "open_direct_message");
                return Err(err);
            }
        };

        let outcome = match tokio::time::timeout(self.opponent_check_timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                let err = ChatError::new(
                    ChatErrorCategory::Internal,
                    "opponent_check_dropped",
                    "direct message lookup was abandoned",
                );
                self.abandon_opponent_check(err.clone());
                return Err(err);
            }
            Err(_) => {
                let err = ChatError::new(
                    ChatErrorCategory::Fetch,
                    "opponent_check_timeout",
                    format!("no answer about a room with {}", candidate.name),
                );
                self.abandon_opponent_check(err.clone());
                return Err(err);
            }
        };

        debug!(candidate_id = %candidate.id, ?outcome, "opponent check resolved");
        let result = {
            let mut state = self
                .state
                .lock()
                .expect("chat state lock poisoned while finishing direct message");
            state.finish_direct_message(&candidate, outcome)
        };
        let failure = result.as_ref().err().cloned();
        self.finish_action(result, "open_direct_message");
        failure.map_or(Ok(()), Err)
    }

    pub fn delete_room(&self, room_id: &str) -> bool {
        self.apply("delete_room", |state| state.delete_room(room_id))
    }

    /// Send the compose input, stamped with the local `HH:MM` time.
    pub fn send_message(&self, input: ComposeInput) -> bool {
        let date = chrono::Local::now().format("%H:%M").to_string();
        self.apply("send_message", |state| state.send_message(input, date))
    }

    pub fn delete_message(&self, message_id: &str) -> bool {
        self.apply("delete_message", |state| state.delete_message(message_id))
    }

    pub fn begin_edit(&self, message_id: &str) -> bool {
        self.apply("begin_edit", |state| {
            state.begin_edit(message_id).map(|()| Vec::new())
        })
    }

    pub fn begin_reply(&self, message_id: &str) -> bool {
        self.apply("begin_reply", |state| {
            state.begin_reply(message_id).map(|()| Vec::new())
        })
    }

    pub fn cancel_operation(&self) {
        self.apply("cancel_operation", |state| {
            state.cancel_operation();
            Ok(Vec::new())
        });
    }

    pub fn compose_input_changed(&self) {
        self.apply("typing_trigger", ChatState::compose_input_changed);
    }

    pub fn toggle_reaction(&self, message_id: &str, glyph: &str) -> bool {
        self.apply("toggle_reaction", |state| state.toggle_reaction(message_id, glyph))
    }

    pub fn double_tap(&self, message_id: &str) -> bool {
        self.apply("double_tap", |state| state.double_tap(message_id))
    }

    pub fn add_members(&self, group_id: &str, member_ids: Vec<String>) -> bool {
        self.apply("add_members", |state| state.add_members(group_id, &member_ids))
    }

    pub fn remove_member(&self, group_id: &str, member_id: &str) -> bool {
        self.apply("remove_member", |state| state.remove_member(group_id, member_id))
    }

    pub fn update_group_credentials(&self, patch: GroupCredentialsPatch) -> bool {
        self.apply("update_group_credentials", |state| {
            state.update_group_credentials(patch)
        })
    }

    pub fn update_profile_field(&self, field: ProfileField, value: String) -> bool {
        self.apply("update_profile_field", |state| {
            state.update_profile_field(field, &value)
        })
    }

    pub fn update_avatar(&self, image: SelectedImage) -> bool {
        self.apply("update_avatar", |state| state.update_avatar(image))
    }

    /// Disconnect, clear local state and forget the persisted identity.
    pub fn logout(&self) -> bool {
        let accepted = self.apply("logout", ChatState::logout);
        if accepted {
            self.typing_timer.cancel();
            if let Err(err) = self.identity_store.clear() {
                warn!(error = %err, "failed clearing persisted identity on logout");
            }
        }
        accepted
    }

    pub fn set_viewport(&self, viewport: ViewportState) {
        self.apply("set_viewport", |state| {
            state.set_viewport(viewport);
            Ok(Vec::new())
        });
    }

    pub fn mark_scrolled_to_bottom(&self) {
        self.apply("mark_scrolled_to_bottom", |state| {
            state.mark_scrolled_to_bottom();
            Ok(Vec::new())
        });
    }

    fn apply<F>(&self, action: &'static str, op: F) -> bool
    where
        F: FnOnce(&mut ChatState) -> Result<Vec<ClientEvent>, ChatError>,
    {
        let result = {
            let mut state = self
                .state
                .lock()
                .expect("chat state lock poisoned while applying user action");
            op(&mut state)
        };
        self.finish_action(result, action)
    }

    /// Surface the action result on the snapshot and flush emitted events.
    fn finish_action(&self, result: Result<Vec<ClientEvent>, ChatError>, action: &str) -> bool {
        {
            let mut state = self
                .state
                .lock()
                .expect("chat state lock poisoned while finishing user action");
            match &result {
                Ok(_) => state.clear_error(),
                Err(err) => {
                    warn!(action, code = %err.code, error = %err, "user action rejected");
                    state.set_error_text(err.message.clone());
                }
            }
            (self.ui_update)(state.snapshot());
        }

        match result {
            Ok(events) => {
                for event in events {
                    self.enqueue_event(event);
                }
                true
            }
            Err(_) => false,
        }
    }

    fn abandon_opponent_check(&self, err: ChatError) {
        self.state
            .lock()
            .expect("chat state lock poisoned while abandoning opponent check")
            .cancel_opponent_check();
        self.finish_action(Err(err), "open_direct_message");
    }

    fn enqueue_event(&self, event: ClientEvent) {
        trace!(event = client_event_kind(&event), "enqueue_event");
        if self.outbound_tx.send(event).is_err() {
            let mut state = self
                .state
                .lock()
                .expect("chat state lock poisoned while enqueueing event");
            state.set_error_text("Realtime connection closed.");
            let snapshot = state.snapshot();
            (self.ui_update)(snapshot);
            error!("chat outbound channel closed");
        }
    }

    fn publish_snapshot(&self) {
        let state = self
            .state
            .lock()
            .expect("chat state lock poisoned while publishing snapshot");
        let snapshot = state.snapshot();
        trace!(
            rooms = snapshot.rooms.len(),
            messages = snapshot.messages.len(),
            active = snapshot.active_room_id.as_deref().unwrap_or(""),
            "publishing initial snapshot"
        );
        (self.ui_update)(snapshot);
    }
}

impl Drop for ChatBridge {
    fn drop(&mut self) {
        info!("shutting down chat bridge tasks");
        self.typing_timer.cancel();
        self.outbound_task.abort();
        self.event_task.abort();
    }
}

async fn recv_event(events: &mut InboundStream) -> Result<InboundEvent, ()> {
    loop {
        match events.recv().await {
            Ok(event) => return Ok(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "chat event worker lagged; skipping events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return Err(()),
        }
    }
}

/// Wire name of an outbound event, for logs.
pub fn client_event_kind(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::CreateUser { .. } => "create_user",
        ClientEvent::GetUser { .. } => "get_user",
        ClientEvent::GetRooms { .. } => "get_rooms",
        ClientEvent::JoinRoom { .. } => "join_room",
        ClientEvent::CreateGroup { .. } => "create_group",
        ClientEvent::CheckForExistingOpponentRoom { .. } => "check_for_existing_opponent_room",
        ClientEvent::GetMessages { .. } => "get_messages",
        ClientEvent::CreateMessage { .. } => "create_message",
        ClientEvent::UpdateMessage { .. } => "update_message",
        ClientEvent::DeleteMessage { .. } => "delete_message",
        ClientEvent::MessageUpdateReactions { .. } => "message_update_reactions",
        ClientEvent::TypingTrigger { .. } => "typing_trigger",
        ClientEvent::UpdateGroupMembers { .. } => "update_group_members",
        ClientEvent::RemoveMember { .. } => "remove_member",
        ClientEvent::AddMembers { .. } => "add_members",
        ClientEvent::UpdateGroupCredentials { .. } => "update_group_credentials",
        ClientEvent::DeleteGroup { .. } => "delete_group",
        ClientEvent::DeletePrivateRoom { .. } => "delete_private-room",
        ClientEvent::UserDisconnect { .. } => "user_disconnect",
        ClientEvent::UserUpdateField { .. } => "user_update_field",
        ClientEvent::UserUpdateAvatar { .. } => "user_update_avatar",
        ClientEvent::UserUpdateRoomIds { .. } => "user_update_roomIds",
    }
}

/// Wire name of an inbound event, for logs.
pub fn server_event_kind(event: &ServerEvent) -> &'static str {
    match event {
        ServerEvent::UserCreated { .. } => "user_created",
        ServerEvent::UserExists { .. } => "user_exists",
        ServerEvent::UserCreationFailed { .. } => "user_creation_failed",
        ServerEvent::UserGot { .. } => "user_got",
        ServerEvent::FailedGetUser { .. } => "failed_get_user",
        ServerEvent::RoomsGot { .. } => "rooms_got",
        ServerEvent::GroupCreated { .. } => "group_created",
        ServerEvent::SendGroup { .. } => "send_group",
        ServerEvent::GroupCreationFailed { .. } => "group_creation_failed",
        ServerEvent::OpponentRoomNotExist => "opponent_room_not_exist",
        ServerEvent::SendPrivateRoom { .. } => "send_private-room",
        ServerEvent::SendPrivateRoomToOpponent { .. } => "send_private-room_to_opponent",
        ServerEvent::PrivateRoomCreated { .. } => "private-room_created",
        ServerEvent::MessagesGot { .. } => "messages_got",
        ServerEvent::FailedGetMessages { .. } => "failed_get_messages",
        ServerEvent::ReceiveMessage { .. } => "receive_message",
        ServerEvent::MessageCreated => "message_created",
        ServerEvent::ReceiveUpdatedMessage { .. } => "receive_updated_message",
        ServerEvent::ReceiveDeletedMessageId { .. } => "receive_deleted_message-id",
        ServerEvent::MessageUpdatedReactions { .. } => "message_updated_reactions",
        ServerEvent::SendAddedReaction { .. } => "send_added_reaction",
        ServerEvent::TypingReceive { .. } => "typing_receive",
        ServerEvent::SendUpdatedGroupMembers { .. } => "send_updated_group_members",
        ServerEvent::MemberRemoved { .. } => "member_removed",
        ServerEvent::FailedUpdateMembers { .. } => "failed_update_members",
        ServerEvent::GroupCredentialsUpdated { .. } => "group_credentials_updated",
        ServerEvent::GroupDeleted { .. } => "group_deleted",
        ServerEvent::FailedDeleteGroup { .. } => "failed_delete_group",
        ServerEvent::FailedDeletePrivateRoom { .. } => "failed_delete_private-room",
    }
}
