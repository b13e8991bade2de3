use std::{sync::Arc, time::Duration};

use chat_client::{
    ChatBridge, ChatConfig, ChatSnapshot, ComposeInput, FileIdentityStore, UiUpdateCallback,
    logging,
};
use chat_core::{
    ClientEvent, Group, InboundEvent, Message, RealtimeChannels, Room, ServerEvent,
    SessionState, User, UserStatus,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

const SMOKE_USER_NAME: &str = "smoke-user";
const LOBBY_ID: &str = "lobby";
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    logging::init();

    let config = match ChatConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    let (channels, outbound_rx) = RealtimeChannels::new(config.command_buffer, config.event_buffer);
    tokio::spawn(scripted_peer(channels.clone(), outbound_rx));

    let (snapshot_tx, mut snapshots) = mpsc::unbounded_channel::<ChatSnapshot>();
    let ui_update: UiUpdateCallback = Arc::new(move |snapshot| {
        debug!(
            session = ?snapshot.session,
            rooms = snapshot.rooms.len(),
            messages = snapshot.messages.len(),
            "snapshot published"
        );
        let _ = snapshot_tx.send(snapshot);
    });

    let identity_store = Arc::new(FileIdentityStore::new(config.identity_path.clone()));
    let bridge = ChatBridge::spawn(
        config,
        channels,
        identity_store,
        tokio::runtime::Handle::current(),
        ui_update,
    );

    if bridge.snapshot().session == SessionState::Anonymous {
        bridge.create_user(SMOKE_USER_NAME.to_owned());
    }
    if !wait_for(&mut snapshots, |s| s.session == SessionState::Active && !s.rooms.is_empty()).await
    {
        eprintln!("Session did not become active: {:?}", bridge.snapshot().error_text);
        std::process::exit(1);
    }

    bridge.enter_room(LOBBY_ID);
    wait_for(&mut snapshots, |s| !s.messages_loading && !s.messages.is_empty()).await;

    bridge.send_message(ComposeInput {
        text: "hello from the smoke harness".to_owned(),
        images: vec![],
    });
    wait_for(&mut snapshots, |s| {
        s.messages.last().is_some_and(|m| m.is_own && !m.is_pending)
    })
    .await;

    let snapshot = bridge.snapshot();
    println!(
        "Chat core smoke finished: user={} rooms={} messages={}",
        snapshot.user.map(|u| u.name).unwrap_or_default(),
        snapshot.rooms.len(),
        snapshot.messages.len()
    );
    for message in snapshot.messages {
        println!("  [{}] {}: {}", message.date, message.author_name, message.content);
    }
}

async fn wait_for<P>(snapshots: &mut mpsc::UnboundedReceiver<ChatSnapshot>, predicate: P) -> bool
where
    P: Fn(&ChatSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, snapshots.recv()).await {
            Ok(Some(snapshot)) if predicate(&snapshot) => return true,
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return false,
        }
    }
}

/// Answers the handshake and room traffic the way a server would, for local runs only.
async fn scripted_peer(channels: RealtimeChannels, mut outbound: mpsc::Receiver<ClientEvent>) {
    while let Some(event) = outbound.recv().await {
        info!(event = chat_client::client_event_kind(&event), "peer received");
        match event {
            ClientEvent::CreateUser { name } => {
                channels.deliver(InboundEvent::session(ServerEvent::UserCreated {
                    user: smoke_user(SMOKE_USER_NAME, &name),
                }));
            }
            ClientEvent::GetUser { id } => {
                channels.deliver(InboundEvent::session(ServerEvent::UserGot {
                    user: smoke_user(&id, SMOKE_USER_NAME),
                }));
            }
            ClientEvent::GetRooms { .. } => {
                channels.deliver(InboundEvent::session(ServerEvent::RoomsGot {
                    rooms: vec![Room::Group(Group {
                        id: LOBBY_ID.to_owned(),
                        name: "Lobby".to_owned(),
                        avatar: None,
                        creators: vec!["peer".to_owned()],
                        members: vec!["peer".to_owned()],
                        description: Some("Scripted smoke room".to_owned()),
                        is_public: true,
                    })],
                }));
            }
            ClientEvent::GetMessages { room_key, load_id } => {
                channels.deliver(InboundEvent::session(ServerEvent::MessagesGot {
                    load_id,
                    messages: vec![Message {
                        id: format!("{room_key}-welcome"),
                        author_id: "peer".to_owned(),
                        author_name: "Peer".to_owned(),
                        avatar: None,
                        content: "welcome to the lobby".to_owned(),
                        date: "00:00".to_owned(),
                        images: None,
                        replied_message: None,
                        reactions: None,
                    }],
                }));
            }
            ClientEvent::CreateMessage { .. } => {
                channels.deliver(InboundEvent::session(ServerEvent::MessageCreated));
            }
            _ => {}
        }
    }
}

fn smoke_user(id: &str, name: &str) -> User {
    User {
        id: id.to_owned(),
        name: name.to_owned(),
        avatar: None,
        status: UserStatus::Online,
        bio: None,
        room_ids: vec![LOBBY_ID.to_owned()],
    }
}
