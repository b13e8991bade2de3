//! Client side of the realtime chat: reducer state, dispatch bridge and the
//! ambient runtime pieces (configuration, logging, identity persistence).

pub mod bridge;
pub mod config;
pub mod identity_store;
pub mod logging;
pub mod state;

pub use bridge::{ChatBridge, UiUpdateCallback, client_event_kind, server_event_kind};
pub use config::{ChatConfig, ConfigError};
pub use identity_store::{
    FileIdentityStore, IdentityStore, IdentityStoreError, InMemoryIdentityStore,
};
pub use state::{
    ChatSnapshot, ChatState, ComposeInput, DirectMessageStart, IdentityChange, InboundOutcome,
    MessageView, RoomView, ViewportState,
};
