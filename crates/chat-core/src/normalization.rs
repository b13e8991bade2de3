use crate::{
    error::{ChatError, ChatErrorCategory},
    types::ServerEvent,
};

/// Convert a negative acknowledgement into a stable `ChatError`.
///
/// Returns `None` for every event that is not a rejection.
pub fn normalize_negative_ack(event: &ServerEvent) -> Option<ChatError> {
    let (category, code, message) = match event {
        ServerEvent::UserCreationFailed { message } => (
            ChatErrorCategory::Rejected,
            "user_creation_failed",
            message.clone(),
        ),
        ServerEvent::FailedGetUser { message } => {
            (ChatErrorCategory::Fetch, "failed_get_user", message.clone())
        }
        ServerEvent::GroupCreationFailed { message } => (
            ChatErrorCategory::Rejected,
            "group_creation_failed",
            message.clone(),
        ),
        ServerEvent::FailedGetMessages { load_id } => (
            ChatErrorCategory::Fetch,
            "failed_get_messages",
            format!("message history request {load_id} failed"),
        ),
        ServerEvent::FailedUpdateMembers { message } => (
            ChatErrorCategory::Rejected,
            "failed_update_members",
            message.clone(),
        ),
        ServerEvent::FailedDeleteGroup { message } => (
            ChatErrorCategory::Rejected,
            "failed_delete_group",
            message.clone(),
        ),
        ServerEvent::FailedDeletePrivateRoom { message } => (
            ChatErrorCategory::Rejected,
            "failed_delete_private_room",
            message.clone(),
        ),
        _ => return None,
    };

    Some(ChatError::new(category, code, message))
}
