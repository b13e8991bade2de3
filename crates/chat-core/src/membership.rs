use tracing::{debug, warn};

use crate::rooms::RoomRegistry;

/// Add `member_id` to a group. Applied identically for local optimistic edits
/// and server broadcasts.
///
/// The member list is only changed when the member is absent, but the registry
/// revision is bumped either way. Returns `false` for unknown or private rooms.
pub fn add_member(registry: &mut RoomRegistry, group_id: &str, member_id: &str) -> bool {
    let Some(group) = registry.group_mut(group_id) else {
        warn!(room_id = %group_id, "add_member ignored: group not found");
        return false;
    };
    if !group.has_member(member_id) {
        group.members.push(member_id.to_owned());
        debug!(room_id = %group_id, member_id = %member_id, "member added");
    }
    registry.touch();
    true
}

/// Remove `member_id` from a group. Same idempotence rules as [`add_member`].
pub fn remove_member(registry: &mut RoomRegistry, group_id: &str, member_id: &str) -> bool {
    let Some(group) = registry.group_mut(group_id) else {
        warn!(room_id = %group_id, "remove_member ignored: group not found");
        return false;
    };
    let before = group.members.len();
    group.members.retain(|id| id != member_id);
    if group.members.len() != before {
        debug!(room_id = %group_id, member_id = %member_id, "member removed");
    }
    registry.touch();
    true
}
