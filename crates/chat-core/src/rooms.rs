use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::ChatError,
    types::{DirectCandidate, Group, GroupCredentialsPatch, PrivateRoom, Room, RoomId},
};

/// First step of direct-message resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivateRoomLookup {
    /// A room with the candidate's name already exists locally.
    Known(Room),
    /// The server must be asked whether the opponent already holds a room.
    CheckOpponent,
    /// No check needed; synthesize a local room right away.
    CreateLocal,
}

/// Exactly-one outcome of `check_for_existing_opponent_room`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpponentCheckOutcome {
    /// The opponent holds no room yet.
    NotExist,
    /// The server supplied the canonical shared room.
    Existing(PrivateRoom),
}

/// Result of removing a room from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRemoval {
    /// The removed room.
    pub room: Room,
    /// Whether the removed room was the active one.
    pub was_active: bool,
}

/// Authoritative local room set plus the active-room pointer.
///
/// `revision` increases on every mutation, including no-op merges, so views
/// can re-render on any registry touch.
#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: Vec<Room>,
    active_room_id: Option<RoomId>,
    revision: u64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rooms in display order (newest local additions first).
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, id: &str) -> Option<&Room> {
        self.rooms.iter().find(|room| room.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Room> {
        self.rooms.iter().find(|room| room.name() == name)
    }

    /// Find a room by its channel key.
    pub fn find_by_key(&self, key: &str) -> Option<&Room> {
        self.rooms.iter().find(|room| room.key() == key)
    }

    pub fn active(&self) -> Option<&Room> {
        self.active_room_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_room_id.as_deref()
    }

    /// Point the active room at a registered room.
    pub fn set_active(&mut self, id: &str) -> Result<&Room, ChatError> {
        let index = self
            .rooms
            .iter()
            .position(|room| room.id() == id)
            .ok_or_else(|| ChatError::unknown_room(id))?;
        self.active_room_id = Some(id.to_owned());
        self.touch();
        Ok(&self.rooms[index])
    }

    pub fn clear_active(&mut self) {
        if self.active_room_id.take().is_some() {
            self.touch();
        }
    }

    /// Replace the room set with a server snapshot, keeping the first entry per ID.
    ///
    /// Returns `true` when the active room disappeared and was cleared.
    pub fn replace_all(&mut self, rooms: Vec<Room>) -> bool {
        let mut seen = HashSet::new();
        self.rooms = rooms
            .into_iter()
            .filter(|room| seen.insert(room.id().to_owned()))
            .collect();
        self.touch();
        debug!(room_count = self.rooms.len(), "room registry replaced");

        if let Some(active_id) = &self.active_room_id
            && !self.rooms.iter().any(|room| room.id() == active_id)
        {
            warn!(room_id = %active_id, "active room disappeared from room list");
            self.active_room_id = None;
            return true;
        }
        false
    }

    /// Insert `room` at the front unless a room with the same ID exists.
    ///
    /// Returns `true` when the room was inserted.
    pub fn upsert_local(&mut self, room: Room) -> bool {
        if self.contains(room.id()) {
            debug!(room_id = %room.id(), "upsert ignored: room already present");
            return false;
        }
        debug!(room_id = %room.id(), kind = ?room.kind(), "room inserted");
        self.rooms.insert(0, room);
        self.touch();
        true
    }

    /// Append `room` at the end unless a room with the same ID exists.
    pub fn append_if_absent(&mut self, room: Room) -> bool {
        if self.contains(room.id()) {
            return false;
        }
        self.rooms.push(room);
        self.touch();
        true
    }

    /// Remove a room, clearing the active pointer when it pointed at it.
    pub fn remove(&mut self, id: &str) -> Option<RoomRemoval> {
        let index = self.rooms.iter().position(|room| room.id() == id)?;
        let room = self.rooms.remove(index);
        let was_active = self.active_room_id.as_deref() == Some(id);
        if was_active {
            self.active_room_id = None;
        }
        self.touch();
        debug!(room_id = %id, was_active, "room removed");
        Some(RoomRemoval { room, was_active })
    }

    /// Merge a partial credentials patch into the matching group, preserving its ID.
    pub fn reconcile_credentials_update(&mut self, patch: &GroupCredentialsPatch) -> bool {
        let Some(group) = self.group_mut(&patch.id) else {
            warn!(room_id = %patch.id, "credentials update for unknown group");
            return false;
        };

        if let Some(name) = &patch.name {
            group.name = name.clone();
        }
        if let Some(description) = &patch.description {
            group.description = Some(description.clone());
        }
        if let Some(avatar) = &patch.avatar {
            group.avatar = Some(avatar.clone());
        }
        if let Some(is_public) = patch.is_public {
            group.is_public = is_public;
        }
        self.touch();
        true
    }

    /// Resolve a direct-message candidate against local rooms.
    pub fn lookup_private_room(&self, candidate: &DirectCandidate) -> PrivateRoomLookup {
        if let Some(room) = self.find_by_name(&candidate.name) {
            return PrivateRoomLookup::Known(room.clone());
        }
        if candidate.opponent_room_id.is_none() {
            PrivateRoomLookup::CheckOpponent
        } else {
            PrivateRoomLookup::CreateLocal
        }
    }

    /// Finish direct-message resolution once the opponent check resolved.
    pub fn complete_private_room(
        &mut self,
        candidate: &DirectCandidate,
        self_id: &str,
        outcome: OpponentCheckOutcome,
    ) -> Room {
        match outcome {
            OpponentCheckOutcome::NotExist => self.create_local_private_room(candidate, self_id),
            OpponentCheckOutcome::Existing(room) => self.adopt_private_room(room),
        }
    }

    /// Synthesize an optimistic private room with fresh `id` and `commonId`.
    pub fn create_local_private_room(
        &mut self,
        candidate: &DirectCandidate,
        self_id: &str,
    ) -> Room {
        let room = Room::Private(PrivateRoom {
            id: Uuid::new_v4().to_string(),
            name: candidate.name.clone(),
            avatar: candidate.avatar.clone(),
            creators: vec![self_id.to_owned(), candidate.id.clone()],
            common_id: Uuid::new_v4().to_string(),
            opponent_room_id: candidate.opponent_room_id.clone(),
            description: candidate.description.clone(),
            status: candidate.status,
        });
        self.upsert_local(room.clone());
        room
    }

    /// Register the canonical room supplied by the server and return it.
    pub fn adopt_private_room(&mut self, room: PrivateRoom) -> Room {
        let room = Room::Private(room);
        if !self.upsert_local(room.clone())
            && let Some(existing) = self.get(room.id())
        {
            return existing.clone();
        }
        room
    }

    /// Apply the server's confirmation of a private room.
    ///
    /// A local private room with the same `commonId` (or, failing that, the same
    /// name) is superseded in place and the active pointer follows it. Returns the
    /// superseded local ID when one was replaced.
    pub fn confirm_private_room(&mut self, room: PrivateRoom) -> Option<RoomId> {
        let index = self
            .rooms
            .iter()
            .position(|existing| {
                matches!(existing, Room::Private(local) if local.common_id == room.common_id)
            })
            .or_else(|| {
                self.rooms.iter().position(
                    |existing| matches!(existing, Room::Private(local) if local.name == room.name),
                )
            });

        let Some(mut index) = index else {
            self.upsert_local(Room::Private(room));
            return None;
        };

        // The canonical ID may already be registered under another entry.
        if let Some(duplicate) = self
            .rooms
            .iter()
            .enumerate()
            .find_map(|(position, existing)| {
                (position != index && existing.id() == room.id).then_some(position)
            })
        {
            self.rooms.remove(duplicate);
            if duplicate < index {
                index -= 1;
            }
        }

        let previous_id = self.rooms[index].id().to_owned();
        if self.active_room_id.as_deref() == Some(previous_id.as_str()) {
            self.active_room_id = Some(room.id.clone());
        }
        debug!(
            previous_id = %previous_id,
            room_id = %room.id,
            "private room superseded by canonical record"
        );
        self.rooms[index] = Room::Private(room);
        self.touch();
        Some(previous_id)
    }

    /// Validate a new group name: trimmed, non-empty and unique case-insensitively.
    pub fn validate_group_name(&self, name: &str) -> Result<String, ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::validation(
                "group_name_empty",
                "group name is required",
            ));
        }

        let lowered = name.to_lowercase();
        if self
            .rooms
            .iter()
            .any(|room| room.name().to_lowercase() == lowered)
        {
            return Err(ChatError::validation(
                "group_name_taken",
                format!("a room named '{name}' already exists"),
            ));
        }
        Ok(name.to_owned())
    }

    /// Drop every room and the active pointer.
    pub fn clear(&mut self) {
        self.rooms.clear();
        self.active_room_id = None;
        self.touch();
    }

    pub(crate) fn group_mut(&mut self, id: &str) -> Option<&mut Group> {
        self.rooms.iter_mut().find_map(|room| match room {
            Room::Group(group) if group.id == id => Some(group),
            _ => None,
        })
    }

    pub(crate) fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}
