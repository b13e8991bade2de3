use tracing::debug;

use crate::types::{Message, MessageId, MessagePatch, Reaction};

/// Handle for one history load, echoed back by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    /// Channel key the load was issued for.
    pub room_key: String,
    /// Generation the response must match.
    pub generation: u64,
}

/// Ordered messages of the active room with a bounded retention cap.
///
/// Each `begin_load` bumps the generation; responses tagged with an older
/// generation are discarded so a late fetch for a previous room cannot land
/// in the current one.
#[derive(Debug, Clone)]
pub struct MessageLog {
    room_key: Option<String>,
    items: Vec<Message>,
    loading: bool,
    generation: u64,
    pending_message_id: Option<MessageId>,
    max_items: usize,
}

impl MessageLog {
    /// Create an empty log with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            room_key: None,
            items: Vec::new(),
            loading: false,
            generation: 0,
            pending_message_id: None,
            max_items: max_items.max(1),
        }
    }

    /// Messages in display order.
    pub fn items(&self) -> &[Message] {
        &self.items
    }

    pub fn room_key(&self) -> Option<&str> {
        self.room_key.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Most recently sent message that has not been acknowledged yet.
    pub fn pending_message_id(&self) -> Option<&str> {
        self.pending_message_id.as_deref()
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.items.iter().find(|message| message.id == message_id)
    }

    /// Start a history load for `room_key`, dropping the previous room's messages.
    pub fn begin_load(&mut self, room_key: impl Into<String>) -> LoadTicket {
        let room_key = room_key.into();
        self.reset_for(room_key.clone());
        self.loading = true;
        debug!(room_key = %room_key, generation = self.generation, "message load started");
        LoadTicket {
            room_key,
            generation: self.generation,
        }
    }

    /// Switch to a fresh room that has no history to fetch.
    pub fn open_empty(&mut self, room_key: impl Into<String>) {
        self.reset_for(room_key.into());
        self.loading = false;
    }

    /// Apply a history response. Returns `false` when the generation is stale.
    pub fn complete_load(&mut self, generation: u64, messages: Vec<Message>) -> bool {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "discarding stale message history"
            );
            return false;
        }
        self.items = messages;
        self.loading = false;
        self.trim_to_max();
        true
    }

    /// Apply a failed history response: clear messages and stop loading.
    ///
    /// Returns `false` when the generation is stale.
    pub fn fail_load(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "discarding stale history failure"
            );
            return false;
        }
        self.items.clear();
        self.loading = false;
        true
    }

    /// Append a message. No dedupe by ID: a duplicate delivery is appended again.
    pub fn append(&mut self, message: Message) {
        self.items.push(message);
        self.trim_to_max();
    }

    /// Shallow-overwrite the provided patch fields. Returns `false` for unknown IDs.
    pub fn apply_edit(&mut self, message_id: &str, patch: &MessagePatch) -> bool {
        let Some(message) = self.items.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        if let Some(content) = &patch.content {
            message.content = content.clone();
        }
        if let Some(images) = &patch.images {
            message.images = if images.is_empty() {
                None
            } else {
                Some(images.clone())
            };
        }
        true
    }

    /// Remove every message with `message_id`. Returns `true` when something was removed.
    pub fn remove(&mut self, message_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|message| message.id != message_id);
        before != self.items.len()
    }

    /// Replace the reaction array of a message.
    pub fn set_reactions(&mut self, message_id: &str, reactions: Option<Vec<Reaction>>) -> bool {
        let Some(message) = self.items.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        message.reactions = reactions;
        true
    }

    pub fn mark_pending(&mut self, message_id: impl Into<MessageId>) {
        self.pending_message_id = Some(message_id.into());
    }

    /// Clear the pending marker, returning the acknowledged message.
    pub fn acknowledge(&mut self) -> Option<MessageId> {
        self.pending_message_id.take()
    }

    /// Drop the room binding and all messages. Outstanding loads become stale.
    pub fn clear(&mut self) {
        self.room_key = None;
        self.items.clear();
        self.loading = false;
        self.pending_message_id = None;
        self.generation = self.generation.wrapping_add(1);
    }

    fn reset_for(&mut self, room_key: String) {
        self.room_key = Some(room_key);
        self.items.clear();
        self.pending_message_id = None;
        self.generation = self.generation.wrapping_add(1);
    }

    fn trim_to_max(&mut self) {
        if self.items.len() <= self.max_items {
            return;
        }

        let excess = self.items.len() - self.max_items;
        self.items.drain(0..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, content: &str) -> Message {
        Message {
            id: id.to_owned(),
            author_id: "u2".to_owned(),
            author_name: "Bob".to_owned(),
            avatar: None,
            content: content.to_owned(),
            date: "12:30".to_owned(),
            images: None,
            replied_message: None,
            reactions: None,
        }
    }

    #[test]
    fn edit_overwrites_only_provided_fields() {
        let mut log = MessageLog::new(50);
        log.open_empty("g1");
        log.append(message("m1", "hello"));

        assert!(log.apply_edit(
            "m1",
            &MessagePatch {
                content: Some("x".into()),
                images: None,
            }
        ));

        assert_eq!(log.items().len(), 1);
        let edited = &log.items()[0];
        assert_eq!(edited.id, "m1");
        assert_eq!(edited.content, "x");
        assert_eq!(edited.author_name, "Bob");
        assert_eq!(edited.date, "12:30");
    }

    #[test]
    fn edit_of_unknown_message_is_ignored() {
        let mut log = MessageLog::new(50);
        assert!(!log.apply_edit("m404", &MessagePatch::default()));
    }

    #[test]
    fn delete_then_reappend_reinserts_without_dedupe() {
        let mut log = MessageLog::new(50);
        log.append(message("m1", "hello"));
        assert!(log.remove("m1"));
        assert!(log.items().is_empty());

        log.append(message("m1", "hello"));
        log.append(message("m1", "hello"));
        assert_eq!(log.items().len(), 2);
    }

    #[test]
    fn stale_generation_is_discarded() {
        let mut log = MessageLog::new(50);
        let first = log.begin_load("room-a");
        let second = log.begin_load("room-b");
        assert!(log.is_loading());

        assert!(!log.complete_load(first.generation, vec![message("a1", "from a")]));
        assert!(log.items().is_empty());
        assert!(log.is_loading());

        assert!(log.complete_load(second.generation, vec![message("b1", "from b")]));
        assert!(!log.is_loading());
        assert_eq!(log.room_key(), Some("room-b"));
        assert_eq!(log.items()[0].id, "b1");
    }

    #[test]
    fn failed_load_clears_and_stops_loading() {
        let mut log = MessageLog::new(50);
        let ticket = log.begin_load("g1");
        log.append(message("m1", "early"));

        assert!(log.fail_load(ticket.generation));
        assert!(log.items().is_empty());
        assert!(!log.is_loading());
    }

    #[test]
    fn clear_invalidates_outstanding_loads() {
        let mut log = MessageLog::new(50);
        let ticket = log.begin_load("g1");
        log.clear();
        assert!(!log.complete_load(ticket.generation, vec![message("m1", "late")]));
        assert_eq!(log.room_key(), None);
    }

    #[test]
    fn ack_clears_latest_pending_marker() {
        let mut log = MessageLog::new(50);
        assert_eq!(log.acknowledge(), None);
        log.mark_pending("m1");
        log.mark_pending("m2");
        assert_eq!(log.pending_message_id(), Some("m2"));
        assert_eq!(log.acknowledge().as_deref(), Some("m2"));
        assert_eq!(log.pending_message_id(), None);
    }

    #[test]
    fn trims_oldest_when_over_max_items() {
        let mut log = MessageLog::new(2);
        log.append(message("m1", "one"));
        log.append(message("m2", "two"));
        log.append(message("m3", "three"));

        let ids: Vec<_> = log.items().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);
    }
}
