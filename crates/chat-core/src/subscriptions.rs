use tracing::{debug, trace};

use crate::types::{EventScope, InboundEvent};

/// One live room-scoped subscription set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSubscription {
    /// Monotonic subscription ID; never reused within a table.
    pub id: u64,
    /// Channel key the set listens on.
    pub room_key: String,
}

/// Result of switching the live room subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSwitch {
    /// Set torn down first, if one was live.
    pub unsubscribed: Option<RoomSubscription>,
    /// Set established afterwards.
    pub subscribed: RoomSubscription,
}

/// Session-scoped and room-scoped subscription bookkeeping.
///
/// At most one room-scoped set is live; inbound room events are delivered only
/// when their channel matches it.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTable {
    session_open: bool,
    room: Option<RoomSubscription>,
    next_id: u64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_session(&mut self) {
        self.session_open = true;
    }

    /// Close the session scope, tearing down the room scope too.
    pub fn close_session(&mut self) -> Option<RoomSubscription> {
        self.session_open = false;
        self.clear_room()
    }

    pub fn is_session_open(&self) -> bool {
        self.session_open
    }

    pub fn room(&self) -> Option<&RoomSubscription> {
        self.room.as_ref()
    }

    /// Replace the live room set: the previous one is unsubscribed before the new one.
    pub fn switch_room(&mut self, room_key: impl Into<String>) -> SubscriptionSwitch {
        let unsubscribed = self.room.take();
        self.next_id += 1;
        let subscribed = RoomSubscription {
            id: self.next_id,
            room_key: room_key.into(),
        };
        debug!(
            previous = unsubscribed.as_ref().map(|s| s.room_key.as_str()).unwrap_or(""),
            room_key = %subscribed.room_key,
            subscription_id = subscribed.id,
            "room subscription switched"
        );
        self.room = Some(subscribed.clone());
        SubscriptionSwitch {
            unsubscribed,
            subscribed,
        }
    }

    pub fn clear_room(&mut self) -> Option<RoomSubscription> {
        let previous = self.room.take();
        if let Some(subscription) = &previous {
            debug!(room_key = %subscription.room_key, "room subscription cleared");
        }
        previous
    }

    /// Decide whether an inbound event reaches a live handler.
    pub fn route(&self, inbound: &InboundEvent) -> Option<EventScope> {
        if !self.session_open {
            trace!("dropping inbound event: session scope closed");
            return None;
        }

        match inbound.event.scope() {
            EventScope::Session => Some(EventScope::Session),
            EventScope::Room => {
                let live = self.room.as_ref()?;
                if inbound.channel.as_deref() == Some(live.room_key.as_str()) {
                    Some(EventScope::Room)
                } else {
                    trace!(
                        channel = inbound.channel.as_deref().unwrap_or(""),
                        live = %live.room_key,
                        "dropping room event for inactive channel"
                    );
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerEvent;

    fn typing(channel: &str) -> InboundEvent {
        InboundEvent::room(
            channel,
            ServerEvent::TypingReceive {
                user_name: "Bob".into(),
            },
        )
    }

    #[test]
    fn switching_rooms_isolates_handlers() {
        let mut table = SubscriptionTable::new();
        table.open_session();

        let first = table.switch_room("room-a");
        assert_eq!(first.unsubscribed, None);
        assert_eq!(table.route(&typing("room-a")), Some(EventScope::Room));

        let second = table.switch_room("room-b");
        assert_eq!(second.unsubscribed, Some(first.subscribed.clone()));
        assert!(second.subscribed.id > first.subscribed.id);

        assert_eq!(table.route(&typing("room-a")), None);
        assert_eq!(table.route(&typing("room-b")), Some(EventScope::Room));
    }

    #[test]
    fn session_events_ignore_room_scope() {
        let mut table = SubscriptionTable::new();
        table.open_session();

        let event = InboundEvent::session(ServerEvent::GroupDeleted { id: "g1".into() });
        assert_eq!(table.route(&event), Some(EventScope::Session));
        assert_eq!(table.route(&typing("room-a")), None);
    }

    #[test]
    fn closed_session_drops_everything() {
        let mut table = SubscriptionTable::new();
        table.open_session();
        table.switch_room("room-a");

        let torn_down = table.close_session();
        assert_eq!(torn_down.map(|s| s.room_key), Some("room-a".to_owned()));
        assert_eq!(table.route(&typing("room-a")), None);
        assert_eq!(
            table.route(&InboundEvent::session(ServerEvent::OpponentRoomNotExist)),
            None
        );
    }

    #[test]
    fn room_events_without_channel_are_dropped() {
        let mut table = SubscriptionTable::new();
        table.open_session();
        table.switch_room("room-a");

        let event = InboundEvent::session(ServerEvent::TypingReceive {
            user_name: "Bob".into(),
        });
        assert_eq!(table.route(&event), None);
    }
}
