//! Reaction toggling rules.
//!
//! Private rooms hold at most one reaction per message; a toggle either clears
//! it (`None` on the wire) or replaces it with a single-element list. Groups
//! hold a multiset keyed by `(author_id, glyph)`. Every change is sent as a full
//! replacement array, never as a delta.

use uuid::Uuid;

use crate::types::{HEART_REACTION, Message, Reaction, RoomKind};

/// One palette entry shown under a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionSummary {
    /// Emoji grapheme.
    pub glyph: String,
    /// Number of entries with this glyph across all authors.
    pub count: usize,
    /// Whether the viewing user placed this glyph.
    pub selected: bool,
    /// Whether the count badge is shown.
    pub show_count: bool,
}

/// Build a reaction attributed to `author_id` on `message_id` with a fresh ID.
pub fn new_reaction(author_id: &str, message_id: &str, glyph: &str) -> Reaction {
    Reaction {
        id: Uuid::new_v4().to_string(),
        author_id: author_id.to_owned(),
        reaction: glyph.to_owned(),
        message_id: message_id.to_owned(),
    }
}

/// Toggle inside a private room. `None` clears the reaction state.
pub fn toggle_private(current: Option<&[Reaction]>, reaction: Reaction) -> Option<Vec<Reaction>> {
    let already_set = current
        .unwrap_or_default()
        .iter()
        .any(|existing| existing.reaction == reaction.reaction);
    if already_set {
        None
    } else {
        Some(vec![reaction])
    }
}

/// Toggle inside a group: remove the author's matching entry or append a new one.
pub fn toggle_group(current: Option<&[Reaction]>, reaction: Reaction) -> Vec<Reaction> {
    let current = current.unwrap_or_default();
    if current
        .iter()
        .any(|r| r.author_id == reaction.author_id && r.reaction == reaction.reaction)
    {
        return remove_group_reaction(current, &reaction.author_id, &reaction.reaction);
    }

    let mut next = current.to_vec();
    next.push(reaction);
    next
}

/// Remove exactly one `(author_id, glyph)` entry. No-op when absent.
pub fn remove_group_reaction(current: &[Reaction], author_id: &str, glyph: &str) -> Vec<Reaction> {
    let mut next = current.to_vec();
    if let Some(index) = next
        .iter()
        .position(|r| r.author_id == author_id && r.reaction == glyph)
    {
        next.remove(index);
    }
    next
}

/// Apply one toggle with the rule for `kind`, returning the wire replacement.
pub fn toggle(
    kind: RoomKind,
    current: Option<&[Reaction]>,
    reaction: Reaction,
) -> Option<Vec<Reaction>> {
    match kind {
        RoomKind::PrivateRoom => toggle_private(current, reaction),
        RoomKind::Group => Some(toggle_group(current, reaction)),
    }
}

/// Heart reaction for the double-tap shortcut. `None` on the viewer's own messages.
pub fn heart_reaction(self_id: &str, message: &Message) -> Option<Reaction> {
    if message.author_id == self_id {
        return None;
    }
    Some(new_reaction(self_id, &message.id, HEART_REACTION))
}

/// Deduplicate reactions by glyph in first-seen order, counting all authors.
pub fn reaction_palette(
    reactions: &[Reaction],
    self_id: &str,
    kind: RoomKind,
) -> Vec<ReactionSummary> {
    let mut palette: Vec<ReactionSummary> = Vec::new();
    for reaction in reactions {
        let mine = reaction.author_id == self_id;
        match palette.iter_mut().find(|entry| entry.glyph == reaction.reaction) {
            Some(entry) => {
                entry.count += 1;
                entry.selected |= mine;
            }
            None => palette.push(ReactionSummary {
                glyph: reaction.reaction.clone(),
                count: 1,
                selected: mine,
                show_count: false,
            }),
        }
    }

    for entry in &mut palette {
        entry.show_count = match kind {
            RoomKind::Group => entry.count > 0,
            RoomKind::PrivateRoom => entry.count > 1,
        };
    }
    palette
}
