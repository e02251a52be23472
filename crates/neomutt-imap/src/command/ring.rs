//! The ring of in-flight commands.

/// Where a command is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// Sent (or queued), no tagged response yet.
    New,
    /// An untagged response was read; keep reading.
    Continue,
    /// The server sent a `+` continuation request.
    Respond,
    /// Tagged OK.
    Ok,
    /// Tagged NO.
    No,
    /// Tagged BAD, or the engine gave up on the command.
    Bad,
}

impl CommandState {
    /// Returns true once the command has its tagged response.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::No | Self::Bad)
    }
}

impl From<crate::types::Status> for CommandState {
    fn from(status: crate::types::Status) -> Self {
        match status {
            crate::types::Status::Ok => Self::Ok,
            crate::types::Status::No => Self::No,
            crate::types::Status::Bad => Self::Bad,
        }
    }
}

/// One slot of the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The command's tag.
    pub tag: String,
    /// Current state.
    pub state: CommandState,
}

/// Fixed-size ring of commands awaiting their tagged response.
///
/// `last` is the oldest live slot and `next` the first free one. One slot
/// always stays empty so that `next == last` means "empty".
#[derive(Debug, Clone)]
pub struct CommandRing {
    slots: Vec<Option<Command>>,
    next: usize,
    last: usize,
}

impl CommandRing {
    /// Creates a ring with `slots` slots, of which `slots - 1` are usable.
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![None; slots.max(2)],
            next: 0,
            last: 0,
        }
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no command is outstanding.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.next == self.last
    }

    /// Returns true if another command would not fit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        (self.next + 1) % self.slots.len() == self.last
    }

    /// Number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.next + self.slots.len() - self.last) % self.slots.len()
    }

    /// Adds a command in state [`CommandState::New`].
    ///
    /// Returns false (and does nothing) if the ring is full.
    pub fn push(&mut self, tag: impl Into<String>) -> bool {
        if self.is_full() {
            return false;
        }
        self.slots[self.next] = Some(Command {
            tag: tag.into(),
            state: CommandState::New,
        });
        self.next = (self.next + 1) % self.slots.len();
        true
    }

    /// Records the tagged response for `tag`.
    ///
    /// Only commands still in [`CommandState::New`] are matched. Returns
    /// false if no such command exists. Finished commands at the head of
    /// the ring are released.
    pub fn complete(&mut self, tag: &str, state: CommandState) -> bool {
        let found = self
            .live_indices()
            .find(|&i| {
                self.slots[i]
                    .as_ref()
                    .is_some_and(|c| c.state == CommandState::New && c.tag == tag)
            });

        let Some(index) = found else {
            return false;
        };
        if let Some(cmd) = self.slots[index].as_mut() {
            cmd.state = state;
        }

        while !self.is_empty()
            && self.slots[self.last]
                .as_ref()
                .is_none_or(|c| c.state.is_terminal())
        {
            self.slots[self.last] = None;
            self.last = (self.last + 1) % self.slots.len();
        }
        true
    }

    /// Returns true if any command still waits for its tagged response.
    #[must_use]
    pub fn running(&self) -> bool {
        self.live_indices().any(|i| {
            self.slots[i]
                .as_ref()
                .is_some_and(|c| c.state == CommandState::New)
        })
    }

    /// Tags of the commands still waiting, oldest first.
    pub fn pending_tags(&self) -> impl Iterator<Item = &str> {
        self.live_indices().filter_map(|i| {
            self.slots[i]
                .as_ref()
                .filter(|c| c.state == CommandState::New)
                .map(|c| c.tag.as_str())
        })
    }

    /// Drops every command.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.next = 0;
        self.last = 0;
    }

    fn live_indices(&self) -> impl Iterator<Item = usize> + use<> {
        let len = self.slots.len();
        let last = self.last;
        (0..self.len()).map(move |i| (last + i) % len)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_full_leaves_one_slot() {
        let mut ring = CommandRing::new(4);
        assert!(ring.push("a0001"));
        assert!(ring.push("a0002"));
        assert!(ring.push("a0003"));
        assert!(ring.is_full());
        assert!(!ring.push("a0004"));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_in_order_completion() {
        let mut ring = CommandRing::new(5);
        ring.push("a0001");
        ring.push("a0002");

        assert!(ring.complete("a0001", CommandState::Ok));
        assert_eq!(ring.len(), 1);
        assert!(ring.running());

        assert!(ring.complete("a0002", CommandState::No));
        assert!(ring.is_empty());
        assert!(!ring.running());
    }

    #[test]
    fn test_out_of_order_completion() {
        let mut ring = CommandRing::new(5);
        ring.push("a0001");
        ring.push("a0002");
        ring.push("a0003");

        assert!(ring.complete("a0002", CommandState::Ok));
        // head is still waiting, nothing is released
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.pending_tags().collect::<Vec<_>>(), vec!["a0001", "a0003"]);

        assert!(ring.complete("a0001", CommandState::Ok));
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.pending_tags().collect::<Vec<_>>(), vec!["a0003"]);
    }

    #[test]
    fn test_unknown_tag() {
        let mut ring = CommandRing::new(3);
        ring.push("a0001");
        assert!(!ring.complete("a0009", CommandState::Ok));
        assert!(ring.complete("a0001", CommandState::Ok));
        assert!(!ring.complete("a0001", CommandState::Ok));
    }

    #[test]
    fn test_wraps_around() {
        let mut ring = CommandRing::new(3);
        for n in 0..10 {
            let tag = format!("a{n:04x}");
            assert!(ring.push(tag.clone()));
            assert!(ring.complete(&tag, CommandState::Ok));
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn test_clear() {
        let mut ring = CommandRing::new(4);
        ring.push("a0001");
        ring.push("a0002");
        ring.clear();
        assert!(ring.is_empty());
        assert!(!ring.running());
        assert_eq!(ring.capacity(), 4);
    }
}
