//! Tagged command bookkeeping.
//!
//! Every command the engine sends gets a tag from [`TagGenerator`] and a
//! slot in the [`CommandRing`]. The slot is released once the matching
//! tagged response has been read and every older command has finished.

mod ring;
mod tag;

use bitflags::bitflags;

pub use ring::{Command, CommandRing, CommandState};
pub use tag::TagGenerator;

bitflags! {
    /// How [`crate::ImapAccount::exec`] runs a command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExecFlags: u8 {
        /// The command carries a password: never log its text.
        const PASS = 1 << 0;
        /// Queue the command; it is sent with the next non-queued one.
        const QUEUE = 1 << 1;
        /// Give up (fatally) if the server stays silent for `poll_timeout`.
        const POLL = 1 << 2;
        /// Drain everything already in flight before sending.
        const SINGLE = 1 << 3;
    }
}
