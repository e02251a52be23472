//! Core IMAP types.
//!
//! Capabilities, flags, response codes, access rights and listing data
//! shared by the parser and the sessions.

mod acl;
mod capability;
mod flags;
mod mailbox;
mod response_code;

pub use acl::AclRights;
pub use capability::{Capabilities, Status, advertises_auth};
pub use flags::{Flag, MessageFlags};
pub use mailbox::{ListEntry, StatusItem};
pub use response_code::ResponseCode;
