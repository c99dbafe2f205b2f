//! Core IMAP types.
//!
//! This module defines the small set of protocol values the client and the
//! queue pass around: tags, UIDs, completion statuses, capabilities and
//! response codes.

#![allow(clippy::missing_const_for_fn)]

mod capability;
mod identifiers;
mod response_code;

pub use capability::{Capabilities, Status};
pub use identifiers::{InvalidUid, Tag, Uid};
pub use response_code::ResponseCode;
