//! Core SMTP types.

mod address;
mod extension;
mod reply;

pub use address::{
    AddressError, MAX_DOMAIN_LENGTH, MAX_LOCAL_PART_LENGTH, Mailbox, ReversePath,
    parse_forward_path, parse_reverse_path,
};
pub use extension::{BodyType, Extension};
pub use reply::{EnhancedCode, Reply, ReplyCode};
