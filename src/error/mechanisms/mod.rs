/// Recovery mechanisms for unreadable blocks
pub mod bad_block;

pub use bad_block::{BadBlockEntry, BadBlockLog, BadBlockReport, Substitution};
