//! Assistant side of the conversation: canned replies and request history.

pub mod history;
mod reply;

pub use history::History;
pub use reply::{ReplyGenerator, SUGGESTIONS};
