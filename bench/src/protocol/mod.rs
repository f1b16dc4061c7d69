//! Channel addressing and transport wire frames

mod messages;

pub use messages::*;
