//! Process channels
//!
//! - `LocalChannel` - host shell execution, captured or terminal-attached
//!
//! Channels report lifecycle through [`ChannelEvent`]s on an unbounded
//! sink owned by the registry.

pub mod local;
pub mod r#trait;

pub use local::LocalChannel;
pub use r#trait::{
    ChannelControl, ChannelEvent, ChannelRequest, EventSink, ProcessChannel, ProcessHandle,
    SENTINEL_EXIT_CODE,
};
