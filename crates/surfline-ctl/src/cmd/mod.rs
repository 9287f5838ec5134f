//! CLI command modules.

pub mod frame;
pub mod join;
pub mod loopback;
pub mod sdp;
