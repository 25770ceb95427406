//! Control protocol for a running simplemerge daemon
//!
//! A Unix domain socket lets an operator:
//! - Poll live campaign progress
//! - Request that the running campaign stop
//! - Preview the configured template
//! - List the unified inbox across sender accounts
//!
//! Frames are a big-endian `u32` length followed by a bincode payload.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use protocol::{
    CampaignCommand, InboxCommand, PROTOCOL_VERSION, Request, RequestCommand, Response,
    ResponseData, ResponsePayload, SystemCommand,
};
pub use server::{CommandHandler, ControlServer};

/// Default path for the control socket
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/simplemerge.sock";
