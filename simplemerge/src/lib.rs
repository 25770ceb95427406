//! The simplemerge daemon: configuration, collaborator backends and the
//! control handler around the campaign engine.

pub mod backends;
pub mod config;
pub mod control_handler;
pub mod controller;
