//! Core domain + application logic for the relay daemon.
//!
//! This crate is framework-agnostic. The chat backend lives behind
//! [`messaging::port::MessagingPort`], implemented in adapter crates; the
//! relay output lives behind [`relay::OutputPin`].

pub mod auth;
pub mod bot;
pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod link;
pub mod logging;
pub mod messaging;
pub mod relay;
pub mod store;
pub mod supervisor;

pub use errors::{Error, Result};
