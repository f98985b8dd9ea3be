//! HTTP gateway and login CLI over a [`tg_runtime::Coordinator`].

pub mod cli;
pub mod commands;
pub mod envelope;
pub mod error;
pub mod host;
pub mod logging;
pub mod login;
pub mod server;
pub mod webhook;
