//! Relay: one terminal view over several live chats.
//!
//! Reads Twitch (IRC), YouTube (polling REST) and hackr.tv (ActionCable
//! WebSocket) chat concurrently, normalises everything into [`message::Message`]
//! and prints a single merged stream. In bridge mode, Twitch and YouTube chat
//! is forwarded into a hackr.tv channel through the Uplink API.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod message;

pub mod sources;

pub mod dispatch;
pub mod display;
pub mod uplink;
