//! Chat assistant client: multi-chat local persistence, remote or hardcoded
//! response providers, optional speech output, and audio capture.
//!
//! The [`session::SessionStore`] coordinates everything; the other modules
//! are services it calls.

pub mod chat;
pub mod error;
pub mod provider;
pub mod recorder;
pub mod session;
pub mod settings;
pub mod speech;
pub mod storage;
