//! QUIC transport layer for CSI messages.
//!
//! [`CsiServer`] accepts [`CsiMessage`] requests over QUIC bi-directional
//! streams using `quinn` and answers them through [`dispatch`].
//!
//! [`CsiMessage`]: crate::message::CsiMessage

pub mod server;

pub use server::{CsiServer, dispatch};
