//! Storage backend implementations.
//!
//! [`VolumeController`] and [`VolumeNode`] implement [`CsiController`] and
//! [`CsiNode`] on top of an object store reached through a
//! [`GatewayConnector`]; the identity service lives in
//! [`crate::identity`].
//!
//! [`CsiController`]: crate::controller::CsiController
//! [`CsiNode`]: crate::node::CsiNode
//! [`GatewayConnector`]: crate::gateway::GatewayConnector

pub mod controller;
pub mod node;

pub use controller::VolumeController;
pub use node::VolumeNode;
