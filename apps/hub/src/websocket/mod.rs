//! Real-time synchronization endpoint
//!
//! Layered so that everything below `handler` is transport-free: `codec`
//! validates raw frames, `messages` types the protocol, `session` owns the
//! dispatch and fan-out logic, and `handler` is the thin axum glue that
//! pumps socket frames in and out.

pub mod codec;
pub mod connection;
pub mod handler;
pub mod help;
pub mod messages;
pub mod metrics;
pub mod session;
pub mod snapshot;
pub mod subscriptions;

pub use connection::{ConnId, ConnectionManager, Outbound};
pub use handler::ws_handler;
pub use messages::{ClientMessage, ErrorCode, OutboundFrame, ServerMessage};
pub use session::{RosterEvent, SessionEngine, SessionSettings};
pub use subscriptions::{DefaultSubscription, SubscriptionFilter, SubscriptionRegistry};
