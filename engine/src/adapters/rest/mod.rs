//! REST API Driving Adapter
//!
//! Exposes the supervisor through a JSON HTTP API and streams bus events to
//! websocket clients.

pub mod events;
pub mod handlers;
pub mod router;
pub mod server;

pub use router::build_router;
pub use server::serve_on_tcp;
