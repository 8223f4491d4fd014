//! Sticky authenticating gateway in front of the proxy pool

pub mod cache;
pub mod handler;
pub mod middleware;
pub mod request;
pub mod server;
pub mod transport;
pub mod tunnel;

pub use cache::AssignmentCache;
pub use handler::{GatewayHandler, GatewayHandlerConfig};
pub use server::GatewayServer;
pub use transport::ProxyTransport;
