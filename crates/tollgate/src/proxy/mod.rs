//! Request pipeline and HTTP surface

mod api;
mod capture;
mod error;
mod messages;
mod server;

pub use capture::StreamCapture;
pub use error::ProxyError;
pub use server::{AppState, ProxyServer, create_router};
