//! News service, HTTP API and server lifecycle

pub mod http;
pub mod server;
pub mod service;

pub use http::{create_router, AppState};
pub use server::{NewsServer, RunningServer};
pub use service::NewsService;
