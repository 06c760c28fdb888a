pub mod connection;
pub mod protocol;
pub mod server;

pub use protocol::ClientCommand;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
