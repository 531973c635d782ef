// Network frame server for pinball dot-matrix displays.
//
// - config.rs: TOML server configuration
// - registry.rs: client ids, ownership and the disconnect-epoch
// - server.rs: acceptor and per-client receive loop

pub mod config;
pub mod registry;
pub mod server;

pub use config::ServerConfig;
pub use server::{DmdServer, ServerHandle};
