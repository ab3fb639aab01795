//! Protocol dispatcher: listener setup, the serial accept loop and the
//! per-connection request handling.

mod core;
mod handlers;
mod response;

pub use self::core::SessionServer;
pub use handlers::handle_connection;
pub use response::Response;
