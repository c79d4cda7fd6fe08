pub mod handlers;
pub mod server;
pub mod websocket;

pub use handlers::AppState;
pub use server::ApiServer;
