mod handler;
mod state;

pub use handler::handle_connection;
pub use state::{ProxyInner, ProxyState};
