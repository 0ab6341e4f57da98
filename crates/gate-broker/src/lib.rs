//! HTTP/JSON broker exposing [`gate_core::LockStore`] over the network.
//!
//! Every handler offloads the (synchronous, mutex-and-condvar) store call
//! onto a blocking task so a slow writer waiting in the queue never stalls
//! the async runtime's other connections.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use routes::build_router;
pub use server::serve;
pub use state::AppState;
