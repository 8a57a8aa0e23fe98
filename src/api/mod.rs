mod hub;
pub mod routes;
mod websocket;

pub use hub::PollHub;
pub use routes::routes;
