pub mod duel_routes;
pub mod duel_websocket;

pub use duel_routes::duel_routes;
