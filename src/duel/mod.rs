pub mod questions;
pub mod room;
mod server;
pub mod signaling;
pub mod terms;

pub use room::{Player, Room, RoomManager, RoomStatus};
pub use server::{ConnectionId, DuelServer};
pub use signaling::{ClientEvent, DuelSignalingHandler, ServerEvent};
pub use terms::{InMemoryTermStore, Term, TermSource};
