//! C6: persistent bidirectional WebSocket gateway, one connection per
//! agent. Bridges `EventBus` traffic for an agent's own and team channels
//! onto its socket and accepts directed `task:push` dispatch in the other
//! direction.

pub mod handler;
pub mod manager;
pub mod protocol;

pub use handler::{agent_ws_handler, start_heartbeat_checker, WsQuery};
pub use manager::GatewayManager;
