// Hub - WebSocket fan-out: buffers, subscriptions, snapshots, serving

pub mod buffer;
pub mod client;
pub mod hub;
pub mod server;

pub use buffer::{BufferManager, BufferManagerStats, CandleBuffer};
pub use client::ClientSettings;
pub use hub::{ClientId, ClientMessage, Hub, HubStats, SnapshotMessage};
pub use server::WsServer;
