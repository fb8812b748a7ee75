pub mod events;
pub mod scans;
pub mod websocket;
