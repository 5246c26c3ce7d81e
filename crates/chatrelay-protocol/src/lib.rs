pub mod campaign;
pub mod gateway;
pub mod webhook;

pub const PROTOCOL_VERSION: u32 = 1;

/// Hard cap on a single WebSocket text frame, mirrored by the gateway's
/// read loop so an oversized frame is rejected before it reaches serde.
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Handshake must complete within this window or the connection is closed.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
