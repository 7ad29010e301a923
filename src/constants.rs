//! Constants used throughout the hibernation proxy
//!
//! This module centralizes magic numbers and protocol values
//! to improve maintainability and reduce duplication.

use std::time::Duration;

/// Buffer size constants
pub mod buffer {
    /// Buffer size for each relay direction of a proxy pair
    pub const RELAY_SIZE: usize = 1024;

    /// Sanity cap on a framed packet length (the length VarInt itself
    /// could encode up to 2^31, but no legitimate first packet comes close)
    pub const MAX_PACKET_LEN: i32 = 1 << 21;

    /// Maximum encoded size of a VarInt
    pub const MAX_VARINT_BYTES: usize = 5;
}

/// Timeout constants
pub mod timeout {
    use super::Duration;

    /// Deadline for reading and classifying the first packet of a connection
    pub const CLASSIFY: Duration = Duration::from_secs(5);

    /// Deadline for dialing the backend when opening a proxy pair
    pub const BACKEND_DIAL: Duration = Duration::from_secs(10);

    /// Grace period between the `stop` console command and a forced kill
    pub const STOP_GRACE: Duration = Duration::from_secs(120);

    /// Extra wait after a forced kill before giving up on the exit status
    pub const KILL_WAIT: Duration = Duration::from_secs(5);
}

/// Handshake protocol constants
pub mod protocol {
    /// Packet id of the handshake packet (also of the status request,
    /// status response and disconnect packets in their respective states)
    pub const HANDSHAKE_PACKET_ID: i32 = 0x00;

    /// Packet id of the ping request and its echo reply
    pub const PING_PACKET_ID: i32 = 0x01;

    /// Handshake next-state value declaring a status probe
    pub const NEXT_STATE_STATUS: i32 = 1;

    /// Handshake next-state value declaring a login attempt
    pub const NEXT_STATE_LOGIN: i32 = 2;
}
