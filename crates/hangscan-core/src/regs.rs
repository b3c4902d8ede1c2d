//! Stream register snapshots and register-level predicates.
//!
//! A [`StreamRegisters`] value is one read of a stream's register block. The
//! predicates here only look at the registers; anything that needs the
//! compiled plan lives in the analysis crate.

use serde::{Deserialize, Serialize};

/// The low bits of `CURR_PHASE` that hold the real phase number.
pub const PHASE_MASK: u32 = 0x7FFF;

/// `CURR_PHASE >> 15` equals this while a stream waits in its dummy phase.
pub const DUMMY_PHASE_SENTINEL: u32 = 0x1F;

/// Remote x/y value meaning "the other end of this core's ethernet link".
pub const ETH_REMOTE_SENTINEL: u32 = 63;

/// Bits of debug status word 8 that are set while a stream is live.
pub const ACTIVE_STATUS_MASK: u32 = 0x5;

/// A remote endpoint as programmed into the remote source / dest registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub x: u32,
    pub y: u32,
    pub stream: u32,
}

impl RemoteEndpoint {
    /// True if the endpoint sits on the far side of an ethernet link.
    pub fn is_across_ethernet(&self) -> bool {
        self.x == ETH_REMOTE_SENTINEL && self.y == ETH_REMOTE_SENTINEL
    }
}

/// One register read of a hardware stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRegisters {
    /// Raw `CURR_PHASE`, including any epoch or dummy-phase bits.
    pub curr_phase: u32,
    /// `NUM_MSGS_RECEIVED`.
    pub num_msgs_received: u32,
    /// `CURR_PHASE_NUM_MSGS_REMAINING`.
    pub msgs_remaining: u32,
    /// `MSG_INFO_PTR` (word address).
    #[serde(default)]
    pub msg_info_ptr: u32,
    /// `MSG_INFO_WR_PTR` (word address).
    #[serde(default)]
    pub msg_info_wr_ptr: u32,
    /// `DEBUG_STATUS[8]`.
    #[serde(default)]
    pub debug_status_8: u32,
    /// `REMOTE_SOURCE` is set.
    #[serde(default)]
    pub remote_source: bool,
    /// `REMOTE_RECEIVER` is set.
    #[serde(default)]
    pub remote_receiver: bool,
    /// `REMOTE_SRC_X`, `REMOTE_SRC_Y`, `REMOTE_SRC_STREAM_ID`.
    #[serde(default)]
    pub remote_src: RemoteEndpoint,
    /// `REMOTE_DEST_X`, `REMOTE_DEST_Y`, `REMOTE_DEST_STREAM_ID`.
    #[serde(default)]
    pub remote_dest: RemoteEndpoint,
}

impl StreamRegisters {
    pub fn is_configured(&self) -> bool {
        self.curr_phase > 0
    }

    /// The stream has tiles buffered: it received messages or has unread
    /// message-info entries.
    pub fn is_holding_tiles(&self) -> bool {
        self.curr_phase != 0
            && (self.num_msgs_received > 0 || self.msg_info_wr_ptr > self.msg_info_ptr)
    }

    /// The stream is live in silicon. Says nothing about the plan.
    pub fn is_active(&self) -> bool {
        self.debug_status_8 & ACTIVE_STATUS_MASK != 0
    }

    pub fn is_in_dummy_phase(&self) -> bool {
        self.curr_phase >> 15 == DUMMY_PHASE_SENTINEL
    }

    /// `CURR_PHASE` with the epoch bits masked off.
    pub fn true_phase(&self) -> u32 {
        self.curr_phase & PHASE_MASK
    }

    /// Messages are still expected and none arrived yet.
    pub fn is_waiting_for_messages(&self) -> bool {
        self.msgs_remaining > 0 && self.num_msgs_received == 0
    }

    pub fn has_received_messages(&self) -> bool {
        self.num_msgs_received > 0
    }
}
