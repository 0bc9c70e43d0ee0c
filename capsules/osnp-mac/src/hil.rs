// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The board-level collaborators a [`crate::MacClient`] drives: radio,
//! timer, persistent storage, and the application's command dispatcher.
//! None of their internals are prescribed here; these are the seams a
//! platform integration fills in.

use osnp_frame::Frame;

/// Outcome of a transmit attempt, reported back through `on_frame_sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Ok,
    NoAck,
    ChannelBusy,
}

pub trait Radio {
    fn switch_channel(&self, channel: u8);
    fn transmit_frame(&self, buf: &mut [u8], len: usize);
    /// Whether the coordinator has indicated, out of band, that it holds a
    /// frame pending for this device.
    fn get_pending_frames(&self) -> bool;
}

pub trait Timer {
    fn start_channel_scanning_timer(&self);
    fn start_association_wait_timer(&self);
    fn start_poll_timer(&self);
    fn start_pending_data_wait_timer(&self);
    fn stop_active_timer(&self);
}

pub trait NvStorage {
    fn load_eui(&self) -> [u8; 8];
    fn load_pan(&self) -> [u8; 2];
    fn load_channel(&self) -> u8;
    fn load_master_key(&self) -> [u8; 16];
    fn load_rx_key(&self) -> [u8; 16];
    fn load_tx_key(&self) -> [u8; 16];
    fn load_rx_frame_counter_ceiling(&self) -> u32;
    fn load_tx_frame_counter_ceiling(&self) -> u32;

    fn write_pan(&self, pan: [u8; 2]);
    fn write_channel(&self, channel: u8);
    fn write_rx_key(&self, key: [u8; 16]);
    fn write_tx_key(&self, key: [u8; 16]);
    fn write_rx_frame_counter_ceiling(&self, ceiling: u32);
    fn write_tx_frame_counter_ceiling(&self, ceiling: u32);
}

/// Interprets the TLV commands carried inside a DATA frame's request
/// container. A single call must consume exactly one TLV node from `src`
/// starting at `*src_cursor` and produce exactly one TLV node into `tx`
/// starting at `*tx_cursor`, advancing both cursors past what they wrote.
pub trait CommandDispatcher {
    fn process_command(
        &self,
        src: &Frame<'_>,
        src_cursor: &mut usize,
        tx: &mut Frame<'_>,
        tx_cursor: &mut usize,
        is_associated: bool,
    );
}
