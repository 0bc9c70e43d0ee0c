// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A zero-copy view over a single IEEE 802.15.4 frame buffer: positional
//! offsets into the buffer, not raw pointers, with absent fields marked by
//! `None`. Parsing and construction share the same field-layout routine
//! (`compute_layout`) so a freshly written buffer can immediately be read
//! back through the same accessors used for a frame received off the radio.
//!
//! Frames never own their backing buffer and are only ever as long-lived as
//! the event that created them.

#![cfg_attr(not(test), no_std)]

/// Upper bound on a frame's on-wire size, radio PHY payload limit.
pub const MAX_FRAME_LEN: usize = 128;
/// Length of the auxiliary security header: 4-byte frame counter + 1-byte key counter.
pub const SEC_HEADER_LEN: usize = 5;
/// Trailing Frame Check Sequence, validated by the radio, not by this codec.
pub const FCS_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Beacon,
    Data,
    Ack,
    MacCommand,
}

impl FrameType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0x00 => FrameType::Beacon,
            0x01 => FrameType::Data,
            0x02 => FrameType::Ack,
            _ => FrameType::MacCommand,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            FrameType::Beacon => 0x00,
            FrameType::Data => 0x01,
            FrameType::Ack => 0x02,
            FrameType::MacCommand => 0x03,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    None,
    Short,
    Extended,
}

impl AddressMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0x02 => AddressMode::Short,
            0x03 => AddressMode::Extended,
            _ => AddressMode::None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            AddressMode::None => 0x00,
            AddressMode::Short => 0x02,
            AddressMode::Extended => 0x03,
        }
    }

    pub fn addr_len(self) -> usize {
        match self {
            AddressMode::None => 0,
            AddressMode::Short => 2,
            AddressMode::Extended => 8,
        }
    }
}

/// The device's fixed 802.15.4 security level. Only the MIC length is used
/// by this codec; CCM* itself is an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    None,
    Mic32,
    Mic64,
    Mic128,
    Enc,
    EncMic32,
    EncMic64,
    EncMic128,
}

impl SecurityLevel {
    pub fn mic_len(self) -> usize {
        match self {
            SecurityLevel::None | SecurityLevel::Enc => 0,
            SecurityLevel::Mic32 | SecurityLevel::EncMic32 => 4,
            SecurityLevel::Mic64 | SecurityLevel::EncMic64 => 8,
            SecurityLevel::Mic128 | SecurityLevel::EncMic128 => 16,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            SecurityLevel::None => 0x00,
            SecurityLevel::Mic32 => 0x01,
            SecurityLevel::Mic64 => 0x02,
            SecurityLevel::Mic128 => 0x03,
            SecurityLevel::Enc => 0x04,
            SecurityLevel::EncMic32 => 0x05,
            SecurityLevel::EncMic64 => 0x06,
            SecurityLevel::EncMic128 => 0x07,
        }
    }
}

/// Bit-level accessors for the frame-control low/high bytes.
pub mod fc {
    use super::{AddressMode, FrameType};

    pub const SECURITY_ENABLED: u8 = 1 << 3;
    pub const FRAME_PENDING: u8 = 1 << 4;
    pub const ACK_REQUESTED: u8 = 1 << 5;
    pub const PAN_COMPRESSION: u8 = 1 << 6;

    pub fn frame_type(fc_low: u8) -> FrameType {
        FrameType::from_bits(fc_low)
    }

    pub fn security_enabled(fc_low: u8) -> bool {
        fc_low & SECURITY_ENABLED != 0
    }

    pub fn frame_pending(fc_low: u8) -> bool {
        fc_low & FRAME_PENDING != 0
    }

    pub fn pan_compression(fc_low: u8) -> bool {
        fc_low & PAN_COMPRESSION != 0
    }

    pub fn dst_addr_mode(fc_high: u8) -> AddressMode {
        AddressMode::from_bits(fc_high >> 2)
    }

    pub fn src_addr_mode(fc_high: u8) -> AddressMode {
        AddressMode::from_bits(fc_high >> 6)
    }

    pub fn frame_version(fc_high: u8) -> u8 {
        (fc_high >> 4) & 0x03
    }

    pub fn build_fc_high(dst: AddressMode, src: AddressMode, version: u8) -> u8 {
        (dst.bits() << 2) | ((version & 0x03) << 4) | (src.bits() << 6)
    }
}

/// The field-offset layout a given `(fc_low, fc_high)` pair implies. Computed
/// once and shared by parsing and construction.
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    pub fc_low: usize,
    pub fc_high: usize,
    pub seq_no: usize,
    pub dst_pan: Option<usize>,
    pub dst_addr: Option<usize>,
    pub src_pan: Option<usize>,
    pub src_addr: Option<usize>,
    pub frame_counter: Option<usize>,
    pub key_counter: Option<usize>,
    pub header_len: usize,
    pub sec_header_len: usize,
    pub payload: usize,
}

pub fn compute_layout(fc_low: u8, fc_high: u8) -> FrameLayout {
    let mut offset = 0usize;
    let fc_low_off = offset;
    offset += 1;
    let fc_high_off = offset;
    offset += 1;
    let seq_no_off = offset;
    offset += 1;

    let dst_mode = fc::dst_addr_mode(fc_high);
    let (dst_pan, dst_addr) = if dst_mode == AddressMode::None {
        (None, None)
    } else {
        let pan = offset;
        offset += 2;
        let addr = offset;
        offset += dst_mode.addr_len();
        (Some(pan), Some(addr))
    };

    let src_mode = fc::src_addr_mode(fc_high);
    let src_pan = if src_mode == AddressMode::None || fc::pan_compression(fc_low) {
        None
    } else {
        let pan = offset;
        offset += 2;
        Some(pan)
    };
    let src_addr = if src_mode == AddressMode::None {
        None
    } else {
        let addr = offset;
        offset += src_mode.addr_len();
        Some(addr)
    };

    let header_len = offset;

    let (frame_counter, key_counter, sec_header_len) = if fc::security_enabled(fc_low) {
        let counter = offset;
        offset += 4;
        let key = offset;
        offset += 1;
        (Some(counter), Some(key), SEC_HEADER_LEN)
    } else {
        (None, None, 0)
    };

    FrameLayout {
        fc_low: fc_low_off,
        fc_high: fc_high_off,
        seq_no: seq_no_off,
        dst_pan,
        dst_addr,
        src_pan,
        src_addr,
        frame_counter,
        key_counter,
        header_len,
        sec_header_len,
        payload: offset,
    }
}

/// The frame counter and key counter written into a secured frame at
/// construction. Always computed by the caller (the MAC-client owns the
/// live counters); this codec never reads or writes persistent state.
#[derive(Debug, Clone, Copy)]
pub struct SecurityFields {
    pub frame_counter: u32,
    pub key_counter: u8,
}

pub struct Frame<'a> {
    buf: &'a mut [u8],
    layout: FrameLayout,
    payload_len: usize,
}

impl<'a> Frame<'a> {
    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn fc_low(&self) -> u8 {
        self.buf[self.layout.fc_low]
    }

    pub fn fc_high(&self) -> u8 {
        self.buf[self.layout.fc_high]
    }

    pub fn seq_no(&self) -> u8 {
        self.buf[self.layout.seq_no]
    }

    pub fn frame_type(&self) -> FrameType {
        fc::frame_type(self.fc_low())
    }

    pub fn security_enabled(&self) -> bool {
        fc::security_enabled(self.fc_low())
    }

    pub fn frame_pending(&self) -> bool {
        fc::frame_pending(self.fc_low())
    }

    pub fn dst_addr_mode(&self) -> AddressMode {
        fc::dst_addr_mode(self.fc_high())
    }

    pub fn src_addr_mode(&self) -> AddressMode {
        fc::src_addr_mode(self.fc_high())
    }

    pub fn header_len(&self) -> usize {
        self.layout.header_len
    }

    pub fn sec_header_len(&self) -> usize {
        self.layout.sec_header_len
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn set_payload_len(&mut self, len: usize) {
        self.payload_len = len;
    }

    pub fn dst_pan(&self) -> Option<[u8; 2]> {
        self.layout
            .dst_pan
            .map(|o| [self.buf[o], self.buf[o + 1]])
    }

    pub fn src_pan(&self) -> Option<[u8; 2]> {
        self.layout
            .src_pan
            .map(|o| [self.buf[o], self.buf[o + 1]])
    }

    pub fn dst_addr(&self) -> Option<&[u8]> {
        self.layout
            .dst_addr
            .map(|o| &self.buf[o..o + self.dst_addr_mode().addr_len()])
    }

    pub fn src_addr(&self) -> Option<&[u8]> {
        self.layout
            .src_addr
            .map(|o| &self.buf[o..o + self.src_addr_mode().addr_len()])
    }

    pub fn frame_counter(&self) -> Option<u32> {
        self.layout.frame_counter.map(|o| {
            u32::from_le_bytes([
                self.buf[o],
                self.buf[o + 1],
                self.buf[o + 2],
                self.buf[o + 3],
            ])
        })
    }

    pub fn key_counter(&self) -> Option<u8> {
        self.layout.key_counter.map(|o| self.buf[o])
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[self.layout.payload..self.layout.payload + self.payload_len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let p = self.layout.payload;
        let l = self.payload_len;
        &mut self.buf[p..p + l]
    }

    /// The full remaining backing buffer from the payload offset onward,
    /// regardless of the currently recorded `payload_len`. Builders write
    /// through this while accumulating a length, then call
    /// `set_payload_len` once the final size is known.
    pub fn raw_payload_mut(&mut self) -> &mut [u8] {
        let p = self.layout.payload;
        &mut self.buf[p..]
    }

    /// Total on-wire length of header + security header + payload, not
    /// counting the trailing FCS (and MIC, folded into the radio/crypto
    /// layer's framing).
    pub fn frame_len(&self) -> usize {
        self.layout.payload + self.payload_len
    }

    fn set_dst_pan(&mut self, pan: [u8; 2]) {
        if let Some(o) = self.layout.dst_pan {
            self.buf[o] = pan[0];
            self.buf[o + 1] = pan[1];
        }
    }

    fn set_src_pan(&mut self, pan: [u8; 2]) {
        if let Some(o) = self.layout.src_pan {
            self.buf[o] = pan[0];
            self.buf[o + 1] = pan[1];
        }
    }

    fn set_dst_addr(&mut self, addr: &[u8]) {
        if let Some(o) = self.layout.dst_addr {
            self.buf[o..o + addr.len()].copy_from_slice(addr);
        }
    }

    fn set_src_addr(&mut self, addr: &[u8]) {
        if let Some(o) = self.layout.src_addr {
            self.buf[o..o + addr.len()].copy_from_slice(addr);
        }
    }

    fn set_frame_counter(&mut self, counter: u32) {
        if let Some(o) = self.layout.frame_counter {
            self.buf[o..o + 4].copy_from_slice(&counter.to_le_bytes());
        }
    }

    fn set_key_counter(&mut self, key_counter: u8) {
        if let Some(o) = self.layout.key_counter {
            self.buf[o] = key_counter;
        }
    }
}

/// Walks the layout rules over an already-received buffer. `frame_len` is
/// the total length the radio delivered, FCS included; `mic_len` is the
/// device's fixed security level's MIC length, used only when the
/// security-enabled bit is set.
pub fn parse(buf: &mut [u8], frame_len: usize, mic_len: usize) -> Frame<'_> {
    let fc_low = buf[0];
    let fc_high = buf[1];
    let layout = compute_layout(fc_low, fc_high);

    let mut payload_len = frame_len - layout.header_len - layout.sec_header_len - FCS_LEN;
    if layout.sec_header_len > 0 {
        payload_len -= mic_len;
    }
    debug_assert!(layout.payload + payload_len <= buf.len());

    Frame {
        buf,
        layout,
        payload_len,
    }
}

/// Writes `fc_low`, `fc_high`, and `seq_no` into a fresh buffer, then fills
/// the source PAN/address slots with the device's own identity and, if
/// security is requested, the live counter values the caller computed.
#[allow(clippy::too_many_arguments)]
pub fn initialize(
    fc_low: u8,
    fc_high: u8,
    seq_no: u8,
    buf: &mut [u8],
    src_pan: Option<[u8; 2]>,
    src_eui: Option<[u8; 8]>,
    security: Option<SecurityFields>,
) -> Frame<'_> {
    buf[0] = fc_low;
    buf[1] = fc_high;
    buf[2] = seq_no;

    let layout = compute_layout(fc_low, fc_high);
    let mut frame = Frame {
        buf,
        layout,
        payload_len: 0,
    };

    if let Some(pan) = src_pan {
        frame.set_src_pan(pan);
    }
    // Short-mode source addressing is not used post-association in this
    // protocol; only extended addresses are ever copied in.
    if frame.src_addr_mode() == AddressMode::Extended {
        if let Some(eui) = src_eui {
            frame.set_src_addr(&eui);
        }
    }
    if let Some(sec) = security {
        frame.set_frame_counter(sec.frame_counter);
        frame.set_key_counter(sec.key_counter);
    }

    frame
}

/// Builds a response view from a received frame: frame-pending cleared,
/// destination mode set to the peer's source mode, source mode forced to
/// extended, security enabled iff the device is currently associated.
/// Frame counter and key counter are always re-derived by `initialize`,
/// never copied from `src`.
#[allow(clippy::too_many_arguments)]
pub fn initialize_response<'a>(
    src: &Frame<'_>,
    dst_buf: &'a mut [u8],
    seq_no: u8,
    device_pan: [u8; 2],
    device_eui: [u8; 8],
    security_enabled: bool,
    security: Option<SecurityFields>,
) -> Frame<'a> {
    let mut fc_low = src.fc_low() & !fc::FRAME_PENDING;
    if security_enabled {
        fc_low |= fc::SECURITY_ENABLED;
    } else {
        fc_low &= !fc::SECURITY_ENABLED;
    }

    let new_dst_mode = src.src_addr_mode();
    let version = fc::frame_version(src.fc_high());
    let fc_high = fc::build_fc_high(new_dst_mode, AddressMode::Extended, version);

    let mut dst = initialize(
        fc_low,
        fc_high,
        seq_no,
        dst_buf,
        Some(device_pan),
        Some(device_eui),
        security,
    );

    if dst.layout.dst_pan.is_some() {
        if let Some(pan) = src.src_pan().or_else(|| src.dst_pan()) {
            dst.set_dst_pan(pan);
        }
    }

    if dst.layout.dst_addr.is_some() {
        if let Some(src_addr) = src.src_addr() {
            dst.set_dst_addr(src_addr);
        }
    }

    dst
}
