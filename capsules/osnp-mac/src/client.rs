// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The four-state device lifecycle: scan for a coordinator, associate,
//! stay associated while polling for pending data, and fall back to
//! scanning on disassociation. This is the only component in the stack
//! that holds process-wide state; the TLV and frame codecs it calls stay
//! pure over caller-supplied buffers.

use core::cell::{Cell, RefCell};

use log::{debug, trace, warn};
use osnp_frame::{self as frame, AddressMode, Frame, FrameType, SecurityFields};
use osnp_tlv::{self as tlv, Length};

use crate::config;
use crate::hil::{CommandDispatcher, NvStorage, Radio, Timer, TxStatus};

mod command {
    pub const ASSOCIATION_REQ: u8 = 0x01;
    pub const ASSOCIATION_RES: u8 = 0x02;
    pub const DISASSOCIATED: u8 = 0x03;
    pub const DATA_REQ: u8 = 0x04;
    pub const DISCOVER: u8 = 0x07;
    pub const KEY_UPDATE_REQ: u8 = 0x80;
    pub const KEY_UPDATE_RES: u8 = 0x81;
    pub const FRAME_COUNTER_ALIGN: u8 = 0x82;
}

/// Container tag wrapping application commands in an outbound DATA frame,
/// and the tag its response is wrapped in.
const REQUEST_TAG: u32 = 0xE0;
const RESPONSE_TAG: u32 = 0xE1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    ScanningChannels,
    WaitingAssociationRequest,
    Associated,
    WaitingPendingData,
}

pub struct MacClient<'a, R, T, N, D>
where
    R: Radio,
    T: Timer,
    N: NvStorage,
    D: CommandDispatcher,
{
    radio: &'a R,
    timer: &'a T,
    nv: &'a N,
    dispatcher: &'a D,

    eui: [u8; 8],
    pan: Cell<[u8; 2]>,
    channel: Cell<u8>,
    state: Cell<State>,
    seq_no: Cell<u8>,

    master_key: Cell<[u8; 16]>,
    rx_key: Cell<[u8; 16]>,
    tx_key: Cell<[u8; 16]>,

    rx_frame_counter: Cell<u32>,
    tx_frame_counter: Cell<u32>,
    rx_ceiling: Cell<u32>,
    tx_ceiling: Cell<u32>,

    tx_buf: RefCell<[u8; frame::MAX_FRAME_LEN]>,
}

impl<'a, R, T, N, D> MacClient<'a, R, T, N, D>
where
    R: Radio,
    T: Timer,
    N: NvStorage,
    D: CommandDispatcher,
{
    /// Loads persisted identity and, if already associated, resumes the
    /// live replay counters from their last-written ceiling rather than
    /// zero, so a reboot can never reuse a frame counter value.
    pub fn new(radio: &'a R, timer: &'a T, nv: &'a N, dispatcher: &'a D) -> Self {
        let eui = nv.load_eui();
        let pan = nv.load_pan();
        let channel = nv.load_channel();

        let client = MacClient {
            radio,
            timer,
            nv,
            dispatcher,
            eui,
            pan: Cell::new(pan),
            channel: Cell::new(channel),
            state: Cell::new(State::ScanningChannels),
            seq_no: Cell::new(0),
            master_key: Cell::new([0; 16]),
            rx_key: Cell::new([0; 16]),
            tx_key: Cell::new([0; 16]),
            rx_frame_counter: Cell::new(0),
            tx_frame_counter: Cell::new(0),
            rx_ceiling: Cell::new(0),
            tx_ceiling: Cell::new(0),
            tx_buf: RefCell::new([0; frame::MAX_FRAME_LEN]),
        };

        if channel == config::UNASSOCIATED_CHANNEL {
            client.channel.set(0);
            client.master_key.set(nv.load_master_key());
            client.state.set(State::ScanningChannels);
            timer.start_channel_scanning_timer();
        } else {
            let rx_ceiling = nv.load_rx_frame_counter_ceiling();
            let tx_ceiling = nv.load_tx_frame_counter_ceiling();
            client.rx_frame_counter.set(rx_ceiling);
            client.tx_frame_counter.set(tx_ceiling);
            client.rx_ceiling.set(rx_ceiling);
            client.tx_ceiling.set(tx_ceiling);
            client.rx_key.set(nv.load_rx_key());
            client.tx_key.set(nv.load_tx_key());
            client.state.set(State::Associated);
            timer.start_poll_timer();
        }

        radio.switch_channel(client.channel.get());
        client
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn on_timer_expired(&self) {
        match self.state.get() {
            State::ScanningChannels => {
                let next = (self.channel.get() + 1) % config::CHANNEL_COUNT;
                self.channel.set(next);
                self.radio.switch_channel(next);
                self.timer.start_channel_scanning_timer();
            }
            State::WaitingAssociationRequest => {
                self.state.set(State::ScanningChannels);
                self.timer.start_channel_scanning_timer();
            }
            State::Associated => self.poll(),
            State::WaitingPendingData => {
                self.state.set(State::Associated);
                self.timer.start_poll_timer();
            }
        }
    }

    pub fn on_frame_sent(&self, status: TxStatus) {
        match self.state.get() {
            State::ScanningChannels => self.timer.start_channel_scanning_timer(),
            State::WaitingAssociationRequest => self.timer.start_association_wait_timer(),
            State::Associated | State::WaitingPendingData => {
                if status == TxStatus::Ok && self.radio.get_pending_frames() {
                    self.state.set(State::WaitingPendingData);
                    self.timer.start_pending_data_wait_timer();
                } else {
                    self.state.set(State::Associated);
                    self.timer.start_poll_timer();
                }
            }
        }
    }

    /// Runs the shared receive pipeline: state promotion, replay-window
    /// check, then dispatch by frame type. `buf` holds exactly `frame_len`
    /// bytes as delivered by the radio, FCS included.
    pub fn on_frame_received(&self, buf: &mut [u8], frame_len: usize) {
        let mic_len = config::SECURITY_LEVEL.mic_len();
        let received = frame::parse(buf, frame_len, mic_len);

        if self.state.get() == State::ScanningChannels {
            debug!("discovery request seen, waiting for association");
            self.state.set(State::WaitingAssociationRequest);
        } else if self.state.get() == State::Associated && received.frame_pending() {
            trace!("coordinator signalled pending data");
            self.state.set(State::WaitingPendingData);
        }

        if self.state.get() >= State::Associated {
            if !received.security_enabled() {
                self.timer.start_poll_timer();
                return;
            }

            let counter = received.frame_counter().unwrap_or(0);
            if counter <= self.rx_frame_counter.get() {
                warn!(
                    "rejecting frame counter {} at or below live counter {}",
                    counter,
                    self.rx_frame_counter.get()
                );
                self.send_frame_counter_align(&received);
                return;
            }
            self.rx_frame_counter.set(counter);
            if self.rx_frame_counter.get() >= self.rx_ceiling.get() {
                let ceiling = self.rx_ceiling.get() + config::FRAME_COUNTER_WINDOW;
                trace!("rx frame counter ceiling advancing to {ceiling}");
                self.rx_ceiling.set(ceiling);
                self.nv.write_rx_frame_counter_ceiling(ceiling);
            }
        }

        match received.frame_type() {
            FrameType::Data => self.handle_data_frame(&received),
            FrameType::MacCommand => self.handle_mac_command(&received),
            FrameType::Beacon | FrameType::Ack => {}
        }
    }

    fn poll(&self) {
        let fc_low = FrameType::MacCommand.bits() | frame::fc::ACK_REQUESTED;
        let fc_high = frame::fc::build_fc_high(AddressMode::None, AddressMode::Extended, 0);

        let mut tx_buf = self.tx_buf.borrow_mut();
        let frame_len;
        {
            let mut tx = frame::initialize(
                fc_low,
                fc_high,
                self.next_seq_no(),
                &mut tx_buf[..],
                Some(self.pan.get()),
                Some(self.eui),
                None,
            );
            let raw = tx.raw_payload_mut();
            raw[0] = command::DATA_REQ;
            tx.set_payload_len(1);
            frame_len = tx.frame_len();
        }
        self.radio.transmit_frame(&mut tx_buf[..frame_len], frame_len);
    }

    fn handle_mac_command(&self, src: &Frame<'_>) {
        let payload = src.payload();
        if payload.is_empty() {
            return;
        }
        let cmd = payload[0];
        if self.state.get() < State::Associated {
            match cmd {
                command::DISCOVER => self.handle_discovery_request(src),
                command::ASSOCIATION_REQ => self.handle_association_request(src),
                _ => {}
            }
        } else {
            match cmd {
                command::DISASSOCIATED => self.handle_disassociation(),
                command::KEY_UPDATE_REQ => self.handle_key_update(src),
                _ => {}
            }
        }
    }

    fn handle_discovery_request(&self, src: &Frame<'_>) {
        let mut tx_buf = self.tx_buf.borrow_mut();
        let frame_len;
        {
            let mut tx = frame::initialize_response(
                src,
                &mut tx_buf[..],
                self.next_seq_no(),
                self.pan.get(),
                self.eui,
                false,
                None,
            );
            let raw = tx.raw_payload_mut();
            raw[0] = command::DISCOVER;
            tx.set_payload_len(1);
            frame_len = tx.frame_len();
        }
        self.radio.transmit_frame(&mut tx_buf[..frame_len], frame_len);
        // State was already promoted to WAITING_ASSOCIATION_REQUEST by the
        // generic receive pipeline; on_frame_sent's per-state table arms
        // the association-wait timer once this transmission completes.
        self.timer.stop_active_timer();
    }

    fn handle_association_request(&self, src: &Frame<'_>) {
        let src_pan = src.src_pan().unwrap_or_else(|| self.pan.get());
        self.pan.set(src_pan);
        self.nv.write_pan(src_pan);
        self.nv.write_channel(self.channel.get());

        self.reset_security(src.payload());

        self.timer.stop_active_timer();
        self.state.set(State::Associated);

        let fc_low = FrameType::MacCommand.bits() | frame::fc::ACK_REQUESTED | frame::fc::SECURITY_ENABLED;
        let fc_high = frame::fc::build_fc_high(AddressMode::None, AddressMode::Extended, 0);

        let mut tx_buf = self.tx_buf.borrow_mut();
        let frame_len;
        {
            let security = self.next_tx_security(true);
            let mut tx = frame::initialize(
                fc_low,
                fc_high,
                self.next_seq_no(),
                &mut tx_buf[..],
                Some(self.pan.get()),
                Some(self.eui),
                security,
            );
            let raw = tx.raw_payload_mut();
            raw[0] = command::ASSOCIATION_RES;
            raw[1] = config::DEVICE_CAPABILITIES;
            raw[2] = config::SECURITY_LEVEL.bits();
            tx.set_payload_len(3);
            frame_len = tx.frame_len();
        }
        self.radio.transmit_frame(&mut tx_buf[..frame_len], frame_len);
    }

    fn handle_key_update(&self, src: &Frame<'_>) {
        self.reset_security(src.payload());

        let mut tx_buf = self.tx_buf.borrow_mut();
        let frame_len;
        {
            let security = self.next_tx_security(true);
            let mut tx = frame::initialize_response(
                src,
                &mut tx_buf[..],
                self.next_seq_no(),
                self.pan.get(),
                self.eui,
                true,
                security,
            );
            let raw = tx.raw_payload_mut();
            raw[0] = command::KEY_UPDATE_RES;
            tx.set_payload_len(1);
            frame_len = tx.frame_len();
        }
        self.radio.transmit_frame(&mut tx_buf[..frame_len], frame_len);
    }

    fn handle_disassociation(&self) {
        debug!("disassociated, returning to channel scan");
        let cleared_pan = [0u8, 0u8];
        self.pan.set(cleared_pan);
        self.nv.write_pan(cleared_pan);
        self.nv.write_channel(config::UNASSOCIATED_CHANNEL);

        self.master_key.set(self.nv.load_master_key());
        self.channel.set(0);
        self.state.set(State::ScanningChannels);

        self.timer.stop_active_timer();
        self.timer.start_channel_scanning_timer();
    }

    fn send_frame_counter_align(&self, src: &Frame<'_>) {
        let expected = self.rx_frame_counter.get() + 1;

        let mut tx_buf = self.tx_buf.borrow_mut();
        let frame_len;
        {
            let security = self.next_tx_security(true);
            let mut tx = frame::initialize_response(
                src,
                &mut tx_buf[..],
                self.next_seq_no(),
                self.pan.get(),
                self.eui,
                true,
                security,
            );
            let raw = tx.raw_payload_mut();
            raw[0] = command::FRAME_COUNTER_ALIGN;
            raw[1..5].copy_from_slice(&expected.to_le_bytes());
            tx.set_payload_len(5);
            frame_len = tx.frame_len();
        }
        self.radio.transmit_frame(&mut tx_buf[..frame_len], frame_len);
    }

    /// Walks the `0xE0`-tagged command container, dispatching each TLV
    /// node to the application and mirroring responses into a matching
    /// `0xE1` container. Indefinite-length containers are ended by
    /// lookahead for the `00 00` terminator rather than a precomputed
    /// offset; definite-length containers use the offset directly.
    fn handle_data_frame(&self, src: &Frame<'_>) {
        let payload = src.payload();
        if payload.is_empty() {
            return;
        }
        let mut src_cursor = 0usize;

        let (tag, n) = match tlv::read_tag(payload) {
            Ok(v) => v,
            Err(_) => return,
        };
        src_cursor += n;
        if tag != REQUEST_TAG {
            return;
        }

        if src_cursor >= payload.len() {
            return;
        }
        let (length, n) = tlv::read_length(&payload[src_cursor..]);
        src_cursor += n;
        let end = match length {
            Length::Definite(len) => Some(src_cursor + len as usize),
            Length::Indefinite => None,
        };

        let is_associated = self.state.get() >= State::Associated;

        let mut tx_buf = self.tx_buf.borrow_mut();
        let frame_len;
        {
            let security = self.next_tx_security(is_associated);
            let mut tx = frame::initialize_response(
                src,
                &mut tx_buf[..],
                self.next_seq_no(),
                self.pan.get(),
                self.eui,
                is_associated,
                security,
            );

            let mut tx_cursor = {
                let raw = tx.raw_payload_mut();
                let mut cursor = tlv::write_tag(raw, RESPONSE_TAG);
                cursor += tlv::write_undefined_length(&mut raw[cursor..]);
                cursor
            };

            loop {
                let more = match end {
                    Some(e) => src_cursor < e,
                    None => {
                        src_cursor + 1 < payload.len()
                            && (payload[src_cursor] != 0 || payload[src_cursor + 1] != 0)
                    }
                };
                if !more {
                    break;
                }
                self.dispatcher.process_command(
                    src,
                    &mut src_cursor,
                    &mut tx,
                    &mut tx_cursor,
                    is_associated,
                );
            }

            {
                let raw = tx.raw_payload_mut();
                tx_cursor += tlv::write_undefined_length_terminator(&mut raw[tx_cursor..]);
            }
            tx.set_payload_len(tx_cursor);
            frame_len = tx.frame_len();
        }
        self.radio.transmit_frame(&mut tx_buf[..frame_len], frame_len);
    }

    /// Installs fresh session keys and resets both replay counters and
    /// their persisted ceilings to the base of a new window.
    fn reset_security(&self, payload: &[u8]) {
        let mut rx_key = [0u8; 16];
        rx_key.copy_from_slice(&payload[1..17]);
        let mut tx_key = [0u8; 16];
        tx_key.copy_from_slice(&payload[17..33]);

        self.rx_key.set(rx_key);
        self.tx_key.set(tx_key);
        self.nv.write_rx_key(rx_key);
        self.nv.write_tx_key(tx_key);

        self.rx_frame_counter.set(0);
        self.tx_frame_counter.set(0);
        self.rx_ceiling.set(config::FRAME_COUNTER_WINDOW);
        self.tx_ceiling.set(config::FRAME_COUNTER_WINDOW);
        self.nv
            .write_rx_frame_counter_ceiling(config::FRAME_COUNTER_WINDOW);
        self.nv
            .write_tx_frame_counter_ceiling(config::FRAME_COUNTER_WINDOW);
    }

    fn next_seq_no(&self) -> u8 {
        let seq = self.seq_no.get();
        self.seq_no.set(seq.wrapping_add(1));
        seq
    }

    /// Returns the wire value for the next secured transmission and
    /// advances the live counter, rolling the persisted ceiling forward
    /// if the advance crosses it. Returns `None` for an unsecured send.
    fn next_tx_security(&self, enabled: bool) -> Option<SecurityFields> {
        if !enabled {
            return None;
        }
        let counter = self.tx_frame_counter.get();
        self.tx_frame_counter.set(counter.wrapping_add(1));
        if self.tx_frame_counter.get() >= self.tx_ceiling.get() {
            let ceiling = self.tx_ceiling.get() + config::FRAME_COUNTER_WINDOW;
            self.tx_ceiling.set(ceiling);
            self.nv.write_tx_frame_counter_ceiling(ceiling);
        }
        Some(SecurityFields {
            frame_counter: counter,
            key_counter: 0x01,
        })
    }
}
