// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deployment-fixed parameters. There is no runtime configuration object:
//! a device image ships with one security level and one replay-window
//! stride, and the Non-goals rule out dynamic allocation anyway.

use osnp_frame::SecurityLevel;

/// Security level this device negotiates in ASSOCIATION_RES. CCM* with a
/// 4-byte MIC, the level most constrained 802.15.4 deployments default to.
pub const SECURITY_LEVEL: SecurityLevel = SecurityLevel::EncMic32;

/// Capability byte sent in ASSOCIATION_RES. No bits are currently defined.
pub const DEVICE_CAPABILITIES: u8 = 0x00;

/// Replay-window stride: the persisted counter ceiling advances by this
/// amount each time the live counter crosses it.
pub const FRAME_COUNTER_WINDOW: u32 = 128;

/// Number of 802.15.4 channels scanned while unassociated.
pub const CHANNEL_COUNT: u8 = 16;

/// Persisted-channel sentinel meaning "never associated".
pub const UNASSOCIATED_CHANNEL: u8 = 0xFF;
