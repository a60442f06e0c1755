//! SSP v6 command opcodes.
//!
//! `POLL`, `SYNC` and the refill-mode magic payload match the vendor's
//! implementation guide exactly. The guide itself isn't part of this
//! project's reference material, so the rest of this table is a
//! self-consistent assignment following the general SSP numbering
//! convention; see DESIGN.md.

/// Probes for a peer at a given address and resets its encryption/sequence
/// state.
pub const SYNC: u8 = 0x11;
/// Pins the protocol version the host will use. Body: single version byte.
pub const HOST_PROTOCOL_VERSION: u8 = 0x06;
/// Requests the peer's setup snapshot: unit type, firmware/dataset
/// strings, channel table.
pub const SETUP_REQUEST: u8 = 0x05;
/// Drains the peer's queued events.
pub const POLL: u8 = 0x07;

/// Sets the note-channel inhibit mask on the validator.
pub const SET_INHIBITS: u8 = 0x02;
/// Sets the coin-channel inhibit mask on the hopper.
pub const SET_COINMECH_INHIBITS: u8 = 0x40;
/// Globally enables a unit to act on commands.
pub const ENABLE: u8 = 0x0A;
/// Globally disables a unit.
pub const DISABLE: u8 = 0x09;
/// Enables payout functionality on the validator.
pub const ENABLE_PAYOUT: u8 = 0x5C;
/// Assigns each denomination to the cashbox or storage route.
pub const SET_ROUTE: u8 = 0x3B;
/// Vendor-mandated refill-mode toggle; body is always the fixed 8-byte
/// magic sequence below.
pub const SET_REFILL_MODE: u8 = 0x30;

/// Sends the host's DH generator.
pub const SET_GENERATOR: u8 = 0x4A;
/// Sends the host's DH modulus.
pub const SET_MODULUS: u8 = 0x4B;
/// Sends the host's DH intermediate value and receives the peer's.
pub const REQUEST_KEY_EXCHANGE: u8 = 0x4C;

/// Re-runs the peer's internal calibration routine.
pub const RUN_CALIBRATION: u8 = 0x26;
/// Sets the known count of a denomination in the recycler. Body:
/// `value(4 LE) | level(2 LE)`.
pub const SET_DENOMINATION_LEVEL: u8 = 0x34;
/// Sets the cashbox payout limit for a denomination.
pub const SET_CASHBOX_PAYOUT_LIMIT: u8 = 0x3D;
/// Returns the known count of every denomination in the recycler.
pub const GET_ALL_LEVELS: u8 = 0x22;
/// Returns cashbox contents since the last payout operation.
pub const CASHBOX_PAYOUT_OPERATION_DATA: u8 = 0x3F;
/// Returns the peer's firmware version string.
pub const GET_FIRMWARE_VERSION: u8 = 0x20;
/// Returns the peer's dataset version string.
pub const GET_DATASET_VERSION: u8 = 0x21;
/// Returns per-channel teach/security classification.
pub const CHANNEL_SECURITY_DATA: u8 = 0x3C;
/// Returns the reason code for the most recently rejected note.
pub const LAST_REJECT_NOTE: u8 = 0x17;
/// Sets the validator's bezel colour and mode.
pub const CONFIGURE_BEZEL: u8 = 0x54;

/// Empties the hopper's recycler into the cashbox.
pub const EMPTY: u8 = 0x3A;
/// Empties the hopper's recycler in tracked, metered steps.
pub const SMART_EMPTY: u8 = 0x52;
/// Pays out a note/coin amount from the recycler. The `test` variant in
/// the router sets a dry-run flag in the body rather than using a
/// different opcode.
pub const PAYOUT_AMOUNT: u8 = 0x33;
/// Floats the recycler to a target amount, routing the remainder to the
/// cashbox. Same test/dry-run convention as `PAYOUT_AMOUNT`.
pub const FLOAT_AMOUNT: u8 = 0x36;

/// The vendor-mandated refill-mode body.
pub const REFILL_MODE_MAGIC: [u8; 8] = [0x05, 0x81, 0x10, 0x11, 0x01, 0x01, 0x52, 0xF5];
