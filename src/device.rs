//! Peer data model, lifecycle, and the per-peer-kind event mapping —
//! modelled as polymorphism over a capability trait rather than a function
//! pointer.

use rand::RngCore;

use crate::command_session::{self, CommandResponse};
use crate::error::{Error, ResponseCode, Result};
use crate::protocol::crypto::KeyExchange;
use crate::protocol::events::{AmountEventKind, ChannelEventKind, RawEvent, StatusEvent};
use crate::protocol::{commands, crypto};
use crate::serial_link::SerialLink;

pub const HOPPER_ADDRESS: u8 = 0x10;
pub const VALIDATOR_ADDRESS: u8 = 0x00;
pub const DEFAULT_KEY: u64 = 0x0123_4567_0123_4567;
pub const CURRENCY: &str = "EUR";

const HOPPER_UNIT_TYPE: u8 = 0x03;
const VALIDATOR_UNIT_TYPES: [u8; 2] = [0x06, 0x07];
const PROTOCOL_VERSION: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    Hopper,
    Validator,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelEntry {
    pub value: u32,
    pub currency: [u8; 3],
}

#[derive(Debug, Clone, Default)]
pub struct ChannelTable(pub Vec<ChannelEntry>);

impl ChannelTable {
    pub fn get(&self, channel: u8) -> Option<&ChannelEntry> {
        channel
            .checked_sub(1)
            .and_then(|i| self.0.get(i as usize))
    }
}

/// A physical device and everything about its session the command session
/// and poll loop need.
pub struct Peer {
    pub kind: PeerKind,
    pub name: &'static str,
    pub address: u8,
    pub preshared_key: u64,
    pub session_key: Option<[u8; 16]>,
    pub counter: u32,
    pub seq: bool,
    pub channel_inhibits: u16,
    pub firmware: String,
    pub dataset: String,
    pub unit_type: u8,
    pub channel_table: ChannelTable,
    pub available: bool,
}

impl Peer {
    pub fn new(kind: PeerKind, address: u8, name: &'static str, preshared_key: u64) -> Self {
        Self {
            kind,
            name,
            address,
            preshared_key,
            session_key: None,
            counter: 0,
            seq: false,
            channel_inhibits: 0,
            firmware: String::new(),
            dataset: String::new(),
            unit_type: 0,
            channel_table: ChannelTable::default(),
            available: false,
        }
    }

    pub fn behavior(&self) -> &'static dyn PeerBehavior {
        match self.kind {
            PeerKind::Hopper => &HopperBehavior,
            PeerKind::Validator => &ValidatorBehavior,
        }
    }
}

/// Per-peer-kind event mapping, as a capability rather than a function
/// pointer: the validator needs its channel table to compute a credit
/// amount, the hopper doesn't.
pub trait PeerBehavior: Send + Sync {
    fn map_event(&self, table: &ChannelTable, raw: &RawEvent) -> Vec<DomainEvent>;
}

pub struct HopperBehavior;
pub struct ValidatorBehavior;

impl PeerBehavior for HopperBehavior {
    fn map_event(&self, _table: &ChannelTable, raw: &RawEvent) -> Vec<DomainEvent> {
        map_generic_event(raw, None)
    }
}

impl PeerBehavior for ValidatorBehavior {
    fn map_event(&self, table: &ChannelTable, raw: &RawEvent) -> Vec<DomainEvent> {
        map_generic_event(raw, Some(table))
    }
}

fn map_generic_event(raw: &RawEvent, table: Option<&ChannelTable>) -> Vec<DomainEvent> {
    match raw {
        RawEvent::Status(StatusEvent::Reset) => vec![DomainEvent::named("reset")],
        RawEvent::Status(StatusEvent::Empty) => vec![DomainEvent::named("empty")],
        RawEvent::Status(StatusEvent::StackerFull) => vec![DomainEvent::named("stacker-full")],
        RawEvent::Status(StatusEvent::Jammed) => vec![DomainEvent::named("jammed")],
        RawEvent::Status(StatusEvent::Halted) => vec![DomainEvent::named("halted")],

        RawEvent::Channel { kind, channel } => {
            let name = match kind {
                ChannelEventKind::Read => "read",
                ChannelEventKind::Credit => "credit",
            };
            if *channel == 0 {
                return vec![DomainEvent::named("reading")];
            }
            let amount = table
                .and_then(|t| t.get(*channel))
                .map(|entry| entry.value.saturating_mul(100));
            vec![DomainEvent::named(name)
                .with_channel(*channel)
                .with_amount_opt(amount)]
        }

        RawEvent::Amount {
            kind,
            amount,
            currency,
        } => {
            let name = match kind {
                AmountEventKind::CoinCredit => "coin-credit",
                AmountEventKind::Floating => "floating",
                AmountEventKind::Floated => "floated",
                AmountEventKind::Dispensing => "dispensing",
                AmountEventKind::Dispensed => "dispensed",
                AmountEventKind::CashboxPaid => "cashbox-paid",
                AmountEventKind::Timeout => "timeout",
                AmountEventKind::SmartEmptying => "smart-emptying",
                AmountEventKind::SmartEmptied => "smart-emptied",
            };
            vec![DomainEvent::named(name)
                .with_amount(*amount)
                .with_currency(currency)]
        }

        RawEvent::IncompletePayout {
            dispensed,
            requested,
            currency,
        } => vec![DomainEvent::named("incomplete-payout")
            .with_amount(*dispensed)
            .with_requested(*requested)
            .with_currency(currency)],

        RawEvent::IncompleteFloat {
            dispensed,
            requested,
            currency,
        } => vec![DomainEvent::named("incomplete-float")
            .with_amount(*dispensed)
            .with_requested(*requested)
            .with_currency(currency)],

        RawEvent::CalibrationFail(_) => Vec::new(),
    }
}

/// A record ready to be published to a `*-event` or `payout-event` topic.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DomainEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<u32>,
}

impl DomainEvent {
    pub fn named(event: &str) -> Self {
        Self {
            event: event.to_string(),
            amount: None,
            channel: None,
            currency: None,
            requested: None,
        }
    }

    pub fn with_amount(mut self, amount: u32) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_amount_opt(mut self, amount: Option<u32>) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_currency(mut self, cc: &[u8; 3]) -> Self {
        self.currency = Some(String::from_utf8_lossy(cc).trim_end().to_string());
        self
    }

    pub fn with_requested(mut self, requested: u32) -> Self {
        self.requested = Some(requested);
        self
    }
}

/// Probes for the peer and walks it through encryption setup, protocol
/// version pinning and `SETUP_REQUEST`, then the peer-kind-specific enable
/// step. Marks the peer available only on full success; any failure
/// abandons setup for this peer without affecting the other peer's
/// lifecycle, matching the original daemon's independent-per-peer setup.
pub fn bring_up<R: RngCore>(
    link: &mut SerialLink,
    peer: &mut Peer,
    accept_coins: bool,
    rng: &mut R,
) -> Result<()> {
    peer.seq = false;
    peer.session_key = None;
    peer.counter = 0;

    command_session::raw_exec(link, peer, &[commands::SYNC], rng)?;
    negotiate_key(link, peer, rng)?;
    pin_protocol_version(link, peer, rng)?;
    run_setup_request(link, peer, rng)?;
    enable(link, peer, accept_coins, rng)?;

    peer.available = true;
    Ok(())
}

pub fn pin_protocol_version<R: RngCore>(
    link: &mut SerialLink,
    peer: &mut Peer,
    rng: &mut R,
) -> Result<()> {
    let response = command_session::exec(
        link,
        peer,
        commands::HOST_PROTOCOL_VERSION,
        &[PROTOCOL_VERSION],
        rng,
        negotiate_key,
    )?;
    require_ok(response)
}

fn run_setup_request<R: RngCore>(link: &mut SerialLink, peer: &mut Peer, rng: &mut R) -> Result<()> {
    let response = command_session::exec(
        link,
        peer,
        commands::SETUP_REQUEST,
        &[],
        rng,
        negotiate_key,
    )?;
    if response.code != ResponseCode::Ok {
        return Err(Error::Protocol(response.code));
    }
    parse_setup_response(peer, &response.body)
}

fn parse_setup_response(peer: &mut Peer, body: &[u8]) -> Result<()> {
    let mut cursor = body;
    peer.unit_type = take_u8(&mut cursor)?;
    peer.firmware = take_ascii(&mut cursor, 4)?;

    let channel_count = take_u8(&mut cursor)? as usize;
    let mut values = Vec::with_capacity(channel_count);
    for _ in 0..channel_count {
        let raw = take_bytes(&mut cursor, 4)?;
        values.push(u32::from_le_bytes(raw.try_into().unwrap()));
    }

    peer.dataset = take_ascii(&mut cursor, 3)?;

    let mut entries = Vec::with_capacity(channel_count);
    for value in values {
        let cc = take_bytes(&mut cursor, 3)?;
        entries.push(ChannelEntry {
            value,
            currency: cc.try_into().unwrap(),
        });
    }
    peer.channel_table = ChannelTable(entries);
    Ok(())
}

fn take_u8(cursor: &mut &[u8]) -> Result<u8> {
    let (&b, rest) = cursor
        .split_first()
        .ok_or(Error::Truncated { expected: 1, actual: 0 })?;
    *cursor = rest;
    Ok(b)
}

fn take_bytes<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if cursor.len() < n {
        return Err(Error::Truncated {
            expected: n,
            actual: cursor.len(),
        });
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}

fn take_ascii(cursor: &mut &[u8], n: usize) -> Result<String> {
    Ok(String::from_utf8_lossy(take_bytes(cursor, n)?).into_owned())
}

fn enable<R: RngCore>(
    link: &mut SerialLink,
    peer: &mut Peer,
    accept_coins: bool,
    rng: &mut R,
) -> Result<()> {
    match peer.kind {
        PeerKind::Hopper => enable_hopper(link, peer, accept_coins, rng),
        PeerKind::Validator => enable_validator(link, peer, rng),
    }
}

fn enable_hopper<R: RngCore>(
    link: &mut SerialLink,
    peer: &mut Peer,
    accept_coins: bool,
    rng: &mut R,
) -> Result<()> {
    let mask: u16 = if accept_coins { 0xFFFF } else { 0x0000 };
    let body = [(mask & 0xFF) as u8, (mask >> 8) as u8];
    let response = command_session::exec(
        link,
        peer,
        commands::SET_COINMECH_INHIBITS,
        &body,
        rng,
        negotiate_key,
    )?;
    require_ok(response)?;
    peer.channel_inhibits = mask;
    Ok(())
}

fn enable_validator<R: RngCore>(link: &mut SerialLink, peer: &mut Peer, rng: &mut R) -> Result<()> {
    let response = command_session::exec(link, peer, commands::ENABLE_PAYOUT, &[], rng, negotiate_key)?;
    require_ok(response)?;

    for (index, entry) in peer.channel_table.0.iter().enumerate() {
        let route = validator_route(entry.value);
        let body = [(index + 1) as u8, route];
        let response =
            command_session::exec(link, peer, commands::SET_ROUTE, &body, rng, negotiate_key)?;
        require_ok(response)?;
    }

    let response = command_session::exec(
        link,
        peer,
        commands::SET_INHIBITS,
        &[0x00, 0x00],
        rng,
        negotiate_key,
    )?;
    require_ok(response)?;
    peer.channel_inhibits = 0;

    let response = command_session::exec(
        link,
        peer,
        commands::SET_REFILL_MODE,
        &commands::REFILL_MODE_MAGIC,
        rng,
        negotiate_key,
    )?;
    require_ok(response)
}

/// Denominations 500/1000/2000 route to the cashbox, the rest to storage.
/// `0` selects cashbox, `1` storage.
fn validator_route(value: u32) -> u8 {
    match value {
        500 | 1000 | 2000 => 0,
        _ => 1,
    }
}

pub fn negotiate_key<R: RngCore>(link: &mut SerialLink, peer: &mut Peer, rng: &mut R) -> Result<()> {
    peer.session_key = None;
    let kex = KeyExchange::from_rng(rng);

    command_session::raw_exec(
        link,
        peer,
        &prepend(commands::SET_GENERATOR, &kex.generator.to_le_bytes()),
        rng,
    )?;
    command_session::raw_exec(
        link,
        peer,
        &prepend(commands::SET_MODULUS, &kex.modulus.to_le_bytes()),
        rng,
    )?;
    let response = command_session::raw_exec(
        link,
        peer,
        &prepend(
            commands::REQUEST_KEY_EXCHANGE,
            &kex.host_intermediate().to_le_bytes(),
        ),
        rng,
    )?;

    if response.code != ResponseCode::Ok || response.body.len() < 8 {
        return Err(Error::KeyNotSet);
    }
    let peer_intermediate = u64::from_le_bytes(response.body[0..8].try_into().unwrap());
    let derived_low = kex.derive_low_bits(peer_intermediate);
    peer.session_key = Some(crypto::session_key(peer.preshared_key, derived_low));
    peer.counter = 0;
    Ok(())
}

fn prepend(cmd_byte: u8, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(cmd_byte);
    payload.extend_from_slice(body);
    payload
}

fn require_ok(response: CommandResponse) -> Result<()> {
    if response.code == ResponseCode::Ok {
        Ok(())
    } else {
        Err(Error::Protocol(response.code))
    }
}

pub fn is_hopper_unit_type(unit_type: u8) -> bool {
    unit_type == HOPPER_UNIT_TYPE
}

pub fn is_validator_unit_type(unit_type: u8) -> bool {
    VALIDATOR_UNIT_TYPES.contains(&unit_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::events::{AmountEventKind, ChannelEventKind};

    #[test]
    fn validator_credit_amount_is_channel_value_times_100() {
        let table = ChannelTable(vec![
            ChannelEntry { value: 0, currency: *b"EUR" },
            ChannelEntry { value: 10, currency: *b"EUR" },
        ]);
        let raw = RawEvent::Channel { kind: ChannelEventKind::Credit, channel: 2 };
        let events = ValidatorBehavior.map_event(&table, &raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "credit");
        assert_eq!(events[0].amount, Some(1000));
        assert_eq!(events[0].channel, Some(2));
    }

    #[test]
    fn channel_zero_is_a_reading_subevent() {
        let table = ChannelTable::default();
        let raw = RawEvent::Channel { kind: ChannelEventKind::Read, channel: 0 };
        let events = ValidatorBehavior.map_event(&table, &raw);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "reading");
    }

    #[test]
    fn amount_events_carry_trimmed_currency_code() {
        let raw = RawEvent::Amount {
            kind: AmountEventKind::CoinCredit,
            amount: 500,
            currency: *b"EUR",
        };
        let events = HopperBehavior.map_event(&ChannelTable::default(), &raw);
        assert_eq!(events[0].currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn calibration_fail_is_not_itself_a_domain_event() {
        let raw = RawEvent::CalibrationFail(0x02);
        let events = HopperBehavior.map_event(&ChannelTable::default(), &raw);
        assert!(events.is_empty());
    }

    #[test]
    fn validator_routes_small_denominations_to_cashbox() {
        assert_eq!(validator_route(500), 0);
        assert_eq!(validator_route(1000), 0);
        assert_eq!(validator_route(2000), 0);
        assert_eq!(validator_route(5000), 1);
        assert_eq!(validator_route(50000), 1);
    }
}
