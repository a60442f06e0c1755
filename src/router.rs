//! JSON command dispatch: one inbound bus message to one device operation
//! and one correlated reply.

use rand::RngCore;
use serde_json::{json, Value};

use crate::command_session::{self, CommandResponse};
use crate::device::{self, Peer};
use crate::error::{Error, ResponseCode};
use crate::protocol::commands;
use crate::serial_link::SerialLink;

/// What the router produced for one inbound message: which topic to
/// publish the reply on, the reply body itself, and whether the message
/// was a `quit` request the daemon shell must act on.
pub struct Outcome {
    pub topic: &'static str,
    pub body: Value,
    pub quit: bool,
}

pub fn response_topic_for(request_topic: &str) -> &'static str {
    match request_topic {
        "hopper-request" => "hopper-response",
        _ => "validator-response",
    }
}

/// Handles one inbound message on `request_topic`. `peer` is `None` when
/// that peer's hardware never came up; only `quit`/`test` are answered in
/// that case, everything else gets `{error:"hardware unavailable"}`.
pub fn handle(
    request_topic: &str,
    raw: &str,
    peer: Option<&mut Peer>,
    link: Option<&mut SerialLink>,
    rng: &mut impl RngCore,
) -> Outcome {
    let response_topic = response_topic_for(request_topic);

    let parsed: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            return Outcome {
                topic: response_topic,
                body: json!({
                    "error": "could not parse json",
                    "reason": e.to_string(),
                    "line": e.line(),
                }),
                quit: false,
            };
        }
    };

    let msg_id = match parsed.get("msgId").and_then(Value::as_str) {
        Some(s) => s.to_string(),
        None => {
            return Outcome {
                topic: response_topic,
                body: json!({ "error": "Property 'msgId' missing or of wrong type" }),
                quit: false,
            };
        }
    };
    let cmd = match parsed.get("cmd").and_then(Value::as_str) {
        Some(s) => s.to_string(),
        None => {
            return Outcome {
                topic: response_topic,
                body: envelope(&fresh_msg_id(), &msg_id, json!({ "error": "Property 'cmd' missing or of wrong type" })),
                quit: false,
            };
        }
    };

    let new_msg_id = fresh_msg_id();

    if cmd == "quit" {
        return Outcome {
            topic: response_topic,
            body: envelope(&new_msg_id, &msg_id, json!({ "result": "ok" })),
            quit: true,
        };
    }
    if cmd == "test" {
        return Outcome {
            topic: response_topic,
            body: envelope(&new_msg_id, &msg_id, json!({ "result": "ok" })),
            quit: false,
        };
    }

    let (Some(peer), Some(link)) = (peer, link) else {
        return Outcome {
            topic: response_topic,
            body: envelope(&new_msg_id, &msg_id, json!({ "error": "hardware unavailable" })),
            quit: false,
        };
    };

    let body = match dispatch(&cmd, &parsed, peer, link, rng) {
        Ok(result) => result,
        Err(DispatchError::Unknown) => json!({ "error": "unknown command", "cmd": cmd }),
        Err(DispatchError::Protocol(code)) => json!({ "sspError": code.as_error_str() }),
        Err(DispatchError::Domain(message)) => json!({ "error": message }),
    };

    Outcome {
        topic: response_topic,
        body: envelope(&new_msg_id, &msg_id, body),
        quit: false,
    }
}

fn envelope(msg_id: &str, correl_id: &str, mut body: Value) -> Value {
    let map = body.as_object_mut().expect("handlers always build objects");
    map.insert("msgId".to_string(), json!(msg_id));
    map.insert("correlId".to_string(), json!(correl_id));
    body
}

fn fresh_msg_id() -> String {
    uuid::Uuid::now_v1(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]).to_string()
}

enum DispatchError {
    Unknown,
    Protocol(ResponseCode),
    Domain(String),
}

impl From<Error> for DispatchError {
    fn from(e: Error) -> Self {
        match e {
            Error::Protocol(code) => DispatchError::Protocol(code),
            other => DispatchError::Domain(other.to_string()),
        }
    }
}

fn dispatch(
    cmd: &str,
    request: &Value,
    peer: &mut Peer,
    link: &mut SerialLink,
    rng: &mut impl RngCore,
) -> Result<Value, DispatchError> {
    match cmd {
        "enable" => ok_or_protocol(exec(link, peer, commands::ENABLE, &[], rng)?),
        "disable" => ok_or_protocol(exec(link, peer, commands::DISABLE, &[], rng)?),
        "empty" => ok_or_protocol(exec(link, peer, commands::EMPTY, &[], rng)?),
        "smart-empty" => ok_or_protocol(exec(link, peer, commands::SMART_EMPTY, &[], rng)?),

        "enable-channels" => set_channels(request, peer, link, rng, true),
        "disable-channels" => set_channels(request, peer, link, rng, false),
        "inhibit-channels" => inhibit_channels(request, peer, link, rng),

        "test-payout" => payout_or_float(request, peer, link, rng, commands::PAYOUT_AMOUNT, true),
        "do-payout" => payout_or_float(request, peer, link, rng, commands::PAYOUT_AMOUNT, false),
        "test-float" => payout_or_float(request, peer, link, rng, commands::FLOAT_AMOUNT, true),
        "do-float" => payout_or_float(request, peer, link, rng, commands::FLOAT_AMOUNT, false),

        "set-denomination-level" => set_denomination_level(request, peer, link, rng),
        "set-cashbox-payout-limit" => set_cashbox_payout_limit(request, peer, link, rng),
        "get-all-levels" => get_levels(peer, link, rng, false),
        "cashbox-payout-operation-data" => get_levels(peer, link, rng, true),

        "get-firmware-version" => {
            let response = exec(link, peer, commands::GET_FIRMWARE_VERSION, &[], rng)?;
            require_ok(&response)?;
            Ok(json!({ "result": ascii(&response.body) }))
        }
        "get-dataset-version" => {
            let response = exec(link, peer, commands::GET_DATASET_VERSION, &[], rng)?;
            require_ok(&response)?;
            Ok(json!({ "result": ascii(&response.body) }))
        }
        "channel-security-data" => channel_security_data(peer, link, rng),
        "last-reject-note" => {
            let response = exec(link, peer, commands::LAST_REJECT_NOTE, &[], rng)?;
            require_ok(&response)?;
            let reason = response.body.first().copied().unwrap_or(0);
            Ok(json!({ "reason": reason }))
        }
        "configure-bezel" => configure_bezel(request, peer, link, rng),

        _ => Err(DispatchError::Unknown),
    }
}

fn exec(
    link: &mut SerialLink,
    peer: &mut Peer,
    cmd_byte: u8,
    body: &[u8],
    rng: &mut impl RngCore,
) -> Result<CommandResponse, DispatchError> {
    command_session::exec(link, peer, cmd_byte, body, rng, device::negotiate_key).map_err(DispatchError::from)
}

fn require_ok(response: &CommandResponse) -> Result<(), DispatchError> {
    if response.code == ResponseCode::Ok {
        Ok(())
    } else {
        Err(DispatchError::Protocol(response.code))
    }
}

fn ok_or_protocol(response: CommandResponse) -> Result<Value, DispatchError> {
    require_ok(&response)?;
    Ok(json!({ "result": "ok" }))
}

fn ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
}

fn amount_field(request: &Value) -> Result<u32, DispatchError> {
    request
        .get("amount")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .ok_or_else(|| DispatchError::Domain("Property 'amount' missing or of wrong type".into()))
}

fn channels_field(request: &Value) -> Result<&str, DispatchError> {
    request
        .get("channels")
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Domain("Property 'channels' missing or of wrong type".into()))
}

/// Sets or clears the bits named by `channels` (a string of decimal digits
/// `'1'..='8'`, one per note channel) in `current`, leaving every other bit
/// untouched. Digits outside `1..=8` are ignored.
fn apply_channel_digits(current: u8, channels: &str, set: bool) -> u8 {
    let mut mask = current;
    for ch in channels.chars().filter_map(|c| c.to_digit(10)) {
        if (1..=8).contains(&ch) {
            let bit = 1u8 << (ch - 1);
            if set {
                mask |= bit;
            } else {
                mask &= !bit;
            }
        }
    }
    mask
}

fn set_channels(
    request: &Value,
    peer: &mut Peer,
    link: &mut SerialLink,
    rng: &mut impl RngCore,
    set: bool,
) -> Result<Value, DispatchError> {
    let channels = channels_field(request)?;
    let current = (peer.channel_inhibits & 0x00FF) as u8;
    let low = apply_channel_digits(current, channels, set);

    let response = exec(link, peer, commands::SET_INHIBITS, &[low, 0xFF], rng)?;
    require_ok(&response)?;
    peer.channel_inhibits = (peer.channel_inhibits & 0xFF00) | low as u16;
    Ok(json!({ "result": "ok" }))
}

fn inhibit_channels(
    request: &Value,
    peer: &mut Peer,
    link: &mut SerialLink,
    rng: &mut impl RngCore,
) -> Result<Value, DispatchError> {
    let channels = channels_field(request)?;
    let mask = apply_channel_digits(0xFF, channels, false);
    let response = exec(link, peer, commands::SET_INHIBITS, &[mask, 0xFF], rng)?;
    require_ok(&response)?;
    Ok(json!({ "result": "ok" }))
}

fn payout_or_float(
    request: &Value,
    peer: &mut Peer,
    link: &mut SerialLink,
    rng: &mut impl RngCore,
    opcode: u8,
    test: bool,
) -> Result<Value, DispatchError> {
    let amount = amount_field(request)?;
    let mut body = amount.to_le_bytes().to_vec();
    body.push(if test { 1 } else { 0 });

    let response = exec(link, peer, opcode, &body, rng)?;
    match response.code {
        ResponseCode::Ok => Ok(json!({ "result": "ok" })),
        ResponseCode::CommandNotProcessed => {
            let reason = response.body.first().copied().unwrap_or(0);
            Err(DispatchError::Domain(translate_reason(reason).to_string()))
        }
        other => Err(DispatchError::Protocol(other)),
    }
}

fn translate_reason(reason: u8) -> &'static str {
    match reason {
        0x01 => "not enough value",
        0x02 => "can't pay exact amount",
        0x03 => "busy",
        0x04 => "disabled",
        _ => "command not processed",
    }
}

fn set_denomination_level(
    request: &Value,
    peer: &mut Peer,
    link: &mut SerialLink,
    rng: &mut impl RngCore,
) -> Result<Value, DispatchError> {
    let amount = amount_field(request)?;
    let level = request
        .get("level")
        .and_then(Value::as_u64)
        .map(|v| v as u16)
        .ok_or_else(|| DispatchError::Domain("Property 'level' missing or of wrong type".into()))?;

    if level > 0 {
        let response = send_denomination_level(link, peer, rng, amount, 0)?;
        require_ok(&response)?;
    }
    let response = send_denomination_level(link, peer, rng, amount, level)?;
    require_ok(&response)?;
    Ok(json!({ "result": "ok" }))
}

fn send_denomination_level(
    link: &mut SerialLink,
    peer: &mut Peer,
    rng: &mut impl RngCore,
    amount: u32,
    level: u16,
) -> Result<CommandResponse, DispatchError> {
    let mut body = amount.to_le_bytes().to_vec();
    body.extend_from_slice(&level.to_le_bytes());
    exec(link, peer, commands::SET_DENOMINATION_LEVEL, &body, rng)
}

fn set_cashbox_payout_limit(
    request: &Value,
    peer: &mut Peer,
    link: &mut SerialLink,
    rng: &mut impl RngCore,
) -> Result<Value, DispatchError> {
    let amount = amount_field(request)?;
    let level = request
        .get("level")
        .and_then(Value::as_u64)
        .map(|v| v as u16)
        .unwrap_or(0);
    let mut body = amount.to_le_bytes().to_vec();
    body.extend_from_slice(&level.to_le_bytes());
    let response = exec(link, peer, commands::SET_CASHBOX_PAYOUT_LIMIT, &body, rng)?;
    require_ok(&response)?;
    Ok(json!({ "result": "ok" }))
}

/// Parses the `level(2 LE) | value(4 LE) | cc(3 ASCII)` counter table
/// shared by `get-all-levels` and `cashbox-payout-operation-data`. The
/// latter appends a trailing `{value:0, level: qtyUnknown}` entry parsed
/// from the final 3 bytes.
fn get_levels(
    peer: &mut Peer,
    link: &mut SerialLink,
    rng: &mut impl RngCore,
    with_cashbox_trailer: bool,
) -> Result<Value, DispatchError> {
    let opcode = if with_cashbox_trailer {
        commands::CASHBOX_PAYOUT_OPERATION_DATA
    } else {
        commands::GET_ALL_LEVELS
    };
    let response = exec(link, peer, opcode, &[], rng)?;
    require_ok(&response)?;

    let body = &response.body;
    let count = *body
        .first()
        .ok_or_else(|| DispatchError::Domain("truncated levels response".into()))? as usize;
    let mut cursor = &body[1..];
    let mut levels = Vec::with_capacity(count);

    for _ in 0..count {
        if cursor.len() < 9 {
            return Err(DispatchError::Domain("truncated level entry".into()));
        }
        let level = u16::from_le_bytes(cursor[0..2].try_into().unwrap());
        let value = u32::from_le_bytes(cursor[2..6].try_into().unwrap());
        let cc = String::from_utf8_lossy(&cursor[6..9]).into_owned();
        levels.push(json!({ "value": value, "level": level, "cc": cc }));
        cursor = &cursor[9..];
    }

    if with_cashbox_trailer {
        if cursor.len() < 3 {
            return Err(DispatchError::Domain("truncated cashbox trailer".into()));
        }
        let qty_unknown = u32::from_le_bytes([cursor[0], cursor[1], cursor[2], 0]);
        levels.push(json!({ "value": 0, "level": qty_unknown }));
    }

    Ok(json!({ "result": levels }))
}

fn channel_security_data(
    peer: &mut Peer,
    link: &mut SerialLink,
    rng: &mut impl RngCore,
) -> Result<Value, DispatchError> {
    let response = exec(link, peer, commands::CHANNEL_SECURITY_DATA, &[], rng)?;
    require_ok(&response)?;

    let body = &response.body;
    let count = *body
        .first()
        .ok_or_else(|| DispatchError::Domain("truncated channel security response".into()))? as usize;
    let levels = &body[1..];
    if levels.len() < count {
        return Err(DispatchError::Domain("truncated channel security response".into()));
    }

    let channels: Vec<Value> = levels[..count]
        .iter()
        .enumerate()
        .map(|(i, &security)| json!({ "channel": i as u32 + 1, "security": security }))
        .collect();

    Ok(json!({ "channels": channels }))
}

fn configure_bezel(
    request: &Value,
    peer: &mut Peer,
    link: &mut SerialLink,
    rng: &mut impl RngCore,
) -> Result<Value, DispatchError> {
    let get_byte = |field: &str| -> Result<u8, DispatchError> {
        request
            .get(field)
            .and_then(Value::as_u64)
            .map(|v| v as u8)
            .ok_or_else(|| DispatchError::Domain(format!("Property '{field}' missing or of wrong type")))
    };
    let r = get_byte("r")?;
    let g = get_byte("g")?;
    let b = get_byte("b")?;
    let bezel_type = get_byte("type")?;
    let non_volatile = request.get("nonVolatile").and_then(Value::as_bool).unwrap_or(false);

    let body = [r, g, b, non_volatile as u8, bezel_type];
    let response = exec(link, peer, commands::CONFIGURE_BEZEL, &body, rng)?;
    require_ok(&response)?;
    Ok(json!({ "result": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_topic_mirrors_request_topic() {
        assert_eq!(response_topic_for("hopper-request"), "hopper-response");
        assert_eq!(response_topic_for("validator-request"), "validator-response");
    }

    #[test]
    fn translate_reason_covers_known_codes() {
        assert_eq!(translate_reason(0x01), "not enough value");
        assert_eq!(translate_reason(0x02), "can't pay exact amount");
        assert_eq!(translate_reason(0x03), "busy");
        assert_eq!(translate_reason(0x04), "disabled");
        assert_eq!(translate_reason(0xFF), "command not processed");
    }

    #[test]
    fn envelope_carries_msg_id_and_correl_id() {
        let body = envelope("new-id", "old-id", json!({ "result": "ok" }));
        assert_eq!(body["msgId"], "new-id");
        assert_eq!(body["correlId"], "old-id");
        assert_eq!(body["result"], "ok");
    }

    #[test]
    fn enable_channels_135_sets_bits_one_three_five() {
        assert_eq!(apply_channel_digits(0, "135", true), 0b0001_0101);
    }

    #[test]
    fn disable_channels_3_clears_only_that_bit() {
        assert_eq!(apply_channel_digits(0b0001_0101, "3", false), 0b0001_0001);
    }

    #[test]
    fn enable_disable_enable_sequence_matches_documented_trace() {
        let mask = apply_channel_digits(0, "12", true);
        assert_eq!(mask, 0b0000_0011);
        let mask = apply_channel_digits(mask, "2", false);
        assert_eq!(mask, 0b0000_0001);
        let mask = apply_channel_digits(mask, "3", true);
        assert_eq!(mask, 0b0000_0101);
    }

    #[test]
    fn digits_outside_one_to_eight_are_ignored() {
        assert_eq!(apply_channel_digits(0, "09", true), 0);
    }

    #[test]
    fn inhibit_channels_starts_from_all_inhibited() {
        assert_eq!(apply_channel_digits(0xFF, "3", false), 0b1111_1011);
    }
}
