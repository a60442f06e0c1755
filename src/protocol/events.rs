//! Decoding of `POLL` response payloads into tagged event records. Mapping
//! these onto bus events (amount scaling, recalibration) is the poll
//! loop's job, not this module's.

use crate::error::{Error, Result};

const RESET: u8 = 0x01;
const READ: u8 = 0x03;
const CREDIT: u8 = 0x04;
const EMPTY: u8 = 0x13;
const CALIBRATION_FAIL: u8 = 0x27;
const STACKER_FULL: u8 = 0x2A;
const JAMMED: u8 = 0x2B;
const HALTED: u8 = 0x2C;
const COIN_CREDIT: u8 = 0x11;
const FLOATING: u8 = 0x2D;
const FLOATED: u8 = 0x2E;
const DISPENSING: u8 = 0x2F;
const DISPENSED: u8 = 0x31;
const CASHBOX_PAID: u8 = 0x32;
const TIMEOUT: u8 = 0x35;
const SMART_EMPTYING: u8 = 0x37;
const SMART_EMPTIED: u8 = 0x38;
const INCOMPLETE_PAYOUT: u8 = 0x39;
const INCOMPLETE_FLOAT: u8 = 0x3E;

/// Calibration-fail error code that requires the device manager to issue
/// `RUN_CALIBRATION`.
pub const COMMAND_RECAL: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Reset,
    Empty,
    StackerFull,
    Jammed,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEventKind {
    Read,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountEventKind {
    CoinCredit,
    Floating,
    Floated,
    Dispensing,
    Dispensed,
    CashboxPaid,
    Timeout,
    SmartEmptying,
    SmartEmptied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Status(StatusEvent),
    Channel { kind: ChannelEventKind, channel: u8 },
    Amount { kind: AmountEventKind, amount: u32, currency: [u8; 3] },
    IncompletePayout { dispensed: u32, requested: u32, currency: [u8; 3] },
    IncompleteFloat { dispensed: u32, requested: u32, currency: [u8; 3] },
    CalibrationFail(u8),
}

/// Decodes every event record in a `POLL` response payload, in order. The
/// caller MUST preserve this order when publishing.
pub fn decode_events(payload: &[u8]) -> Result<Vec<RawEvent>> {
    let mut events = Vec::new();
    let mut cursor = payload;

    while let Some((&opcode, rest)) = cursor.split_first() {
        let (event, remaining) = decode_one(opcode, rest)?;
        events.push(event);
        cursor = remaining;
    }

    Ok(events)
}

fn decode_one(opcode: u8, rest: &[u8]) -> Result<(RawEvent, &[u8])> {
    match opcode {
        RESET => Ok((RawEvent::Status(StatusEvent::Reset), rest)),
        EMPTY => Ok((RawEvent::Status(StatusEvent::Empty), rest)),
        STACKER_FULL => Ok((RawEvent::Status(StatusEvent::StackerFull), rest)),
        JAMMED => Ok((RawEvent::Status(StatusEvent::Jammed), rest)),
        HALTED => Ok((RawEvent::Status(StatusEvent::Halted), rest)),

        READ | CREDIT => {
            let (&channel, rest) = rest.split_first().ok_or(truncated(1, rest.len()))?;
            let kind = if opcode == READ {
                ChannelEventKind::Read
            } else {
                ChannelEventKind::Credit
            };
            Ok((RawEvent::Channel { kind, channel }, rest))
        }

        CALIBRATION_FAIL => {
            let (&code, rest) = rest.split_first().ok_or(truncated(1, rest.len()))?;
            Ok((RawEvent::CalibrationFail(code), rest))
        }

        COIN_CREDIT | FLOATING | FLOATED | DISPENSING | DISPENSED | CASHBOX_PAID | TIMEOUT
        | SMART_EMPTYING | SMART_EMPTIED => {
            let (amount, currency, rest) = take_amount_cc(rest)?;
            let kind = match opcode {
                COIN_CREDIT => AmountEventKind::CoinCredit,
                FLOATING => AmountEventKind::Floating,
                FLOATED => AmountEventKind::Floated,
                DISPENSING => AmountEventKind::Dispensing,
                DISPENSED => AmountEventKind::Dispensed,
                CASHBOX_PAID => AmountEventKind::CashboxPaid,
                TIMEOUT => AmountEventKind::Timeout,
                SMART_EMPTYING => AmountEventKind::SmartEmptying,
                _ => AmountEventKind::SmartEmptied,
            };
            Ok((
                RawEvent::Amount {
                    kind,
                    amount,
                    currency,
                },
                rest,
            ))
        }

        INCOMPLETE_PAYOUT | INCOMPLETE_FLOAT => {
            if rest.len() < 11 {
                return Err(truncated(11, rest.len()));
            }
            let dispensed = u32::from_le_bytes(rest[0..4].try_into().unwrap());
            let requested = u32::from_le_bytes(rest[4..8].try_into().unwrap());
            let mut currency = [0u8; 3];
            currency.copy_from_slice(&rest[8..11]);
            let rest = &rest[11..];
            let event = if opcode == INCOMPLETE_PAYOUT {
                RawEvent::IncompletePayout {
                    dispensed,
                    requested,
                    currency,
                }
            } else {
                RawEvent::IncompleteFloat {
                    dispensed,
                    requested,
                    currency,
                }
            };
            Ok((event, rest))
        }

        other => Err(Error::Protocol(
            crate::error::ResponseCode::from_byte(other).unwrap_or(crate::error::ResponseCode::Failure),
        )),
    }
}

fn take_amount_cc(rest: &[u8]) -> Result<(u32, [u8; 3], &[u8])> {
    if rest.len() < 7 {
        return Err(truncated(7, rest.len()));
    }
    let amount = u32::from_le_bytes(rest[0..4].try_into().unwrap());
    let mut currency = [0u8; 3];
    currency.copy_from_slice(&rest[4..7]);
    Ok((amount, currency, &rest[7..]))
}

fn truncated(expected: usize, actual: usize) -> Error {
    Error::Truncated { expected, actual }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_status_only_event() {
        let events = decode_events(&[RESET]).unwrap();
        assert_eq!(events, vec![RawEvent::Status(StatusEvent::Reset)]);
    }

    #[test]
    fn decodes_read_then_credit_for_a_channel() {
        let events = decode_events(&[READ, 2, CREDIT, 2]).unwrap();
        assert_eq!(
            events,
            vec![
                RawEvent::Channel {
                    kind: ChannelEventKind::Read,
                    channel: 2
                },
                RawEvent::Channel {
                    kind: ChannelEventKind::Credit,
                    channel: 2
                },
            ]
        );
    }

    #[test]
    fn decodes_amount_and_currency_events() {
        let mut payload = vec![COIN_CREDIT];
        payload.extend_from_slice(&1000u32.to_le_bytes());
        payload.extend_from_slice(b"EUR");

        let events = decode_events(&payload).unwrap();
        assert_eq!(
            events,
            vec![RawEvent::Amount {
                kind: AmountEventKind::CoinCredit,
                amount: 1000,
                currency: *b"EUR",
            }]
        );
    }

    #[test]
    fn decodes_calibration_fail_code() {
        let events = decode_events(&[CALIBRATION_FAIL, COMMAND_RECAL]).unwrap();
        assert_eq!(events, vec![RawEvent::CalibrationFail(COMMAND_RECAL)]);
    }

    #[test]
    fn preserves_event_order_within_a_batch() {
        let events = decode_events(&[READ, 2, CREDIT, 2, EMPTY]).unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], RawEvent::Status(StatusEvent::Empty)));
    }

    #[test]
    fn rejects_truncated_channel_event() {
        let err = decode_events(&[READ]).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }
}
