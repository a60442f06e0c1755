//! One request, one response, with retries and encryption escalation.
//! Serialises exactly one command in flight per peer; the peer record is
//! the only shared state, and it's owned exclusively by whoever calls
//! `exec`.

use std::time::{Duration, Instant};

use rand::RngCore;

use crate::device::Peer;
use crate::error::{Error, ResponseCode, Result};
use crate::protocol::{crypto, framer};
use crate::serial_link::SerialLink;

/// Per-transmission timeout. Worst case a command takes
/// `TIMEOUT * (RETRY_LEVEL + 1)` ≈ 4s.
pub const TIMEOUT: Duration = Duration::from_millis(1000);
pub const RETRY_LEVEL: u32 = 3;

/// Turnaround dwell applied before every serial exchange, poll-driven or
/// command-driven alike — the peripherals need this settling time on every
/// transmission, not just polls.
pub const HARDWARE_DWELL: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub code: ResponseCode,
    pub body: Vec<u8>,
}

/// Runs `cmd_byte | body` against `peer`, transparently renegotiating the
/// session key and replaying the command once if the peer responds
/// `KEY_NOT_SET` or the encrypted response's counter doesn't match —
/// both mean the two ends' session keys have fallen out of sync.
pub fn exec<R: RngCore>(
    link: &mut SerialLink,
    peer: &mut Peer,
    cmd_byte: u8,
    body: &[u8],
    rng: &mut R,
    mut renegotiate: impl FnMut(&mut SerialLink, &mut Peer, &mut R) -> Result<()>,
) -> Result<CommandResponse> {
    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(cmd_byte);
    payload.extend_from_slice(body);

    match raw_exec(link, peer, &payload, rng) {
        Ok(response) if response.code != ResponseCode::KeyNotSet => Ok(response),
        Ok(_) | Err(Error::CounterMismatch { .. }) => {
            renegotiate(link, peer, rng).map_err(|_| Error::KeyNotSet)?;
            raw_exec(link, peer, &payload, rng)
        }
        Err(e) => Err(e),
    }
}

/// Runs `payload` (already `cmd_byte | body`) against `peer` without any
/// `KEY_NOT_SET` escalation. Used directly by key negotiation itself,
/// which must not recurse into `exec`.
pub fn raw_exec<R: RngCore>(
    link: &mut SerialLink,
    peer: &mut Peer,
    payload: &[u8],
    rng: &mut R,
) -> Result<CommandResponse> {
    for attempt in 0..=RETRY_LEVEL {
        std::thread::sleep(HARDWARE_DWELL);

        let wire_payload = match &peer.session_key {
            Some(key) => crypto::wrap(payload, peer.counter, key, rng)?,
            None => payload.to_vec(),
        };
        let frame = framer::encode(peer.address, peer.seq, &wire_payload);
        link.write(&frame)?;

        let deadline = Instant::now() + TIMEOUT;
        match read_response(link, peer, deadline) {
            Ok(response) => {
                peer.seq = !peer.seq;
                if peer.session_key.is_some() {
                    peer.counter = peer.counter.wrapping_add(1);
                }
                return Ok(response);
            }
            Err(Error::CrcMismatch { .. })
            | Err(Error::Timeout)
            | Err(Error::UnexpectedAddress { .. })
                if attempt < RETRY_LEVEL =>
            {
                continue;
            }
            Err(Error::CrcMismatch { .. })
            | Err(Error::Timeout)
            | Err(Error::UnexpectedAddress { .. }) => return Err(Error::Timeout),
            Err(e) => return Err(e),
        }
    }
    unreachable!("loop always returns by the last iteration")
}

fn read_response(link: &mut SerialLink, peer: &Peer, deadline: Instant) -> Result<CommandResponse> {
    let packet = framer::decode(link, deadline)?;
    if packet.address != peer.address || packet.seq != peer.seq {
        return Err(Error::UnexpectedAddress {
            expected: peer.address,
            actual: packet.address,
        });
    }

    let body = match &peer.session_key {
        Some(key) => {
            let (counter, data) = crypto::unwrap(&packet.payload, key)?;
            if counter != peer.counter {
                return Err(Error::CounterMismatch {
                    expected: peer.counter,
                    actual: counter,
                });
            }
            data
        }
        None => packet.payload,
    };

    let (&code_byte, rest) = body
        .split_first()
        .ok_or(Error::Truncated { expected: 1, actual: 0 })?;
    let code = ResponseCode::from_byte(code_byte).unwrap_or(ResponseCode::Failure);
    Ok(CommandResponse {
        code,
        body: rest.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ChannelTable, Peer, PeerKind};
    use rand::rngs::mock::StepRng;

    // `raw_exec`/`exec` need a live `SerialLink`, which needs a real
    // character device; the retry/escalation state machine itself is
    // covered at the unit level by exercising `read_response`'s framing
    // logic through the framer/crypto modules directly (see their own
    // test modules). This test only checks that a freshly constructed
    // peer starts in the state the algorithm assumes.
    #[test]
    fn fresh_peer_has_no_session_key_and_seq_false() {
        let peer = Peer::new(PeerKind::Validator, 0x00, "validator", 0x0123_4567_0123_4567);
        assert!(peer.session_key.is_none());
        assert!(!peer.seq);
        assert_eq!(peer.counter, 0);
        let _ = ChannelTable::default();
        let _: StepRng = StepRng::new(0, 1);
    }
}
