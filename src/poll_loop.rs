//! Periodic drain of each available peer's event queue.

use rand::RngCore;

use crate::command_session;
use crate::device::{self, DomainEvent, Peer, PeerKind};
use crate::error::{Error, ResponseCode, Result};
use crate::protocol::commands;
use crate::protocol::events::{self, RawEvent, StatusEvent};
use crate::serial_link::SerialLink;

/// Issues one `POLL` to `peer` and publishes every resulting domain event,
/// in the order the peer enqueued them, via `publish(topic, event)`.
///
/// A `POLL` timeout ends the tick without failing the peer — the next
/// tick retries. A `RESET` event that fails to re-pin the protocol
/// version is the one fatal outcome.
pub fn poll_once<R: RngCore>(
    link: &mut SerialLink,
    peer: &mut Peer,
    rng: &mut R,
    publish: &mut impl FnMut(&str, &DomainEvent),
) -> Result<()> {
    let response = match command_session::exec(
        link,
        peer,
        commands::POLL,
        &[],
        rng,
        device::negotiate_key,
    ) {
        Ok(response) => response,
        Err(Error::Timeout) => return Ok(()),
        Err(e) => return Err(e),
    };

    if response.code != ResponseCode::Ok {
        log::warn!("poll failed for {}: {:?}", peer.name, response.code);
        return Ok(());
    }

    let raw_events = events::decode_events(&response.body)?;
    let topic = event_topic(peer.kind);

    for raw in &raw_events {
        match raw {
            RawEvent::Status(StatusEvent::Reset) => {
                device::pin_protocol_version(link, peer, rng)?;
            }
            RawEvent::CalibrationFail(code) if *code == events::COMMAND_RECAL => {
                publish(topic, &DomainEvent::named("recalibrating"));
                if let Err(e) = command_session::exec(
                    link,
                    peer,
                    commands::RUN_CALIBRATION,
                    &[],
                    rng,
                    device::negotiate_key,
                ) {
                    log::warn!("RUN_CALIBRATION failed for {}: {e}", peer.name);
                }
            }
            _ => {}
        }

        for domain_event in peer.behavior().map_event(&peer.channel_table, raw) {
            publish(topic, &domain_event);
        }
    }

    Ok(())
}

fn event_topic(kind: PeerKind) -> &'static str {
    match kind {
        PeerKind::Hopper => "hopper-event",
        PeerKind::Validator => "validator-event",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_topic_matches_peer_kind() {
        assert_eq!(event_topic(PeerKind::Hopper), "hopper-event");
        assert_eq!(event_topic(PeerKind::Validator), "validator-event");
    }
}
