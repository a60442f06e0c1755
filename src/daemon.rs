//! Wires the protocol engine, device peers and bus together into one
//! single-threaded reactor loop, and handles termination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::ThreadRng;

use crate::bus::Bus;
use crate::config::Config;
use crate::device::{self, DomainEvent, Peer, PeerKind};
use crate::error::Result;
use crate::poll_loop;
use crate::router;
use crate::serial_link::SerialLink;

const POLL_TICK: Duration = Duration::from_millis(1000);
const QUIT_TICK: Duration = Duration::from_millis(500);

pub struct Daemon {
    config: Config,
    bus: Bus,
    link: Option<SerialLink>,
    hopper: Peer,
    validator: Peer,
    rng: ThreadRng,
    quit: Arc<AtomicBool>,
}

impl Daemon {
    pub fn new(config: Config) -> Result<Self> {
        let bus = Bus::connect(
            &config.redis_url(),
            &["hopper-request", "validator-request", "metacash"],
        )?;

        let quit = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&quit))?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&quit))?;

        let hopper = Peer::new(PeerKind::Hopper, device::HOPPER_ADDRESS, "hopper", device::DEFAULT_KEY);
        let validator = Peer::new(
            PeerKind::Validator,
            device::VALIDATOR_ADDRESS,
            "validator",
            device::DEFAULT_KEY,
        );

        Ok(Self {
            config,
            bus,
            link: None,
            hopper,
            validator,
            rng: rand::thread_rng(),
            quit,
        })
    }

    /// Opens the serial link and brings both peers up independently: one
    /// peer failing setup never prevents the other from coming up.
    pub fn bring_up_hardware(&mut self) {
        let mut link = match SerialLink::open(&self.config.serial_device) {
            Ok(link) => link,
            Err(e) => {
                log::warn!("hardware unavailable: {e}");
                return;
            }
        };

        if self.config.accept_coins {
            log::info!("coins will be accepted");
        } else {
            log::info!("coins will not be accepted");
        }

        if let Err(e) = device::bring_up(&mut link, &mut self.hopper, self.config.accept_coins, &mut self.rng) {
            log::warn!("hopper setup failed: {e}");
        }
        if let Err(e) = device::bring_up(&mut link, &mut self.validator, self.config.accept_coins, &mut self.rng) {
            log::warn!("validator setup failed: {e}");
        }

        self.link = Some(link);
    }

    /// Runs the reactor until the quit flag is observed. Publishes
    /// `{event:"started"}` once setup has been attempted, and
    /// `{event:"exiting"}` just before returning.
    pub fn run(&mut self) -> Result<()> {
        self.publish_payout_event(DomainEvent::named("started"));

        let mut next_poll = Instant::now();
        let mut next_quit_check = Instant::now();

        loop {
            let now = Instant::now();

            if now >= next_quit_check {
                if self.quit.load(Ordering::Relaxed) {
                    break;
                }
                next_quit_check = now + QUIT_TICK;
            }

            if now >= next_poll {
                self.poll_tick();
                next_poll = now + POLL_TICK;
            }

            while let Ok((topic, payload)) = self.bus.incoming.try_recv() {
                if self.handle_request(&topic, &payload) {
                    break;
                }
            }

            std::thread::sleep(Duration::from_millis(20));
        }

        self.publish_payout_event(DomainEvent::named("exiting"));
        Ok(())
    }

    fn poll_tick(&mut self) {
        if self.link.is_none() {
            return;
        }
        self.poll_one(PeerKind::Hopper);
        self.poll_one(PeerKind::Validator);
    }

    fn poll_one(&mut self, kind: PeerKind) {
        let peer = match kind {
            PeerKind::Hopper => &mut self.hopper,
            PeerKind::Validator => &mut self.validator,
        };
        if !peer.available {
            return;
        }
        let link = self.link.as_mut().expect("checked by poll_tick");
        let bus = &mut self.bus;
        let outcome = poll_loop::poll_once(link, peer, &mut self.rng, &mut |topic, event| {
            if let Ok(payload) = serde_json::to_string(event) {
                let _ = bus.publish(topic, &payload);
            }
        });
        if let Err(e) = outcome {
            log::error!("fatal error polling {}: {e}", peer.name);
            self.quit.store(true, Ordering::Relaxed);
        }
    }

    /// Returns `true` if this message requested a clean shutdown.
    fn handle_request(&mut self, topic: &str, payload: &str) -> bool {
        let peer = match topic {
            "hopper-request" => Some(&mut self.hopper),
            "validator-request" => Some(&mut self.validator),
            _ => None,
        };

        let Some(peer) = peer else {
            return false;
        };

        let peer_ref = if peer.available { Some(peer) } else { None };
        let outcome = router::handle(topic, payload, peer_ref, self.link.as_mut(), &mut self.rng);

        if let Ok(body) = serde_json::to_string(&outcome.body) {
            let _ = self.bus.publish(outcome.topic, &body);
        }
        if outcome.quit {
            self.quit.store(true, Ordering::Relaxed);
        }
        outcome.quit
    }

    fn publish_payout_event(&mut self, event: DomainEvent) {
        if let Ok(payload) = serde_json::to_string(&event) {
            let _ = self.bus.publish("payout-event", &payload);
        }
    }
}
