//! Redis-backed request/response/event bus.
//!
//! Two connections mirror `payoutd.c`'s `redisPublishCtx`/
//! `redisSubscribeCtx` split: one held by the main loop for publishing,
//! one dedicated to a subscriber thread that blocks on `PubSub::get_message`
//! and forwards `(topic, payload)` pairs over a `crossbeam_channel`.

use crossbeam_channel::Receiver;
use redis::{Client, Commands, Connection};

use crate::error::Result;

pub struct Bus {
    publish_conn: Connection,
    pub incoming: Receiver<(String, String)>,
}

impl Bus {
    pub fn connect(url: &str, subscribe_topics: &[&str]) -> Result<Self> {
        let client = Client::open(url)?;
        let publish_conn = client.get_connection()?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let topics: Vec<String> = subscribe_topics.iter().map(|s| s.to_string()).collect();
        let sub_client = client.clone();

        std::thread::spawn(move || {
            if let Err(e) = run_subscriber(&sub_client, &topics, tx) {
                log::error!("redis subscriber thread exited: {e}");
            }
        });

        Ok(Self {
            publish_conn,
            incoming: rx,
        })
    }

    pub fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        let _: () = self.publish_conn.publish(topic, payload)?;
        Ok(())
    }
}

fn run_subscriber(
    client: &Client,
    topics: &[String],
    tx: crossbeam_channel::Sender<(String, String)>,
) -> Result<()> {
    let mut conn = client.get_connection()?;
    let mut pubsub = conn.as_pubsub();
    for topic in topics {
        pubsub.subscribe(topic)?;
    }

    loop {
        let msg = pubsub.get_message()?;
        let topic = msg.get_channel_name().to_string();
        let payload: String = msg.get_payload()?;
        if tx.send((topic, payload)).is_err() {
            return Ok(());
        }
    }
}
