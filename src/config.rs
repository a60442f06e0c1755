//! Command-line configuration.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "payoutd", about = "SSP hopper/validator to message-bus bridge")]
pub struct Config {
    /// Redis host to connect to for the request/response/event bus.
    #[arg(short = 'h', long = "redis-host", default_value = "127.0.0.1")]
    pub redis_host: String,

    /// Redis port to connect to.
    #[arg(short = 'p', long = "redis-port", default_value_t = 6379)]
    pub redis_port: u16,

    /// Path to the serial character device the peripherals are attached to.
    #[arg(short = 'd', long = "serial-device", default_value = "/dev/ttyACM0")]
    pub serial_device: String,

    /// Accept coins in the hopper (default: disabled, all channels inhibited).
    #[arg(short = 'c', long = "accept-coins", default_value_t = false)]
    pub accept_coins: bool,

    /// Also echo log messages to stderr at debug level.
    #[arg(short = 'e', long = "echo-logs", default_value_t = false)]
    pub echo_logs: bool,
}

impl Config {
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }
}
