use clap::Parser;

use metacash_payoutd::config::Config;
use metacash_payoutd::daemon::Daemon;

fn main() {
    let config = Config::parse();

    let default_filter = if config.echo_logs { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let mut daemon = match Daemon::new(config) {
        Ok(daemon) => daemon,
        Err(e) => {
            log::error!("failed to start: {e}");
            std::process::exit(1);
        }
    };

    daemon.bring_up_hardware();

    if let Err(e) = daemon.run() {
        log::error!("fatal error: {e}");
        std::process::exit(1);
    }
}
