use std::process::exit;
use std::sync::Arc;
use tl48::{
    build_signals, identify_batteries, shared_bus, Battery, Config, DriverError, PollGroup,
    PublishMode, Result, RtuClient, Service, SharedBus, SignalBus,
};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Build one poll group per published service, registering every signal
/// path with its publisher. Per-unit mode runs one short-lived worker per
/// battery; all workers are joined before the event loop starts, and the
/// bus access guard bounds their actual bus concurrency anyway.
async fn bootstrap(config: &Config, batteries: Vec<Battery>, bus: &SharedBus) -> Result<Vec<PollGroup>> {
    match config.driver.publish {
        PublishMode::Fleet => {
            let signals = build_signals(config, &batteries, 0);
            let publisher = Arc::new(SignalBus::new("battery"));
            let group = PollGroup::new("battery", batteries, signals, publisher, bus.clone(), config)?;
            Ok(vec![group])
        }
        PublishMode::PerUnit => {
            let mut workers = JoinSet::new();
            for (index, battery) in batteries.into_iter().enumerate() {
                let config = config.clone();
                let bus = bus.clone();
                workers.spawn(async move {
                    let name = format!("bat_{}", index);
                    let group = vec![battery];
                    let signals = build_signals(&config, &group, index as i64);
                    let publisher = Arc::new(SignalBus::new(&name));
                    PollGroup::new(name, group, signals, publisher, bus, &config).map(|g| (index, g))
                });
            }

            let mut groups = Vec::new();
            while let Some(joined) = workers.join_next().await {
                let (index, group) = joined
                    .map_err(|e| DriverError::Config(format!("bootstrap worker failed: {}", e)))??;
                groups.push((index, group));
            }
            // join order is arbitrary; publishing order is not
            groups.sort_by_key(|(index, _)| *index);
            Ok(groups.into_iter().map(|(_, group)| group).collect())
        }
    }
}

fn print_usage() {
    eprintln!("Usage:   tl48 <serial device> [config.yaml]");
    eprintln!("Example: tl48 ttyUSB0");
}

/// Built-in defaults when no file is named; a named file that fails to
/// load or validate is an error, never silently defaulted.
fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tl48=info".parse().unwrap()),
        )
        .init();

    info!("tl48 v{} starting", tl48::VERSION);

    let mut args = std::env::args().skip(1);
    let tty = match args.next() {
        Some(tty) => tty,
        None => {
            info!("missing command line argument for tty device");
            print_usage();
            exit(1);
        }
    };
    let config_path = args.next();
    let config = match load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // exit code 1 means "missing argument"; a bad config file
            // gets its own code so a supervisor can tell them apart
            error!("cannot load {}: {}", config_path.as_deref().unwrap_or("config"), e);
            exit(3);
        }
    };

    let device = if tty.starts_with('/') {
        tty
    } else {
        format!("/dev/{}", tty)
    };
    let bus = shared_bus(RtuClient::new(device, &config.serial));

    let batteries = identify_batteries(&bus, &config).await;
    let n = batteries.len();
    info!("found {} {}", n, if n == 1 { "battery" } else { "batteries" });
    if n == 0 {
        exit(2);
    }

    let groups = match bootstrap(&config, batteries, &bus).await {
        Ok(groups) => groups,
        Err(e) => {
            error!("bootstrap failed: {}", e);
            exit(1);
        }
    };

    let mut service = Service::new(groups, &config);

    let handle = service.handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            handle.stop();
        }
    });

    if let Err(e) = service.run().await {
        error!("event loop error: {}", e);
    }

    let stats = service.stats();
    info!(
        "final stats: {} cycles, {} errors, uptime {}s",
        stats.cycle_count, stats.error_count, stats.uptime_secs
    );

    // reaches this only once the event loop has stopped
    exit(0xFF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_defaults_without_a_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.driver.poll_interval_ms, 2000);
    }

    #[test]
    fn test_load_config_propagates_file_errors() {
        assert!(load_config(Some("/nonexistent/tl48.yaml")).is_err());
    }
}
