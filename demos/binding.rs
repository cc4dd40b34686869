//! Device demonstrating bindings and reporting: a clock cluster peers can
//! subscribe to, plus a notification handler logging what arrives
//!
//! Create a report configuration and a binding pointing back at another
//! device's `…/n` resource, then watch the periodic notifications flow.

use log::{error, info};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use zclip::{load_config, logging, Attribute, Cluster, Device, Endpoint, Service, Value};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            return;
        }
    };
    logging::setup(config.logging);

    let cluster = Cluster::server(3)
        .attribute(Attribute::new(
            0,
            "utc",
            || Value::Time(unix_now()),
            |_| {},
        ))
        .on_notification(Box::new(|notification| {
            info!("Received notification:");
            if let Some(uri) = &notification.uri {
                info!("\tsender uri: {}", uri);
            }
            info!("\tbinding id: {}", notification.bid);
            info!("\treport id: {}", notification.rid);
            info!("\ttimestamp: {}", notification.timestamp);
            for (aid, value) in &notification.attributes {
                info!("\tattribute {:x}: {}", aid, value);
            }
        }));

    let device = Device::new().endpoint(Endpoint::new(1).cluster(cluster));

    let mut service = match Service::new(device, config) {
        Ok(service) => service,
        Err(err) => {
            error!("Failed to initialize engine: {}", err);
            return;
        }
    };
    if let Err(err) = service.start() {
        error!("Failed to start listener: {}", err);
        return;
    }
    if let Err(err) = service.start_secure() {
        error!("Failed to start secure listener: {}", err);
        return;
    }

    loop {
        let hint = service.process_outgoing();
        if let Err(err) = service.process_incoming(Duration::from_secs(hint as u64)) {
            error!("Transport failure: {}", err);
            break;
        }
    }
}
