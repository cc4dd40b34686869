//! Minimal ZCLIP device: one endpoint hosting a single server cluster
//! whose only attribute reads a fixed greeting

use log::error;
use std::time::Duration;
use zclip::{load_config, logging, Attribute, Cluster, Device, Endpoint, Service, Value};

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            return;
        }
    };
    logging::setup(config.logging);

    let device = Device::new().endpoint(Endpoint::new(1).cluster(
        Cluster::server(1).attribute(Attribute::new(
            0,
            "greeting",
            || Value::String("Hello, World!".to_string()),
            |_| {},
        )),
    ));

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
