//! Device exposing one attribute of every base data type, each backed by
//! writable state

use log::{error, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zclip::{load_config, logging, Attribute, Cluster, Device, Endpoint, Service, Value};

/// An attribute whose reads and writes go through shared typed state.
/// `decode` narrows an incoming value to the attribute's type; mismatched
/// writes are dropped with a warning.
fn stored<T: Send + Clone + 'static>(
    id: u16,
    name: &str,
    initial: T,
    encode: impl Fn(&T) -> Value + Send + 'static,
    decode: impl Fn(&Value) -> Option<T> + Send + 'static,
) -> Attribute {
    let state = Arc::new(Mutex::new(initial));
    let readable = state.clone();
    let label = name.to_string();
    Attribute::new(
        id,
        name,
        move || encode(&*readable.lock().unwrap()),
        move |value| match decode(value) {
            Some(value) => *state.lock().unwrap() = value,
            None => warn!("Dropping type-mismatched write to {}", label),
        },
    )
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

    let cluster = Cluster::server(2)
        .attribute(stored(0, "boolean", false, |v| Value::Bool(*v), Value::as_bool))
        .attribute(stored(1, "int8", 0i8, |v| Value::Int(*v as i64), Value::as_i8))
        .attribute(stored(2, "int16", 0i16, |v| Value::Int(*v as i64), Value::as_i16))
        .attribute(stored(3, "int32", 0i32, |v| Value::Int(*v as i64), Value::as_i32))
        .attribute(stored(4, "uint8", 0u8, |v| Value::Uint(*v as u64), Value::as_u8))
        .attribute(stored(5, "uint16", 0u16, |v| Value::Uint(*v as u64), Value::as_u16))
        .attribute(stored(6, "uint32", 0u32, |v| Value::Uint(*v as u64), Value::as_u32))
        .attribute(stored(
            7,
            "string",
            String::new(),
            |v| Value::String(v.clone()),
            |value| value.as_str().map(str::to_string),
        ))
        .attribute(stored(8, "time", 0u64, |v| Value::Time(*v), Value::as_time));

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
