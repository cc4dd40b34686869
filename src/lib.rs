//! Device-side ZCL-over-IP application engine
//!
//! A [Service] exposes an application-defined ZCL resource tree
//! (endpoints, clusters, attributes, commands) over CoAP under
//! `/zcl/e/<eid>/<cl>/…`, persists bindings and report configurations in a
//! file-backed table, and periodically pushes attribute notifications to
//! bound peers as CBOR payloads.
//!
//! The engine is single-threaded and cooperative: the host loop alternates
//! between [Service::process_outgoing] (the reporting tick, which returns
//! the next sleep hint) and [Service::process_incoming] (a bounded poll of
//! the listen sockets).
//!
//! ```no_run
//! use zclip::{load_config, Attribute, Cluster, Device, Endpoint, Service, Value};
//! use std::time::Duration;
//!
//! let config = load_config()?;
//! let device = Device::new().endpoint(Endpoint::new(1).cluster(
//!     Cluster::server(1).attribute(Attribute::new(
//!         0,
//!         "greeting",
//!         || Value::String("Hello, World!".to_string()),
//!         |_| {},
//!     )),
//! ));
//!
//! let mut service = Service::new(device, config)?;
//! service.start()?;
//! service.start_secure()?;
//! for _ in 0..3 {
//!     let hint = service.process_outgoing();
//!     service.process_incoming(Duration::from_secs(hint as u64))?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(unused_crate_dependencies)]

pub mod codec;
pub mod config;
pub mod device;
pub mod handlers;
pub mod logging;
pub mod record;
pub mod reporting;
pub mod router;
pub mod service;
pub mod storage;
pub mod transport;
pub mod uri;
pub mod value;

pub use config::{load_config, Config, ConfigError};
pub use device::{
    Attribute, Binding, Cluster, Command, Device, Endpoint, Notification, Report, ReportAttribute,
    Role,
};
pub use service::{Service, ServiceError};
pub use uri::{Scheme, Uri};
pub use value::Value;
