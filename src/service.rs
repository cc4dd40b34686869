//! The engine facade: one [Service] value owns the resource tree, the
//! persistence tables and the transport state
//!
//! The host loop drives a service with two calls: [Service::process_outgoing]
//! runs a reporting tick and returns the sleep hint, and
//! [Service::process_incoming] polls the listeners for up to the given
//! timeout, dispatching every request that arrives. [Service::handle] is the
//! transport-independent request entry point, usable directly by embedders
//! and tests.

use crate::config::Config;
use crate::device::Device;
use crate::handlers::{self, Reply};
use crate::reporting;
use crate::router::{self, Target};
use crate::storage::{Storage, StorageError};
use crate::transport::{Listener, PORT_COAP, PORT_COAPS};
use coap_lite::{
    CoapOption, CoapRequest, CoapResponse, ContentFormat, MessageClass, Packet, RequestType,
    ResponseType,
};
use log::{debug, info, warn};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Largest datagram the listeners accept
const RECV_BUFFER_SIZE: usize = 1280;
/// Sleep granularity of the inbound poll loop
const POLL_SLICE: Duration = Duration::from_millis(20);

/// Fatal engine errors. Everything request-scoped is answered on the wire
/// instead of surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("storage initialization failed: {0}")]
    Storage(#[from] StorageError),
    #[error("transport failure: {0}")]
    Io(#[from] io::Error),
}

/// The ZCLIP engine
pub struct Service {
    device: Device,
    storage: Storage,
    config: Config,
    listener: Option<Listener>,
    secure_listener: Option<Listener>,
    message_id: u16,
}

impl Service {
    /// Creates the engine: opens the storage file and links the persisted
    /// bindings and reports into the application's resource tree.
    /// Storage failure here is fatal.
    pub fn new(mut device: Device, config: Config) -> Result<Service, ServiceError> {
        let storage = Storage::open(Path::new(&config.storage_file))?;
        storage.link(&mut device);

        Ok(Service {
            device,
            storage,
            config,
            listener: None,
            secure_listener: None,
            message_id: 0,
        })
    }

    /// Binds the plain CoAP listener on port 5683
    pub fn start(&mut self) -> Result<(), ServiceError> {
        self.listener = Some(Listener::bind(PORT_COAP)?);
        info!("Listening on port {} (v{})", PORT_COAP, crate::config::VERSION);
        Ok(())
    }

    /// Binds the secure listener on port 5684.
    ///
    /// The security surface is a placeholder: the configured PSK identity
    /// and key are carried but handshake provisioning is the deployment's
    /// concern, not the engine's.
    pub fn start_secure(&mut self) -> Result<(), ServiceError> {
        if self.config.psk_identity.is_empty() {
            warn!("DTLS PSK identity is empty; secure transport runs as a placeholder");
        }
        self.secure_listener = Some(Listener::bind(PORT_COAPS)?);
        info!("Listening on port {} (secure)", PORT_COAPS);
        Ok(())
    }

    /// Runs one reporting tick over all bindings. Returns the number of
    /// seconds the host may sleep before the next binding becomes due.
    pub fn process_outgoing(&mut self) -> u16 {
        self.tick(unix_now())
    }

    fn tick(&mut self, now: u64) -> u16 {
        reporting::process(
            &mut self.device,
            &mut self.storage,
            &self.config.host,
            now,
            &mut self.message_id,
        )
    }

    /// Polls the listeners for up to `timeout`, answering every request
    /// that arrives. Only transport-level failures are returned; request
    /// errors are answered on the wire.
    pub fn process_incoming(&mut self, timeout: Duration) -> Result<(), ServiceError> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut busy = self.poll_one(false)?;
            busy |= self.poll_one(true)?;

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            if !busy {
                std::thread::sleep(POLL_SLICE.min(deadline - now));
            }
        }
    }

    /// Receives and handles at most one datagram from a listener
    fn poll_one(&mut self, secure: bool) -> Result<bool, ServiceError> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let listener = if secure {
            self.secure_listener.as_ref()
        } else {
            self.listener.as_ref()
        };
        let received = match listener {
            Some(listener) => listener.poll(&mut buffer)?,
            None => None,
        };
        let Some((length, peer)) = received else {
            return Ok(false);
        };

        if let Some(response) = self.handle_datagram(&buffer[..length], peer) {
            let listener = if secure {
                self.secure_listener.as_ref()
            } else {
                self.listener.as_ref()
            };
            if let Some(listener) = listener {
                if let Err(err) = listener.send(&response, peer) {
                    warn!("Failed to answer {}: {}", peer, err);
                }
            }
        }
        Ok(true)
    }

    /// Parses one datagram and produces the encoded response, if any
    fn handle_datagram(&mut self, data: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
        let packet = match Packet::from_bytes(data) {
            Ok(packet) => packet,
            Err(err) => {
                debug!("Dropping undecodable datagram from {}: {:?}", peer, err);
                return None;
            }
        };
        let request = CoapRequest::from_packet(packet, peer);
        let response = self.handle(&request)?;
        match response.message.to_bytes() {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!("Failed to encode response for {}: {:?}", peer, err);
                None
            }
        }
    }

    /// Handles one CoAP request against the resource tree.
    ///
    /// `None` only when the request can take no response at all (bad
    /// message type); every resource and method outcome is a response.
    pub fn handle(&mut self, request: &CoapRequest<SocketAddr>) -> Option<CoapResponse> {
        let method = request.get_method().clone();
        let path = request.get_path();
        let query = request
            .message
            .get_option(CoapOption::UriQuery)
            .map(|options| {
                options
                    .iter()
                    .map(|option| String::from_utf8_lossy(option).into_owned())
                    .collect::<Vec<String>>()
                    .join("&")
            })
            .filter(|query| !query.is_empty());

        debug!("{:?} /{}", method, path);
        let reply = self.dispatch(method, &path, query.as_deref(), &request.message.payload);

        let mut response = CoapResponse::new(&request.message)?;
        response.message.header.code = MessageClass::Response(reply.status);
        response.message.payload = reply.payload;
        if !response.message.payload.is_empty() {
            response.message.set_content_format(ContentFormat::ApplicationCBOR);
        }
        for segment in reply.location {
            response
                .message
                .add_option(CoapOption::LocationPath, segment.into_bytes());
        }
        Some(response)
    }

    /// Resolves the path and routes to the per-resource handler.
    ///
    /// Missing resources answer per the ZCL-IP method table: 4.04 for
    /// GET/POST/PUT, 2.02 for DELETE. A method a present resource doesn't
    /// support answers 4.05.
    fn dispatch(
        &mut self,
        method: RequestType,
        path: &str,
        query: Option<&str>,
        payload: &[u8],
    ) -> Reply {
        let Some(target) = router::resolve(&self.device, path) else {
            return match method {
                RequestType::Delete => Reply::deleted(),
                _ => Reply::empty(ResponseType::NotFound),
            };
        };

        let Service {
            device, storage, ..
        } = self;
        let result = match (target, method) {
            (Target::Root, RequestType::Get) => Ok(handlers::zcl_get()),
            (Target::Endpoints, RequestType::Get) => Ok(handlers::endpoints_get(device)),
            (Target::Endpoint { ep }, RequestType::Get) => {
                Ok(handlers::endpoint_get(&device.endpoints[ep]))
            }
            (Target::Cluster { .. }, RequestType::Get) => Ok(handlers::cluster_get()),
            (Target::Attributes { ep, cl }, RequestType::Get) => {
                handlers::attributes::list(&device.endpoints[ep].clusters[cl], query)
            }
            (Target::Attributes { ep, cl }, RequestType::Post) => {
                handlers::attributes::batch_write(&device.endpoints[ep].clusters[cl])
            }
            (Target::Attribute { ep, cl, attribute }, RequestType::Get) => Ok(
                handlers::attributes::read(&device.endpoints[ep].clusters[cl], attribute),
            ),
            (Target::Attribute { ep, cl, attribute }, RequestType::Put) => {
                handlers::attributes::write(&device.endpoints[ep].clusters[cl], attribute, payload)
            }
            (Target::Bindings { ep, cl }, RequestType::Get) => {
                Ok(handlers::bindings::list(&device.endpoints[ep].clusters[cl]))
            }
            (Target::Bindings { ep, cl }, RequestType::Post) => {
                let endpoint = &mut device.endpoints[ep];
                handlers::bindings::create(endpoint.id, &mut endpoint.clusters[cl], storage, payload)
            }
            (Target::Binding { ep, cl, binding }, RequestType::Get) => Ok(
                handlers::bindings::read(&device.endpoints[ep].clusters[cl], binding),
            ),
            (Target::Binding { ep, cl, binding }, RequestType::Put) => handlers::bindings::update(
                &mut device.endpoints[ep].clusters[cl],
                storage,
                binding,
                payload,
            ),
            (Target::Binding { ep, cl, binding }, RequestType::Delete) => {
                handlers::bindings::delete(&mut device.endpoints[ep].clusters[cl], storage, binding)
            }
            (Target::Commands { ep, cl }, RequestType::Get) => {
                Ok(handlers::commands_get(&device.endpoints[ep].clusters[cl]))
            }
            (Target::Command { ep, cl, command }, RequestType::Post) => Ok(
                handlers::command_post(&device.endpoints[ep].clusters[cl], command),
            ),
            (Target::Notifications { ep, cl }, RequestType::Post) => {
                handlers::notification_post(&device.endpoints[ep].clusters[cl], payload)
            }
            (Target::Reports { ep, cl }, RequestType::Get) => {
                Ok(handlers::reports::list(&device.endpoints[ep].clusters[cl]))
            }
            (Target::Reports { ep, cl }, RequestType::Post) => {
                let endpoint = &mut device.endpoints[ep];
                handlers::reports::create(endpoint.id, &mut endpoint.clusters[cl], storage, payload)
            }
            (Target::Report { ep, cl, report }, RequestType::Get) => Ok(handlers::reports::read(
                &device.endpoints[ep].clusters[cl],
                report,
            )),
            (Target::Report { ep, cl, report }, RequestType::Put) => handlers::reports::update(
                &mut device.endpoints[ep].clusters[cl],
                storage,
                report,
                payload,
            ),
            (Target::Report { ep, cl, report }, RequestType::Delete) => {
                handlers::reports::delete(&mut device.endpoints[ep].clusters[cl], storage, report)
            }
            _ => Ok(Reply::empty(ResponseType::MethodNotAllowed)),
        };

        result.unwrap_or_else(|err| {
            warn!("Request on /{} failed: {}", path, err);
            Reply::empty(err.status())
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
