//! CoAP transport surface: listen endpoints and the outbound client path
//!
//! The engine listens on the IANA CoAP ports, 5683 plain and 5684 secure,
//! reachable by unicast and through the three IPv6 "All CoAP Nodes"
//! multicast groups (realm, admin and site local). Outbound notifications
//! are sent as non-confirmable POSTs from short-lived client sockets.

use crate::uri::Uri;
use coap_lite::{CoapOption, ContentFormat, MessageClass, MessageType, Packet, RequestType};
use log::warn;
use std::io;
use std::net::{Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

/// Default CoAP port, used for listening and when a binding URI leaves the
/// port unspecified
pub const PORT_COAP: u16 = 5683;
/// Default CoAP-over-DTLS port
pub const PORT_COAPS: u16 = 5684;

/// IPv6 "All CoAP Nodes" multicast groups: realm-local, admin-local and
/// site-local scope
pub const MULTICAST_GROUPS: [Ipv6Addr; 3] = [
    Ipv6Addr::new(0xff03, 0, 0, 0, 0, 0, 0, 0xfd),
    Ipv6Addr::new(0xff04, 0, 0, 0, 0, 0, 0, 0xfd),
    Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0xfd),
];

/// Errors raised on the outbound client path
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to resolve host {0}")]
    Resolve(String),
    #[error("failed to build CoAP message: {0:?}")]
    Message(coap_lite::error::MessageError),
}

/// A server listen endpoint: one socket bound to the wildcard address with
/// the three multicast group memberships joined on it
pub struct Listener {
    socket: UdpSocket,
}

impl Listener {
    /// Binds the listen socket on the given port and joins the CoAP
    /// multicast groups. Group joins are best-effort: hosts without
    /// multicast routing still serve unicast.
    pub fn bind(port: u16) -> io::Result<Listener> {
        let socket = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, port))?;
        socket.set_nonblocking(true)?;

        for group in MULTICAST_GROUPS {
            if let Err(err) = socket.join_multicast_v6(&group, 0) {
                warn!("Failed to join multicast group {}: {}", group, err);
            }
        }

        Ok(Listener { socket })
    }

    /// Non-blocking receive; `None` when no datagram is waiting
    pub fn poll(&self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buffer) {
            Ok((length, source)) => Ok(Some((length, source))),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Sends a response datagram back to a peer
    pub fn send(&self, data: &[u8], peer: SocketAddr) -> io::Result<()> {
        self.socket.send_to(data, peer)?;
        Ok(())
    }
}

/// Resolves a binding destination to a socket address, taking the first
/// DNS answer. An unspecified port dials the default CoAP port.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let port = if port == 0 { PORT_COAP } else { port };
    // Bracketed IPv6 literals carry their brackets in the URI host; the
    // resolver wants them stripped only together with the port syntax, so
    // the bracketed form is passed straight through
    (host, port)
        .to_socket_addrs()
        .map_err(TransportError::Io)?
        .next()
        .ok_or_else(|| TransportError::Resolve(host.to_string()))
}

/// Sends a notification payload as a non-confirmable POST to the
/// destination URI. The client socket lives only for this send.
pub fn send_notification(
    destination: &Uri,
    message_id: u16,
    payload: Vec<u8>,
) -> Result<(), TransportError> {
    let host = destination.host.trim_start_matches('[').trim_end_matches(']');
    let peer = resolve(host, destination.port)?;

    let mut packet = Packet::new();
    packet.header.message_id = message_id;
    packet.header.set_type(MessageType::NonConfirmable);
    packet.header.code = MessageClass::Request(RequestType::Post);
    for segment in destination.path.split('/').filter(|s| !s.is_empty()) {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    packet.set_content_format(ContentFormat::ApplicationCBOR);
    packet.payload = payload;
    let data = packet.to_bytes().map_err(TransportError::Message)?;

    let local: SocketAddr = if peer.is_ipv4() {
        "0.0.0.0:0".parse().expect("fixed address parses")
    } else {
        "[::]:0".parse().expect("fixed address parses")
    };
    let socket = UdpSocket::bind(local)?;
    socket.send_to(&data, peer)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::resolve;
    use coap_lite::Packet;
    use std::net::UdpSocket;

    /// Port 0 in a binding URI dials the default CoAP port
    #[test]
    fn test_resolve_default_port() {
        let addr = resolve("127.0.0.1", 0).unwrap();
        assert_eq!(addr.port(), super::PORT_COAP);
        let addr = resolve("127.0.0.1", 61616).unwrap();
        assert_eq!(addr.port(), 61616);
    }

    /// Notifications arrive as non-confirmable CBOR POSTs with the
    /// destination path split into Uri-Path options
    #[test]
    fn test_send_notification() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();

        let destination =
            crate::uri::Uri::new(crate::uri::Scheme::Coap, "127.0.0.1", port, "/zcl/e/1/s3/n");
        super::send_notification(&destination, 7, vec![0xa0]).unwrap();

        let mut buffer = [0u8; 1280];
        let (length, _) = receiver.recv_from(&mut buffer).unwrap();
        let packet = Packet::from_bytes(&buffer[..length]).unwrap();
        assert_eq!(packet.header.message_id, 7);
        assert_eq!(
            packet.header.get_type(),
            coap_lite::MessageType::NonConfirmable
        );
        let path: Vec<String> = packet
            .get_option(coap_lite::CoapOption::UriPath)
            .map(|options| {
                options
                    .iter()
                    .map(|segment| String::from_utf8_lossy(segment).to_string())
                    .collect()
            })
            .unwrap_or_default();
        assert_eq!(path, ["zcl", "e", "1", "s3", "n"]);
        assert_eq!(packet.payload, vec![0xa0]);
    }
}
