//! Per-resource request handlers
//!
//! Each handler implements the method semantics of one resource in the
//! tree and produces a [Reply]; recoverable failures surface as
//! [HandlerError] and map onto the CoAP error codes of the engine's error
//! taxonomy. Parsing failures stay local to the handler: nothing partially
//! decoded ever reaches storage or the resource tree.

use crate::codec::{self, DecodeError};
use crate::device::{Cluster, Device, Endpoint};
use crate::storage::StorageError;
use coap_lite::ResponseType;

pub mod attributes;
pub mod bindings;
pub mod reports;

/// Outcome of a successfully handled request
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: ResponseType,
    /// CBOR payload; empty means no payload (and no Content-Format)
    pub payload: Vec<u8>,
    /// Location-Path segments attached to 2.01 replies
    pub location: Vec<String>,
}

impl Reply {
    /// An empty-bodied reply with the given status
    pub fn empty(status: ResponseType) -> Reply {
        Reply {
            status,
            payload: Vec::new(),
            location: Vec::new(),
        }
    }

    /// 2.05 Content with a CBOR payload
    pub fn content(payload: Vec<u8>) -> Reply {
        Reply {
            status: ResponseType::Content,
            payload,
            location: Vec::new(),
        }
    }

    /// 2.04 Changed without payload
    pub fn changed() -> Reply {
        Reply::empty(ResponseType::Changed)
    }

    /// 2.01 Created pointing at the new resource
    pub fn created(location: Vec<String>) -> Reply {
        Reply {
            status: ResponseType::Created,
            payload: Vec::new(),
            location,
        }
    }

    /// 2.02 Deleted
    pub fn deleted() -> Reply {
        Reply::empty(ResponseType::Deleted)
    }
}

/// Recoverable handler failures and their CoAP mapping
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Malformed payload or query → 4.00
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Schema-level rejection beyond raw decoding → 4.00
    #[error("bad request: {0}")]
    BadRequest(&'static str),
    /// Cluster capacity exhausted → 5.00
    #[error("cluster capacity exhausted")]
    Capacity,
    /// Storage full or record oversized → 5.00 (startup I/O failures are
    /// fatal and never reach a handler)
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl HandlerError {
    /// CoAP response code for this failure, per the engine error taxonomy
    pub fn status(&self) -> ResponseType {
        match self {
            HandlerError::Decode(_) | HandlerError::BadRequest(_) => ResponseType::BadRequest,
            HandlerError::Capacity | HandlerError::Storage(_) => {
                ResponseType::InternalServerError
            }
        }
    }
}

/// `GET /zcl`: the entry point resources. Only the endpoint collection
/// exists at this time.
pub fn zcl_get() -> Reply {
    Reply::content(codec::encode_text_array(["e".to_string()]))
}

/// `GET /zcl/e`: the endpoint identifiers
pub fn endpoints_get(device: &Device) -> Reply {
    Reply::content(codec::encode_id_array(
        device.endpoints.iter().map(|endpoint| endpoint.id as u64),
    ))
}

/// `GET /zcl/e/<eid>`: the cluster segments hosted by an endpoint
pub fn endpoint_get(endpoint: &Endpoint) -> Reply {
    Reply::content(codec::encode_text_array(
        endpoint.clusters.iter().map(|cluster| cluster.segment()),
    ))
}

/// `GET /zcl/e/<eid>/<cl>`: the child resources of a cluster
pub fn cluster_get() -> Reply {
    Reply::content(codec::encode_text_array(
        ["a", "b", "c", "n", "r"].map(String::from),
    ))
}

/// `GET …/c`: the command identifiers
pub fn commands_get(cluster: &Cluster) -> Reply {
    Reply::content(codec::encode_id_array(
        cluster.commands.iter().map(|command| command.id as u64),
    ))
}

/// `POST …/c/<cid>`: invoke a command. Arguments are not modeled at
/// this layer; the response is 2.04 regardless of body.
pub fn command_post(cluster: &Cluster, index: usize) -> Reply {
    (cluster.commands[index].exec)();
    Reply::changed()
}

/// `POST …/n`: ingest a notification from a peer and deliver it to the
/// cluster's notification callback
pub fn notification_post(cluster: &Cluster, payload: &[u8]) -> Result<Reply, HandlerError> {
    let notification = codec::decode_notification(payload)?;

    let notify = cluster
        .notify
        .as_ref()
        .ok_or(HandlerError::BadRequest("cluster accepts no notifications"))?;
    notify(&notification);
    Ok(Reply::changed())
}

#[cfg(test)]
mod test {
    use super::{cluster_get, commands_get, notification_post, zcl_get, HandlerError};
    use crate::codec;
    use crate::device::{Cluster, Command};
    use ciborium::value::Value as Cbor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn decode(payload: &[u8]) -> Cbor {
        codec::from_bytes(payload).unwrap()
    }

    /// The fixed collection listings render as CBOR text arrays
    #[test]
    fn test_fixed_listings() {
        assert_eq!(
            decode(&zcl_get().payload),
            Cbor::Array(vec![Cbor::Text("e".to_string())])
        );
        let children = match decode(&cluster_get().payload) {
            Cbor::Array(items) => items,
            other => panic!("expected array, got {:?}", other),
        };
        assert_eq!(children.len(), 5);
    }

    /// Command invocation reaches the executor callback
    #[test]
    fn test_command_invoke() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let cluster =
            Cluster::server(6).command(Command::new(1, move || flag.store(true, Ordering::SeqCst)));

        let reply = super::command_post(&cluster, 0);
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(reply.status, coap_lite::ResponseType::Changed);
        assert_eq!(
            decode(&commands_get(&cluster).payload),
            Cbor::Array(vec![Cbor::Integer(1.into())])
        );
    }

    /// Notifications for clusters without a callback are rejected
    #[test]
    fn test_notification_requires_callback() {
        let payload = codec::to_bytes(&Cbor::Map(vec![(
            Cbor::Text("b".to_string()),
            Cbor::Integer(1.into()),
        )]));

        let silent = Cluster::server(6);
        assert!(matches!(
            notification_post(&silent, &payload),
            Err(HandlerError::BadRequest(_))
        ));

        let heard = Arc::new(AtomicBool::new(false));
        let flag = heard.clone();
        let listening = Cluster::server(6).on_notification(Box::new(move |notification| {
            assert_eq!(notification.bid, 1);
            flag.store(true, Ordering::SeqCst);
        }));
        notification_post(&listening, &payload).unwrap();
        assert!(heard.load(Ordering::SeqCst));
    }
}
