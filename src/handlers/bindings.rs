//! Binding resource handlers
//!
//! Bindings are persistent records: every mutation goes through storage
//! before the in-memory cluster array is touched, so nothing half-created
//! survives a handler failure.

use super::{HandlerError, Reply};
use crate::codec::{self, BindingEntry};
use crate::device::{Binding, Cluster, CLUSTER_BINDINGS_MAX};
use crate::storage::Storage;

/// `GET …/b`: the binding identifiers
pub fn list(cluster: &Cluster) -> Reply {
    Reply::content(codec::encode_id_array(
        cluster.bindings.iter().map(|binding| binding.id as u64),
    ))
}

/// `GET …/b/<bid>`: one binding as `{"u": <uri>, "r": <rid>}`
pub fn read(cluster: &Cluster, index: usize) -> Reply {
    Reply::content(codec::encode_binding_entry(&cluster.bindings[index]))
}

/// `POST …/b`: create a binding.
///
/// The referenced report configuration must exist in this cluster (a zero
/// report id means "none"), and an equivalent binding must not already be
/// present. Answers 2.01 with the Location-Path of the new instance.
pub fn create(
    eid: u8,
    cluster: &mut Cluster,
    storage: &mut Storage,
    payload: &[u8],
) -> Result<Reply, HandlerError> {
    let entry = codec::decode_binding_entry(payload)?;
    let id = create_from_entry(eid, cluster, storage, entry)?;
    Ok(Reply::created(instance_location(eid, cluster, 'b', id)))
}

/// Validates and inserts a binding entry, returning the assigned id.
/// Also the backing path for companion bindings created by report POSTs.
pub(super) fn create_from_entry(
    eid: u8,
    cluster: &mut Cluster,
    storage: &mut Storage,
    entry: BindingEntry,
) -> Result<u8, HandlerError> {
    validate_entry(cluster, &entry, None)?;

    if cluster.bindings.len() >= CLUSTER_BINDINGS_MAX {
        return Err(HandlerError::Capacity);
    }

    let mut binding = Binding {
        id: 0,
        uri: entry.uri,
        rid: entry.rid,
        timestamp: 0,
    };
    binding.id = storage.put_binding(eid, cluster.id, &binding)?;

    let id = binding.id;
    cluster.bindings.push(binding);
    Ok(id)
}

/// `PUT …/b/<bid>`: update a binding in place, id preserved
pub fn update(
    cluster: &mut Cluster,
    storage: &mut Storage,
    index: usize,
    payload: &[u8],
) -> Result<Reply, HandlerError> {
    let entry = codec::decode_binding_entry(payload)?;
    let id = cluster.bindings[index].id;
    validate_entry(cluster, &entry, Some(id))?;

    let binding = Binding {
        id,
        uri: entry.uri,
        rid: entry.rid,
        // A rewritten binding is due for reporting again
        timestamp: 0,
    };
    storage.update_binding(&binding)?;
    cluster.bindings[index] = binding;
    Ok(Reply::changed())
}

/// `DELETE …/b/<bid>`: remove a binding from the cluster array
/// (compacting it) and clear its storage row
pub fn delete(
    cluster: &mut Cluster,
    storage: &mut Storage,
    index: usize,
) -> Result<Reply, HandlerError> {
    let binding = cluster.bindings.remove(index);
    storage.delete_binding(binding.slot())?;
    Ok(Reply::deleted())
}

/// Checks a decoded entry against the cluster: the referenced report must
/// exist and the (scheme, host, port, path, rid) tuple must be unique.
/// Updates skip their own instance in the duplicate scan.
fn validate_entry(
    cluster: &Cluster,
    entry: &BindingEntry,
    updating: Option<u8>,
) -> Result<(), HandlerError> {
    if entry.rid != 0 && cluster.find_report(entry.rid).is_none() {
        return Err(HandlerError::BadRequest(
            "binding references an unknown report configuration",
        ));
    }

    let duplicate = cluster.bindings.iter().any(|other| {
        updating != Some(other.id)
            && other.rid == entry.rid
            && other.uri.scheme == entry.uri.scheme
            && other.uri.host == entry.uri.host
            && other.uri.port == entry.uri.port
            && other.uri.path == entry.uri.path
    });
    if duplicate {
        return Err(HandlerError::BadRequest("equivalent binding already exists"));
    }
    Ok(())
}

/// Location-Path segments `/zcl/e/<eid>/<cl>/<collection>/<id>`
pub(super) fn instance_location(eid: u8, cluster: &Cluster, collection: char, id: u8) -> Vec<String> {
    vec![
        "zcl".to_string(),
        "e".to_string(),
        format!("{:x}", eid),
        cluster.segment(),
        collection.to_string(),
        format!("{:x}", id),
    ]
}

#[cfg(test)]
mod test {
    use super::{create, delete, list, read, update};
    use crate::codec;
    use crate::device::{Cluster, Report};
    use crate::handlers::HandlerError;
    use crate::storage::Storage;
    use ciborium::value::Value as Cbor;
    use coap_lite::ResponseType;

    fn temp_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("data.bin")).unwrap();
        (dir, storage)
    }

    fn entry_payload(uri: &str, rid: Option<u8>) -> Vec<u8> {
        let mut map = vec![(Cbor::Text("u".to_string()), Cbor::Text(uri.to_string()))];
        if let Some(rid) = rid {
            map.push((Cbor::Text("r".to_string()), Cbor::Integer(rid.into())));
        }
        codec::to_bytes(&Cbor::Map(map))
    }

    /// Creation persists the binding, links it into the cluster and
    /// answers with the full instance location
    #[test]
    fn test_create() {
        let (_dir, mut storage) = temp_storage();
        let mut cluster = Cluster::server(3);

        let payload = entry_payload("coap://node1/zcl/e/1/s3/n", Some(0));
        let reply = create(1, &mut cluster, &mut storage, &payload).unwrap();

        assert_eq!(reply.status, ResponseType::Created);
        assert_eq!(reply.location, ["zcl", "e", "1", "s3", "b", "1"]);
        assert_eq!(cluster.bindings.len(), 1);
        assert_eq!(cluster.bindings[0].id, 1);
        assert!(storage.get_binding(0).is_some());

        let listing = list(&cluster);
        assert_eq!(
            codec::from_bytes(&listing.payload).unwrap(),
            Cbor::Array(vec![Cbor::Integer(1.into())])
        );
    }

    /// A nonzero report reference must resolve within the cluster
    #[test]
    fn test_create_checks_report() {
        let (_dir, mut storage) = temp_storage();
        let mut cluster = Cluster::server(3);

        let payload = entry_payload("coap://node1/zcl/e/1/s3/n", Some(1));
        assert!(matches!(
            create(1, &mut cluster, &mut storage, &payload),
            Err(HandlerError::BadRequest(_))
        ));

        cluster.reports.push(Report {
            id: 1,
            min_interval: 2,
            max_interval: 10,
            attributes: Vec::new(),
        });
        assert!(create(1, &mut cluster, &mut storage, &payload).is_ok());
    }

    /// The same (scheme, host, port, path, rid) tuple cannot be bound
    /// twice, but updates may keep their own tuple
    #[test]
    fn test_duplicates() {
        let (_dir, mut storage) = temp_storage();
        let mut cluster = Cluster::server(3);

        let payload = entry_payload("coap://node1/zcl/e/1/s3/n", None);
        create(1, &mut cluster, &mut storage, &payload).unwrap();
        assert!(matches!(
            create(1, &mut cluster, &mut storage, &payload),
            Err(HandlerError::BadRequest(_))
        ));

        // A different path is a different binding
        let other = entry_payload("coap://node1/zcl/e/1/s3/n2", None);
        create(1, &mut cluster, &mut storage, &other).unwrap();

        // Rewriting an instance with its own tuple is not a duplicate
        assert!(update(&mut cluster, &mut storage, 0, &payload).is_ok());
        // Rewriting it into the other instance's tuple is
        assert!(matches!(
            update(&mut cluster, &mut storage, 0, &other),
            Err(HandlerError::BadRequest(_))
        ));
    }

    /// Updates keep the id and rewrite the stored record
    #[test]
    fn test_update() {
        let (_dir, mut storage) = temp_storage();
        let mut cluster = Cluster::server(3);

        create(
            1,
            &mut cluster,
            &mut storage,
            &entry_payload("coap://node1/zcl/e/1/s3/n", None),
        )
        .unwrap();
        update(
            &mut cluster,
            &mut storage,
            0,
            &entry_payload("coap://node2:6000/zcl/e/1/s3/n", None),
        )
        .unwrap();

        assert_eq!(cluster.bindings[0].id, 1);
        assert_eq!(cluster.bindings[0].uri.host, "node2");
        let (_, _, stored) = storage.get_binding(0).unwrap();
        assert_eq!(stored.uri.host, "node2");
        assert_eq!(stored.uri.port, 6000);

        let reading = read(&cluster, 0);
        assert_eq!(reading.status, ResponseType::Content);
    }

    /// Deletion compacts the array and frees the storage slot
    #[test]
    fn test_delete_compacts() {
        let (_dir, mut storage) = temp_storage();
        let mut cluster = Cluster::server(3);

        for path in ["/n1", "/n2", "/n3"] {
            let payload = entry_payload(&format!("coap://node{}", path), None);
            create(1, &mut cluster, &mut storage, &payload).unwrap();
        }

        let reply = delete(&mut cluster, &mut storage, 1).unwrap();
        assert_eq!(reply.status, ResponseType::Deleted);

        // Survivors shifted down, no holes
        let ids: Vec<u8> = cluster.bindings.iter().map(|b| b.id).collect();
        assert_eq!(ids, [1, 3]);
        assert!(storage.get_binding(1).is_none());
        assert!(storage.get_binding(0).is_some());
        assert!(storage.get_binding(2).is_some());
    }
}
