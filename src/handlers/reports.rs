//! Report configuration resource handlers
//!
//! Reports and bindings form a deliberately loose pair: a binding holds
//! only the id of its report configuration, so deleting a report leaves
//! referencing bindings in place with that id reset to zero.

use super::{bindings, HandlerError, Reply};
use crate::codec::{self, BindingEntry};
use crate::device::{Cluster, Report, CLUSTER_REPORTS_MAX};
use crate::storage::Storage;
use log::{debug, warn};

/// `GET …/r`: the report configuration identifiers
pub fn list(cluster: &Cluster) -> Reply {
    Reply::content(codec::encode_id_array(
        cluster.reports.iter().map(|report| report.id as u64),
    ))
}

/// `GET …/r/<rid>`: one report configuration as `{"a", "n", "x"}`
pub fn read(cluster: &Cluster, index: usize) -> Reply {
    Reply::content(codec::encode_report_entry(&cluster.reports[index]))
}

/// `POST …/r`: create a report configuration.
///
/// Answers 2.01 with the Location-Path of the new instance. When the
/// payload carries a destination URI, a companion binding referencing the
/// new configuration is created alongside; its failure (capacity, storage)
/// is logged but does not undo the report.
pub fn create(
    eid: u8,
    cluster: &mut Cluster,
    storage: &mut Storage,
    payload: &[u8],
) -> Result<Reply, HandlerError> {
    let entry = codec::decode_report_entry(payload)?;

    if cluster.reports.len() >= CLUSTER_REPORTS_MAX {
        return Err(HandlerError::Capacity);
    }

    let mut report = Report {
        id: 0,
        min_interval: entry.min_interval,
        max_interval: entry.max_interval,
        attributes: entry.attributes,
    };
    report.id = storage.put_report(eid, cluster.id, &report)?;

    let location = bindings::instance_location(eid, cluster, 'r', report.id);
    let rid = report.id;
    cluster.reports.push(report);

    if let Some(uri) = entry.uri {
        let companion = BindingEntry { uri, rid };
        if let Err(err) = bindings::create_from_entry(eid, cluster, storage, companion) {
            warn!(
                "Companion binding for report {} was not created: {}",
                rid, err
            );
        }
    }

    Ok(Reply::created(location))
}

/// `PUT …/r/<rid>`: update a report configuration in place, id preserved
pub fn update(
    cluster: &mut Cluster,
    storage: &mut Storage,
    index: usize,
    payload: &[u8],
) -> Result<Reply, HandlerError> {
    let entry = codec::decode_report_entry(payload)?;
    if entry.uri.is_some() {
        debug!("Ignoring destination uri on report update");
    }

    let report = Report {
        id: cluster.reports[index].id,
        min_interval: entry.min_interval,
        max_interval: entry.max_interval,
        attributes: entry.attributes,
    };
    storage.update_report(&report)?;
    cluster.reports[index] = report;
    Ok(Reply::changed())
}

/// `DELETE …/r/<rid>`: remove a report configuration.
///
/// Every binding that referenced it stays addressable with its report id
/// reset to zero, persisted immediately.
pub fn delete(
    cluster: &mut Cluster,
    storage: &mut Storage,
    index: usize,
) -> Result<Reply, HandlerError> {
    let report = cluster.reports.remove(index);

    for binding in cluster
        .bindings
        .iter_mut()
        .filter(|binding| binding.rid == report.id)
    {
        binding.rid = 0;
        storage.update_binding(binding)?;
    }

    storage.delete_report(report.slot())?;
    Ok(Reply::deleted())
}
