//! The reporting engine: periodic outbound notifications
//!
//! Each tick walks every binding of every cluster, pairs it with its report
//! configuration and decides whether a notification is due. Attribute
//! values are read live through the application callbacks at emission time.
//! The returned value is the sleep hint for the host loop: the shortest
//! time in seconds until any binding becomes due again.

use crate::codec;
use crate::device::Device;
use crate::storage::Storage;
use crate::transport;
use crate::uri::{Scheme, Uri};
use crate::value::Value;
use log::{debug, error, warn};

/// Runs one outbound tick at the given epoch time, sending every due
/// notification. Returns the host sleep hint in seconds, capped at 0xffff.
pub fn process(
    device: &mut Device,
    storage: &mut Storage,
    sender_host: &str,
    now: u64,
    message_id: &mut u16,
) -> u16 {
    let mut may_sleep = u16::MAX;

    for endpoint in &mut device.endpoints {
        let eid = endpoint.id;
        for cluster in &mut endpoint.clusters {
            for index in 0..cluster.bindings.len() {
                let (bid, rid, timestamp) = {
                    let binding = &cluster.bindings[index];
                    (binding.id, binding.rid, binding.timestamp)
                };

                if rid == 0 {
                    // No default report configuration is supplied; such
                    // bindings never become due
                    debug!("Binding {} has no report configuration, skipping", bid);
                    continue;
                }
                // Fail closed: a dangling report reference produces no
                // notification
                let Some(report) = cluster.find_report(rid) else {
                    warn!(
                        "Binding {} references missing report {}, skipping",
                        bid, rid
                    );
                    continue;
                };
                let min_interval = report.min_interval;
                let report_aids: Vec<u16> =
                    report.attributes.iter().map(|entry| entry.aid).collect();

                let mut elapsed = now.saturating_sub(timestamp);
                if elapsed >= min_interval as u64 {
                    let mut values: Vec<(u16, Value)> = Vec::with_capacity(report_aids.len());
                    for aid in report_aids {
                        match cluster.find_attribute(aid) {
                            Some(attribute) => values.push((aid, (attribute.read)())),
                            None => warn!(
                                "Report {} names attribute {:x} the cluster does not have",
                                rid, aid
                            ),
                        }
                    }

                    let sender = Uri::new(
                        Scheme::Coap,
                        sender_host,
                        0,
                        format!("/zcl/e/{:x}/{}", eid, cluster.segment()),
                    );
                    let payload = codec::encode_notification(&values, bid, rid, now, &sender);

                    *message_id = message_id.wrapping_add(1);
                    let destination = cluster.bindings[index].uri.clone();
                    match transport::send_notification(&destination, *message_id, payload) {
                        Ok(()) => {
                            debug!("Sent notification for binding {} to {}", bid, destination);
                            cluster.bindings[index].timestamp = now;
                            elapsed = 0;
                            if let Err(err) = storage.update_binding(&cluster.bindings[index]) {
                                error!("Failed to persist binding {} timestamp: {}", bid, err);
                            }
                        }
                        Err(err) => {
                            // Send failures never abort the walk, and a
                            // failed binding doesn't shorten the sleep hint
                            warn!("Failed to notify {}: {}", destination, err);
                            continue;
                        }
                    }
                }

                let due_in = (min_interval as u64).saturating_sub(elapsed);
                may_sleep = may_sleep.min(due_in as u16);
            }
        }
    }

    may_sleep
}
