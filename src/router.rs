//! Request routing: URI paths to resource tree locations
//!
//! Paths follow `/zcl/e/<eid>/<cl>/{a|b|c|n|r}[/<id>]` with all numeric
//! segments in hex. Resolution walks the resource tree level by level and
//! yields a [Target] locator carrying tree indices; anything that falls off
//! the tree resolves to "missing", which the dispatcher answers per method
//! (4.04, or 2.02 for DELETE).

use crate::device::{Device, Role};

/// A resolved resource location within the tree.
///
/// Instance variants carry vector indices (not ids) so handlers can address
/// the entry directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// `/zcl`
    Root,
    /// `/zcl/e`
    Endpoints,
    /// `/zcl/e/<eid>`
    Endpoint { ep: usize },
    /// `/zcl/e/<eid>/<cl>`
    Cluster { ep: usize, cl: usize },
    /// `…/<cl>/a`
    Attributes { ep: usize, cl: usize },
    /// `…/<cl>/a/<aid>`
    Attribute { ep: usize, cl: usize, attribute: usize },
    /// `…/<cl>/b`
    Bindings { ep: usize, cl: usize },
    /// `…/<cl>/b/<bid>`
    Binding { ep: usize, cl: usize, binding: usize },
    /// `…/<cl>/c`
    Commands { ep: usize, cl: usize },
    /// `…/<cl>/c/<cid>`
    Command { ep: usize, cl: usize, command: usize },
    /// `…/<cl>/n`
    Notifications { ep: usize, cl: usize },
    /// `…/<cl>/r`
    Reports { ep: usize, cl: usize },
    /// `…/<cl>/r/<rid>`
    Report { ep: usize, cl: usize, report: usize },
}

/// Resolves a request path against the resource tree. `None` means the
/// path names no existing resource.
pub fn resolve(device: &Device, path: &str) -> Option<Target> {
    let decoded = percent_decode(path);
    let mut segments = decoded.split('/').filter(|segment| !segment.is_empty());

    // Only the zcl entry point is known
    if segments.next()? != "zcl" {
        return None;
    }

    let Some(segment) = segments.next() else {
        return Some(Target::Root);
    };
    if segment != "e" {
        return None;
    }

    let Some(segment) = segments.next() else {
        return Some(Target::Endpoints);
    };
    let eid = parse_hex(segment, u8::MAX as u32)? as u8;
    let ep = device
        .endpoints
        .iter()
        .position(|endpoint| endpoint.id == eid)?;
    let endpoint = &device.endpoints[ep];

    let Some(segment) = segments.next() else {
        return Some(Target::Endpoint { ep });
    };
    let (role, id, mfg) = parse_cluster_segment(segment)?;
    let cl = endpoint
        .clusters
        .iter()
        .position(|cluster| cluster.role == role && cluster.id == id && cluster.manufacturer == mfg)?;
    let cluster = &endpoint.clusters[cl];

    let Some(segment) = segments.next() else {
        return Some(Target::Cluster { ep, cl });
    };
    let target = match segment {
        "a" => match segments.next() {
            None => Target::Attributes { ep, cl },
            Some(segment) => {
                let aid = parse_hex(segment, u16::MAX as u32)? as u16;
                let attribute = cluster.attributes.iter().position(|a| a.id == aid)?;
                Target::Attribute { ep, cl, attribute }
            }
        },
        "b" => match segments.next() {
            None => Target::Bindings { ep, cl },
            Some(segment) => {
                let bid = parse_hex(segment, u8::MAX as u32)? as u8;
                let binding = cluster.bindings.iter().position(|b| b.id == bid)?;
                Target::Binding { ep, cl, binding }
            }
        },
        "c" => match segments.next() {
            None => Target::Commands { ep, cl },
            Some(segment) => {
                let cid = parse_hex(segment, u16::MAX as u32)? as u16;
                let command = cluster.commands.iter().position(|x| x.id == cid)?;
                Target::Command { ep, cl, command }
            }
        },
        "n" => match segments.next() {
            None => Target::Notifications { ep, cl },
            Some(_) => return None,
        },
        "r" => match segments.next() {
            None => Target::Reports { ep, cl },
            Some(segment) => {
                let rid = parse_hex(segment, u8::MAX as u32)? as u8;
                let report = cluster.reports.iter().position(|r| r.id == rid)?;
                Target::Report { ep, cl, report }
            }
        },
        _ => return None,
    };

    // Instance resources have no children
    if segments.next().is_some() {
        return None;
    }
    Some(target)
}

/// Decodes `%XX` escapes; malformed escapes pass through untouched
pub fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            let high = (bytes[index + 1] as char).to_digit(16);
            let low = (bytes[index + 2] as char).to_digit(16);
            if let (Some(high), Some(low)) = (high, low) {
                decoded.push((high * 16 + low) as u8);
                index += 3;
                continue;
            }
        }
        decoded.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Parses a hex identifier segment, rejecting values above `max`
fn parse_hex(text: &str, max: u32) -> Option<u32> {
    if text.is_empty() {
        return None;
    }
    let value = u32::from_str_radix(text, 16).ok()?;
    (value <= max).then_some(value)
}

/// Parses a cluster segment `<role><hex-id>[_<hex-manufacturer>]`
fn parse_cluster_segment(segment: &str) -> Option<(Role, u16, Option<u16>)> {
    let mut chars = segment.chars();
    let role = Role::from_letter(chars.next()?)?;
    let rest = chars.as_str();

    let (id_text, mfg) = match rest.split_once('_') {
        Some((id_text, mfg_text)) => {
            let mfg = parse_hex(mfg_text, u16::MAX as u32)? as u16;
            (id_text, Some(mfg))
        }
        None => (rest, None),
    };
    let id = parse_hex(id_text, u16::MAX as u32)? as u16;
    Some((role, id, mfg))
}
