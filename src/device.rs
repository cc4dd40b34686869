//! ZCL resource tree: device, endpoints, clusters and their contents
//!
//! The tree is built by the application at startup and stays structurally
//! fixed while the engine runs. Attributes and commands are static per
//! cluster; bindings and report configurations are dynamic, bounded and
//! mirrored in persistent storage.

use crate::uri::Uri;
use crate::value::Value;

/// Maximum bindings a single cluster can hold
pub const CLUSTER_BINDINGS_MAX: usize = 16;
/// Maximum report configurations a single cluster can hold
pub const CLUSTER_REPORTS_MAX: usize = 4;

/// Reads the live value of an attribute. Must be non-blocking and
/// reentrant-safe: both inbound handlers and the reporting engine call it.
pub type ReadHandler = Box<dyn Fn() -> Value + Send>;
/// Consumes a value written to an attribute
pub type WriteHandler = Box<dyn Fn(&Value) + Send>;
/// Executes a command invocation (arguments are not modeled at this layer)
pub type CommandHandler = Box<dyn Fn() + Send>;
/// Receives an inbound notification delivered to a cluster
pub type NotifyHandler = Box<dyn Fn(&Notification) + Send>;

/// Root of the resource tree, owning every endpoint
#[derive(Default)]
pub struct Device {
    pub endpoints: Vec<Endpoint>,
}

impl Device {
    pub fn new() -> Device {
        Device::default()
    }

    pub fn endpoint(mut self, endpoint: Endpoint) -> Device {
        self.endpoints.push(endpoint);
        self
    }

    pub fn find_endpoint_mut(&mut self, eid: u8) -> Option<&mut Endpoint> {
        self.endpoints
            .iter_mut()
            .find(|endpoint| endpoint.id == eid)
    }
}

/// A ZCL application entity on the device
pub struct Endpoint {
    pub id: u8,
    pub clusters: Vec<Cluster>,
}

impl Endpoint {
    pub fn new(id: u8) -> Endpoint {
        Endpoint {
            id,
            clusters: Vec::new(),
        }
    }

    pub fn cluster(mut self, cluster: Cluster) -> Endpoint {
        self.clusters.push(cluster);
        self
    }

    pub fn find_cluster_mut(&mut self, role: Role, id: u16, mfg: Option<u16>) -> Option<&mut Cluster> {
        self.clusters
            .iter_mut()
            .find(|cluster| cluster.role == role && cluster.id == id && cluster.manufacturer == mfg)
    }
}

/// Whether a cluster instance is the client or the server side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Single-character form used in URIs and cluster listings
    pub fn letter(&self) -> char {
        match self {
            Role::Client => 'c',
            Role::Server => 's',
        }
    }

    pub fn from_letter(letter: char) -> Option<Role> {
        match letter {
            'c' => Some(Role::Client),
            's' => Some(Role::Server),
            _ => None,
        }
    }
}

/// A cluster instance on an endpoint.
///
/// Identity within the endpoint is the (role, id, manufacturer) triple.
/// Bindings and reports are append-compact: entries `0..len` are live,
/// deletion shifts survivors down.
pub struct Cluster {
    pub id: u16,
    pub role: Role,
    /// Optional manufacturer code; rendered as an `_<hex>` suffix on the
    /// cluster URI segment when present
    pub manufacturer: Option<u16>,
    pub attributes: Vec<Attribute>,
    pub commands: Vec<Command>,
    pub bindings: Vec<Binding>,
    pub reports: Vec<Report>,
    pub notify: Option<NotifyHandler>,
}

impl Cluster {
    pub fn new(role: Role, id: u16) -> Cluster {
        Cluster {
            id,
            role,
            manufacturer: None,
            attributes: Vec::new(),
            commands: Vec::new(),
            bindings: Vec::with_capacity(CLUSTER_BINDINGS_MAX),
            reports: Vec::with_capacity(CLUSTER_REPORTS_MAX),
            notify: None,
        }
    }

    /// Shorthand for a server-role cluster
    pub fn server(id: u16) -> Cluster {
        Cluster::new(Role::Server, id)
    }

    /// Shorthand for a client-role cluster
    pub fn client(id: u16) -> Cluster {
        Cluster::new(Role::Client, id)
    }

    pub fn manufacturer(mut self, code: u16) -> Cluster {
        self.manufacturer = Some(code);
        self
    }

    pub fn attribute(mut self, attribute: Attribute) -> Cluster {
        self.attributes.push(attribute);
        self
    }

    pub fn command(mut self, command: Command) -> Cluster {
        self.commands.push(command);
        self
    }

    pub fn on_notification(mut self, handler: NotifyHandler) -> Cluster {
        self.notify = Some(handler);
        self
    }

    /// The cluster URI segment: `<role><hex-id>[_<hex-manufacturer>]`
    pub fn segment(&self) -> String {
        match self.manufacturer {
            Some(mfg) => format!("{}{:x}_{:x}", self.role.letter(), self.id, mfg),
            None => format!("{}{:x}", self.role.letter(), self.id),
        }
    }

    /// Looks up the report configuration a binding references. Report ids
    /// are nullable (0 = absent) so bindings never hold direct references.
    pub fn find_report(&self, rid: u8) -> Option<&Report> {
        if rid == 0 {
            return None;
        }
        self.reports.iter().find(|report| report.id == rid)
    }

    pub fn find_attribute(&self, aid: u16) -> Option<&Attribute> {
        self.attributes.iter().find(|attribute| attribute.id == aid)
    }
}

/// A typed, named property on a cluster
pub struct Attribute {
    pub id: u16,
    pub name: String,
    pub read: ReadHandler,
    pub write: WriteHandler,
}

impl Attribute {
    pub fn new(
        id: u16,
        name: impl Into<String>,
        read: impl Fn() -> Value + Send + 'static,
        write: impl Fn(&Value) + Send + 'static,
    ) -> Attribute {
        Attribute {
            id,
            name: name.into(),
            read: Box::new(read),
            write: Box::new(write),
        }
    }
}

/// An invocable action on a cluster
pub struct Command {
    pub id: u16,
    pub exec: CommandHandler,
}

impl Command {
    pub fn new(id: u16, exec: impl Fn() + Send + 'static) -> Command {
        Command {
            id,
            exec: Box::new(exec),
        }
    }
}

/// A persistent outbound subscription from a cluster to a peer.
///
/// The id is 1-based and derived from the storage slot holding the record,
/// stable for as long as the slot stays occupied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub id: u8,
    pub uri: Uri,
    /// Referenced report configuration id, 0 when absent
    pub rid: u8,
    /// Epoch seconds of the last notification sent for this binding
    pub timestamp: u64,
}

impl Binding {
    /// Storage slot backing this binding
    pub fn slot(&self) -> usize {
        self.id as usize - 1
    }
}

/// A persistent reporting policy: when attribute changes on this cluster
/// produce a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub id: u8,
    /// Minimum seconds between notifications
    pub min_interval: u16,
    /// Maximum seconds between notifications
    pub max_interval: u16,
    pub attributes: Vec<ReportAttribute>,
}

impl Report {
    /// Storage slot backing this report configuration
    pub fn slot(&self) -> usize {
        self.id as usize - 1
    }
}

/// Per-attribute reporting thresholds (analog types only)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportAttribute {
    pub aid: u16,
    pub reportable_change: Option<Value>,
    pub low_threshold: Option<Value>,
    pub high_threshold: Option<Value>,
}

/// An inbound attribute notification delivered to a cluster callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Attribute values reported by the sender
    pub attributes: Vec<(u16, Value)>,
    /// Binding id on the sender
    pub bid: u8,
    /// Report configuration id on the sender
    pub rid: u8,
    /// Epoch seconds the notification was produced
    pub timestamp: u64,
    /// Source URI of the sending cluster
    pub uri: Option<Uri>,
}

#[cfg(test)]
mod test {
    use super::{Attribute, Cluster, Device, Endpoint, Report, Role};
    use crate::value::Value;

    fn cluster_with_report(rid: u8) -> Cluster {
        let mut cluster = Cluster::server(6);
        cluster.reports.push(Report {
            id: rid,
            min_interval: 2,
            max_interval: 10,
            attributes: Vec::new(),
        });
        cluster
    }

    /// Cluster segments render role, hex id and the manufacturer suffix
    #[test]
    fn test_cluster_segment() {
        assert_eq!(Cluster::server(0x102).segment(), "s102");
        assert_eq!(Cluster::client(6).segment(), "c6");
        assert_eq!(Cluster::server(6).manufacturer(0xab12).segment(), "s6_ab12");
    }

    /// Report id 0 means "no report configuration" and never resolves
    #[test]
    fn test_find_report_zero() {
        let cluster = cluster_with_report(1);
        assert!(cluster.find_report(0).is_none());
        assert_eq!(cluster.find_report(1).map(|r| r.id), Some(1));
        assert!(cluster.find_report(2).is_none());
    }

    /// Endpoint lookup matches the full (role, id, manufacturer) identity
    #[test]
    fn test_cluster_identity() {
        let mut endpoint = Endpoint::new(1)
            .cluster(Cluster::server(6))
            .cluster(Cluster::client(6))
            .cluster(Cluster::server(6).manufacturer(0x1002));

        assert!(endpoint.find_cluster_mut(Role::Server, 6, None).is_some());
        assert!(endpoint.find_cluster_mut(Role::Client, 6, None).is_some());
        assert!(endpoint
            .find_cluster_mut(Role::Server, 6, Some(0x1002))
            .is_some());
        assert!(endpoint.find_cluster_mut(Role::Server, 7, None).is_none());
        assert!(endpoint
            .find_cluster_mut(Role::Client, 6, Some(0x1002))
            .is_none());
    }

    /// Attribute reads go through the application callback
    #[test]
    fn test_attribute_read() {
        let device = Device::new().endpoint(Endpoint::new(1).cluster(
            Cluster::server(1).attribute(Attribute::new(
                0,
                "greeting",
                || Value::String("Hello, World!".to_string()),
                |_| {},
            )),
        ));

        let attribute = &device.endpoints[0].clusters[0].attributes[0];
        assert_eq!(
            (attribute.read)(),
            Value::String("Hello, World!".to_string())
        );
    }
}
