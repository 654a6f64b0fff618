//! # Constants
//!
//! Shared constants for the object-storage relation protocol.
//!
//! Field names and option lists mirror the wire contract between the
//! integrator and requirer applications; changing them is a protocol break.

/// Relation endpoint name over which connection data is exchanged
pub const AZURE_RELATION_NAME: &str = "azure-credentials";

/// Bag field carrying the requested container name; its first appearance
/// on the requirer side is what triggers credential publication
pub const CONTAINER_FIELD: &str = "container";

/// Every option the integrator may publish into the relation
pub const AZURE_OPTIONS: &[&str] = &[
    "container",
    "storage-account",
    "credentials",
    "path",
    "connection-protocol",
];

/// Options the integrator must have configured before it can go active
pub const AZURE_MANDATORY_OPTIONS: &[&str] =
    &["container", "storage-account", "credentials", "connection-protocol"];

/// Fields a requirer needs before a connection is usable
pub const REQUIRED_OPTIONS: &[&str] =
    &["container", "storage-account", "secret-key", "connection-protocol"];

/// Logical fields whose values never travel through relation bags in
/// plaintext; they are carried as secret references instead
pub const SECRET_FIELDS: &[&str] = &["secret-key"];

/// Field holding the storage-account access key inside secret content
pub const SECRET_KEY_FIELD: &str = "secret-key";

/// URI scheme identifying a secret reference
pub const SECRET_URI_SCHEME: &str = "secret:";

/// Suffix appended to a secret field name to form its reference key,
/// e.g. `secret-key` travels as `secret-key-ref`
pub const SECRET_REF_SUFFIX: &str = "-ref";

/// Prefix reserved for bookkeeping keys that never count as payload
pub const INTERNAL_KEY_PREFIX: &str = "internal:";

/// Unit-bag key under which the last-seen remote snapshot is persisted
pub const SNAPSHOT_KEY: &str = "internal:last-seen-data";

/// Default `connection-protocol` when the config leaves it unset
pub const DEFAULT_CONNECTION_PROTOCOL: &str = "abfss";

/// Connection protocols accepted by config validation
pub const SUPPORTED_CONNECTION_PROTOCOLS: &[&str] = &["abfss", "abfs", "wasbs", "wasb", "https"];

/// Default timeout for a single secret resolution (seconds)
pub const DEFAULT_SECRET_RESOLVE_TIMEOUT_SECS: u64 = 10;
