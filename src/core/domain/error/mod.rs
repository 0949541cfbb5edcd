use std::fmt;
use thiserror::Error;

/// The main error type for maintenance and migration operations.
///
/// This enum separates the error kinds that callers must treat differently:
/// lookups that found nothing, transient control-plane failures that the job
/// tracker may retry, precondition violations that stop a single workload, and
/// protocol or transport failures that propagate immediately.
#[derive(Error, Debug)]
pub enum OpsError {
    /// Represents errors that occur while talking to a remote endpoint
    ///
    /// # Fields
    /// * `0` - A description of what went wrong on the transport
    #[error("Connection error: {0}")]
    Connection(String),

    /// Represents authentication failures against the control plane
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Represents validation failures with detailed context
    ///
    /// # Fields
    /// * `source` - The underlying validation error
    #[error("Validation error: {source}")]
    Validation { source: ValidationError },

    /// A host, workload, cluster, pool or volume that does not exist
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    /// A control-plane failure that is expected to clear up on its own
    #[error("Transient control-plane error: {0}")]
    Transient(TransientKind),

    /// The control plane rejected a call
    ///
    /// # Fields
    /// * `code` - The control-plane error code
    /// * `text` - The error text reported with it
    #[error("API error ({code}): {text}")]
    Api { code: u16, text: String },

    /// A migration precondition does not hold (snapshots, volume state, tier)
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// A remote command on a hypervisor host failed
    #[error("Remote execution on {host} failed: {message}")]
    Remote { host: String, message: String },

    /// A host did not come back (or go away) within the allowed time
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// The auxiliary datastore failed
    #[error("Datastore error: {0}")]
    Datastore(String),
}

impl OpsError {
    /// Shorthand for a [`OpsError::NotFound`] error.
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        OpsError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Returns `true` if the job tracker may retry after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, OpsError::Transient(_))
    }

    /// Returns `true` if this error reports a missing resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, OpsError::NotFound { .. })
    }
}

impl From<ValidationError> for OpsError {
    fn from(error: ValidationError) -> Self {
        OpsError::Validation { source: error }
    }
}

impl From<sqlx::Error> for OpsError {
    fn from(error: sqlx::Error) -> Self {
        OpsError::Datastore(error.to_string())
    }
}

/// The two classes of control-plane failure that are safe to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// The control plane answered with an ambiguous or duplicated status field
    AmbiguousResponse,
    /// The network connection was reset mid-request
    ConnectionReset,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::AmbiguousResponse => write!(f, "ambiguous response"),
            TransientKind::ConnectionReset => write!(f, "connection reset"),
        }
    }
}

/// The kind of resource a lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Host,
    Cluster,
    Workload,
    Volume,
    StoragePool,
    ServiceOffering,
    DiskOffering,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Host => "Host",
            ResourceKind::Cluster => "Cluster",
            ResourceKind::Workload => "Workload",
            ResourceKind::Volume => "Volume",
            ResourceKind::StoragePool => "Storage pool",
            ResourceKind::ServiceOffering => "Service offering",
            ResourceKind::DiskOffering => "Disk offering",
        };
        f.write_str(name)
    }
}

/// Specialized error type for validation failures.
///
/// This enum provides detailed context about why a validation
/// failed, including field-specific errors and format violations.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Represents a validation failure for a specific field
    ///
    /// # Fields
    /// * `field` - The name of the field that failed validation
    /// * `message` - A detailed message about why validation failed
    #[error("Field '{field}' validation failed: {message}")]
    Field { field: String, message: String },

    /// Represents format/syntax validation failures
    ///
    /// # Fields
    /// * `0` - Description of the format violation
    #[error("Format error: {0}")]
    Format(String),

    /// Represents violations of domain constraints
    ///
    /// # Fields
    /// * `0` - Description of the constraint violation
    #[error("Domain constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Type alias for Results that may fail with an OpsError
pub type OpsResult<T> = Result<T, OpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(OpsError::Transient(TransientKind::AmbiguousResponse).is_transient());
        assert!(OpsError::Transient(TransientKind::ConnectionReset).is_transient());
        assert!(!OpsError::Connection("refused".to_string()).is_transient());
        assert!(
            !OpsError::Api {
                code: 530,
                text: "boom".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_not_found_display() {
        let error = OpsError::not_found(ResourceKind::StoragePool, "zwps-01");
        assert!(error.is_not_found());
        assert_eq!(error.to_string(), "Storage pool 'zwps-01' not found");
    }

    #[test]
    fn test_validation_conversion() {
        let error: OpsError = ValidationError::Format("bad".to_string()).into();
        assert!(matches!(error, OpsError::Validation { .. }));
    }
}
