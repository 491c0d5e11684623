//! Error taxonomy for the DSE node layer.

use thiserror::Error;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Failures surfaced by the message transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The call did not complete within the caller's timeout.
    #[error("rpc call timed out")]
    Timeout,

    /// The message could not be handed to any live destination.
    #[error("message could not be delivered: {0}")]
    DeliveryFailure(String),

    /// Payload encoding or decoding failed.
    #[error("wire codec error: {0}")]
    Codec(String),

    /// The remote endpoint executed and raised an error of its own.
    #[error("remote endpoint error ({kind}): {message}")]
    Remote { kind: String, message: String },
}

impl TransportError {
    /// True for the failure modes that service-scoped calls translate to
    /// [`DseError::ServiceNotFound`]: the destination either does not exist
    /// or cannot be told apart from one that has disappeared.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Timeout | Self::DeliveryFailure(_))
    }
}

// ---------------------------------------------------------------------------
// DseError
// ---------------------------------------------------------------------------

/// Domain errors for node, registry, and datasource operations.
#[derive(Debug, Error)]
pub enum DseError {
    #[error("service '{service_id}' already exists on node '{node_id}'")]
    DuplicateService {
        service_id: String,
        node_id: String,
    },

    /// Unknown or unreachable service. Liveness-probe failures and call
    /// timeouts both map here: once the call boundary is crossed, a
    /// request-level failure is indistinguishable from the service having
    /// been torn down.
    #[error("service '{service_id}' could not be found")]
    ServiceNotFound { service_id: String },

    #[error("driver '{driver}' not found")]
    DriverNotFound { driver: String },

    #[error("no loaded driver matches '{driver}'")]
    InvalidDriver { driver: String },

    #[error("invalid driver options: {}", options.join(", "))]
    InvalidDriverOption { options: Vec<String> },

    #[error("missing required config options: {}", options.join(", "))]
    MissingRequiredConfigOptions { options: Vec<String> },

    #[error("datasource '{id}' not found")]
    DatasourceNotFound { id: String },

    #[error("datasource name '{name}' already in use")]
    DatasourceNameInUse { name: String },

    /// Wraps unexpected failures while synchronizing a freshly persisted
    /// record; the orphaned record has already been deleted by the time this
    /// surfaces.
    #[error("datasource '{name}' could not be created")]
    DatasourceCreationError { name: String },

    /// Fatal configuration error at driver-load time.
    #[error("bad configuration: {0}")]
    BadConfig(String),

    #[error("unknown rpc method '{method}'")]
    UnknownMethod { method: String },

    #[error("invalid rpc arguments: {0}")]
    InvalidArgs(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DseError {
    /// Constructs the not-found error for a service id.
    #[must_use]
    pub fn service_not_found(service_id: impl Into<String>) -> Self {
        Self::ServiceNotFound {
            service_id: service_id.into(),
        }
    }

    /// Stable machine-readable tag used when an error crosses the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateService { .. } => "duplicate_service",
            Self::ServiceNotFound { .. } => "service_not_found",
            Self::DriverNotFound { .. } => "driver_not_found",
            Self::InvalidDriver { .. } => "invalid_driver",
            Self::InvalidDriverOption { .. } => "invalid_driver_option",
            Self::MissingRequiredConfigOptions { .. } => "missing_required_config_options",
            Self::DatasourceNotFound { .. } => "datasource_not_found",
            Self::DatasourceNameInUse { .. } => "datasource_name_in_use",
            Self::DatasourceCreationError { .. } => "datasource_creation_error",
            Self::BadConfig(_) => "bad_config",
            Self::UnknownMethod { .. } => "unknown_method",
            Self::InvalidArgs(_) => "invalid_args",
            Self::Transport(_) => "transport",
            Self::Internal(_) => "internal",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
