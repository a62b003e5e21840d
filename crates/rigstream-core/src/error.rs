//! Error types for rigstream

use thiserror::Error;

/// Coarse error class, used for propagation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bind/accept/IO failure
    Transport,
    /// Malformed JSON or missing required field
    Decode,
    /// Well-formed message that does not fit the skeleton or protocol
    Schema,
    /// Peer announced a fault of its own
    RemoteFault,
    /// No usable skeleton could be found or loaded
    Initialization,
    /// Operator request that is not valid in the current state
    Usage,
}

/// Core rigstream errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RigError {
    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Inbound queue overflow: dropped {0} message(s)")]
    QueueOverflow(usize),

    #[error("No peer connected")]
    NotConnected,

    // Decode errors
    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    // Schema errors
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Joint count mismatch for {actor}: expected {expected}, got {actual}")]
    JointCountMismatch {
        actor: String,
        expected: usize,
        actual: usize,
    },

    #[error("Scale count mismatch for {actor}: expected {expected}, got {actual}")]
    ScaleCountMismatch {
        actor: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown joint: {0}")]
    UnknownJoint(String),

    #[error("Invalid rotation at joint index {0}")]
    InvalidRotation(usize),

    #[error("Timestamp delta rejected: {0} tick(s)")]
    RejectedDelta(i64),

    // Remote errors
    #[error("Remote fault: {0}")]
    RemoteFault(String),

    // Initialization errors
    #[error("No usable skeleton: {0}")]
    Initialization(String),

    #[error("Invalid joint hierarchy: {0}")]
    InvalidHierarchy(String),

    // Usage errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("A start/stop request is already in flight")]
    TransitionInProgress,

    #[error("Session is not running")]
    NotRunning,

    #[error("Session is already running")]
    AlreadyRunning,

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,
}

impl RigError {
    /// Taxonomy class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            RigError::Transport(_) | RigError::QueueOverflow(_) | RigError::NotConnected => {
                ErrorClass::Transport
            }
            RigError::Decode(_) | RigError::InvalidTimestamp(_) => ErrorClass::Decode,
            RigError::UnknownMessageType(_)
            | RigError::JointCountMismatch { .. }
            | RigError::ScaleCountMismatch { .. }
            | RigError::UnknownJoint(_)
            | RigError::InvalidRotation(_)
            | RigError::RejectedDelta(_) => ErrorClass::Schema,
            RigError::RemoteFault(_) => ErrorClass::RemoteFault,
            RigError::Initialization(_) | RigError::InvalidHierarchy(_) => {
                ErrorClass::Initialization
            }
            RigError::InvalidConfig(_)
            | RigError::TransitionInProgress
            | RigError::NotRunning
            | RigError::AlreadyRunning
            | RigError::AlreadyRecording
            | RigError::NotRecording => ErrorClass::Usage,
        }
    }

    /// Fatal errors bypass debouncing and force the session to stop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::RemoteFault | ErrorClass::Initialization
        )
    }

    /// Stable identity of the error kind, ignoring its payload.
    ///
    /// Two errors with the same signature count toward the same debounce
    /// streak even when their messages differ (e.g. two decode errors at
    /// different byte offsets).
    pub fn signature(&self) -> &'static str {
        match self {
            RigError::Transport(_) => "transport",
            RigError::QueueOverflow(_) => "queue-overflow",
            RigError::NotConnected => "not-connected",
            RigError::Decode(_) => "decode",
            RigError::InvalidTimestamp(_) => "timestamp",
            RigError::UnknownMessageType(_) => "unknown-type",
            RigError::JointCountMismatch { .. } => "joint-count",
            RigError::ScaleCountMismatch { .. } => "scale-count",
            RigError::UnknownJoint(_) => "unknown-joint",
            RigError::InvalidRotation(_) => "invalid-rotation",
            RigError::RejectedDelta(_) => "rejected-delta",
            RigError::RemoteFault(_) => "remote-fault",
            RigError::Initialization(_) => "initialization",
            RigError::InvalidHierarchy(_) => "hierarchy",
            RigError::InvalidConfig(_) => "config",
            RigError::TransitionInProgress => "in-transition",
            RigError::NotRunning => "not-running",
            RigError::AlreadyRunning => "already-running",
            RigError::AlreadyRecording => "already-recording",
            RigError::NotRecording => "not-recording",
        }
    }
}

impl From<std::io::Error> for RigError {
    fn from(e: std::io::Error) -> Self {
        RigError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for RigError {
    fn from(e: serde_json::Error) -> Self {
        RigError::Decode(e.to_string())
    }
}

/// Result type for rigstream operations
pub type RigResult<T> = Result<T, RigError>;
