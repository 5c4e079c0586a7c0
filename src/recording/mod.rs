//! Activity recording: session state machine, pre-start checks and the
//! session actor.

pub mod handle;
pub mod session;
pub mod types;
pub mod validation;

pub use handle::{SessionHandle, SessionObserver};
pub use session::RecordingSession;
pub use types::{
    ActivityPayload, ActivitySummary, MetricAggregate, MetricSummary, RecordingConfig,
    RecordingError, SessionSnapshot, SessionState,
};
pub use validation::{Preflight, Severity, ValidationError, ValidationIssue};
