use thiserror::Error;
use tutor_observe::ObserveError;
use tutor_types::InvalidTransition;
use tutor_voice::VoiceError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error(transparent)]
    Observe(#[from] ObserveError),

    #[error("Room '{0}' already hosts an active job")]
    RoomBusy(String),

    #[error("Job is not connected to a room")]
    NotConnected,

    #[error("Pipeline agent already started")]
    AlreadyStarted,

    #[error("Pipeline agent is closed")]
    Closed,

    #[error("Metrics receiver was already taken")]
    MetricsTaken,

    #[error("Prewarm failed: {0}")]
    Prewarm(String),

    #[error("Worker is shutting down")]
    WorkerClosed,

    #[error("Unknown job: {0}")]
    JobNotFound(String),
}
