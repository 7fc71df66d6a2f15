//! Error taxonomy of the actor/physics core.
//!
//! Shape and geometry errors are local to the translator and leave the
//! simulation untouched. Listener failures never show up here: they are
//! caught and logged at the dispatch boundary.

use thiserror::Error;

use crate::actor::ActorId;
use crate::joint::JointId;
use crate::layer::LayerId;
use crate::scheduler::TaskId;

#[derive(Debug, Error)]
pub enum StageError {
    /// Zero, negative or non-finite dimensions.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Geometry the engine cannot represent, such as a concave polygon.
    #[error("unsupported shape: {0}")]
    Shape(String),

    /// Fixture rebuild failed; the previous fixture set is still attached.
    #[error("fixture rebuild failed for actor {actor}")]
    Rebuild {
        actor: ActorId,
        #[source]
        source: Box<StageError>,
    },

    #[error("{operation} is not supported on actor {actor} in state {state}")]
    UnsupportedOperation {
        operation: &'static str,
        actor: ActorId,
        state: String,
    },

    #[error("cannot join actors {a} and {b}: {reason}")]
    JointCreation {
        a: ActorId,
        b: ActorId,
        reason: String,
    },

    #[error("unknown actor {0}")]
    UnknownActor(ActorId),

    #[error("unknown layer {0}")]
    UnknownLayer(LayerId),

    #[error("unknown joint {0}")]
    UnknownJoint(JointId),

    #[error("unknown periodic task {0}")]
    UnknownTask(TaskId),

    #[error("periodic interval must be positive, got {0}")]
    InvalidInterval(f32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The physics world of a layer produced unusable state and was halted.
    #[error("physics world of layer {layer} faulted: {reason}")]
    WorldFault { layer: LayerId, reason: String },
}

pub type StageResult<T> = Result<T, StageError>;

impl StageError {
    pub(crate) fn geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
