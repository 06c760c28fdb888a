pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod normalize;
pub mod processor;

pub use envelope::{EnvelopeStatus, ResponseEnvelope};
pub use errors::BridgeError;
pub use events::ClientEvent;
pub use ids::{ConnectionId, JobId, ThreadId};
pub use normalize::{detect_shape, normalize, PayloadShape};
pub use processor::{DispatchReceipt, DispatchRequest, JobPhase, JobProcessor, JobStatus};
