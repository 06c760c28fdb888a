//! Clients for the external agent processor.

pub mod http;
pub mod mock;

pub use http::{HttpProcessor, HttpProcessorConfig};
pub use mock::{MockDispatch, MockProcessor, MockStatus};
