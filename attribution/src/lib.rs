pub mod baseline;
pub mod engine;
pub mod model;

pub use baseline::Baseline;
pub use engine::{attribute_all, attribute_socket, AttributionError, DomainDelta, SocketInput};
pub use model::{Config, SampleRow, SocketSample, ThreadContribution};
