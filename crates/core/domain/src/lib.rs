pub mod backoff;
pub mod data;
pub mod path;
pub mod registry;

pub use backoff::Backoff;
pub use data::{CanonicalSample, RawMessage, Statistic};
pub use registry::DeviceRegistry;
