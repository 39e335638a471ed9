pub mod codec;
pub mod connection;
pub mod errors;
pub mod pipeline;
pub mod registry;
pub mod server;

pub use connection::{ConnectionConfig, ConnectionHandle, ConnectionState, Delivery, LifecycleEvent};
pub use errors::{DecodeError, DeliveryDrop, PipelineClosed, UpgradeError};
pub use pipeline::{DispatchPipeline, ScanDriver, ScanOutcome};
pub use registry::ConnectionRegistry;
pub use server::{ServerConfig, ServerHandle, start};
