pub mod engine;
pub mod errors;
pub mod ids;
pub mod scan;
pub mod stream;

pub use engine::{AttackOptions, Dictionaries, Dictionary, DictionaryKind, DiscoverOptions, Engine};
pub use errors::{DictionaryError, EngineError, ErrorInfo};
pub use ids::ConnectionId;
pub use scan::{ScanMode, ScanRequest, ScanResult};
pub use stream::Stream;
