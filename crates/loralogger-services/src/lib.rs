//! loralogger-services — gateway registry and persistence sinks.

pub mod record;
pub mod registry;
pub mod sink;

pub use record::{Record, EXPIRY_DAYS};
pub use registry::{GatewayRegistry, RegistryError};
pub use sink::dynamodb::DynamoDbTtlStore;
pub use sink::rotating_log::RotatingLogSink;
pub use sink::ttl_store::{AttributeValue, SqliteTtlStore, TtlItem, TtlStore, TtlStoreSink};
pub use sink::{PersistError, Sink, SinkChain, SinkError};
