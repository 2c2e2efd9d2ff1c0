//! Broker messaging: topology, publisher, consumer and an in-process
//! topic transport.

mod consumer;
mod in_memory_broker;
mod publisher;
mod reconnect;
mod topology;

pub use consumer::{ConsumerError, MessageConsumer};
pub use in_memory_broker::{InMemoryBroker, QueuedMessage};
pub use publisher::{MESSAGE_ID_HEADER, MessagePublisher};
pub use reconnect::ReconnectPolicy;
pub use topology::{METRICS_ROUTING_KEY, Topology};
