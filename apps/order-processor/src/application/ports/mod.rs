//! Application Ports (Driver and Driven)
//!
//! - **Driver Ports** (Primary/Inbound): message handlers invoked by consumers
//! - **Driven Ports** (Secondary/Outbound): collaborators, persistence and the broker

mod balance_port;
mod event_publisher_port;
mod message_handler_port;
mod message_transport_port;
mod portfolio_port;
mod price_feed_port;
mod service_error;
mod user_validation_port;

pub use balance_port::{BalanceCheck, BalancePort, TransactionKind, TransactionRequest};
pub use event_publisher_port::{EventPublishError, EventPublisherPort, NoOpEventPublisher};
pub use message_handler_port::MessageHandler;
pub use message_transport_port::{
    DEATH_QUEUE_HEADER, DEATH_REASON_HEADER, DELIVERY_COUNT_HEADER, Delivery, DeliveryMode,
    DeliveryStream, ExchangeKind, ExchangeSpec, MessageTransport, OutboundMessage, QueueSpec,
    TransportConnector, TransportError,
};
pub use portfolio_port::{HoldingsUpdate, PortfolioPort};
pub use price_feed_port::{PriceFeedPort, PriceQuote};
pub use service_error::ServiceError;
pub use user_validation_port::{UserValidation, UserValidationPort};
