#![deny(clippy::print_stdout, clippy::print_stderr)]

mod health;
mod router;

pub use health::GatewayHealth;
pub use health::GatewayHealthTracker;
pub use health::GatewayStatus;
pub use router::ConnectorRegistry;
pub use router::GatewayConnector;
pub use router::GatewayCost;
pub use router::GatewayReceipt;
pub use router::PaymentContext;
pub use router::RouterConfig;
pub use router::RoutingStrategy;
pub use router::SmartRouter;

pub type RouterResult<T> = Result<T, RouterError>;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no gateway available: {0}")]
    GatewayUnavailable(String),
    #[error("gateway not registered: {0}")]
    UnknownGateway(String),
    #[error("gateway call failed: {0}")]
    ProcessingFailed(String),
    #[error("validation error: {0}")]
    Validation(String),
}
