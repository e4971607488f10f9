#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Composition root for the aggregator core: one configuration record,
//! one facade wiring the subsystem services together, and in-process
//! telemetry counters.

mod config;
mod facade;
mod telemetry;

pub use config::AggregatorConfig;
pub use config::GatewayCostConfig;
pub use config::PeriodToleranceConfig;
pub use config::SettlementRetryConfig;
pub use config::StrategyName;
pub use facade::PaymentsFacade;
pub use telemetry::AggregatorTelemetry;
pub use telemetry::TelemetryCounters;
