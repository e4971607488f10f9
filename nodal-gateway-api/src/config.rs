use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use nodal_ledger::LedgerConfig;
use nodal_periods::PeriodConfig;
use nodal_router::GatewayCost;
use nodal_router::RouterConfig;
use nodal_router::RoutingStrategy;
use nodal_settlements::RetryPolicy;

/// The full configuration surface of the aggregator core. Component
/// configurations are derived from this record and handed to each service
/// at construction; nothing global and nothing mutable afterwards.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregatorConfig {
    pub gateway_priority: Vec<String>,
    pub gateway_costs: HashMap<String, GatewayCostConfig>,
    pub health_score_threshold: f64,
    pub max_fallback_attempts: usize,
    pub routing_strategy: StrategyName,
    pub gateway_deadline_secs: u64,
    pub settlement: SettlementRetryConfig,
    pub period: PeriodToleranceConfig,
    pub balance_tolerance: Decimal,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            gateway_priority: Vec::new(),
            gateway_costs: HashMap::new(),
            health_score_threshold: 50.0,
            max_fallback_attempts: 3,
            routing_strategy: StrategyName::HealthBased,
            gateway_deadline_secs: 30,
            settlement: SettlementRetryConfig::default(),
            period: PeriodToleranceConfig::default(),
            balance_tolerance: Decimal::new(1, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCostConfig {
    pub fixed_fee: Decimal,
    pub percentage_fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettlementRetryConfig {
    pub max_retries: u32,
    pub retry_backoff_minutes: Vec<i64>,
}

impl Default for SettlementRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_minutes: vec![15, 60, 240],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeriodToleranceConfig {
    pub gap_tolerance_days: i64,
}

impl Default for PeriodToleranceConfig {
    fn default() -> Self {
        Self {
            gap_tolerance_days: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum StrategyName {
    #[default]
    #[serde(rename = "HEALTH_BASED")]
    HealthBased,
    #[serde(rename = "ROUND_ROBIN")]
    RoundRobin,
    #[serde(rename = "COST_OPTIMIZED")]
    CostOptimized,
    #[serde(rename = "LATENCY_BASED")]
    LatencyBased,
    #[serde(rename = "PRIORITY")]
    Priority,
}

impl From<StrategyName> for RoutingStrategy {
    fn from(name: StrategyName) -> Self {
        match name {
            StrategyName::HealthBased => RoutingStrategy::HealthBased,
            StrategyName::RoundRobin => RoutingStrategy::RoundRobin,
            StrategyName::CostOptimized => RoutingStrategy::CostOptimized,
            StrategyName::LatencyBased => RoutingStrategy::LatencyBased,
            StrategyName::Priority => RoutingStrategy::Priority,
        }
    }
}

impl AggregatorConfig {
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            strategy: self.routing_strategy.into(),
            priority_order: self.gateway_priority.clone(),
            costs: self
                .gateway_costs
                .iter()
                .map(|(gateway, cost)| {
                    (
                        gateway.clone(),
                        GatewayCost {
                            fixed_fee: cost.fixed_fee,
                            percentage_fee: cost.percentage_fee,
                        },
                    )
                })
                .collect(),
            health_score_threshold: self.health_score_threshold,
            max_fallback_attempts: self.max_fallback_attempts,
            request_deadline: Duration::from_secs(self.gateway_deadline_secs),
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.settlement.max_retries,
            backoff_minutes: self.settlement.retry_backoff_minutes.clone(),
        }
    }

    #[must_use]
    pub fn period_config(&self) -> PeriodConfig {
        PeriodConfig {
            gap_tolerance_days: self.period.gap_tolerance_days,
        }
    }

    #[must_use]
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            balance_tolerance: self.balance_tolerance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = AggregatorConfig::default();
        assert_eq!(config.health_score_threshold, 50.0);
        assert_eq!(config.max_fallback_attempts, 3);
        assert_eq!(config.routing_strategy, StrategyName::HealthBased);
        assert_eq!(config.settlement.max_retries, 3);
        assert_eq!(config.settlement.retry_backoff_minutes, vec![15, 60, 240]);
        assert_eq!(config.period.gap_tolerance_days, 2);
        assert_eq!(config.balance_tolerance, Decimal::new(1, 2));
        assert_eq!(config.gateway_deadline_secs, 30);
    }

    #[test]
    fn parses_the_wire_shape() {
        let raw = r#"{
            "gatewayPriority": ["razorpay", "payu"],
            "gatewayCosts": {
                "razorpay": {"fixedFee": "0.00", "percentageFee": "2.00"}
            },
            "healthScoreThreshold": 60.0,
            "maxFallbackAttempts": 2,
            "routingStrategy": "COST_OPTIMIZED",
            "settlement": {"maxRetries": 5, "retryBackoffMinutes": [5, 30]},
            "period": {"gapToleranceDays": 1},
            "balanceTolerance": "0.01"
        }"#;

        let config: AggregatorConfig = serde_json::from_str(raw).expect("config parses");
        assert_eq!(config.gateway_priority, vec!["razorpay", "payu"]);
        assert_eq!(config.routing_strategy, StrategyName::CostOptimized);
        assert_eq!(config.settlement.max_retries, 5);
        assert_eq!(config.period.gap_tolerance_days, 1);

        let router = config.router_config();
        assert_eq!(router.max_fallback_attempts, 2);
        assert_eq!(router.health_score_threshold, 60.0);
        assert_eq!(
            router
                .costs
                .get("razorpay")
                .map(|cost| cost.percentage_fee),
            Some(Decimal::new(200, 2))
        );

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff_minutes, vec![5, 30]);
    }
}
