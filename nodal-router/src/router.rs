use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::GatewayHealthTracker;
use crate::RouterError;
use crate::RouterResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingStrategy {
    #[default]
    HealthBased,
    RoundRobin,
    CostOptimized,
    LatencyBased,
    Priority,
}

/// Per-transaction gateway pricing. `percentage_fee` is a percentage of
/// the payment amount, not a fraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCost {
    pub fixed_fee: Decimal,
    pub percentage_fee: Decimal,
}

impl GatewayCost {
    #[must_use]
    pub fn cost_for(&self, amount: Decimal) -> Decimal {
        self.fixed_fee + amount * self.percentage_fee / Decimal::from(100)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    pub strategy: RoutingStrategy,
    pub priority_order: Vec<String>,
    pub costs: HashMap<String, GatewayCost>,
    pub health_score_threshold: f64,
    pub max_fallback_attempts: usize,
    pub request_deadline: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::default(),
            priority_order: Vec::new(),
            costs: HashMap::new(),
            health_score_threshold: 50.0,
            max_fallback_attempts: 3,
            request_deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentContext {
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReceipt {
    pub gateway: String,
    pub external_reference: String,
    pub processed_at: DateTime<Utc>,
}

/// Capability surface of an external processor. The router itself never
/// calls this; callers dispatch through the registry, bound by the
/// configured request deadline, and report the outcome back to the health
/// tracker.
pub trait GatewayConnector: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, payment: &PaymentContext) -> RouterResult<GatewayReceipt>;
}

#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn GatewayConnector>>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn GatewayConnector>) {
        self.connectors
            .insert(connector.name().to_string(), connector);
    }

    #[must_use]
    pub fn get(&self, gateway: &str) -> Option<Arc<dyn GatewayConnector>> {
        self.connectors.get(gateway).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Orders gateway candidates; performs no network I/O. The round-robin
/// cursor is per-process and not persisted.
pub struct SmartRouter {
    config: RouterConfig,
    health: Arc<GatewayHealthTracker>,
    gateways: Vec<String>,
    round_robin: AtomicUsize,
}

impl SmartRouter {
    #[must_use]
    pub fn new(
        config: RouterConfig,
        health: Arc<GatewayHealthTracker>,
        gateways: Vec<String>,
    ) -> Self {
        for gateway in &gateways {
            health.register(gateway);
        }
        Self {
            config,
            health,
            gateways,
            round_robin: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    #[must_use]
    pub fn health(&self) -> Arc<GatewayHealthTracker> {
        self.health.clone()
    }

    fn score(&self, gateway: &str) -> f64 {
        self.health
            .snapshot(gateway)
            .map(|health| health.health_score)
            .unwrap_or(0.0)
    }

    fn avg_latency(&self, gateway: &str) -> f64 {
        self.health
            .snapshot(gateway)
            .map(|health| health.avg_response_ms)
            .unwrap_or(0.0)
    }

    fn candidates(&self, exclude: &[String]) -> Vec<String> {
        self.gateways
            .iter()
            .filter(|gateway| !exclude.contains(gateway))
            .cloned()
            .collect()
    }

    fn best_by_score(&self, candidates: &[String]) -> Option<String> {
        candidates
            .iter()
            .max_by(|a, b| {
                self.score(a)
                    .partial_cmp(&self.score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
    }

    /// Picks a gateway for the payment, never returning an excluded one.
    pub fn select(
        &self,
        payment: &PaymentContext,
        exclude: &[String],
    ) -> RouterResult<String> {
        let candidates = self.candidates(exclude);
        if candidates.is_empty() {
            return Err(RouterError::GatewayUnavailable(
                "every registered gateway is excluded".into(),
            ));
        }

        let selected = match self.config.strategy {
            RoutingStrategy::HealthBased => {
                let above_threshold = candidates
                    .iter()
                    .filter(|gateway| self.score(gateway) >= self.config.health_score_threshold)
                    .cloned()
                    .collect::<Vec<_>>();
                if above_threshold.is_empty() {
                    // Nothing clears the bar; degrade to the least-bad one.
                    self.best_by_score(&candidates)
                } else {
                    self.best_by_score(&above_threshold)
                }
            }
            RoutingStrategy::RoundRobin => {
                let cursor = self.round_robin.fetch_add(1, Ordering::Relaxed);
                candidates.get(cursor % candidates.len()).cloned()
            }
            RoutingStrategy::CostOptimized => candidates
                .iter()
                .min_by_key(|gateway| {
                    self.config
                        .costs
                        .get(*gateway)
                        .map(|cost| cost.cost_for(payment.amount))
                        .unwrap_or(Decimal::MAX)
                })
                .cloned(),
            RoutingStrategy::LatencyBased => candidates
                .iter()
                .min_by(|a, b| {
                    self.avg_latency(a)
                        .partial_cmp(&self.avg_latency(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .cloned(),
            RoutingStrategy::Priority => self
                .config
                .priority_order
                .iter()
                .filter(|gateway| candidates.contains(gateway))
                .find(|gateway| self.score(gateway) >= self.config.health_score_threshold)
                .cloned()
                .or_else(|| self.best_by_score(&candidates)),
        };

        selected.ok_or_else(|| {
            RouterError::GatewayUnavailable("no gateway satisfied the routing strategy".into())
        })
    }

    /// Gateways to try after the primary call failed, best-scored first,
    /// filtered by the health threshold and capped at the configured
    /// fallback budget.
    #[must_use]
    pub fn fallback_list(&self, primary: &str, attempted: &[String]) -> Vec<String> {
        let mut fallbacks = self
            .gateways
            .iter()
            .filter(|gateway| gateway.as_str() != primary && !attempted.contains(gateway))
            .filter(|gateway| self.score(gateway) >= self.config.health_score_threshold)
            .cloned()
            .collect::<Vec<_>>();
        fallbacks.sort_by(|a, b| {
            self.score(b)
                .partial_cmp(&self.score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        fallbacks.truncate(self.config.max_fallback_attempts);
        fallbacks
    }
}
