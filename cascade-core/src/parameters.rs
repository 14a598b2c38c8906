//! Frozen configuration: the model-wide parameter bag, per-sector economic
//! parameters, and the optimizer settings. All of it is fixed at
//! initialization; nothing here is mutated by the simulation loop.

use serde::{Deserialize, Serialize};

use crate::optimization::Algorithm;
use crate::types::{FloatType, Price, Ratio, Time};

/// Per-sector economics, shared by every firm of the sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorParameters {
    pub supply_elasticity: Ratio,
    pub baseline_markup: Price,
    /// Slope scale of the marginal cost rise above λ·X*.
    pub price_increase_production_extension: Price,
    /// Same slope as anticipated by buyers.
    pub estimated_price_increase_production_extension: Price,
    pub target_storage_refill_time: Time,
    pub target_storage_withdraw_time: Time,
    pub transport_investment_adjustment_time: Time,
    /// β: hard production cap as a multiple of baseline production.
    pub possible_overcapacity_ratio: Ratio,
}

impl Default for SectorParameters {
    fn default() -> Self {
        Self {
            supply_elasticity: 0.5,
            baseline_markup: Price::new(0.05),
            price_increase_production_extension: Price::new(1.0),
            estimated_price_increase_production_extension: Price::new(1.0),
            target_storage_refill_time: Time::new(2.0),
            target_storage_withdraw_time: Time::new(5.0),
            transport_investment_adjustment_time: Time::new(30.0),
            possible_overcapacity_ratio: 1.15,
        }
    }
}

/// Per-storage parameters (relevant for consumer storages). The price
/// elasticity is a demand elasticity, negative for ordinary goods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageParameters {
    pub consumption_price_elasticity: Ratio,
}

impl Default for StorageParameters {
    fn default() -> Self {
        Self {
            consumption_price_elasticity: -1.0,
        }
    }
}

/// One optimizer configuration bag (local or global, purchase or utility).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub algorithm: Algorithm,
    pub maxiter: usize,
    /// Factor on the precision-derived tolerances.
    pub precision_adjustment: FloatType,
    /// Timeout in seconds.
    pub timeout: FloatType,
}

impl OptimizerSettings {
    fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            maxiter: 10_000,
            precision_adjustment: 1.0,
            timeout: 10.0,
        }
    }
}

/// The model-wide toggle and scalar bag, frozen at init.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParameters {
    // behavior toggles
    pub always_extend_expected_demand_curve: bool,
    pub budget_inequality_constrained: bool,
    pub cheapest_price_range_generic_size: bool,
    pub cheapest_price_range_preserve_seller_price: bool,
    pub deviation_penalty: bool,
    pub elastic_budget: bool,
    pub maximal_decrease_reservation_price_limited_by_markup: bool,
    pub naive_expectations: bool,
    pub purchasing_halfway_baseline: bool,
    pub quadratic_transport_penalty: bool,
    pub relative_transport_penalty: bool,
    pub respect_markup_in_production_extension: bool,
    pub start_purchasing_at_baseline: bool,
    pub with_investment_dynamics: bool,

    // scalars
    pub cheapest_price_range_width: Price,
    pub transport_penalty_small: Price,
    pub transport_penalty_large: Price,
    pub min_storage: Ratio,

    // optimizer wiring
    pub optimization_problems_fatal: bool,
    pub local_purchasing_optimization: bool,
    pub global_purchasing_optimization: bool,
    pub global_utility_optimization: bool,
    pub optimization_restart_baseline: bool,
    pub purchasing_optimization: OptimizerSettings,
    pub global_purchasing_settings: OptimizerSettings,
    pub utility_optimization: OptimizerSettings,
    pub global_utility_settings: OptimizerSettings,
    pub lagrangian_algorithm: Algorithm,
    pub global_sampling_points: usize,

    /// Seed for the stochastic global algorithms and the initial pool shuffle.
    pub seed: u64,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            always_extend_expected_demand_curve: false,
            budget_inequality_constrained: false,
            cheapest_price_range_generic_size: false,
            cheapest_price_range_preserve_seller_price: false,
            deviation_penalty: false,
            elastic_budget: false,
            maximal_decrease_reservation_price_limited_by_markup: false,
            naive_expectations: true,
            purchasing_halfway_baseline: false,
            quadratic_transport_penalty: true,
            relative_transport_penalty: true,
            respect_markup_in_production_extension: false,
            start_purchasing_at_baseline: false,
            with_investment_dynamics: false,
            cheapest_price_range_width: Price::new(1e-3),
            transport_penalty_small: Price::new(0.01),
            transport_penalty_large: Price::new(1.0),
            min_storage: 0.0,
            optimization_problems_fatal: false,
            local_purchasing_optimization: true,
            global_purchasing_optimization: false,
            global_utility_optimization: false,
            optimization_restart_baseline: false,
            purchasing_optimization: OptimizerSettings::new(Algorithm::Slsqp),
            global_purchasing_settings: OptimizerSettings::new(Algorithm::Crs),
            utility_optimization: OptimizerSettings::new(Algorithm::Slsqp),
            global_utility_settings: OptimizerSettings::new(Algorithm::MlslLowDiscrepancy),
            lagrangian_algorithm: Algorithm::AugmentedLagrangian,
            global_sampling_points: 64,
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_toggles() {
        let p = ModelParameters::default();
        assert!(p.naive_expectations);
        assert!(p.quadratic_transport_penalty);
        assert!(p.relative_transport_penalty);
        assert!(!p.deviation_penalty);
        assert!(!p.with_investment_dynamics);
        assert_eq!(p.purchasing_optimization.algorithm, Algorithm::Slsqp);
        assert_eq!(p.lagrangian_algorithm, Algorithm::AugmentedLagrangian);
    }

    #[test]
    fn parameters_serde_roundtrip() {
        let p = ModelParameters::default();
        let json = serde_json::to_string(&p).unwrap();
        let q: ModelParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(q.purchasing_optimization.algorithm, Algorithm::Slsqp);
        assert_eq!(q.min_storage, p.min_storage);
        assert!(json.contains("\"slsqp\""));
    }
}
