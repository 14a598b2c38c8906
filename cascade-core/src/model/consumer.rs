//! Consumers: nested-CES utility maximization under a budget constraint.
//!
//! Consumption goods are grouped into baskets; substitution is easier within
//! a basket than across baskets. Variables are scaled to baseline consumption
//! so the undisturbed optimum sits at 1. The objective is evaluated through
//! the forward-mode autodiff scalar, which hands the solver exact gradients.

use serde::{Deserialize, Serialize};

use super::agent::ConsumerInfo;
use super::storage::Storage;
use super::{Model, purchasing};
use crate::autodiff;
use crate::events::EventKind;
use crate::optimization::{Optimization, OptimizationError, Problem};
use crate::types::{Flow, FloatType, Forcing, Price, Quantity, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerState {
    pub storages: Vec<Storage>,
    pub utility: FloatType,
    pub baseline_utility: FloatType,
    /// Within-basket consumption shares per storage slot (0 for goods
    /// outside every basket).
    pub share_factors: Vec<FloatType>,
    /// s^(1/σ_b), precomputed for the utility function.
    pub exponent_share_factors: Vec<FloatType>,
    pub basket_share_factors: Vec<FloatType>,
    /// B^(1/Σ), precomputed.
    pub exponent_basket_share_factors: Vec<FloatType>,
    /// Storage slots of each non-empty basket.
    pub basket_indices: Vec<Vec<usize>>,
    /// (σ_b − 1) / σ_b per basket.
    pub intra_basket_exponent: Vec<FloatType>,
    /// (Σ − 1) / Σ.
    pub inter_basket_exponent: FloatType,
    pub previous_consumption: Vec<Flow>,
    pub baseline_consumption: Vec<Flow>,
    pub consumption_budget: Value,
    pub not_spent_budget: Value,
}

impl ConsumerState {
    /// Derives share factors from baseline flows: basket shares sum to 1 over
    /// the non-empty baskets, within-basket shares sum to 1. Baskets without
    /// any consumption are dropped; goods outside every basket get share 0.
    pub fn initialize(info: &ConsumerInfo, storages: Vec<Storage>) -> Self {
        let n = storages.len();
        let budget: Value = storages
            .iter()
            .fold(Value::new(0.0), |acc, s| acc + s.baseline_used_flow().value());

        let mut basket_share_factors = Vec::new();
        let mut basket_indices = Vec::new();
        let mut intra_basket_exponent = Vec::new();
        let mut intra_sigma = Vec::new();
        for basket in &info.baskets {
            let indices: Vec<usize> = storages
                .iter()
                .enumerate()
                .filter(|(_, s)| basket.sectors.contains(&s.sector))
                .map(|(i, _)| i)
                .collect();
            let share: FloatType = indices
                .iter()
                .map(|&i| storages[i].baseline_used_flow().value().get() / budget.get())
                .sum();
            if share > 0.0 {
                basket_share_factors.push(share);
                basket_indices.push(indices);
                let sigma = basket.intra_basket_substitution;
                intra_basket_exponent.push((sigma - 1.0) / sigma);
                intra_sigma.push(sigma);
            }
        }
        // renormalize over the non-empty baskets
        let covered: FloatType = basket_share_factors.iter().sum();
        for share in &mut basket_share_factors {
            *share /= covered;
        }

        let mut share_factors = vec![0.0; n];
        let mut exponent_share_factors = vec![0.0; n];
        let mut baseline_consumption: Vec<Flow> = storages
            .iter()
            .map(|s| s.baseline_used_flow())
            .collect();
        for (b, indices) in basket_indices.iter().enumerate() {
            let basket_value: FloatType = indices
                .iter()
                .map(|&i| storages[i].baseline_used_flow().value().get())
                .sum();
            for &i in indices {
                share_factors[i] = storages[i].baseline_used_flow().value().get() / basket_value;
                exponent_share_factors[i] = share_factors[i].powf(1.0 / intra_sigma[b]);
            }
        }
        for (i, share) in share_factors.iter().enumerate() {
            if *share == 0.0 {
                baseline_consumption[i] = Flow::ZERO;
            }
        }

        let inter = info.inter_basket_substitution;
        let inter_basket_exponent = (inter - 1.0) / inter;
        let exponent_basket_share_factors: Vec<FloatType> = basket_share_factors
            .iter()
            .map(|b| b.powf(1.0 / inter))
            .collect();

        let previous_consumption = baseline_consumption.clone();
        let mut state = Self {
            storages,
            utility: 1.0,
            baseline_utility: 1.0,
            share_factors,
            exponent_share_factors,
            basket_share_factors,
            exponent_basket_share_factors,
            basket_indices,
            intra_basket_exponent,
            inter_basket_exponent,
            previous_consumption,
            baseline_consumption,
            consumption_budget: budget,
            not_spent_budget: Value::new(0.0),
        };
        state.baseline_utility = state.utility_at(&vec![1.0; n]).value();
        state.utility = state.baseline_utility;
        state
    }

    /// Nested CES utility at baseline-relative consumption `x`.
    fn utility_at(&self, x: &[FloatType]) -> autodiff::Value {
        let n = x.len();
        let mut var = autodiff::Variable::new(n, 0.0);
        var.assign(x);
        let mut total = autodiff::Value::constant(n, 0.0);
        for (b, indices) in self.basket_indices.iter().enumerate() {
            let mut basket = autodiff::Value::constant(n, 0.0);
            for &i in indices {
                let quantity = var.at(i) * self.share_factors[i];
                basket += quantity.powf(self.intra_basket_exponent[b])
                    * self.exponent_share_factors[i];
            }
            let basket = basket.powf(1.0 / self.intra_basket_exponent[b])
                * self.basket_share_factors[b];
            total += basket.powf(self.inter_basket_exponent)
                * self.exponent_basket_share_factors[b];
        }
        total.powf(1.0 / self.inter_basket_exponent)
    }
}

/// The optimization view: objective from the CES aggregate, budget as the
/// single constraint. Everything is copied so the solver sees a pure problem.
struct UtilityProblem<'a> {
    state: &'a ConsumerState,
    prices: &'a [Price],
    elasticities: &'a [FloatType],
    elastic_budget: bool,
}

impl UtilityProblem<'_> {
    fn budget_term(&self, i: usize, x: FloatType) -> FloatType {
        let baseline = self.state.baseline_consumption[i].quantity().get();
        let price = self.prices[i].get();
        let weight = if self.elastic_budget {
            price.powf(-self.elasticities[i])
        } else {
            price
        };
        x * baseline * weight / self.state.consumption_budget.get()
    }
}

impl Problem for UtilityProblem<'_> {
    fn max_objective(&mut self, x: &[FloatType], grad: Option<&mut [FloatType]>) -> FloatType {
        let utility = self.state.utility_at(x);
        if let Some(grad) = grad {
            grad.copy_from_slice(utility.gradient());
            // coordinates pinned at zero consumption have infinite marginal
            // utility; they are fixed by their bounds
            for g in grad.iter_mut() {
                if !g.is_finite() {
                    *g = 0.0;
                }
            }
        }
        utility.value()
    }

    fn equality_constraint(&mut self, x: &[FloatType], grad: Option<&mut [FloatType]>) -> FloatType {
        self.inequality_constraint(x, grad)
    }

    /// `Σ c_i·w_i − (budget + unspent) ≤ 0`, scaled by the budget.
    fn inequality_constraint(
        &mut self,
        x: &[FloatType],
        grad: Option<&mut [FloatType]>,
    ) -> FloatType {
        let available = (self.state.consumption_budget.get() + self.state.not_spent_budget.get())
            / self.state.consumption_budget.get();
        let mut spent = 0.0;
        for i in 0..x.len() {
            spent += self.budget_term(i, x[i]);
        }
        if let Some(grad) = grad {
            for i in 0..x.len() {
                grad[i] = self.budget_term(i, 1.0);
            }
        }
        spent - available
    }
}

/// CONSUMPTION_AND_PRODUCTION entry point.
pub fn iterate_consumption_and_production(
    model: &Model,
    agent_index: usize,
    info: &ConsumerInfo,
    forcing: Forcing,
    state: &mut ConsumerState,
) {
    if info.utilitarian {
        let (consumption, utility) = utilitarian_consumption(model, agent_index, state);
        consume_optimization_result(model, agent_index, state, &consumption);
        state.utility = utility;
    } else {
        fallback_consumption(model, agent_index, forcing, state);
    }
    tracing::debug!(target: "consumption", agent = %model.agents[agent_index].name, utility = state.utility);
}

fn utilitarian_consumption(
    model: &Model,
    agent_index: usize,
    state: &ConsumerState,
) -> (Vec<Flow>, FloatType) {
    let n = state.storages.len();
    let delta_t = model.delta_t();
    let mut prices = vec![Price::new(0.0); n];
    let mut elasticities = vec![0.0; n];
    let mut x = vec![0.0; n];
    let mut lower = vec![0.0; n];
    let mut upper = vec![0.0; n];

    for (i, storage) in state.storages.iter().enumerate() {
        let possible = storage.possible_use(delta_t);
        elasticities[i] = storage.parameters.consumption_price_elasticity;
        let baseline = state.baseline_consumption[i].quantity();
        if baseline.get() == 0.0 {
            prices[i] = Price::new(1.0);
            continue;
        }
        if possible.quantity() <= Quantity::new(0.0) {
            // nothing to buy: pin this good at zero, price from last time
            let last = state.previous_consumption[i].price();
            prices[i] = if last.is_nan() { Price::new(1.0) } else { last };
            continue;
        }
        prices[i] = possible.price();
        // start at previous consumption: stable in the undisturbed baseline,
        // a warm start under small price changes
        let start_flow = if state.previous_consumption[i].quantity().get() == 0.0 {
            state.baseline_consumption[i]
        } else {
            state.previous_consumption[i]
        };
        let mut start = start_flow.quantity().min(possible.quantity());
        start = start
            * (prices[i] / start_flow.price()).powf(storage.parameters.consumption_price_elasticity);
        let scaled_start = start / baseline;
        if scaled_start <= 0.0 {
            continue;
        }
        let affordable =
            state.consumption_budget.get() / prices[i].get() / baseline.get();
        x[i] = scaled_start;
        lower[i] = scaled_start.min(0.5);
        upper[i] = affordable.min(1.5);
        x[i] = x[i].min(upper[i]);
    }

    let settings = &model.parameters.utility_optimization;
    let xtol: Vec<FloatType> = state
        .storages
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let baseline = state.baseline_consumption[i].quantity().get();
            if baseline > 0.0 {
                Quantity::PRECISION / baseline * 1e-2 * settings.precision_adjustment
            } else {
                Quantity::PRECISION
            }
        })
        .collect();
    let constraint_tolerance =
        Value::PRECISION / state.consumption_budget.get() * settings.precision_adjustment;

    let mut problem = UtilityProblem {
        state,
        prices: &prices,
        elasticities: &elasticities,
        elastic_budget: model.parameters.elastic_budget,
    };

    let optimized_utility = if model.parameters.global_utility_optimization {
        let global = &model.parameters.global_utility_settings;
        let mut lagrangian = Optimization::new(model.parameters.lagrangian_algorithm, n);
        lagrangian.lower_bounds(lower);
        lagrangian.upper_bounds(upper);
        lagrangian.xtol(xtol);
        lagrangian.maxeval(global.maxiter);
        lagrangian.maxtime(global.timeout);
        if model.parameters.budget_inequality_constrained {
            lagrangian.add_inequality_constraint(constraint_tolerance);
        } else {
            lagrangian.add_equality_constraint(constraint_tolerance);
        }
        let mut global_opt = Optimization::new(global.algorithm, n);
        global_opt.maxeval(global.maxiter);
        global_opt.population(model.parameters.global_sampling_points);
        global_opt.seed(model.parameters.seed ^ agent_index as u64);
        lagrangian.set_local_algorithm(global_opt);
        let result = lagrangian.optimize(&mut problem, &mut x);
        handle_result(model, agent_index, result, &lagrangian, n);
        lagrangian.optimized_value()
    } else {
        let mut opt = Optimization::new(settings.algorithm, n);
        opt.lower_bounds(lower);
        opt.upper_bounds(upper);
        opt.xtol(xtol);
        opt.maxeval(settings.maxiter);
        opt.maxtime(settings.timeout);
        if model.parameters.budget_inequality_constrained {
            opt.add_inequality_constraint(constraint_tolerance);
        } else {
            opt.add_equality_constraint(constraint_tolerance);
        }
        let result = opt.optimize(&mut problem, &mut x);
        handle_result(model, agent_index, result, &opt, n);
        opt.optimized_value()
    };

    let consumption = (0..n)
        .map(|i| {
            Flow::new(
                (Quantity::new(x[i]) * state.baseline_consumption[i].quantity().get()).round(),
                prices[i],
            )
        })
        .collect();
    (consumption, optimized_utility)
}

fn handle_result(
    model: &Model,
    agent_index: usize,
    result: Result<bool, OptimizationError>,
    opt: &Optimization,
    dimension: usize,
) {
    match result {
        Ok(true) => {}
        Ok(false) => {
            if opt.xtol_reached() {
                return;
            }
            let (kind, what) = if opt.roundoff_limited() {
                (EventKind::OptimizerRoundoffLimited, "is roundoff limited")
            } else if opt.maxeval_reached() {
                (EventKind::OptimizerMaxiter, "reached maximum iterations")
            } else if opt.maxtime_reached() {
                (EventKind::OptimizerTimeout, "timed out")
            } else {
                tracing::warn!(
                    target: "optimizer",
                    agent = %model.agents[agent_index].name,
                    result = opt.last_result_description(),
                    "utility optimization finished"
                );
                return;
            };
            model.events.record(
                model.timestep(),
                kind,
                Some(agent_index),
                None,
                f64::NAN,
            );
            if model.parameters.optimization_problems_fatal && !opt.roundoff_limited() {
                model.report_fatal(format!(
                    "utility optimization {what} (for {dimension} consumption goods)"
                ));
            } else {
                tracing::warn!(
                    target: "optimizer",
                    agent = %model.agents[agent_index].name,
                    dimension,
                    "utility optimization {}", what
                );
            }
        }
        Err(OptimizationError::InvalidArgs(message)) => {
            model.report_fatal(format!("utility optimization failed: {message}"));
        }
        Err(OptimizationError::Failure(message)) => {
            if model.parameters.optimization_problems_fatal {
                model.report_fatal(format!("utility optimization failed: {message}"));
            } else {
                tracing::warn!(
                    target: "optimizer",
                    agent = %model.agents[agent_index].name,
                    message,
                    "utility optimization failed"
                );
            }
        }
    }
}

/// Storage depletion and bookkeeping once the consumption vector is fixed.
fn consume_optimization_result(
    model: &Model,
    agent_index: usize,
    state: &mut ConsumerState,
    consumption: &[Flow],
) {
    let register = model.current_register();
    let region = &model.regions[model.agents[agent_index].region.0];
    let forcing = model.agents[agent_index].forcing;
    state.not_spent_budget += state.consumption_budget;
    for (i, flow) in consumption.iter().enumerate() {
        let storage = &mut state.storages[i];
        storage.set_desired_used_flow(*flow);
        storage.use_content(*flow);
        region.add_consumption(register, flow.round());
        storage.iterate_consumption_and_production(model, agent_index, forcing);
        state.previous_consumption[i] = *flow;
        state.not_spent_budget -= flow.value();
    }
    if !model.parameters.budget_inequality_constrained {
        state.not_spent_budget = Value::new(0.0);
    }
}

/// Non-utilitarian fallback: per-storage demand from the reservation price
/// and the consumption price elasticity.
fn fallback_consumption(
    model: &Model,
    agent_index: usize,
    forcing: Forcing,
    state: &mut ConsumerState,
) {
    let register = model.current_register();
    let region = &model.regions[model.agents[agent_index].region.0];
    let delta_t = model.delta_t();
    let n = state.storages.len();
    let mut scaled = vec![0.0; n];
    for i in 0..n {
        let storage = &mut state.storages[i];
        let possible = storage.possible_use(delta_t);
        let reservation_price = if possible.quantity() > Quantity::new(0.0) {
            possible.price()
        } else {
            let last = storage.desired_used_flow.price();
            debug_assert!(!last.is_nan());
            model.events.record(
                model.timestep(),
                EventKind::NoConsumption,
                Some(agent_index),
                None,
                last.get(),
            );
            last
        };
        debug_assert!(reservation_price > Price::new(0.0));
        let desired_quantity = (storage.baseline_input_flow.quantity()
            * forcing
            * reservation_price
                .get()
                .powf(storage.parameters.consumption_price_elasticity))
        .round();
        let desired = Flow::new(desired_quantity, reservation_price);
        let used = Flow::new(
            desired.quantity().min(possible.quantity()),
            reservation_price,
        );
        storage.set_desired_used_flow(desired);
        storage.use_content(used.round());
        region.add_consumption(register, used.round());
        storage.iterate_consumption_and_production(model, agent_index, forcing);
        state.previous_consumption[i] = used;
        let baseline = state.baseline_consumption[i].quantity().get();
        scaled[i] = if baseline > 0.0 {
            used.quantity().get() / baseline
        } else {
            0.0
        };
    }
    state.utility = state.utility_at(&scaled).value();
}

/// PURCHASE phase: each storage runs its purchasing program.
pub fn iterate_purchase(model: &Model, agent_index: usize, state: &mut ConsumerState) {
    for storage in &mut state.storages {
        purchasing::iterate_purchase(model, agent_index, storage);
    }
}

/// INVESTMENT phase.
pub fn iterate_investment(model: &Model, state: &ConsumerState) {
    if !model.parameters.with_investment_dynamics {
        return;
    }
    for storage in &state.storages {
        purchasing::iterate_investment(model, storage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SectorId, StorageId};
    use crate::model::agent::ConsumerBasket;
    use crate::parameters::StorageParameters;
    use crate::types::Time;

    fn consumer_state(shares: &[f64]) -> ConsumerState {
        let storages: Vec<Storage> = shares
            .iter()
            .enumerate()
            .map(|(i, &q)| {
                Storage::new(
                    SectorId(i),
                    StorageId(i),
                    Flow::new(Quantity::new(q), Price::new(1.0)),
                    Time::new(10.0),
                    StorageParameters::default(),
                )
            })
            .collect();
        let info = ConsumerInfo {
            baskets: vec![ConsumerBasket {
                sectors: (0..shares.len()).map(SectorId).collect(),
                intra_basket_substitution: 2.0,
            }],
            inter_basket_substitution: 5.0,
            utilitarian: true,
        };
        ConsumerState::initialize(&info, storages)
    }

    #[test]
    fn shares_sum_to_one() {
        let state = consumer_state(&[1.0, 3.0]);
        let total: f64 = state.share_factors.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!((state.share_factors[1] - 0.75).abs() < 1e-12);
        let baskets: f64 = state.basket_share_factors.iter().sum();
        assert!((baskets - 1.0).abs() < 1e-12);
    }

    #[test]
    fn baseline_utility_is_one() {
        let state = consumer_state(&[1.0, 2.0, 0.5]);
        assert!((state.baseline_utility - 1.0).abs() < 1e-9);
    }

    #[test]
    fn utility_decreases_when_consumption_drops() {
        let state = consumer_state(&[1.0, 1.0]);
        let u_full = state.utility_at(&[1.0, 1.0]).value();
        let u_short = state.utility_at(&[0.5, 1.0]).value();
        assert!(u_short < u_full);
    }

    #[test]
    fn single_basket_reduces_to_intra_ces() {
        // One basket: the inter-basket layer collapses to a monotone wrapper.
        let state = consumer_state(&[1.0, 1.0]);
        let u = state.utility_at(&[0.8, 1.2]).value();
        let e = state.intra_basket_exponent[0];
        let expected_inner: f64 = state.basket_indices[0]
            .iter()
            .map(|&i| {
                state.exponent_share_factors[i]
                    * ([0.8, 1.2][i] * state.share_factors[i]).powf(e)
            })
            .sum();
        let expected = expected_inner.powf(1.0 / e);
        assert!((u - expected).abs() < 1e-9, "{u} vs {expected}");
    }

    #[test]
    fn empty_basket_is_dropped() {
        let storages: Vec<Storage> = vec![Storage::new(
            SectorId(0),
            StorageId(0),
            Flow::new(Quantity::new(1.0), Price::new(1.0)),
            Time::new(10.0),
            StorageParameters::default(),
        )];
        let info = ConsumerInfo {
            baskets: vec![
                ConsumerBasket {
                    sectors: vec![SectorId(0)],
                    intra_basket_substitution: 2.0,
                },
                ConsumerBasket {
                    sectors: vec![SectorId(7)],
                    intra_basket_substitution: 2.0,
                },
            ],
            inter_basket_substitution: 5.0,
            utilitarian: true,
        };
        let state = ConsumerState::initialize(&info, storages);
        assert_eq!(state.basket_indices.len(), 1);
        assert!((state.basket_share_factors[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn budget_gradient_is_linear() {
        let state = consumer_state(&[1.0, 1.0]);
        let prices = vec![Price::new(1.0), Price::new(2.0)];
        let elasticities = vec![-1.0, -1.0];
        let mut problem = UtilityProblem {
            state: &state,
            prices: &prices,
            elasticities: &elasticities,
            elastic_budget: false,
        };
        let x = [1.0, 1.0];
        let mut grad = vec![0.0; 2];
        let c = problem.inequality_constraint(&x, Some(&mut grad));
        // budget 2.0, spend 1·1 + 1·2 = 3 → (3 − 2)/2
        assert!((c - 0.5).abs() < 1e-12);
        assert!((grad[0] - 0.5).abs() < 1e-12);
        assert!((grad[1] - 1.0).abs() < 1e-12);
    }
}
