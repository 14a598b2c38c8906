//! Purchasing manager: one constrained optimization per storage and tick.
//!
//! The buyer chooses the demand request vector `D = (D_1,…,D_R)` across its
//! suppliers to minimize expected costs (expected unit price plus transport
//! penalty) subject to `Σ D_r = desired purchase`. Each supplier's expected
//! unit price follows from the parameters its sales manager communicated:
//! flat at the offer price up to λ·X*, then rising with the anticipated
//! production extension penalty; from below it is cropped by the marginal
//! production cost. All variables are scaled by the connection's baseline
//! flow so the problem stays O(1) regardless of absolute magnitudes.

use serde::{Deserialize, Serialize};

use super::connection::send_demand_request;
use super::storage::Storage;
use super::{Model, ConnectionId};
use crate::events::EventKind;
use crate::optimization::{Optimization, OptimizationError, Problem};
use crate::parameters::ModelParameters;
use crate::types::{Demand, Flow, FloatType, Price, Quantity, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchasingState {
    /// D: the sent demand requests of the last PURCHASE step.
    pub demand: Demand,
    pub purchase: Demand,
    pub desired_purchase: Quantity,
    pub expected_costs: Value,
    pub total_transport_penalty: Value,
    pub optimized_value: FloatType,
}

impl PurchasingState {
    pub fn new(baseline_flow: Flow) -> Self {
        Self {
            demand: baseline_flow,
            purchase: baseline_flow,
            desired_purchase: baseline_flow.quantity(),
            expected_costs: baseline_flow.value(),
            total_transport_penalty: Value::new(0.0),
            optimized_value: 0.0,
        }
    }
}

/// Frozen per-supplier view, copied out of the locks before optimizing.
#[derive(Debug, Clone)]
struct Supplier {
    connection: ConnectionId,
    /// Z*: scaling of this coordinate.
    baseline_flow_quantity: FloatType,
    n_bar: FloatType,
    production: FloatType,
    expected_production_raw: FloatType,
    possible_production: FloatType,
    /// n_c as communicated with X̂.
    unit_production_costs: FloatType,
    last_shipment: FloatType,
    lambda_x_star: FloatType,
    estimated_price_increase: FloatType,
    baseline_markup: FloatType,
    /// Transport penalty target: last demand request or baseline flow.
    target: FloatType,
    upper_bound: FloatType,
    initial_value: FloatType,
}

impl Supplier {
    fn expected_production(&self) -> FloatType {
        self.expected_production_raw
    }

    /// ratio·(X − Z_last): what other buyers are expected to claim.
    fn expected_additional_production(&self) -> FloatType {
        let ratio = if self.production > 0.0 {
            self.expected_production() / self.production
        } else {
            0.0
        };
        ratio * (self.production - self.last_shipment)
    }

    fn extension_penalty(&self, quantity: FloatType) -> FloatType {
        if quantity <= self.lambda_x_star {
            return 0.0;
        }
        (self.estimated_price_increase / (2.0 * self.lambda_x_star)
            * (quantity - self.lambda_x_star)
            * (quantity - self.lambda_x_star))
            .max(0.0)
    }

    fn marginal_extension_penalty(&self, quantity: FloatType) -> FloatType {
        if quantity <= self.lambda_x_star {
            return 0.0;
        }
        self.estimated_price_increase / self.lambda_x_star * (quantity - self.lambda_x_star)
    }

    fn marginal_production_costs(&self, quantity: FloatType) -> FloatType {
        self.unit_production_costs + self.marginal_extension_penalty(quantity)
    }
}

struct PurchaseProblem<'a> {
    suppliers: &'a [Supplier],
    parameters: &'a ModelParameters,
    desired_purchase: FloatType,
    /// U*: objective and use scaling.
    scale: FloatType,
}

impl PurchaseProblem<'_> {
    fn unscaled(&self, r: usize, x: FloatType) -> FloatType {
        x * self.suppliers[r].baseline_flow_quantity
    }

    /// Expected average unit price for requesting `d` from supplier `s`.
    fn expected_average_price(&self, d: FloatType, s: &Supplier) -> FloatType {
        let x_expected = s.expected_production();
        let mut x_new = d + s.expected_additional_production();
        if x_new > s.possible_production {
            x_new = s.possible_production;
        }
        if x_expected <= 0.0 && x_new <= 0.0 {
            s.n_bar
        } else if x_expected <= 0.0 {
            s.n_bar + s.extension_penalty(x_new) / x_new
        } else if x_new <= 0.0 {
            s.n_bar - s.extension_penalty(x_expected) / x_expected
        } else {
            s.n_bar - s.extension_penalty(x_expected) / x_expected
                + s.extension_penalty(x_new) / x_new
        }
    }

    fn grad_expected_average_price(&self, d: FloatType, s: &Supplier) -> FloatType {
        let mut x_new = d + s.expected_additional_production();
        if x_new > s.possible_production {
            x_new = s.possible_production;
        }
        if x_new <= 0.0 {
            return 0.0;
        }
        s.marginal_extension_penalty(x_new) / x_new - s.extension_penalty(x_new) / x_new / x_new
    }

    /// Lower crop of the reservation price: the marginal production cost,
    /// optionally floored by the markup-limited decrease.
    fn reservation_floor(&self, n_bar_min: FloatType, d_min: FloatType, s: &Supplier) -> FloatType {
        let n_co = s.marginal_production_costs(s.production);
        if self.parameters.maximal_decrease_reservation_price_limited_by_markup {
            n_co.max(n_bar_min - s.baseline_markup * d_min)
        } else {
            n_co
        }
    }

    fn reservation_price(&self, d: FloatType, s: &Supplier) -> FloatType {
        debug_assert!(d >= 0.0);
        let additional = s.expected_additional_production();
        let x_expected = s.expected_production();
        let e_n = self.expected_average_price(d, s);
        let d_min = (s.lambda_x_star - additional).max(0.0);
        let x_new_min = d_min + additional;
        let npe_at_expected = if x_expected > 0.0 {
            s.extension_penalty(x_expected) / x_expected
        } else {
            0.0
        };
        let npe_at_min = if x_new_min > 0.0 {
            s.extension_penalty(x_new_min) / x_new_min
        } else {
            0.0
        };
        let n_bar_min = s.n_bar - npe_at_expected + npe_at_min;
        let n_co = self.reservation_floor(n_bar_min, d_min, s);
        if n_co <= n_bar_min {
            if d < d_min {
                debug_assert!(d_min > 0.0);
                return n_co + (n_bar_min - n_co) / d_min * d;
            }
            return e_n;
        }
        if e_n <= n_co {
            return n_co;
        }
        e_n
    }

    fn grad_reservation_price(&self, d: FloatType, s: &Supplier) -> FloatType {
        let additional = s.expected_additional_production();
        let x_expected = s.expected_production();
        let grad_e_n = self.grad_expected_average_price(d, s);
        let e_n = self.expected_average_price(d, s);
        let d_min = (s.lambda_x_star - additional).max(0.0);
        let x_new_min = d_min + additional;
        let npe_at_expected = if x_expected > 0.0 {
            s.extension_penalty(x_expected) / x_expected
        } else {
            0.0
        };
        let npe_at_min = if x_new_min > 0.0 {
            s.extension_penalty(x_new_min) / x_new_min
        } else {
            0.0
        };
        let n_bar_min = s.n_bar - npe_at_expected + npe_at_min;
        let n_co = self.reservation_floor(n_bar_min, d_min, s);
        if n_co <= n_bar_min {
            if d < d_min && d_min > 0.0 {
                return (n_bar_min - n_co) / d_min;
            }
            return grad_e_n;
        }
        if e_n <= n_co {
            return 0.0;
        }
        grad_e_n
    }

    fn transport_penalty(&self, d: FloatType, s: &Supplier) -> FloatType {
        let target = s.target;
        let p = self.parameters;
        if p.quadratic_transport_penalty {
            let marg_penalty = if d < target {
                -s.baseline_markup
            } else if d > target {
                s.baseline_markup
            } else {
                0.0
            };
            let large = p.transport_penalty_large.get();
            if p.relative_transport_penalty {
                if target > Quantity::PRECISION {
                    return (d - target)
                        * ((d - target) * large / (target * target) / 2.0 + marg_penalty);
                }
                return d * d * (large / 2.0 + marg_penalty);
            }
            return (d - target) * ((d - target) * large / 2.0 + marg_penalty);
        }
        if p.relative_transport_penalty {
            return self.partial_transport_penalty(d, s) * (d - target) / target;
        }
        self.partial_transport_penalty(d, s) * (d - target)
    }

    fn partial_transport_penalty(&self, d: FloatType, s: &Supplier) -> FloatType {
        let target = s.target;
        let p = self.parameters;
        let small = p.transport_penalty_small.get();
        let large = p.transport_penalty_large.get();
        if p.quadratic_transport_penalty {
            let marg_penalty = if d < target {
                -s.baseline_markup
            } else if d > target {
                s.baseline_markup
            } else {
                0.0
            };
            if p.relative_transport_penalty {
                if target > Quantity::PRECISION {
                    return (d - target) * large / (target * target) + marg_penalty;
                }
                return d * large + marg_penalty;
            }
            return (d - target) * large + marg_penalty;
        }
        if p.relative_transport_penalty {
            if d < target {
                return -small / target;
            }
            if d > target {
                return large / target;
            }
            return (large - small) / 2.0 / target;
        }
        if d < target {
            return -small;
        }
        if d > target {
            return large;
        }
        (large - small) / 2.0
    }
}

impl Problem for PurchaseProblem<'_> {
    fn max_objective(&mut self, x: &[FloatType], grad: Option<&mut [FloatType]>) -> FloatType {
        let mut costs = 0.0;
        for (r, s) in self.suppliers.iter().enumerate() {
            let d = self.unscaled(r, x[r]);
            costs += self.reservation_price(d, s) * d + self.transport_penalty(d, s);
        }
        if let Some(grad) = grad {
            for (r, s) in self.suppliers.iter().enumerate() {
                let d = self.unscaled(r, x[r]);
                grad[r] = -s.baseline_flow_quantity
                    * (self.grad_reservation_price(d, s) * d
                        + self.reservation_price(d, s)
                        + self.partial_transport_penalty(d, s))
                    / self.scale;
            }
        }
        -costs / self.scale
    }

    fn equality_constraint(&mut self, x: &[FloatType], grad: Option<&mut [FloatType]>) -> FloatType {
        let mut use_sum = 0.0;
        for (r, _) in self.suppliers.iter().enumerate() {
            use_sum += self.unscaled(r, x[r]);
        }
        if let Some(grad) = grad {
            for (r, s) in self.suppliers.iter().enumerate() {
                grad[r] = -s.baseline_flow_quantity / self.scale;
            }
        }
        (self.desired_purchase - use_sum) / self.scale
    }
}

/// PURCHASE phase entry point for one storage.
pub fn iterate_purchase(model: &Model, agent_index: usize, storage: &mut Storage) {
    model.assert_step(super::IterationStep::Purchase);
    debug_assert!(!storage.connections.is_empty());
    let delta_t = model.delta_t();

    storage.purchasing.demand = Demand::ZERO;
    storage.purchasing.purchase = Demand::ZERO;
    storage.purchasing.expected_costs = Value::new(0.0);
    storage.purchasing.total_transport_penalty = Value::new(0.0);
    storage.purchasing.optimized_value = 0.0;

    let shortage = (storage.flow_deficit(model) * delta_t.get())
        + (storage.baseline_content.quantity() - storage.content.quantity());
    let refill_time = if shortage > Quantity::new(0.0) {
        model.sectors[storage.sector.0]
            .parameters
            .target_storage_refill_time
    } else {
        model.sectors[storage.sector.0]
            .parameters
            .target_storage_withdraw_time
    };
    let mut desired_purchase =
        storage.desired_used_flow.quantity() + shortage / refill_time.get();
    if desired_purchase.round() <= Quantity::new(0.0) {
        for &c in &storage.connections {
            send_demand_request(model, &model.connections[c.0], Demand::ZERO);
        }
        storage.purchasing.desired_purchase = Quantity::new(0.0);
        return;
    }

    // Per-supplier bounds: what the seller could additionally ship to us.
    let mut suppliers: Vec<Supplier> = Vec::with_capacity(storage.connections.len());
    let mut maximal_possible_purchase = Quantity::new(0.0);
    for &c in &storage.connections {
        let connection = &model.connections[c.0];
        let seller = &model.agents[connection.seller.0];
        let seller_info = seller.firm_info().expect("seller must be a firm");
        let seller_sector = &model.sectors[seller_info.sector.0];
        let params = model.supply_channels[connection.seller_firm.0]
            .params
            .read()
            .unwrap()
            .clone();
        if params.possible_production.quantity() <= Quantity::new(0.0)
            || params.offer_price.is_nan()
        {
            send_demand_request(model, connection, Demand::ZERO);
            continue;
        }
        let (last_shipment, last_demand, baseline_flow) = {
            let state = model.conn_states[c.0].lock().unwrap();
            (
                state.last_shipment.quantity().get(),
                state.last_demand_request.quantity().get(),
                state.baseline_flow.quantity().get(),
            )
        };
        let mut supplier = Supplier {
            connection: c,
            baseline_flow_quantity: baseline_flow,
            n_bar: params.offer_price.get(),
            production: params.production.quantity().get(),
            expected_production_raw: params.expected_production.quantity().get(),
            possible_production: params.possible_production.quantity().get(),
            unit_production_costs: params.possible_production.price().get(),
            last_shipment,
            lambda_x_star: seller_info
                .forced_baseline_production_quantity(seller.forcing)
                .get(),
            estimated_price_increase: seller_sector
                .parameters
                .estimated_price_increase_production_extension
                .get(),
            baseline_markup: seller_sector.parameters.baseline_markup.get(),
            target: if model.parameters.deviation_penalty {
                last_demand
            } else {
                baseline_flow
            },
            upper_bound: 0.0,
            initial_value: 0.0,
        };
        let additional = supplier.expected_additional_production();
        let upper_limit = supplier.possible_production - additional;
        if Quantity::new(upper_limit).round() > Quantity::new(0.0) {
            let mut initial = (supplier.expected_production() - additional)
                .clamp(0.0, upper_limit);
            if model.parameters.start_purchasing_at_baseline {
                initial = baseline_flow.min(upper_limit);
            } else if model.parameters.purchasing_halfway_baseline {
                initial = ((initial + baseline_flow) / 2.0).min(upper_limit);
            }
            supplier.upper_bound = upper_limit;
            supplier.initial_value = initial;
            maximal_possible_purchase += Quantity::new(upper_limit).round();
            suppliers.push(supplier);
        } else {
            send_demand_request(model, connection, Demand::ZERO);
        }
    }

    if suppliers.is_empty() {
        tracing::warn!(
            target: "purchase",
            agent = %model.agents[agent_index].name,
            "possible demand is zero (no supplier with possible production capacity)"
        );
        storage.purchasing.desired_purchase = desired_purchase.round();
        return;
    }
    if desired_purchase > maximal_possible_purchase {
        desired_purchase = maximal_possible_purchase;
    }
    storage.purchasing.desired_purchase = desired_purchase.round();

    let scale = storage.baseline_used_flow().quantity().get();
    let mut x: Vec<FloatType> = suppliers
        .iter()
        .map(|s| s.initial_value / s.baseline_flow_quantity)
        .collect();
    let lower: Vec<FloatType> = suppliers.iter().map(|_| 0.0).collect();
    let upper: Vec<FloatType> = suppliers
        .iter()
        .map(|s| s.upper_bound / s.baseline_flow_quantity)
        .collect();
    let settings = &model.parameters.purchasing_optimization;
    let xtol: Vec<FloatType> = suppliers
        .iter()
        .map(|s| {
            Quantity::PRECISION / s.baseline_flow_quantity * 1e-2 * settings.precision_adjustment
        })
        .collect();
    let constraint_tolerance = Quantity::PRECISION * 1e-2 * settings.precision_adjustment;

    let mut problem = PurchaseProblem {
        suppliers: &suppliers,
        parameters: &model.parameters,
        desired_purchase: desired_purchase.get(),
        scale,
    };

    if model.parameters.global_purchasing_optimization {
        // Lagrangian wrapper lifting the constraint over the global algorithm.
        let global = &model.parameters.global_purchasing_settings;
        let mut lagrangian =
            Optimization::new(model.parameters.lagrangian_algorithm, suppliers.len());
        lagrangian.lower_bounds(lower.clone());
        lagrangian.upper_bounds(upper.clone());
        lagrangian.xtol(xtol.clone());
        lagrangian.maxeval(global.maxiter);
        lagrangian.maxtime(settings.timeout);
        lagrangian.add_equality_constraint(constraint_tolerance);
        let mut pre_opt = Optimization::new(global.algorithm, suppliers.len());
        pre_opt.maxeval(global.maxiter);
        pre_opt.seed(model.parameters.seed ^ storage.id.0 as u64);
        lagrangian.set_local_algorithm(pre_opt);
        let result = lagrangian.optimize(&mut problem, &mut x);
        handle_result(model, agent_index, result, &lagrangian, suppliers.len());
    }

    if model.parameters.local_purchasing_optimization {
        let mut opt = Optimization::new(settings.algorithm, suppliers.len());
        opt.lower_bounds(lower.clone());
        opt.upper_bounds(upper.clone());
        opt.xtol(xtol.clone());
        opt.maxeval(settings.maxiter);
        opt.maxtime(settings.timeout);
        opt.add_equality_constraint(constraint_tolerance);
        let result = opt.optimize(&mut problem, &mut x);
        let accepted = handle_result(model, agent_index, result, &opt, suppliers.len());
        if !accepted && model.parameters.optimization_restart_baseline {
            // one retry from the baseline point
            for (xi, s) in x.iter_mut().zip(&suppliers) {
                *xi = (s.baseline_flow_quantity.min(s.upper_bound)) / s.baseline_flow_quantity;
            }
            let result = opt.optimize(&mut problem, &mut x);
            handle_result(model, agent_index, result, &opt, suppliers.len());
        }
        storage.purchasing.optimized_value = opt.optimized_value() * scale;
    }

    // Send the optimized requests, quoted at the expected reservation price.
    let mut costs = 0.0;
    let mut total_penalty = 0.0;
    let mut demand = Demand::ZERO;
    for (r, s) in suppliers.iter().enumerate() {
        let d = problem.unscaled(r, x[r]);
        let price = problem.reservation_price(d, s);
        debug_assert!(!price.is_nan());
        let mut request = Demand::with_unit_price(Quantity::new(d));
        request.set_price(Price::new(price).round());
        let request = request.round();
        send_demand_request(model, &model.connections[s.connection.0], request);
        demand += request;
        costs += price * d + problem.transport_penalty(d, s);
        total_penalty += problem.transport_penalty(d, s);
    }
    storage.purchasing.demand = demand;
    storage.purchasing.purchase = demand;
    storage.purchasing.expected_costs = Value::new(costs);
    storage.purchasing.total_transport_penalty = Value::new(total_penalty);
}

/// Shared failure handling: events for budget exhaustion, warnings otherwise,
/// fatal escalation when configured. Returns whether the result is accepted.
fn handle_result(
    model: &Model,
    agent_index: usize,
    result: Result<bool, OptimizationError>,
    opt: &Optimization,
    dimension: usize,
) -> bool {
    match result {
        Ok(true) => true,
        Ok(false) => {
            if opt.xtol_reached() || opt.roundoff_limited() {
                // both are acceptable terminations for the purchase problem
                return true;
            }
            if opt.maxeval_reached() {
                model.events.record(
                    model.timestep(),
                    EventKind::OptimizerMaxiter,
                    Some(agent_index),
                    None,
                    f64::NAN,
                );
                if model.parameters.optimization_problems_fatal {
                    model.report_fatal(format!(
                        "purchase optimization reached maximum iterations (for {dimension} inputs)"
                    ));
                } else {
                    tracing::warn!(
                        target: "optimizer",
                        agent = %model.agents[agent_index].name,
                        dimension,
                        "purchase optimization reached maximum iterations"
                    );
                }
            } else if opt.maxtime_reached() {
                model.events.record(
                    model.timestep(),
                    EventKind::OptimizerTimeout,
                    Some(agent_index),
                    None,
                    f64::NAN,
                );
                if model.parameters.optimization_problems_fatal {
                    model.report_fatal(format!(
                        "purchase optimization timed out (for {dimension} inputs)"
                    ));
                } else {
                    tracing::warn!(
                        target: "optimizer",
                        agent = %model.agents[agent_index].name,
                        dimension,
                        "purchase optimization timed out"
                    );
                }
            } else {
                tracing::warn!(
                    target: "optimizer",
                    agent = %model.agents[agent_index].name,
                    result = opt.last_result_description(),
                    "purchase optimization finished"
                );
            }
            false
        }
        Err(OptimizationError::InvalidArgs(message)) => {
            model.report_fatal(format!("purchase optimization failed: {message}"));
            false
        }
        Err(OptimizationError::Failure(message)) => {
            if model.parameters.optimization_problems_fatal {
                model.report_fatal(format!("purchase optimization failed: {message}"));
            } else {
                tracing::warn!(
                    target: "optimizer",
                    agent = %model.agents[agent_index].name,
                    message,
                    "purchase optimization failed"
                );
            }
            false
        }
    }
}

/// INVESTMENT phase: relax the incoming connections' baseline flows.
pub fn iterate_investment(model: &Model, storage: &Storage) {
    let adjustment_time = model.sectors[storage.sector.0]
        .parameters
        .transport_investment_adjustment_time;
    for &c in &storage.connections {
        model.conn_states[c.0]
            .lock()
            .unwrap()
            .iterate_investment(model.delta_t(), adjustment_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ModelParameters;

    fn supplier(target: FloatType) -> Supplier {
        Supplier {
            connection: ConnectionId(0),
            baseline_flow_quantity: 1.0,
            n_bar: 1.0,
            production: 1.0,
            expected_production_raw: 1.0,
            possible_production: 1.15,
            unit_production_costs: 0.95,
            last_shipment: 1.0,
            lambda_x_star: 1.0,
            estimated_price_increase: 1.0,
            baseline_markup: 0.05,
            target,
            upper_bound: 1.15,
            initial_value: 1.0,
        }
    }

    #[test]
    fn reservation_price_is_offer_price_at_baseline() {
        let suppliers = vec![supplier(1.0)];
        let parameters = ModelParameters::default();
        let problem = PurchaseProblem {
            suppliers: &suppliers,
            parameters: &parameters,
            desired_purchase: 1.0,
            scale: 1.0,
        };
        let price = problem.reservation_price(1.0, &suppliers[0]);
        assert!((price - 1.0).abs() < 1e-12);
    }

    #[test]
    fn reservation_price_rises_above_lambda_x_star() {
        let suppliers = vec![supplier(1.0)];
        let parameters = ModelParameters::default();
        let problem = PurchaseProblem {
            suppliers: &suppliers,
            parameters: &parameters,
            desired_purchase: 1.0,
            scale: 1.0,
        };
        let at_baseline = problem.reservation_price(1.0, &suppliers[0]);
        let above = problem.reservation_price(1.1, &suppliers[0]);
        assert!(above > at_baseline);
    }

    #[test]
    fn transport_penalty_zero_at_target_and_positive_off_target() {
        let suppliers = vec![supplier(1.0)];
        let parameters = ModelParameters::default();
        let problem = PurchaseProblem {
            suppliers: &suppliers,
            parameters: &parameters,
            desired_purchase: 1.0,
            scale: 1.0,
        };
        let s = &suppliers[0];
        assert_eq!(problem.transport_penalty(1.0, s), 0.0);
        assert!(problem.transport_penalty(1.2, s) > 0.0);
        assert!(problem.transport_penalty(0.8, s) > 0.0);
    }

    #[test]
    fn objective_gradient_matches_finite_difference() {
        let suppliers = vec![supplier(1.0), supplier(1.0)];
        let parameters = ModelParameters::default();
        let mut problem = PurchaseProblem {
            suppliers: &suppliers,
            parameters: &parameters,
            desired_purchase: 2.0,
            scale: 2.0,
        };
        let x = [0.95, 1.05];
        let mut grad = vec![0.0; 2];
        problem.max_objective(&x, Some(&mut grad));
        let h = 1e-7;
        for i in 0..2 {
            let mut hi = x;
            let mut lo = x;
            hi[i] += h;
            lo[i] -= h;
            let fd =
                (problem.max_objective(&hi, None) - problem.max_objective(&lo, None)) / (2.0 * h);
            assert!(
                (grad[i] - fd).abs() < 1e-5,
                "grad[{i}] = {} vs fd {}",
                grad[i],
                fd
            );
        }
    }

    #[test]
    fn constraint_gradient_matches_finite_difference() {
        let suppliers = vec![supplier(1.0), supplier(1.0)];
        let parameters = ModelParameters::default();
        let mut problem = PurchaseProblem {
            suppliers: &suppliers,
            parameters: &parameters,
            desired_purchase: 2.0,
            scale: 2.0,
        };
        let x = [1.0, 1.0];
        let mut grad = vec![0.0; 2];
        let c = problem.equality_constraint(&x, Some(&mut grad));
        assert!(c.abs() < 1e-12);
        for g in grad {
            assert!((g + 0.5).abs() < 1e-12);
        }
    }
}
