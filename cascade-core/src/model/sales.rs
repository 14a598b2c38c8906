//! Sales manager: price-ordered supply distribution and the expectation step.
//!
//! Each firm sorts the incoming demand requests by offered price and serves
//! them in order, stopping where the next request would exceed possible
//! production or price below marginal cost. Above λ·X* the marginal cost
//! rises linearly with slope `price_increase_production_extension / λX*`
//! (the production extension). The cutoff price found here drives the
//! prorated distribution of realized production; the expectation variant
//! runs on estimated capacity and may extend the demand curve by bisection.

use serde::{Deserialize, Serialize};

use super::agent::FirmInfo;
use super::connection::push_flow;
use super::{ConnectionId, Model, capacity, firm::FirmState};
use crate::events::EventKind;
use crate::types::{Demand, Flow, FloatType, Forcing, Price, Quantity, Ratio, Value};

/// What the seller communicates to (potential) buyers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplyParameters {
    /// n̄: the communicated offer price.
    pub offer_price: Price,
    /// X: realized production of the current tick.
    pub production: Flow,
    pub expected_production: Flow,
    /// X̂, priced at the unit production cost n_c.
    pub possible_production: Flow,
}

/// Outcome of the distribution scenario: where serving stopped and at which
/// price. A NaN cutoff means "no cutoff known" (degenerate scenario).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplyDistributionScenario {
    pub not_served_index: usize,
    pub cutoff_price: Price,
    pub flow_not_served: Flow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesState {
    pub tax: Ratio,
    pub baseline_unit_commodity_costs: Price,
    pub baseline_markup: Price,
    pub baseline_unit_variable_production_costs: Price,
    pub total_production_costs: Value,
    pub total_revenue: Value,
    pub estimated_possible_production: Flow,
    /// Demand requests sorted by (price desc, quantity desc), empty last;
    /// built in calc_production, reused by distribute and expectation.
    pub sorted_requests: Vec<(ConnectionId, Demand)>,
    pub scenario: SupplyDistributionScenario,
}

impl SalesState {
    /// `baseline_unit_commodity_costs` is the technology-coefficient sum at
    /// baseline unit prices; markup is capped so variable costs stay
    /// nonnegative.
    pub fn new(baseline_unit_commodity_costs: Price, sector_markup: Price) -> Self {
        let markup = (Price::new(1.0) - baseline_unit_commodity_costs).min(sector_markup);
        let variable =
            (Price::new(1.0) - (baseline_unit_commodity_costs + markup)).max(Price::new(0.0));
        Self {
            tax: 0.0,
            baseline_unit_commodity_costs,
            baseline_markup: markup,
            baseline_unit_variable_production_costs: variable,
            total_production_costs: Value::new(0.0),
            total_revenue: Value::new(0.0),
            estimated_possible_production: Flow::ZERO,
            sorted_requests: Vec::new(),
            scenario: SupplyDistributionScenario::default(),
        }
    }

    fn minimal_offer_price(&self, minimal_production_price: Price) -> Price {
        (minimal_production_price + self.baseline_markup / (1.0 - self.tax)).round()
    }
}

// --- production cost curve -------------------------------------------------

fn production_extension_penalty(
    quantity: FloatType,
    lambda_x_star: FloatType,
    price_increase: Price,
) -> FloatType {
    if quantity <= lambda_x_star {
        return 0.0;
    }
    price_increase.get() / (2.0 * lambda_x_star) * (quantity - lambda_x_star).powi(2)
}

fn marginal_production_extension_penalty(
    quantity: FloatType,
    lambda_x_star: FloatType,
    price_increase: Price,
) -> FloatType {
    if quantity <= lambda_x_star {
        return 0.0;
    }
    price_increase.get() / lambda_x_star * (quantity - lambda_x_star)
}

pub fn marginal_production_costs(
    quantity: FloatType,
    lambda_x_star: FloatType,
    price_increase: Price,
    unit_production_costs: Price,
) -> Price {
    unit_production_costs
        + Price::new(marginal_production_extension_penalty(
            quantity,
            lambda_x_star,
            price_increase,
        ))
}

fn total_production_costs(
    production: Flow,
    lambda_x_star: FloatType,
    price_increase: Price,
    unit_production_costs: Price,
) -> Value {
    let base = production.quantity() * unit_production_costs;
    base + Value::new(production_extension_penalty(
        production.quantity().get(),
        lambda_x_star,
        price_increase,
    ))
}

/// Production level at which marginal cost meets the given price, in the
/// quadratic-penalty regime (closed form).
fn analytic_solution_in_production_extension(
    lambda_x_star: FloatType,
    price_increase: Price,
    unit_production_costs: Price,
    price: Price,
) -> Quantity {
    debug_assert!(price >= unit_production_costs);
    Quantity::new(
        lambda_x_star * (1.0 + (price - unit_production_costs).get() / price_increase.get()),
    )
    .round()
}

fn goal_marginal_costs_minus_price(
    quantity: Quantity,
    lambda_x_star: FloatType,
    price_increase: Price,
    unit_production_costs: Price,
    price: Price,
) -> Price {
    marginal_production_costs(
        quantity.round().get(),
        lambda_x_star,
        price_increase,
        unit_production_costs,
    ) - price
}

// --- phase entry points ----------------------------------------------------

/// CONSUMPTION_AND_PRODUCTION: sort the incoming requests, find the supply
/// distribution scenario on possible production, and publish the communicated
/// parameters. Returns the realized production.
pub fn calc_production(
    model: &Model,
    info: &FirmInfo,
    forcing: Forcing,
    state: &mut FirmState,
) -> Flow {
    model.assert_step(super::IterationStep::ConsumptionAndProduction);
    let channel = &model.supply_channels[info.index.0];
    let sum_demand = channel.sum_demand.lock().unwrap().round();
    state.capacity.desired_production = sum_demand;

    state.sales.sorted_requests = info
        .sales_connections
        .iter()
        .map(|&c| {
            (
                c,
                model.conn_states[c.0].lock().unwrap().last_demand_request,
            )
        })
        .collect();
    sort_requests(&mut state.sales.sorted_requests);

    let mut possible =
        capacity::possible_production(model, info, forcing, &state.sales, &state.storages);
    if state.sales.estimated_possible_production.quantity() > Quantity::new(0.0) {
        // price n_c was already computed in the estimation step
        possible.set_price(state.sales.estimated_possible_production.price());
    }

    let (production, offer_price) =
        calc_supply_distribution_scenario(model, info, forcing, state, possible, sum_demand);

    let mut params = channel.params.write().unwrap();
    params.production = production;
    params.possible_production = possible;
    params.offer_price = offer_price;
    production
}

fn sort_requests(requests: &mut [(ConnectionId, Demand)]) {
    requests.sort_by(|(_, a), (_, b)| {
        let a_empty = a.quantity() <= Quantity::new(0.0);
        let b_empty = b.quantity() <= Quantity::new(0.0);
        match (a_empty, b_empty) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => b
                .price()
                .get()
                .total_cmp(&a.price().get())
                .then(b.quantity().get().total_cmp(&a.quantity().get())),
        }
    });
}

fn calc_supply_distribution_scenario(
    model: &Model,
    info: &FirmInfo,
    forcing: Forcing,
    state: &mut FirmState,
    possible: Flow,
    sum_demand: Demand,
) -> (Flow, Price) {
    let sector = &model.sectors[info.sector.0];
    let lambda_x_star = info.forced_baseline_production_quantity(forcing).get();
    let price_increase = sector.parameters.price_increase_production_extension;
    let requests = std::mem::take(&mut state.sales.sorted_requests);
    let first_zero = requests
        .iter()
        .position(|(_, d)| d.quantity() <= Quantity::new(0.0))
        .unwrap_or(requests.len());

    let minimal_production_price = possible.price().round();
    let minimal_offer_price = state.sales.minimal_offer_price(minimal_production_price);
    state.sales.total_production_costs = Value::new(0.0);

    if possible.quantity() <= Quantity::new(0.0) {
        if forcing <= 0.0 {
            tracing::warn!(target: "production", agent = %model.agents[info.agent_index].name, "no production due to total forcing");
        } else {
            model.events.record(
                model.timestep(),
                EventKind::NoProductionSupplyShortage,
                Some(info.agent_index),
                None,
                f64::NAN,
            );
        }
        state.sales.scenario = SupplyDistributionScenario {
            not_served_index: 0,
            cutoff_price: Price::nan(),
            flow_not_served: Flow::ZERO,
        };
        state.sales.sorted_requests = requests;
        return (Flow::ZERO, Price::nan());
    }

    if first_zero == 0 || requests[0].1.price().round() < minimal_production_price {
        let kind = if first_zero == 0 {
            EventKind::NoProductionDemandQuantityShortage
        } else {
            EventKind::NoProductionDemandValueShortage
        };
        model.events.record(
            model.timestep(),
            kind,
            Some(info.agent_index),
            None,
            f64::NAN,
        );
        state.sales.scenario = SupplyDistributionScenario {
            not_served_index: 0,
            cutoff_price: Price::nan(),
            flow_not_served: Flow::ZERO,
        };
        state.sales.sorted_requests = requests;
        return (Flow::ZERO, Price::nan());
    }

    let mut production = Flow::ZERO;
    let mut not_served = first_zero;
    for (i, (_, request)) in requests.iter().enumerate().take(first_zero) {
        let with_request = (production + *request).round();
        if with_request.quantity() > possible.quantity() {
            not_served = i;
            break;
        }
        let max_marginal = marginal_production_costs(
            with_request.quantity().get(),
            lambda_x_star,
            price_increase,
            minimal_production_price,
        );
        if max_marginal.is_nan() || request.price().round() < max_marginal.round() {
            not_served = i;
            break;
        }
        production += *request;
    }
    production = production.round();
    debug_assert!(production.quantity() <= possible.quantity());

    if not_served == first_zero {
        // every non-empty request is served completely
        let cheapest = first_zero - 1;
        state.sales.total_production_costs = total_production_costs(
            production,
            lambda_x_star,
            price_increase,
            minimal_production_price,
        );
        let desired = state.capacity.desired_production.quantity().round().get();
        if desired < lambda_x_star && desired < possible.quantity().round().get() {
            // demand-quantity limited: reduce the offer price to attract demand
            let reduction = 1.0
                + sector.parameters.supply_elasticity * (production.quantity().get() - lambda_x_star)
                    / lambda_x_star;
            let offer = (production.price() * reduction)
                .max(minimal_offer_price)
                .round();
            state.sales.scenario = SupplyDistributionScenario {
                not_served_index: not_served,
                cutoff_price: requests[cheapest].1.price(),
                flow_not_served: Flow::ZERO,
            };
            state.sales.sorted_requests = requests;
            return (production, offer);
        }
        let offer = production.price().round();
        state.sales.scenario = SupplyDistributionScenario {
            not_served_index: not_served,
            cutoff_price: requests[cheapest].1.price().round(),
            flow_not_served: Flow::ZERO,
        };
        state.sales.sorted_requests = requests;
        return (production, offer);
    }

    // stopped at a request that cannot be served completely
    let request_price = requests[not_served].1.price();
    let mut cutoff = Price::nan();
    let mut flow_not_served = Flow::ZERO;
    if goal_marginal_costs_minus_price(
        production.quantity(),
        lambda_x_star,
        price_increase,
        minimal_production_price,
        request_price,
    )
    .round()
        < Price::new(0.0)
    {
        // a non-zero amount goes to the partially served request
        if goal_marginal_costs_minus_price(
            possible.quantity(),
            lambda_x_star,
            price_increase,
            minimal_production_price,
            request_price,
        )
        .round()
            < Price::new(0.0)
        {
            // price high enough to exhaust possible production
            flow_not_served =
                Flow::new(possible.quantity() - production.quantity(), request_price).round();
            cutoff = request_price;
        } else {
            let total_quantity = analytic_solution_in_production_extension(
                lambda_x_star,
                price_increase,
                minimal_production_price,
                request_price,
            );
            debug_assert!(total_quantity >= production.quantity());
            if total_quantity > production.quantity() {
                flow_not_served =
                    Flow::new(total_quantity - production.quantity(), request_price).round();
                cutoff = request_price;
            } else if not_served > 0 {
                cutoff = requests[not_served - 1].1.price();
            }
        }
        production = (production + flow_not_served).round();
        debug_assert!(production.quantity() <= possible.quantity());
    } else if not_served > 0 {
        cutoff = requests[not_served - 1].1.price();
    }

    state.sales.total_production_costs = total_production_costs(
        production,
        lambda_x_star,
        price_increase,
        minimal_production_price,
    );
    if production.quantity() > Quantity::new(0.0) {
        let offer = production.price().round();
        state.sales.scenario = SupplyDistributionScenario {
            not_served_index: not_served,
            cutoff_price: cutoff,
            flow_not_served,
        };
        state.sales.sorted_requests = requests;
        return (production, offer);
    }

    model.events.record(
        model.timestep(),
        EventKind::NoProductionHighCosts,
        Some(info.agent_index),
        None,
        f64::NAN,
    );
    state.sales.scenario = SupplyDistributionScenario {
        not_served_index: 0,
        cutoff_price: Price::nan(),
        flow_not_served: Flow::ZERO,
    };
    state.sales.sorted_requests = requests;
    (production, minimal_production_price)
}

/// CONSUMPTION_AND_PRODUCTION: push this tick's production onto the chains.
/// Requests priced clearly above the cutoff get their full quantity at their
/// own price; requests within the cheapest price range are prorated when the
/// residual production does not cover them.
pub fn distribute(model: &Model, info: &FirmInfo, forcing: Forcing, state: &mut FirmState) {
    let production = state.production;
    let requests = std::mem::take(&mut state.sales.sorted_requests);
    if production.quantity() <= Quantity::new(0.0) {
        for (c, _) in &requests {
            push_flow(model, &model.connections[c.0], Flow::ZERO);
        }
        state.sales.sorted_requests = requests;
        return;
    }

    let sector = &model.sectors[info.sector.0];
    debug_assert!(!state.sales.scenario.cutoff_price.is_nan());
    let cutoff = state.sales.scenario.cutoff_price;
    let half_width = if model.parameters.cheapest_price_range_generic_size {
        let beta = sector.parameters.possible_overcapacity_ratio;
        sector.parameters.price_increase_production_extension / 2.0 * (beta - 1.0) * (beta - 1.0)
            / beta
    } else {
        model.parameters.cheapest_price_range_width / 2.0
    };

    let mut begin_range = 0usize;
    let mut end_range = 0usize;
    let mut demand_range = Quantity::new(0.0);
    let mut demand_value_range = Value::new(0.0);
    let mut production_without_range = Flow::ZERO;
    for (i, (c, request)) in requests.iter().enumerate() {
        if request.quantity() > Quantity::new(0.0) {
            let distance = (request.price() - cutoff).round();
            if distance >= half_width {
                debug_assert!(request.quantity() <= production.quantity());
                push_flow(model, &model.connections[c.0], request.round());
                production_without_range += request.round();
                begin_range = i + 1;
            } else if distance.abs() < half_width {
                demand_range += request.quantity();
                demand_value_range += request.value();
                end_range = i + 1;
            } else {
                push_flow(model, &model.connections[c.0], Flow::ZERO);
            }
        } else {
            push_flow(model, &model.connections[c.0], Flow::ZERO);
        }
    }

    if begin_range < end_range {
        let production_range =
            (production.quantity() - production_without_range.quantity()).round();
        if demand_range > production_range {
            // the range cannot be fully served: prorate by value with a price
            // shift that balances quantity and value
            let max_price = cutoff + half_width;
            let min_price = cutoff - half_width;
            let average_price = demand_value_range / demand_range;
            let price_shift = Price::new(
                (max_price.get() * production_range.get()
                    - average_price.get() * demand_range.get())
                    / (demand_range.get() - production_range.get()),
            )
            .max(-min_price);
            let seller_price =
                (production.value() - production_without_range.value()) / production_range;

            state.sales.total_revenue = production_without_range.value();
            for (c, request) in requests.iter().take(end_range).skip(begin_range) {
                let quantity = Quantity::new(
                    production_range.get()
                        * (request.quantity().get() * price_shift.get() + request.value().get())
                        / (demand_range.get() * price_shift.get() + demand_value_range.get()),
                )
                .round();
                let price = if model.parameters.cheapest_price_range_preserve_seller_price {
                    seller_price
                } else {
                    request.price()
                };
                let flow = Flow::new(quantity, price);
                debug_assert!(flow.quantity() <= request.quantity());
                push_flow(model, &model.connections[c.0], flow);
                state.sales.total_revenue += flow.value();
            }
        } else {
            state.sales.total_revenue = production.value();
            for (c, request) in requests.iter().take(end_range).skip(begin_range) {
                debug_assert!(request.quantity() <= production.quantity());
                push_flow(model, &model.connections[c.0], request.round());
            }
        }
    } else {
        state.sales.total_revenue = production.value();
    }
    state.sales.sorted_requests = requests;
}

/// EXPECTATION: estimate next tick's possible production, run the expected
/// distribution (optionally extending the demand curve), publish the
/// communicated expectation and reset the demand accumulator. Returns the
/// demand sum the firm uses to set desired input flows.
pub fn iterate_expectation(
    model: &Model,
    info: &FirmInfo,
    forcing: Forcing,
    state: &mut FirmState,
) -> Demand {
    model.assert_step(super::IterationStep::Expectation);
    let mut estimated =
        capacity::estimate_possible_production(model, info, forcing, &state.sales, &state.storages);
    if estimated.quantity() > Quantity::new(0.0) {
        // tax is on revenue, so costs inflate by 1/(1-tax)
        estimated.set_price(estimated.price() / (1.0 - state.sales.tax));
    }
    state.sales.estimated_possible_production = estimated;

    let channel = &model.supply_channels[info.index.0];
    let sum_demand = channel.sum_demand.lock().unwrap().round();

    let (expected, offer) =
        calc_expected_supply_distribution_scenario(model, info, forcing, state, estimated, sum_demand);

    {
        let mut params = channel.params.write().unwrap();
        params.expected_production = expected;
        params.offer_price = offer;
    }
    *channel.sum_demand.lock().unwrap() = Demand::ZERO;
    sum_demand
}

fn calc_expected_supply_distribution_scenario(
    model: &Model,
    info: &FirmInfo,
    forcing: Forcing,
    state: &mut FirmState,
    possible: Flow,
    sum_demand: Demand,
) -> (Flow, Price) {
    let sector = &model.sectors[info.sector.0];
    let lambda_x_star = info.forced_baseline_production_quantity(forcing).get();
    let beta = sector.parameters.possible_overcapacity_ratio;
    let price_increase = sector.parameters.price_increase_production_extension;
    let elasticity = sector.parameters.supply_elasticity;
    let requests = state.sales.sorted_requests.clone();
    let first_zero = requests
        .iter()
        .position(|(_, d)| d.quantity() <= Quantity::new(0.0))
        .unwrap_or(requests.len());

    let minimal_production_price = possible.price().round();
    let minimal_offer_price = state.sales.minimal_offer_price(minimal_production_price);

    if possible.quantity() <= Quantity::new(0.0) {
        if forcing <= 0.0 {
            tracing::warn!(target: "expectation", agent = %model.agents[info.agent_index].name, "no expected production due to total forcing");
        } else {
            model.events.record(
                model.timestep(),
                EventKind::NoExpProductionSupplyShortage,
                Some(info.agent_index),
                None,
                f64::NAN,
            );
        }
        return (Flow::ZERO, Price::nan());
    }

    if first_zero == 0 || requests[0].1.price().round() < minimal_production_price {
        let kind = if first_zero == 0 {
            EventKind::NoExpProductionDemandQuantityShortage
        } else {
            EventKind::NoExpProductionDemandValueShortage
        };
        model.events.record(
            model.timestep(),
            kind,
            Some(info.agent_index),
            None,
            f64::NAN,
        );
        // communicate the least price production would run at
        let offer = minimal_production_price;
        let expected = Flow::new(
            Quantity::new(lambda_x_star).min(possible.quantity()),
            offer,
        );
        return (expected, offer);
    }

    let mut expected = Flow::ZERO;
    let mut not_served = first_zero;
    for (i, (_, request)) in requests.iter().enumerate().take(first_zero) {
        let with_request = (expected + *request).round();
        if with_request.quantity() > possible.quantity() {
            not_served = i;
            break;
        }
        let floor = if !model.parameters.respect_markup_in_production_extension
            || expected.quantity().get() < lambda_x_star
        {
            minimal_production_price
        } else {
            minimal_offer_price
        };
        let max_marginal = marginal_production_costs(
            with_request.quantity().get(),
            lambda_x_star,
            price_increase,
            floor,
        );
        if max_marginal.is_nan() || request.price().round() < max_marginal.round() {
            not_served = i;
            break;
        }
        expected += *request;
    }
    expected = expected.round();
    debug_assert!(expected.quantity() <= possible.quantity());

    if not_served == first_zero {
        // all requests would be served; optionally extend the demand curve
        let cheapest_price = requests[first_zero - 1].1.price();
        let extend = (model.parameters.always_extend_expected_demand_curve
            || expected.quantity().get() < lambda_x_star)
            && !model.parameters.naive_expectations;
        if extend
            && goal_marginal_costs_minus_marginal_revenue(
                expected.quantity(),
                lambda_x_star,
                price_increase,
                minimal_offer_price,
                cheapest_price,
                sum_demand.quantity(),
                elasticity,
            )
            .round()
                < Price::new(0.0)
        {
            let max_additional = (possible
                .quantity()
                .min(info.forced_maximal_production_quantity(forcing, beta))
                - expected.quantity())
            .round();
            let additional = if goal_marginal_costs_minus_marginal_revenue(
                (expected.quantity() + max_additional).round(),
                lambda_x_star,
                price_increase,
                minimal_offer_price,
                cheapest_price,
                sum_demand.quantity(),
                elasticity,
            )
            .round()
                < Price::new(0.0)
            {
                Flow::from_parts(
                    max_additional,
                    additional_revenue_expectation(
                        (expected.quantity() + max_additional).round(),
                        cheapest_price,
                        sum_demand.quantity(),
                        elasticity,
                    ),
                )
            } else {
                search_root_bisect_expectation(
                    Quantity::new(0.0),
                    max_additional,
                    expected.quantity(),
                    lambda_x_star,
                    price_increase,
                    minimal_offer_price,
                    cheapest_price,
                    sum_demand.quantity(),
                    elasticity,
                )
            };
            expected = (expected + additional).round();
        }
        let offer = expected
            .price()
            .max(
                total_production_costs(expected, lambda_x_star, price_increase, minimal_offer_price)
                    / expected.quantity(),
            )
            .round();
        debug_assert!(expected.quantity() <= possible.quantity());
        return (expected, offer);
    }

    // not all requests would be served completely
    let minimal_price = if !model.parameters.respect_markup_in_production_extension
        || expected.quantity().get() < lambda_x_star
    {
        minimal_production_price
    } else {
        minimal_offer_price
    };
    let request_price = requests[not_served].1.price();
    if goal_marginal_costs_minus_price(
        expected.quantity(),
        lambda_x_star,
        price_increase,
        minimal_price,
        request_price,
    )
    .round()
        < Price::new(0.0)
    {
        let flow_not_served = if goal_marginal_costs_minus_price(
            possible.quantity(),
            lambda_x_star,
            price_increase,
            minimal_price,
            request_price,
        )
        .round()
            < Price::new(0.0)
        {
            Flow::new(possible.quantity() - expected.quantity(), request_price).round()
        } else {
            let total_quantity = analytic_solution_in_production_extension(
                lambda_x_star,
                price_increase,
                minimal_price,
                request_price,
            );
            debug_assert!(total_quantity >= expected.quantity());
            if total_quantity > expected.quantity() {
                Flow::new(total_quantity - expected.quantity(), request_price)
            } else {
                Flow::ZERO
            }
        };
        expected = (expected + flow_not_served).round();
        debug_assert!(expected.quantity() <= possible.quantity());
    }
    if expected.quantity() > Quantity::new(0.0) {
        let offer = expected
            .price()
            .max(
                total_production_costs(expected, lambda_x_star, price_increase, minimal_offer_price)
                    / expected.quantity(),
            )
            .round();
        return (expected, offer);
    }
    model.events.record(
        model.timestep(),
        EventKind::NoExpProductionHighCosts,
        Some(info.agent_index),
        None,
        f64::NAN,
    );
    (expected, minimal_offer_price)
}

// --- expectation demand-curve extension ------------------------------------

/// Additional revenue when production extends beyond the served demand; for
/// X > ΣD the marginal revenue curve is `n_min · (ΣD/X)^ε`.
fn additional_revenue_expectation(
    quantity: Quantity,
    n_min: Price,
    sum_demand: Quantity,
    elasticity: Ratio,
) -> Value {
    debug_assert!(elasticity < 1.0);
    Value::new(
        n_min.get()
            * (quantity.get() * (sum_demand.get() / quantity.get()).powf(elasticity)
                - sum_demand.get())
            / (1.0 - elasticity),
    )
}

fn marginal_revenue_curve(
    quantity: Quantity,
    n_min: Price,
    sum_demand: Quantity,
    elasticity: Ratio,
) -> Price {
    debug_assert!(elasticity < 1.0);
    Price::new(n_min.get() * (sum_demand.get() / quantity.get()).powf(elasticity))
}

#[allow(clippy::too_many_arguments)]
fn goal_marginal_costs_minus_marginal_revenue(
    quantity: Quantity,
    lambda_x_star: FloatType,
    price_increase: Price,
    unit_production_costs: Price,
    n_min: Price,
    sum_demand: Quantity,
    elasticity: Ratio,
) -> Price {
    let rounded = quantity.round();
    marginal_production_costs(
        rounded.get(),
        lambda_x_star,
        price_increase,
        unit_production_costs,
    ) - marginal_revenue_curve(rounded, n_min, sum_demand, elasticity)
}

/// Bisection for marginal cost == marginal revenue on [left, right] around
/// the already-served production quantity.
#[allow(clippy::too_many_arguments)]
fn search_root_bisect_expectation(
    left: Quantity,
    right: Quantity,
    production: Quantity,
    lambda_x_star: FloatType,
    price_increase: Price,
    unit_production_costs: Price,
    n_min: Price,
    sum_demand: Quantity,
    elasticity: Ratio,
) -> Flow {
    debug_assert!(left < right);
    let goal = |q: Quantity| {
        goal_marginal_costs_minus_marginal_revenue(
            production + q,
            lambda_x_star,
            price_increase,
            unit_production_costs,
            n_min,
            sum_demand,
            elasticity,
        )
    };
    let revenue = |q: Quantity| {
        additional_revenue_expectation((production + q).round(), n_min, sum_demand, elasticity)
    };
    let precision = Price::new(Price::PRECISION);
    let mut left = left;
    let mut right = right;
    loop {
        if left + Quantity::new(Quantity::PRECISION) >= right {
            // interval too narrow: pick the better endpoint
            return if goal(left).abs() < goal(right).abs() {
                Flow::from_parts(left, revenue(left))
            } else {
                Flow::from_parts(right, revenue(right))
            };
        }
        let middle = (left + right) / 2.0;
        if goal(middle).abs() < precision {
            return Flow::from_parts(middle, revenue(middle));
        }
        if goal(left).abs() < precision {
            return Flow::from_parts(left, revenue(left));
        }
        if goal(right).abs() < precision {
            return Flow::from_parts(right, revenue(right));
        }
        if goal(middle).get().signum() != goal(right).get().signum() {
            left = middle;
        } else {
            right = middle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marginal_costs_flat_below_extension() {
        let n_c = Price::new(0.8);
        let mc = marginal_production_costs(0.5, 1.0, Price::new(1.0), n_c);
        assert_eq!(mc, n_c);
        let mc = marginal_production_costs(1.0, 1.0, Price::new(1.0), n_c);
        assert_eq!(mc, n_c);
    }

    #[test]
    fn marginal_costs_rise_linearly_above_extension() {
        let n_c = Price::new(0.8);
        let mc = marginal_production_costs(1.1, 1.0, Price::new(2.0), n_c);
        assert!((mc.get() - (0.8 + 2.0 * 0.1)).abs() < 1e-12);
    }

    #[test]
    fn analytic_solution_inverts_marginal_costs() {
        let lambda_x_star = 2.0;
        let price_increase = Price::new(1.5);
        let n_c = Price::new(0.7);
        let price = Price::new(1.0);
        let q = analytic_solution_in_production_extension(lambda_x_star, price_increase, n_c, price);
        let mc = marginal_production_costs(q.get(), lambda_x_star, price_increase, n_c);
        assert!((mc.get() - price.get()).abs() < 1e-3);
    }

    #[test]
    fn extension_penalty_is_quadratic() {
        let p1 = production_extension_penalty(1.1, 1.0, Price::new(1.0));
        let p2 = production_extension_penalty(1.2, 1.0, Price::new(1.0));
        assert!((p2 / p1 - 4.0).abs() < 1e-9);
        assert_eq!(production_extension_penalty(0.9, 1.0, Price::new(1.0)), 0.0);
    }

    #[test]
    fn sort_puts_empty_requests_last_and_prices_descending() {
        use crate::types::{Flow, Price, Quantity};
        let mk = |q: f64, p: f64| Flow::new(Quantity::new(q), Price::new(p));
        let mut requests = vec![
            (ConnectionId(0), mk(1.0, 0.9)),
            (ConnectionId(1), mk(0.0, 0.0)),
            (ConnectionId(2), mk(2.0, 1.2)),
            (ConnectionId(3), mk(3.0, 1.2)),
        ];
        sort_requests(&mut requests);
        assert_eq!(requests[0].0, ConnectionId(3)); // same price, larger qty first
        assert_eq!(requests[1].0, ConnectionId(2));
        assert_eq!(requests[2].0, ConnectionId(0));
        assert_eq!(requests[3].0, ConnectionId(1)); // empty last
    }

    #[test]
    fn marginal_revenue_declines_with_quantity() {
        let n_min = Price::new(1.0);
        let sum_d = Quantity::new(1.0);
        let mr1 = marginal_revenue_curve(Quantity::new(1.0), n_min, sum_d, 0.5);
        let mr2 = marginal_revenue_curve(Quantity::new(2.0), n_min, sum_d, 0.5);
        assert!(mr2 < mr1);
        assert!((mr1.get() - 1.0).abs() < 1e-12);
    }
}
