//! Dimensioned quantity algebra.
//!
//! Every economic scalar in the engine carries its dimension as a newtype:
//! [`Price`] (value per unit), [`Quantity`] (units per time step), [`Value`]
//! (price × quantity), [`Time`]. All comparisons that drive control flow are
//! made on *rounded* values — each type has a `PRECISION` and an idempotent
//! `round()` that coarsens to it. [`Flow`] couples a quantity with a value at
//! flow (per-Δt) resolution; [`Stock`] is the same shape at stock resolution.

use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

pub type FloatType = f64;

/// Dimensionless ratio (shares, elasticities, capacity factors).
pub type Ratio = FloatType;

/// Scenario forcing: nonnegative capacity multiplier, 1.0 = nominal.
/// For geographic passage, -1.0 denotes "uncapped".
pub type Forcing = FloatType;

/// Queue length of a transport chain link, in time steps.
pub type TransportDelay = usize;

pub type TimeStep = u64;

macro_rules! scalar_unit {
    ($name:ident, $precision:expr) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(FloatType);

        impl $name {
            pub const PRECISION: FloatType = $precision;

            #[inline]
            pub const fn new(v: FloatType) -> Self {
                Self(v)
            }

            #[inline]
            pub const fn get(self) -> FloatType {
                self.0
            }

            /// Idempotent coarsening to the type's precision.
            #[inline]
            pub fn round(self) -> Self {
                Self((self.0 / Self::PRECISION).round() * Self::PRECISION)
            }

            #[inline]
            pub fn is_nan(self) -> bool {
                self.0.is_nan()
            }

            #[inline]
            pub fn nan() -> Self {
                Self(FloatType::NAN)
            }

            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            #[inline]
            pub fn max(self, other: Self) -> Self {
                Self(self.0.max(other.0))
            }

            #[inline]
            pub fn min(self, other: Self) -> Self {
                Self(self.0.min(other.0))
            }
        }

        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                Self(-self.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl SubAssign for $name {
            fn sub_assign(&mut self, rhs: Self) {
                self.0 -= rhs.0;
            }
        }

        impl Mul<FloatType> for $name {
            type Output = Self;
            fn mul(self, rhs: FloatType) -> Self {
                Self(self.0 * rhs)
            }
        }

        impl Mul<$name> for FloatType {
            type Output = $name;
            fn mul(self, rhs: $name) -> $name {
                $name(self * rhs.0)
            }
        }

        impl Div<FloatType> for $name {
            type Output = Self;
            fn div(self, rhs: FloatType) -> Self {
                Self(self.0 / rhs)
            }
        }

        impl Div<$name> for $name {
            type Output = FloatType;
            fn div(self, rhs: $name) -> FloatType {
                self.0 / rhs.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:.4}", self.0)
            }
        }
    };
}

scalar_unit!(Price, 1e-6);
scalar_unit!(Quantity, 1e-3);
scalar_unit!(Value, 1e-6);
scalar_unit!(Time, 1e-6);

impl Mul<Quantity> for Price {
    type Output = Value;
    fn mul(self, rhs: Quantity) -> Value {
        Value(self.0 * rhs.0)
    }
}

impl Mul<Price> for Quantity {
    type Output = Value;
    fn mul(self, rhs: Price) -> Value {
        Value(self.0 * rhs.0)
    }
}

impl Div<Quantity> for Value {
    type Output = Price;
    fn div(self, rhs: Quantity) -> Price {
        Price(self.0 / rhs.0)
    }
}

impl Div<Price> for Value {
    type Output = Quantity;
    fn div(self, rhs: Price) -> Quantity {
        Quantity(self.0 / rhs.0)
    }
}

/// A goods flow at per-time-step resolution: a quantity plus the value it is
/// traded at. The unit price is the derived `value / quantity` and is NaN for
/// a zero flow — callers gate on `quantity > 0` before consuming prices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    quantity: Quantity,
    value: Value,
}

/// A demand request is a flow annotated with the price the buyer offers.
pub type Demand = Flow;

impl Flow {
    pub const ZERO: Flow = Flow {
        quantity: Quantity::new(0.0),
        value: Value::new(0.0),
    };

    #[inline]
    pub fn new(quantity: Quantity, price: Price) -> Self {
        Self {
            quantity,
            value: quantity * price,
        }
    }

    #[inline]
    pub fn from_parts(quantity: Quantity, value: Value) -> Self {
        Self { quantity, value }
    }

    /// Flow with unit price 1, the baseline normalization.
    #[inline]
    pub fn with_unit_price(quantity: Quantity) -> Self {
        Self {
            quantity,
            value: Value::new(quantity.get()),
        }
    }

    #[inline]
    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    #[inline]
    pub fn value(&self) -> Value {
        self.value
    }

    /// NaN when the flow is empty.
    #[inline]
    pub fn price(&self) -> Price {
        self.value / self.quantity
    }

    #[inline]
    pub fn set_price(&mut self, price: Price) {
        self.value = self.quantity * price;
    }

    #[inline]
    pub fn round(self) -> Self {
        Self {
            quantity: self.quantity.round(),
            value: self.value.round(),
        }
    }

    /// Component-wise scaling, price preserved.
    #[inline]
    pub fn scaled_by(self, ratio: Ratio) -> Self {
        Self {
            quantity: self.quantity * ratio,
            value: self.value * ratio,
        }
    }
}

impl Add for Flow {
    type Output = Flow;
    fn add(self, rhs: Flow) -> Flow {
        Flow {
            quantity: self.quantity + rhs.quantity,
            value: self.value + rhs.value,
        }
    }
}

impl Sub for Flow {
    type Output = Flow;
    fn sub(self, rhs: Flow) -> Flow {
        Flow {
            quantity: self.quantity - rhs.quantity,
            value: self.value - rhs.value,
        }
    }
}

impl AddAssign for Flow {
    fn add_assign(&mut self, rhs: Flow) {
        self.quantity += rhs.quantity;
        self.value += rhs.value;
    }
}

impl SubAssign for Flow {
    fn sub_assign(&mut self, rhs: Flow) {
        self.quantity -= rhs.quantity;
        self.value -= rhs.value;
    }
}

impl Mul<Time> for Flow {
    type Output = Stock;
    fn mul(self, dt: Time) -> Stock {
        Stock {
            quantity: self.quantity * dt.get(),
            value: self.value * dt.get(),
        }
    }
}

/// Magnitude of the component-wise difference of two flows.
pub fn absdiff(a: Flow, b: Flow) -> Flow {
    Flow {
        quantity: (a.quantity - b.quantity).abs(),
        value: (a.value - b.value).abs(),
    }
}

/// Stored goods: quantity and value at stock (not per-Δt) resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    quantity: Quantity,
    value: Value,
}

impl Stock {
    pub const ZERO: Stock = Stock {
        quantity: Quantity::new(0.0),
        value: Value::new(0.0),
    };

    #[inline]
    pub fn new(quantity: Quantity, price: Price) -> Self {
        Self {
            quantity,
            value: quantity * price,
        }
    }

    #[inline]
    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    #[inline]
    pub fn value(&self) -> Value {
        self.value
    }

    #[inline]
    pub fn price(&self) -> Price {
        self.value / self.quantity
    }

    #[inline]
    pub fn set_price(&mut self, price: Price) {
        self.value = self.quantity * price;
    }

    #[inline]
    pub fn round(self) -> Self {
        Self {
            quantity: self.quantity.round(),
            value: self.value.round(),
        }
    }

    #[inline]
    pub fn scaled_by(self, ratio: Ratio) -> Self {
        Self {
            quantity: self.quantity * ratio,
            value: self.value * ratio,
        }
    }
}

impl Add for Stock {
    type Output = Stock;
    fn add(self, rhs: Stock) -> Stock {
        Stock {
            quantity: self.quantity + rhs.quantity,
            value: self.value + rhs.value,
        }
    }
}

impl Sub for Stock {
    type Output = Stock;
    fn sub(self, rhs: Stock) -> Stock {
        Stock {
            quantity: self.quantity - rhs.quantity,
            value: self.value - rhs.value,
        }
    }
}

impl AddAssign for Stock {
    fn add_assign(&mut self, rhs: Stock) {
        self.quantity += rhs.quantity;
        self.value += rhs.value;
    }
}

impl Div<Time> for Stock {
    type Output = Flow;
    fn div(self, dt: Time) -> Flow {
        Flow {
            quantity: self.quantity / dt.get(),
            value: self.value / dt.get(),
        }
    }
}

/// A flow traveling a transport chain, annotated with the baseline quantity
/// of the cell it occupies so per-link forcing can cap against baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedFlow {
    pub current: Flow,
    pub baseline: Quantity,
}

impl AnnotatedFlow {
    pub fn new(current: Flow, baseline: Quantity) -> Self {
        Self { current, baseline }
    }

    pub fn deficit(&self) -> Quantity {
        self.baseline - self.current.quantity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_is_idempotent() {
        let q = Quantity::new(1.23456789);
        assert_eq!(q.round(), q.round().round());
        assert_eq!(q.round().get(), 1.235);

        let p = Price::new(0.123456789);
        assert_eq!(p.round(), p.round().round());
    }

    #[test]
    fn round_half_goes_up() {
        assert_eq!(Quantity::new(0.0015).round().get(), 0.002);
        assert_eq!(Quantity::new(-0.0015).round().get(), -0.002);
    }

    #[test]
    fn flow_price_is_value_over_quantity() {
        let f = Flow::new(Quantity::new(2.0), Price::new(3.0));
        assert_eq!(f.value().get(), 6.0);
        assert_eq!(f.price().get(), 3.0);
    }

    #[test]
    fn zero_flow_has_nan_price() {
        assert!(Flow::ZERO.price().is_nan());
    }

    #[test]
    fn flow_arithmetic_keeps_value_consistent() {
        let a = Flow::new(Quantity::new(1.0), Price::new(2.0));
        let b = Flow::new(Quantity::new(3.0), Price::new(1.0));
        let sum = a + b;
        assert_eq!(sum.quantity().get(), 4.0);
        assert_eq!(sum.value().get(), 5.0);
        assert!((sum.price().get() - 1.25).abs() < 1e-12);
    }

    #[test]
    fn stock_flow_conversion() {
        let dt = Time::new(1.0 / 365.0);
        let f = Flow::new(Quantity::new(365.0), Price::new(1.0));
        let s = f * dt;
        assert!((s.quantity().get() - 1.0).abs() < 1e-12);
        let back = s / dt;
        assert!((back.quantity().get() - 365.0).abs() < 1e-9);
    }

    #[test]
    fn absdiff_is_componentwise_magnitude() {
        let a = Flow::new(Quantity::new(1.0), Price::new(1.0));
        let b = Flow::new(Quantity::new(3.0), Price::new(1.0));
        let d = absdiff(a, b);
        assert_eq!(d.quantity().get(), 2.0);
        assert_eq!(d.value().get(), 2.0);
    }
}
