//! Transport chain links: per-link delay queues with forcing-limited
//! throughput.
//!
//! A link holds a ring buffer of length `baseline_delay`; pushing advances
//! the queue by one cell and releases the front, capped at `forcing × the
//! cell's baseline` unless forcing is -1 (uncapped). Capped excess stays in
//! `overflow` and rides along with the next tick's front.

use serde::{Deserialize, Serialize};

use super::geo::GeoEntityRef;
use crate::types::{AnnotatedFlow, Flow, Forcing, Quantity, TransportDelay};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportChainLink {
    pub baseline_delay: TransportDelay,
    /// Ring buffer of in-flight flows; empty for an immediate link.
    pub queue: Vec<AnnotatedFlow>,
    pub pos: usize,
    pub overflow: Flow,
    pub outflow: Flow,
    /// -1.0 means uncapped; otherwise the throughput cap relative to the
    /// passing cell's baseline.
    pub forcing: Forcing,
    pub geo: Option<GeoEntityRef>,
}

impl TransportChainLink {
    /// New link with its queue filled with the baseline flow, so the chain
    /// delivers baseline from the first tick.
    pub fn new(delay: TransportDelay, baseline_flow: Flow, geo: Option<GeoEntityRef>) -> Self {
        Self {
            baseline_delay: delay,
            queue: vec![AnnotatedFlow::new(baseline_flow, baseline_flow.quantity()); delay],
            pos: 0,
            overflow: Flow::ZERO,
            outflow: Flow::ZERO,
            forcing: -1.0,
            geo,
        }
    }

    /// Advances the queue by one cell. Returns the flow leaving this link
    /// together with the baseline annotation of the cell it came from.
    pub fn push(&mut self, flow: Flow, baseline: Quantity) -> (Flow, Quantity) {
        let front = if self.queue.is_empty() {
            // Zero-delay link: the push degenerates into a forcing-limited cap.
            AnnotatedFlow::new(flow, baseline)
        } else {
            let front = self.queue[self.pos];
            self.queue[self.pos] = AnnotatedFlow::new(flow, baseline);
            self.pos = (self.pos + 1) % self.queue.len();
            front
        };
        let uncapped = self.overflow + front.current;
        self.outflow = if self.forcing < 0.0 {
            uncapped
        } else {
            let cap = self.forcing * front.baseline;
            if uncapped.quantity() > cap {
                Flow::new(cap, uncapped.price())
            } else {
                uncapped
            }
        };
        self.overflow = uncapped - self.outflow;
        (self.outflow, front.baseline)
    }

    pub fn transport_delay(&self) -> TransportDelay {
        self.queue.len()
    }

    /// Everything currently held by this link: queue plus overflow.
    pub fn total_flow(&self) -> Flow {
        self.queue
            .iter()
            .fold(self.overflow, |acc, cell| acc + cell.current)
    }

    pub fn flow_deficit(&self) -> Quantity {
        let queued: Quantity = self
            .queue
            .iter()
            .fold(Quantity::new(0.0), |acc, cell| acc + cell.deficit().round());
        (queued - self.overflow.quantity()).round()
    }

    /// Sum of |current − baseline| over queue cells.
    pub fn disequilibrium(&self) -> Quantity {
        self.queue
            .iter()
            .fold(Quantity::new(0.0), |acc, cell| acc + cell.deficit().abs())
    }

    pub fn stddeviation(&self) -> f64 {
        self.queue.iter().fold(0.0, |acc, cell| {
            let d = cell.deficit().get();
            acc + d * d
        })
    }
}
