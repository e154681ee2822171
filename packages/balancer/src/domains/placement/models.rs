//! Core types for executor placement.

use std::fmt;

use anyhow::{Context, Result};

/// Capacity classes an executor can land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityType {
    OnDemand,
    Spot,
}

impl CapacityType {
    /// Node-selector value for this capacity type.
    pub fn as_label_value(&self) -> &'static str {
        match self {
            CapacityType::OnDemand => "on-demand",
            CapacityType::Spot => "spot",
        }
    }

    pub fn from_label_value(value: &str) -> Option<Self> {
        match value {
            "on-demand" => Some(CapacityType::OnDemand),
            "spot" => Some(CapacityType::Spot),
            _ => None,
        }
    }
}

impl fmt::Display for CapacityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label_value())
    }
}

/// Per-job live executor counts by capacity type.
///
/// Stored as the compact record `<on_demand>:<spot>`. A missing record
/// reads as `(0, 0)`; a malformed one is reset to `(0, 0)` by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorCount {
    pub on_demand: u64,
    pub spot: u64,
}

impl ExecutorCount {
    pub fn new(on_demand: u64, spot: u64) -> Self {
        Self { on_demand, spot }
    }

    pub fn total(&self) -> u64 {
        self.on_demand + self.spot
    }

    pub fn increment(&mut self, capacity: CapacityType) {
        match capacity {
            CapacityType::OnDemand => self.on_demand += 1,
            CapacityType::Spot => self.spot += 1,
        }
    }

    /// Decrement one side, clamping at zero. Returns `false` when the count
    /// was already zero (a delete for an admission the balancer never saw).
    pub fn decrement_clamped(&mut self, capacity: CapacityType) -> bool {
        let count = match capacity {
            CapacityType::OnDemand => &mut self.on_demand,
            CapacityType::Spot => &mut self.spot,
        };
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.on_demand, self.spot)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let (on_demand, spot) = raw
            .split_once(':')
            .with_context(|| format!("counter record {raw:?} is missing its delimiter"))?;
        Ok(Self {
            on_demand: on_demand
                .parse()
                .with_context(|| format!("bad on-demand count in record {raw:?}"))?,
            spot: spot
                .parse()
                .with_context(|| format!("bad spot count in record {raw:?}"))?,
        })
    }
}

impl fmt::Display for ExecutorCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(on-demand={}, spot={})", self.on_demand, self.spot)
    }
}

/// Outcome of one admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// `None` means unlabeled: no capacity selector is applied and no
    /// state was kept (best-effort mode).
    pub capacity: Option<CapacityType>,
    /// Counts after the decision was recorded.
    pub counts: ExecutorCount,
}
