//! Compares the consumption implied by the taken reading against the mean of
//! the other monthly consumptions on record.

use crate::record::{HistorySlots, SLOT_COUNT};

/// Outcome of comparing the implied consumption with its history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumptionAssessment {
    /// Slot (1-based) that holds the taken reading.
    pub slot: usize,
    pub consumption: f64,
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ConsumptionAssessment {
    pub fn within_band(&self) -> bool {
        self.consumption >= self.lower && self.consumption <= self.upper
    }
}

/// Consumption for each slot `n` in `1..SLOT_COUNT`: slot `n` minus the
/// next-older slot, when both are present.
pub fn monthly_consumptions(values: &[Option<f64>; SLOT_COUNT]) -> [Option<f64>; SLOT_COUNT - 1] {
    std::array::from_fn(|idx| match (values[idx], values[idx + 1]) {
        (Some(newer), Some(older)) => Some(newer - older),
        _ => None,
    })
}

/// Returns `None` whenever the history cannot support a verdict: no taken
/// value, fewer than two other readings, a non-descending history, a taken
/// value not found in the slots, or no valid consumption to average.
pub fn assess_consumption(
    slots: &HistorySlots,
    taken: Option<f64>,
    billed: Option<f64>,
    tolerance: f64,
) -> Option<ConsumptionAssessment> {
    let taken = taken?;
    let values = slots.values();

    let sequence: Vec<f64> = values
        .iter()
        .flatten()
        .copied()
        .filter(|v| *v != taken && Some(*v) != billed)
        .collect();
    if sequence.len() < 2 {
        return None;
    }
    if sequence.windows(2).any(|pair| pair[0] <= pair[1]) {
        return None;
    }

    let slot = slots.position_of(taken)?;
    let consumptions = monthly_consumptions(&values);
    let current = consumptions.get(slot - 1).copied().flatten()?.abs();

    let others: Vec<f64> = consumptions
        .iter()
        .enumerate()
        .filter(|(idx, _)| idx + 1 != slot)
        .filter_map(|(_, c)| *c)
        .filter(|c| *c > 0.0)
        .map(f64::abs)
        .collect();
    if others.is_empty() {
        return None;
    }

    let mean = others.iter().sum::<f64>() / others.len() as f64;

    Some(ConsumptionAssessment {
        slot,
        consumption: current,
        mean,
        lower: mean * (1.0 - tolerance),
        upper: mean * (1.0 + tolerance),
    })
}
