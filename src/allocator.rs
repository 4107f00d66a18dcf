use crate::allocation::Allocation;
use crate::config::AllocatorConfig;
use crate::source::SourceAllocationUnit;

/// Selection state of one unit within one pass.
///
/// `rated_target == None` means the source is not forwarded. `None` orders below
/// every layer index, so `rated_target < preferred_index` reads as expected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnitState {
    pub rated_target: Option<usize>,
    pub oversending: bool,
}

impl UnitState {
    pub fn is_forwarded(&self) -> bool {
        self.rated_target.is_some()
    }
}

/// What the allocator needs from a per-source unit.
///
/// Implementations must keep index order equal to bitrate order, and `improve`
/// must never return a lower index than it was given.
pub trait LayerSelection {
    /// Receiver constraints cap this source to nothing.
    fn is_suppressed(&self) -> bool;

    fn preferred_index(&self) -> Option<usize>;

    fn bitrate_bps(&self, state: &UnitState) -> i64;

    fn improve(&self, state: UnitState, budget_bps: i64) -> UnitState;

    /// Lowest layer with `oversending` set, `None` when there is nothing to force.
    fn force_lowest(&self) -> Option<UnitState>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationOutcome {
    pub states: Vec<UnitState>,
    pub passes: usize,
    pub rolled_back: bool,
    /// Budget left unallocated, negative when oversending.
    pub remaining_bps: i64,
}

impl AllocationOutcome {
    pub fn forwarded_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_forwarded()).count()
    }

    pub fn into_allocation(self, units: &[SourceAllocationUnit]) -> Allocation {
        Allocation::new(
            units
                .iter()
                .zip(self.states.iter())
                .map(|(unit, state)| unit.result(state))
                .collect(),
        )
    }
}

/// Greedy priority waterfall over a shared bitrate budget.
#[derive(Clone, Copy, Debug)]
pub struct Allocator {
    force_forward_top_priority: bool,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Allocator {
    pub fn new(force_forward_top_priority: bool) -> Self {
        Self {
            force_forward_top_priority,
        }
    }

    pub fn from_config(config: &AllocatorConfig) -> Self {
        Self::new(config.force_forward_top_priority)
    }

    /// Runs passes over `units` (highest priority first) until the remaining
    /// budget settles.
    ///
    /// Every pass builds a new state array from the previous one. A pass that
    /// ends up forwarding fewer sources than the one before it is discarded and
    /// the loop stops, so the forwarded count never drops within one call.
    pub fn allocate<L: LayerSelection>(&self, budget_bps: i64, units: &[L]) -> AllocationOutcome {
        let mut outcome = AllocationOutcome {
            states: vec![UnitState::default(); units.len()],
            passes: 0,
            rolled_back: false,
            remaining_bps: budget_bps,
        };

        if units.is_empty() {
            return outcome;
        }

        let mut previous_forwarded = 0;
        let mut previous_remaining = None;

        while previous_remaining != Some(outcome.remaining_bps) {
            previous_remaining = Some(outcome.remaining_bps);
            outcome.passes += 1;

            let (states, remaining) = self.pass(outcome.remaining_bps, units, &outcome.states);
            let forwarded = states.iter().filter(|s| s.is_forwarded()).count();

            tracing::trace!(
                pass = outcome.passes,
                forwarded,
                previous_forwarded,
                remaining,
                "allocation pass"
            );

            if forwarded < previous_forwarded {
                tracing::debug!(
                    pass = outcome.passes,
                    forwarded,
                    previous_forwarded,
                    "forwarded count dropped, keeping previous pass"
                );
                outcome.rolled_back = true;
                break;
            }

            previous_forwarded = forwarded;
            outcome.states = states;
            outcome.remaining_bps = remaining;
        }

        metrics::histogram!("allocator_passes").record(outcome.passes as f64);
        if outcome.rolled_back {
            metrics::counter!("allocator_rollbacks_total").increment(1);
        }

        outcome
    }

    fn pass<L: LayerSelection>(
        &self,
        mut remaining: i64,
        units: &[L],
        previous: &[UnitState],
    ) -> (Vec<UnitState>, i64) {
        let mut states = previous.to_vec();

        for (i, unit) in units.iter().enumerate() {
            if unit.is_suppressed() {
                continue;
            }

            remaining = remaining.saturating_add(unit.bitrate_bps(&states[i]));
            let mut state = unit.improve(states[i], remaining);

            if i == 0 && !state.is_forwarded() && self.force_forward_top_priority {
                if let Some(forced) = unit.force_lowest() {
                    state = forced;
                }
            }

            remaining = remaining.saturating_sub(unit.bitrate_bps(&state));
            states[i] = state;

            if state.rated_target < unit.preferred_index() {
                break;
            }
        }

        (states, remaining)
    }
}
