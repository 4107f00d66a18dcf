use crate::allocation::SourceAllocation;
use crate::allocator::{LayerSelection, UnitState};
use crate::config::AllocatorConfig;
use crate::constraints::VideoConstraints;
use crate::entity::{ParticipantId, SourceId};
use crate::media::{Layer, MediaSource};
use crate::settings::AllocationStrategy;

/// Allocation state of one video source during one allocation.
///
/// Holds the ranked layer ladder together with the ideal and preferred
/// indices. The mutable part of the allocation lives in [`UnitState`], so a
/// unit can be shared by every pass of the allocator.
#[derive(Clone, Debug)]
pub struct SourceAllocationUnit {
    participant_id: ParticipantId,
    source_id: SourceId,
    constraints: VideoConstraints,
    /// Ascending by bitrate.
    layers: Vec<Layer>,
    ideal_index: Option<usize>,
    preferred_index: Option<usize>,
}

impl SourceAllocationUnit {
    pub fn new(
        participant_id: ParticipantId,
        source: &MediaSource,
        constraints: VideoConstraints,
        strategy: AllocationStrategy,
        config: &AllocatorConfig,
    ) -> Self {
        let mut unit = Self {
            participant_id,
            source_id: source.id.clone(),
            constraints,
            layers: Vec::new(),
            ideal_index: None,
            preferred_index: None,
        };

        if constraints.is_disabled() {
            return unit;
        }

        let mut layers: Vec<Layer> = source
            .layers
            .iter()
            .filter(|l| l.height <= constraints.max_height)
            .filter(|l| constraints.max_frame_rate.is_none_or(|max| l.frame_rate <= max))
            .copied()
            .collect();
        layers.sort_by(|a, b| {
            a.bitrate_bps
                .cmp(&b.bitrate_bps)
                .then(a.height.cmp(&b.height))
                .then(a.frame_rate.total_cmp(&b.frame_rate))
        });

        let onstage = strategy == AllocationStrategy::StageView
            && constraints.ideal_height >= config.onstage_preferred_height;
        let preferred_height = config.onstage_preferred_height;

        if onstage {
            // Above the preferred resolution only full frame rate layers are worth
            // the bits.
            layers.retain(|l| {
                l.height < preferred_height || l.frame_rate >= config.onstage_preferred_frame_rate
            });
        }

        if layers.is_empty() {
            return unit;
        }

        let ideal_index = layers
            .iter()
            .rposition(|l| {
                l.height <= constraints.ideal_height
                    && constraints.ideal_frame_rate.is_none_or(|ideal| l.frame_rate <= ideal)
            })
            .unwrap_or(0);

        let preferred_index = if onstage {
            layers[..=ideal_index]
                .iter()
                .rposition(|l| l.height <= preferred_height)
                .unwrap_or(0)
        } else {
            0
        };

        unit.layers = layers;
        unit.ideal_index = Some(ideal_index);
        unit.preferred_index = Some(preferred_index);
        unit
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn constraints(&self) -> &VideoConstraints {
        &self.constraints
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn ideal_index(&self) -> Option<usize> {
        self.ideal_index
    }

    pub fn target_index(&self, state: &UnitState) -> Option<usize> {
        state.rated_target
    }

    fn layer_bitrate(&self, index: Option<usize>) -> u64 {
        index
            .and_then(|i| self.layers.get(i))
            .map_or(0, |l| l.bitrate_bps)
    }

    pub fn result(&self, state: &UnitState) -> SourceAllocation {
        let target_layer = state.rated_target.and_then(|i| self.layers.get(i)).copied();
        SourceAllocation {
            participant_id: self.participant_id.clone(),
            source_id: self.source_id.clone(),
            target_index: state.rated_target,
            ideal_index: self.ideal_index,
            target_layer,
            bitrate_bps: self.layer_bitrate(state.rated_target),
            ideal_bitrate_bps: self.layer_bitrate(self.ideal_index),
            oversending: state.oversending,
        }
    }
}

impl LayerSelection for SourceAllocationUnit {
    fn is_suppressed(&self) -> bool {
        self.constraints.is_disabled()
    }

    fn preferred_index(&self) -> Option<usize> {
        self.preferred_index
    }

    fn bitrate_bps(&self, state: &UnitState) -> i64 {
        i64::try_from(self.layer_bitrate(state.rated_target)).unwrap_or(i64::MAX)
    }

    fn improve(&self, state: UnitState, budget_bps: i64) -> UnitState {
        let Some(ideal_index) = self.ideal_index else {
            return state;
        };

        let affordable = self.layers[..=ideal_index]
            .iter()
            .rposition(|l| i64::try_from(l.bitrate_bps).is_ok_and(|bps| bps <= budget_bps));

        match affordable {
            Some(index) if Some(index) >= state.rated_target => UnitState {
                rated_target: Some(index),
                oversending: false,
            },
            _ => state,
        }
    }

    fn force_lowest(&self) -> Option<UnitState> {
        if self.layers.is_empty() {
            return None;
        }
        Some(UnitState {
            rated_target: Some(0),
            oversending: true,
        })
    }
}
