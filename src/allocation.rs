use std::collections::BTreeMap;

use serde::Serialize;

use crate::entity::{ParticipantId, SourceId};
use crate::media::Layer;

/// Outcome of one allocation for one video source.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceAllocation {
    pub participant_id: ParticipantId,
    pub source_id: SourceId,
    /// Index into the source's ranked ladder, `None` when the source is not forwarded.
    pub target_index: Option<usize>,
    pub ideal_index: Option<usize>,
    pub target_layer: Option<Layer>,
    pub bitrate_bps: u64,
    pub ideal_bitrate_bps: u64,
    pub oversending: bool,
}

impl SourceAllocation {
    pub fn is_forwarded(&self) -> bool {
        self.target_index.is_some()
    }
}

/// Per-source results of one allocation, highest priority first.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Allocation {
    sources: Vec<SourceAllocation>,
}

impl Allocation {
    pub fn new(sources: Vec<SourceAllocation>) -> Self {
        Self { sources }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn sources(&self) -> &[SourceAllocation] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, participant_id: &ParticipantId) -> Option<&SourceAllocation> {
        self.sources
            .iter()
            .find(|s| &s.participant_id == participant_id)
    }

    pub fn forwarded_count(&self) -> usize {
        self.sources.iter().filter(|s| s.is_forwarded()).count()
    }

    /// Participants with at least one forwarded source, in priority order.
    pub fn forwarded_participants(&self) -> Vec<ParticipantId> {
        let mut forwarded: Vec<ParticipantId> = Vec::new();
        for source in self.sources.iter().filter(|s| s.is_forwarded()) {
            if !forwarded.contains(&source.participant_id) {
                forwarded.push(source.participant_id.clone());
            }
        }
        forwarded
    }

    pub fn target_bps(&self) -> u64 {
        self.sources.iter().map(|s| s.bitrate_bps).sum()
    }

    pub fn ideal_bps(&self) -> u64 {
        self.sources.iter().map(|s| s.ideal_bitrate_bps).sum()
    }

    pub fn is_oversending(&self) -> bool {
        self.sources.iter().any(|s| s.oversending)
    }

    /// Compares the per-source results regardless of priority order.
    pub fn is_same_as(&self, other: &Allocation) -> bool {
        if self.sources.len() != other.sources.len() {
            return false;
        }

        let keyed = |allocation: &Allocation| {
            allocation
                .sources
                .iter()
                .map(|s| ((s.participant_id.clone(), s.source_id.clone()), s.clone()))
                .collect::<BTreeMap<_, _>>()
        };
        keyed(self) == keyed(other)
    }
}
