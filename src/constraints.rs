use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::AllocatorConfig;
use crate::entity::ParticipantId;
use crate::media::ParticipantSources;
use crate::settings::{AllocationSettings, AllocationStrategy};

/// Upper bounds a receiver is willing or able to display for one participant.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub ideal_height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ideal_frame_rate: Option<f64>,
    pub max_height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frame_rate: Option<f64>,
}

impl VideoConstraints {
    pub fn new(height: u32) -> Self {
        Self {
            ideal_height: height,
            ideal_frame_rate: None,
            max_height: height,
            max_frame_rate: None,
        }
    }

    pub fn thumbnail(max_height: u32) -> Self {
        Self::new(max_height)
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn with_max_frame_rate(mut self, frame_rate: f64) -> Self {
        self.max_frame_rate = Some(frame_rate);
        self
    }

    pub fn with_ideal_frame_rate(mut self, frame_rate: f64) -> Self {
        self.ideal_frame_rate = Some(frame_rate);
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.max_height == 0
    }
}

pub type EffectiveConstraints = BTreeMap<ParticipantId, VideoConstraints>;

/// Orders the conference members for one receiver: selected participants first, in
/// the order they were selected, followed by everybody else in speaker order.
///
/// Members missing from `order` are dropped, as are ids in `order` without a
/// matching member.
pub fn prioritize(
    order: &[ParticipantId],
    selected: &[ParticipantId],
    members: Vec<ParticipantSources>,
) -> Vec<ParticipantSources> {
    let mut members: BTreeMap<ParticipantId, ParticipantSources> =
        members.into_iter().map(|m| (m.id.clone(), m)).collect();

    let in_order: HashSet<&ParticipantId> = order.iter().collect();
    let mut prioritized = Vec::with_capacity(members.len());

    for id in selected.iter().filter(|id| in_order.contains(id)) {
        if let Some(member) = members.remove(id) {
            prioritized.push(member);
        }
    }

    for id in order {
        if let Some(member) = members.remove(id) {
            prioritized.push(member);
        }
    }

    prioritized
}

/// Applies last-n and selection overrides on top of the raw receiver constraints.
pub trait ConstraintsPolicy: Send + Sync {
    fn effective_constraints(
        &self,
        ordered: &[ParticipantSources],
        settings: &AllocationSettings,
    ) -> EffectiveConstraints;
}

/// Default policy.
///
/// Participants with explicit constraints (or selected ones in stage view) claim
/// last-n slots first, in priority order. Remaining slots go to the rest as
/// thumbnails. Everybody outside last-n is disabled.
#[derive(Clone, Copy, Debug)]
pub struct LastNPolicy {
    thumbnail_max_height: u32,
    onstage_ideal_height: u32,
}

impl Default for LastNPolicy {
    fn default() -> Self {
        Self::from_config(&AllocatorConfig::default())
    }
}

impl LastNPolicy {
    pub fn from_config(config: &AllocatorConfig) -> Self {
        Self {
            thumbnail_max_height: config.thumbnail_max_height,
            onstage_ideal_height: config.onstage_ideal_height,
        }
    }

    fn explicit(
        &self,
        id: &ParticipantId,
        settings: &AllocationSettings,
    ) -> Option<VideoConstraints> {
        if let Some(constraints) = settings.video_constraints.get(id) {
            return Some(*constraints);
        }

        if settings.strategy == AllocationStrategy::StageView
            && settings.selected_participants.contains(id)
        {
            return Some(VideoConstraints::new(self.onstage_ideal_height));
        }

        None
    }
}

impl ConstraintsPolicy for LastNPolicy {
    fn effective_constraints(
        &self,
        ordered: &[ParticipantSources],
        settings: &AllocationSettings,
    ) -> EffectiveConstraints {
        let mut slots = settings.last_n().unwrap_or(usize::MAX);
        let mut effective = EffectiveConstraints::new();

        let mut take_slot = |constraints: VideoConstraints| {
            if constraints.is_disabled() {
                return constraints;
            }
            if slots == 0 {
                return VideoConstraints::disabled();
            }
            slots -= 1;
            constraints
        };

        let (explicit, implicit): (Vec<_>, Vec<_>) = ordered
            .iter()
            .map(|member| (&member.id, self.explicit(&member.id, settings)))
            .partition(|(_, constraints)| constraints.is_some());

        for (id, constraints) in explicit {
            if let Some(constraints) = constraints {
                effective.insert(id.clone(), take_slot(constraints));
            }
        }

        for (id, _) in implicit {
            let thumbnail = VideoConstraints::thumbnail(self.thumbnail_max_height);
            effective.insert(id.clone(), take_slot(thumbnail));
        }

        effective
    }
}
