use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constraints::VideoConstraints;
use crate::entity::ParticipantId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// One participant on stage, everybody else as thumbnails.
    #[default]
    StageView,
    /// Every participant in an evenly sized tile.
    TileView,
}

/// Receiver controlled allocation settings.
///
/// A snapshot is never mutated once installed, the controller swaps in a new
/// one instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationSettings {
    pub strategy: AllocationStrategy,
    pub selected_participants: Vec<ParticipantId>,
    pub video_constraints: BTreeMap<ParticipantId, VideoConstraints>,
    /// Cap on forwarded participants, negative means unlimited.
    pub last_n: i32,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            strategy: AllocationStrategy::default(),
            selected_participants: Vec::new(),
            video_constraints: BTreeMap::new(),
            last_n: -1,
        }
    }
}

impl AllocationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_selected(mut self, selected: Vec<ParticipantId>) -> Self {
        self.selected_participants = selected;
        self
    }

    pub fn with_constraints(mut self, id: ParticipantId, constraints: VideoConstraints) -> Self {
        self.video_constraints.insert(id, constraints);
        self
    }

    pub fn with_last_n(mut self, last_n: i32) -> Self {
        self.last_n = last_n;
        self
    }

    pub fn last_n(&self) -> Option<usize> {
        usize::try_from(self.last_n).ok()
    }

    /// Compact JSON rendering used in debug output.
    pub fn summary(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| format!("<unserializable: {err}>"))
    }
}

/// Adapts the older selection signaling, a list of selected participants plus
/// one max frame height for all of them, into strategy and constraints.
///
/// More than one selected participant means tile view: every selected
/// participant gets the same capped constraints and none of them is moved
/// ahead of the speaker order.
#[derive(Clone, Debug)]
pub struct SelectionSignaling {
    onstage_ideal_height: u32,
    max_frame_height: u32,
    selected: Vec<ParticipantId>,

    strategy: AllocationStrategy,
    selected_participants: Vec<ParticipantId>,
    video_constraints: BTreeMap<ParticipantId, VideoConstraints>,
}

impl SelectionSignaling {
    pub fn new(onstage_ideal_height: u32) -> Self {
        Self {
            onstage_ideal_height,
            max_frame_height: u32::MAX,
            selected: Vec::new(),
            strategy: AllocationStrategy::default(),
            selected_participants: Vec::new(),
            video_constraints: BTreeMap::new(),
        }
    }

    /// Returns whether the derived settings changed.
    pub fn set_max_frame_height(&mut self, max_frame_height: u32) -> bool {
        if self.max_frame_height == max_frame_height {
            return false;
        }
        self.max_frame_height = max_frame_height;
        self.derive()
    }

    /// Returns whether the derived settings changed.
    pub fn set_selected(&mut self, selected: Vec<ParticipantId>) -> bool {
        if self.selected == selected {
            return false;
        }
        self.selected = selected;
        self.derive()
    }

    /// Replaces strategy, selection and constraints of `base`. `last_n` is kept.
    pub fn apply_to(&self, base: &AllocationSettings) -> AllocationSettings {
        AllocationSettings {
            strategy: self.strategy,
            selected_participants: self.selected_participants.clone(),
            video_constraints: self.video_constraints.clone(),
            last_n: base.last_n,
        }
    }

    fn derive(&mut self) -> bool {
        let strategy = if self.selected.len() > 1 {
            AllocationStrategy::TileView
        } else {
            AllocationStrategy::StageView
        };
        let constraints =
            VideoConstraints::new(self.onstage_ideal_height.min(self.max_frame_height));
        let video_constraints: BTreeMap<_, _> = self
            .selected
            .iter()
            .map(|id| (id.clone(), constraints))
            .collect();
        let selected_participants = match strategy {
            AllocationStrategy::TileView => Vec::new(),
            AllocationStrategy::StageView => self.selected.clone(),
        };

        let changed = strategy != self.strategy
            || video_constraints != self.video_constraints
            || selected_participants != self.selected_participants;
        self.strategy = strategy;
        self.video_constraints = video_constraints;
        self.selected_participants = selected_participants;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<ParticipantId> {
        raw.iter().map(|id| ParticipantId::new(*id).unwrap()).collect()
    }

    #[test]
    fn default_last_n_is_unlimited() {
        assert_eq!(AllocationSettings::new().last_n(), None);
        assert_eq!(AllocationSettings::new().with_last_n(2).last_n(), Some(2));
    }

    #[test]
    fn summary_is_json() {
        let settings = AllocationSettings::new()
            .with_strategy(AllocationStrategy::TileView)
            .with_selected(vec![ParticipantId::new("a").unwrap()]);
        let summary: serde_json::Value = serde_json::from_str(&settings.summary()).unwrap();
        assert_eq!(summary["strategy"], "tile_view");
        assert_eq!(summary["selected_participants"][0], "a");
        assert_eq!(summary["last_n"], -1);
    }

    #[test]
    fn single_selection_stays_on_stage() {
        let mut signaling = SelectionSignaling::new(720);
        assert!(signaling.set_selected(ids(&["a"])));

        let settings = signaling.apply_to(&AllocationSettings::new().with_last_n(3));
        assert_eq!(settings.strategy, AllocationStrategy::StageView);
        assert_eq!(settings.selected_participants, ids(&["a"]));
        assert_eq!(settings.video_constraints[&ids(&["a"])[0]], VideoConstraints::new(720));
        assert_eq!(settings.last_n, 3);
    }

    #[test]
    fn multiple_selection_is_tile_view() {
        let mut signaling = SelectionSignaling::new(720);
        assert!(signaling.set_selected(ids(&["a", "b"])));
        assert!(signaling.set_max_frame_height(360));

        let settings = signaling.apply_to(&AllocationSettings::new());
        assert_eq!(settings.strategy, AllocationStrategy::TileView);
        assert!(settings.selected_participants.is_empty());
        assert_eq!(settings.video_constraints.len(), 2);
        assert!(
            settings
                .video_constraints
                .values()
                .all(|c| *c == VideoConstraints::new(360))
        );
    }

    #[test]
    fn reports_only_effective_changes() {
        let mut signaling = SelectionSignaling::new(720);
        assert!(!signaling.set_selected(vec![]));
        // Nothing selected, so the cap has nothing to apply to.
        assert!(!signaling.set_max_frame_height(360));

        assert!(signaling.set_selected(ids(&["a", "b"])));
        assert!(!signaling.set_selected(ids(&["a", "b"])));
        // Same tiles, same constraints.
        assert!(!signaling.set_selected(ids(&["b", "a"])));
        assert!(signaling.set_max_frame_height(1080));
        // Above the on-stage ideal the cap makes no difference.
        assert!(!signaling.set_max_frame_height(2160));
    }
}
