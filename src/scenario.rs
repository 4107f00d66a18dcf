//! Offline replay of a conference timeline through an [`AllocationController`].
//!
//! A scenario is a TOML file describing the members of a conference, their
//! layer ladders, and a list of steps (bandwidth estimates, speaker order and
//! settings changes). Replaying it yields every event the controller publishes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{AllocatorConfig, ConfigError};
use crate::controller::{AllocationController, AllocationEvent, StaticConference};
use crate::entity::{ParticipantId, SourceId};
use crate::media::{Layer, MediaSource, ParticipantSources};
use crate::settings::AllocationSettings;

#[derive(thiserror::Error, Debug)]
pub enum ScenarioError {
    #[error("failed to read scenario {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse scenario: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("source {0} must set exactly one of `layers` or `simulcast`")]
    AmbiguousLayers(SourceId),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Clone, Debug, Deserialize)]
pub struct SourceSpec {
    pub id: SourceId,
    #[serde(default)]
    pub layers: Vec<Layer>,
    /// `(height, bitrate_bps)` per simulcast encoding.
    #[serde(default)]
    pub simulcast: Vec<(u32, u64)>,
}

impl SourceSpec {
    fn to_media_source(&self) -> Result<MediaSource, ScenarioError> {
        match (self.layers.is_empty(), self.simulcast.is_empty()) {
            (false, true) => Ok(MediaSource::new(self.id.clone(), self.layers.clone())),
            (true, false) => Ok(MediaSource::simulcast(self.id.clone(), &self.simulcast)),
            _ => Err(ScenarioError::AmbiguousLayers(self.id.clone())),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ParticipantSpec {
    pub id: ParticipantId,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Step {
    pub at_ms: u64,
    pub bandwidth_bps: Option<i64>,
    pub order: Option<Vec<ParticipantId>>,
    pub settings: Option<AllocationSettings>,
    /// Selection in the older list form, see
    /// [`AllocationController::selected_participants_changed`].
    pub selected: Option<Vec<ParticipantId>>,
    pub max_frame_height: Option<u32>,
    pub trust_bandwidth: Option<bool>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_trust")]
    pub trust_bandwidth: bool,
    #[serde(default)]
    pub settings: AllocationSettings,
    #[serde(default)]
    pub participants: Vec<ParticipantSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_trust() -> bool {
    true
}

/// Outcome of a replay. The controller keeps the state left by the last step.
pub struct Replay {
    pub controller: AllocationController,
    pub records: Vec<ReplayRecord>,
}

/// One published event, tagged with the step that caused it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReplayRecord {
    pub step: usize,
    pub at_ms: u64,
    pub event: AllocationEvent,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn members(&self) -> Result<Vec<ParticipantSources>, ScenarioError> {
        self.participants
            .iter()
            .map(|p| {
                let sources = p
                    .sources
                    .iter()
                    .map(SourceSpec::to_media_source)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ParticipantSources::new(p.id.clone(), sources))
            })
            .collect()
    }

    /// Runs every step in `at_ms` order and collects the published events.
    pub fn replay(&self, config: AllocatorConfig) -> Result<Replay, ScenarioError> {
        let conference = StaticConference::new(self.members()?);
        conference.set_trust_bandwidth(self.trust_bandwidth);

        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        let controller = AllocationController::builder(conference.clone())
            .config(config)
            .settings(self.settings.clone())
            .subscriber(move |event: &AllocationEvent| sink.lock().push(event.clone()))
            .build()?;

        let mut steps: Vec<(usize, &Step)> = self.steps.iter().enumerate().collect();
        steps.sort_by_key(|(_, step)| step.at_ms);

        let mut records = Vec::new();
        for (index, step) in steps {
            tracing::debug!(step = index, at_ms = step.at_ms, "replaying step");
            apply(&controller, &conference, step);

            records.extend(published.lock().drain(..).map(|event| ReplayRecord {
                step: index,
                at_ms: step.at_ms,
                event,
            }));
        }

        Ok(Replay {
            controller,
            records,
        })
    }
}

fn apply(controller: &AllocationController, conference: &StaticConference, step: &Step) {
    if let Some(trust) = step.trust_bandwidth {
        conference.set_trust_bandwidth(trust);
    }
    if let Some(settings) = &step.settings {
        controller.update_settings(settings.clone());
    }
    if let Some(max_frame_height) = step.max_frame_height {
        controller.max_frame_height_changed(max_frame_height);
    }
    if let Some(selected) = &step.selected {
        controller.selected_participants_changed(selected.clone());
    }
    if let Some(bps) = step.bandwidth_bps {
        if !controller.bandwidth_changed(bps) {
            tracing::info!(bps, "bandwidth estimate suppressed");
        }
    }
    if let Some(order) = &step.order {
        controller.priority_order_changed(order.clone());
    }
}
