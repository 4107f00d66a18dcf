use serde::{Deserialize, Serialize};

use crate::entity::{ParticipantId, SourceId};

/// Temporal layers produced for every simulcast encoding, as (frame rate, share of the
/// encoding bitrate).
const TEMPORAL_LAYERS: [(f64, f64); 3] = [(7.5, 0.33), (15.0, 0.66), (30.0, 1.0)];

/// One discrete quality tier of a video source.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub height: u32,
    pub frame_rate: f64,
    pub bitrate_bps: u64,
}

impl Layer {
    pub fn new(height: u32, frame_rate: f64, bitrate_bps: u64) -> Self {
        Self {
            height,
            frame_rate,
            bitrate_bps,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    pub id: SourceId,
    pub layers: Vec<Layer>,
}

impl MediaSource {
    pub fn new(id: SourceId, layers: Vec<Layer>) -> Self {
        Self { id, layers }
    }

    /// Expands `(height, bitrate_bps)` encodings into their 7.5/15/30 fps temporal layers.
    pub fn simulcast(id: SourceId, encodings: &[(u32, u64)]) -> Self {
        let layers = encodings
            .iter()
            .flat_map(|&(height, bitrate_bps)| {
                TEMPORAL_LAYERS.iter().map(move |&(frame_rate, share)| {
                    Layer::new(height, frame_rate, (bitrate_bps as f64 * share) as u64)
                })
            })
            .collect();
        Self { id, layers }
    }
}

/// A conference member and the video sources it publishes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSources {
    pub id: ParticipantId,
    #[serde(default)]
    pub sources: Vec<MediaSource>,
}

impl ParticipantSources {
    pub fn new(id: ParticipantId, sources: Vec<MediaSource>) -> Self {
        Self { id, sources }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulcast_expands_temporal_layers() {
        let source = MediaSource::simulcast(
            SourceId::new("v0").unwrap(),
            &[(180, 150_000), (360, 500_000)],
        );
        let bitrates: Vec<u64> = source.layers.iter().map(|l| l.bitrate_bps).collect();
        assert_eq!(bitrates, vec![49_500, 99_000, 150_000, 165_000, 330_000, 500_000]);
        assert_eq!(source.layers[4].height, 360);
        assert_eq!(source.layers[4].frame_rate, 15.0);
    }
}
