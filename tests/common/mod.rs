#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bwalloc::controller::{AllocationEvent, Conference, StaticConference};
use bwalloc::entity::{ParticipantId, SourceId};
use bwalloc::media::{MediaSource, ParticipantSources};
use parking_lot::Mutex;

pub const LD: (u32, u64) = (180, 150_000);
pub const SD: (u32, u64) = (360, 500_000);
pub const HD: (u32, u64) = (720, 2_000_000);

pub fn pid(id: &str) -> ParticipantId {
    ParticipantId::new(id).unwrap()
}

pub fn pids(ids: &[&str]) -> Vec<ParticipantId> {
    ids.iter().map(|id| pid(id)).collect()
}

/// LD/SD/HD simulcast camera, 7.5/15/30 fps per encoding.
pub fn camera(owner: &str) -> MediaSource {
    MediaSource::simulcast(SourceId::new(format!("{owner}-cam")).unwrap(), &[LD, SD, HD])
}

pub fn member(id: &str) -> ParticipantSources {
    ParticipantSources::new(pid(id), vec![camera(id)])
}

pub fn members(ids: &[&str]) -> Vec<ParticipantSources> {
    ids.iter().map(|id| member(id)).collect()
}

/// Counts snapshot requests, i.e. recomputations that reached the allocator.
#[derive(Clone, Default)]
pub struct CountingConference {
    inner: StaticConference,
    snapshots: Arc<AtomicUsize>,
}

impl CountingConference {
    pub fn new(members: Vec<ParticipantSources>) -> Self {
        Self {
            inner: StaticConference::new(members),
            snapshots: Arc::default(),
        }
    }

    pub fn snapshots(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    pub fn set_trust_bandwidth(&self, trust: bool) {
        self.inner.set_trust_bandwidth(trust);
    }

    pub fn set_members(&self, members: Vec<ParticipantSources>) {
        self.inner.set_members(members);
    }
}

impl Conference for CountingConference {
    fn sources_snapshot(&self) -> Vec<ParticipantSources> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        self.inner.sources_snapshot()
    }

    fn trust_bandwidth_estimate(&self) -> bool {
        self.inner.trust_bandwidth_estimate()
    }
}

/// Collects published events.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<AllocationEvent>>>,
}

impl Recorder {
    pub fn handler(&self) -> impl Fn(&AllocationEvent) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event: &AllocationEvent| events.lock().push(event.clone())
    }

    pub fn take(&self) -> Vec<AllocationEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}
