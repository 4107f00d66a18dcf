use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::allocation::Allocation;
use crate::allocator::Allocator;
use crate::bandwidth::{BandwidthChangeGate, BandwidthEstimate};
use crate::config::{AllocatorConfig, ConfigError};
use crate::constraints::{
    ConstraintsPolicy, EffectiveConstraints, LastNPolicy, VideoConstraints, prioritize,
};
use crate::entity::ParticipantId;
use crate::media::ParticipantSources;
use crate::settings::{AllocationSettings, SelectionSignaling};
use crate::source::SourceAllocationUnit;

/// The conference as seen by one receiver's allocator.
pub trait Conference: Send + Sync {
    /// Current members and the video sources they publish.
    fn sources_snapshot(&self) -> Vec<ParticipantSources>;

    /// When false the estimate is ignored and bandwidth is treated as unlimited.
    fn trust_bandwidth_estimate(&self) -> bool;
}

/// Conference membership kept in memory. Clones share the same members.
#[derive(Clone, Debug)]
pub struct StaticConference {
    members: Arc<RwLock<Vec<ParticipantSources>>>,
    trust_bandwidth: Arc<AtomicBool>,
}

impl Default for StaticConference {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl StaticConference {
    pub fn new(members: Vec<ParticipantSources>) -> Self {
        Self {
            members: Arc::new(RwLock::new(members)),
            trust_bandwidth: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_members(&self, members: Vec<ParticipantSources>) {
        *self.members.write() = members;
    }

    pub fn set_trust_bandwidth(&self, trust: bool) {
        self.trust_bandwidth.store(trust, Ordering::Relaxed);
    }
}

impl Conference for StaticConference {
    fn sources_snapshot(&self) -> Vec<ParticipantSources> {
        self.members.read().clone()
    }

    fn trust_bandwidth_estimate(&self) -> bool {
        self.trust_bandwidth.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AllocationEvent {
    AllocationChanged(Allocation),
    ConstraintsChanged {
        old: EffectiveConstraints,
        new: EffectiveConstraints,
    },
}

/// Receives allocation events.
///
/// Handlers run synchronously while the controller lock is held. Calling back
/// into the controller from a handler deadlocks, hand the work off instead.
pub trait AllocationEventHandler: Send + Sync {
    fn on_event(&self, event: &AllocationEvent);
}

impl<F> AllocationEventHandler for F
where
    F: Fn(&AllocationEvent) + Send + Sync,
{
    fn on_event(&self, event: &AllocationEvent) {
        self(event)
    }
}

/// Best effort snapshot for introspection, may lag behind the allocator.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DebugState {
    pub trust_bandwidth: bool,
    pub bandwidth_estimate_bps: i64,
    pub allocation_settings: String,
    pub effective_constraints: EffectiveConstraints,
}

struct State {
    estimate: BandwidthEstimate,
    order: Vec<ParticipantId>,
    settings: Arc<AllocationSettings>,
    signaling: SelectionSignaling,
    effective_constraints: EffectiveConstraints,
    allocation: Allocation,
    last_recompute: Option<Instant>,
    subscribers: Vec<Arc<dyn AllocationEventHandler>>,
}

struct Inner {
    config: AllocatorConfig,
    gate: BandwidthChangeGate,
    allocator: Allocator,
    conference: Box<dyn Conference>,
    policy: Box<dyn ConstraintsPolicy>,
    state: Mutex<State>,
    debug: watch::Sender<DebugState>,
}

pub struct AllocationControllerBuilder {
    config: AllocatorConfig,
    conference: Box<dyn Conference>,
    policy: Option<Box<dyn ConstraintsPolicy>>,
    settings: AllocationSettings,
    subscribers: Vec<Arc<dyn AllocationEventHandler>>,
}

impl AllocationControllerBuilder {
    pub fn config(mut self, config: AllocatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policy(mut self, policy: impl ConstraintsPolicy + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    pub fn settings(mut self, settings: AllocationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn subscriber(mut self, handler: impl AllocationEventHandler + 'static) -> Self {
        self.subscribers.push(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<AllocationController, ConfigError> {
        self.config.validate()?;

        let policy = self
            .policy
            .unwrap_or_else(|| Box::new(LastNPolicy::from_config(&self.config)));
        let debug = DebugState {
            trust_bandwidth: self.conference.trust_bandwidth_estimate(),
            bandwidth_estimate_bps: BandwidthEstimate::UNKNOWN.as_i64(),
            allocation_settings: self.settings.summary(),
            effective_constraints: EffectiveConstraints::new(),
        };
        let (debug, _) = watch::channel(debug);

        let signaling = SelectionSignaling::new(self.config.onstage_ideal_height);
        let inner = Inner {
            gate: self.config.bandwidth_gate(),
            allocator: Allocator::from_config(&self.config),
            config: self.config,
            conference: self.conference,
            policy,
            state: Mutex::new(State {
                estimate: BandwidthEstimate::UNKNOWN,
                order: Vec::new(),
                settings: Arc::new(self.settings),
                signaling,
                effective_constraints: EffectiveConstraints::new(),
                allocation: Allocation::empty(),
                last_recompute: None,
                subscribers: self.subscribers,
            }),
            debug,
        };

        Ok(AllocationController {
            inner: Arc::new(inner),
        })
    }
}

/// Per-receiver allocation state machine.
///
/// Every trigger takes the same lock for "read state, allocate, publish", so
/// at most one allocation runs at a time and each one starts from the state
/// left by the previous one.
#[derive(Clone)]
pub struct AllocationController {
    inner: Arc<Inner>,
}

impl AllocationController {
    pub fn builder(conference: impl Conference + 'static) -> AllocationControllerBuilder {
        AllocationControllerBuilder {
            config: AllocatorConfig::default(),
            conference: Box::new(conference),
            policy: None,
            settings: AllocationSettings::default(),
            subscribers: Vec::new(),
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.inner.config
    }

    /// Returns whether the new estimate was accepted.
    pub fn bandwidth_changed(&self, bps: i64) -> bool {
        let current = BandwidthEstimate::from(bps);
        let mut state = self.inner.state.lock();

        if !self.inner.gate.should_react(state.estimate, current) {
            tracing::debug!(
                previous = %state.estimate,
                current = %current,
                "bandwidth change below threshold, ignoring"
            );
            metrics::counter!("allocator_bwe_updates_total", "outcome" => "ignored").increment(1);
            return false;
        }

        tracing::debug!(previous = %state.estimate, current = %current, "bandwidth changed");
        metrics::counter!("allocator_bwe_updates_total", "outcome" => "accepted").increment(1);
        state.estimate = current;
        self.recompute(&mut state);
        true
    }

    pub fn priority_order_changed(&self, order: Vec<ParticipantId>) {
        let mut state = self.inner.state.lock();
        state.order = order;
        self.recompute(&mut state);
    }

    pub fn update_settings(&self, settings: AllocationSettings) {
        let mut state = self.inner.state.lock();
        state.settings = Arc::new(settings);
        self.recompute(&mut state);
    }

    /// Selection signaled as a plain list of participants. Recomputes only when
    /// the derived settings change, returning whether they did.
    pub fn selected_participants_changed(&self, selected: Vec<ParticipantId>) -> bool {
        let mut state = self.inner.state.lock();
        let changed = state.signaling.set_selected(selected);
        self.apply_signaling(&mut state, changed)
    }

    /// Global cap on the height of selected participants, see
    /// [`selected_participants_changed`](Self::selected_participants_changed).
    pub fn max_frame_height_changed(&self, max_frame_height: u32) -> bool {
        let mut state = self.inner.state.lock();
        let changed = state.signaling.set_max_frame_height(max_frame_height);
        self.apply_signaling(&mut state, changed)
    }

    fn apply_signaling(&self, state: &mut State, changed: bool) -> bool {
        if !changed {
            tracing::trace!("selection signaling unchanged");
            return false;
        }
        state.settings = Arc::new(state.signaling.apply_to(&state.settings));
        self.recompute(state);
        true
    }

    pub fn settings(&self) -> Arc<AllocationSettings> {
        self.inner.state.lock().settings.clone()
    }

    pub fn subscribe(&self, handler: impl AllocationEventHandler + 'static) {
        self.inner.state.lock().subscribers.push(Arc::new(handler));
    }

    /// Last published allocation.
    pub fn allocation(&self) -> Allocation {
        self.inner.state.lock().allocation.clone()
    }

    pub fn debug_state(&self) -> DebugState {
        self.inner.debug.borrow().clone()
    }

    pub fn watch_debug_state(&self) -> watch::Receiver<DebugState> {
        self.inner.debug.subscribe()
    }

    /// Dispatches a recompute when the last one is older than
    /// `max_time_between_calculations`.
    ///
    /// The recompute runs on the tokio blocking pool and takes the controller
    /// lock like any other trigger. Without a runtime it runs inline and `None`
    /// is returned.
    pub fn maybe_force_recompute(&self) -> Option<JoinHandle<()>> {
        let max = self.inner.config.max_time_between_calculations();
        let last_recompute = self.inner.state.lock().last_recompute;
        let stale = last_recompute.is_none_or(|at| at.elapsed() > max);
        if !stale {
            return None;
        }

        tracing::debug!(?last_recompute, "allocation is stale, forcing recompute");
        let this = self.clone();
        let task = move || {
            let mut state = this.inner.state.lock();
            this.recompute(&mut state);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn_blocking(task)),
            Err(_) => {
                task();
                None
            }
        }
    }

    /// Calls [`maybe_force_recompute`](Self::maybe_force_recompute) every
    /// `watchdog_period` until `shutdown` is cancelled.
    pub fn spawn_watchdog(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        let period = self.inner.config.watchdog_period();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("allocation watchdog stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(task) = this.maybe_force_recompute() else {
                            continue;
                        };
                        if let Err(err) = task.await {
                            tracing::warn!("forced recompute failed: {err}");
                        }
                    }
                }
            }
        })
    }

    fn recompute(&self, state: &mut State) {
        let inner = &self.inner;
        state.last_recompute = Some(Instant::now());

        if state.order.is_empty() {
            tracing::trace!("no participants, keeping previous allocation");
            self.refresh_debug_state(state);
            return;
        }
        metrics::counter!("allocator_recomputations_total").increment(1);

        let members = inner.conference.sources_snapshot();
        let ordered = prioritize(&state.order, &state.settings.selected_participants, members);
        let effective = inner.policy.effective_constraints(&ordered, &state.settings);
        let strategy = state.settings.strategy;
        let config = &inner.config;

        let units: Vec<SourceAllocationUnit> = ordered
            .iter()
            .flat_map(|member| {
                let constraints = effective
                    .get(&member.id)
                    .copied()
                    .unwrap_or_else(VideoConstraints::disabled);
                member.sources.iter().map(move |source| {
                    SourceAllocationUnit::new(
                        member.id.clone(),
                        source,
                        constraints,
                        strategy,
                        config,
                    )
                })
            })
            .collect();

        let budget = if inner.conference.trust_bandwidth_estimate() {
            state.estimate.as_i64().max(0)
        } else {
            i64::MAX
        };

        let outcome = inner.allocator.allocate(budget, &units);
        tracing::trace!(
            budget,
            units = units.len(),
            passes = outcome.passes,
            rolled_back = outcome.rolled_back,
            remaining = outcome.remaining_bps,
            "allocation computed"
        );
        let allocation = outcome.into_allocation(&units);

        let old_constraints = std::mem::replace(&mut state.effective_constraints, effective);
        let allocation_changed = !state.allocation.is_same_as(&allocation);
        if allocation_changed {
            state.allocation = allocation.clone();
        }
        self.refresh_debug_state(state);

        if allocation_changed {
            tracing::debug!(
                forwarded = allocation.forwarded_count(),
                target_bps = allocation.target_bps(),
                ideal_bps = allocation.ideal_bps(),
                oversending = allocation.is_oversending(),
                "allocation changed"
            );
            metrics::counter!("allocator_allocations_published_total").increment(1);
            notify(state, &AllocationEvent::AllocationChanged(allocation));
        }

        if old_constraints != state.effective_constraints {
            let event = AllocationEvent::ConstraintsChanged {
                old: old_constraints,
                new: state.effective_constraints.clone(),
            };
            notify(state, &event);
        }
    }

    fn refresh_debug_state(&self, state: &State) {
        self.inner.debug.send_replace(DebugState {
            trust_bandwidth: self.inner.conference.trust_bandwidth_estimate(),
            bandwidth_estimate_bps: state.estimate.as_i64(),
            allocation_settings: state.settings.summary(),
            effective_constraints: state.effective_constraints.clone(),
        });
    }
}

fn notify(state: &State, event: &AllocationEvent) {
    for (index, subscriber) in state.subscribers.iter().enumerate() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event)));
        if result.is_err() {
            tracing::error!(subscriber = index, "allocation subscriber panicked");
            metrics::counter!("allocator_subscriber_panics_total").increment(1);
        }
    }
}
