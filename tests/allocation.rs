use bwalloc::allocator::Allocator;
use bwalloc::bandwidth::{BandwidthChangeGate, BandwidthEstimate};
use bwalloc::config::AllocatorConfig;
use bwalloc::constraints::VideoConstraints;
use bwalloc::controller::AllocationController;
use bwalloc::settings::AllocationStrategy;
use bwalloc::source::SourceAllocationUnit;
use bwalloc::{Allocation, StaticConference};
use common::{camera, members, pid, pids};
use more_asserts::{assert_ge, assert_le};
use proptest::prelude::*;

mod common;

const NAMES: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

fn thumbnails(count: usize) -> Vec<SourceAllocationUnit> {
    NAMES[..count]
        .iter()
        .map(|name| {
            SourceAllocationUnit::new(
                pid(name),
                &camera(name),
                VideoConstraints::thumbnail(180),
                AllocationStrategy::StageView,
                &AllocatorConfig::default(),
            )
        })
        .collect()
}

fn allocate(budget: i64, units: &[SourceAllocationUnit]) -> Allocation {
    Allocator::default()
        .allocate(budget, units)
        .into_allocation(units)
}

fn on_stage_first(count: usize) -> Vec<SourceAllocationUnit> {
    let config = AllocatorConfig::default();
    NAMES[..count]
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let constraints = if i == 0 {
                VideoConstraints::new(720)
            } else {
                VideoConstraints::thumbnail(180)
            };
            SourceAllocationUnit::new(
                pid(name),
                &camera(name),
                constraints,
                AllocationStrategy::StageView,
                &config,
            )
        })
        .collect()
}

#[test]
fn hysteresis_literals() {
    let gate = BandwidthChangeGate::default();
    let previous = BandwidthEstimate::bps(1_000_000);
    assert!(!gate.should_react(previous, BandwidthEstimate::bps(900_001)));
    assert!(gate.should_react(previous, BandwidthEstimate::bps(850_000)));
}

#[test]
fn on_stage_waits_for_preferred_before_thumbnails() {
    let units = on_stage_first(3);

    // 400kbps cannot reach the 360p preferred layer.
    let allocation = allocate(400_000, &units);
    assert_eq!(allocation.get(&pid("a")).unwrap().bitrate_bps, 150_000);
    assert_eq!(allocation.forwarded_participants(), pids(&["a"]));

    let allocation = allocate(800_000, &units);
    assert_eq!(allocation.get(&pid("a")).unwrap().bitrate_bps, 500_000);
    assert_eq!(allocation.get(&pid("b")).unwrap().bitrate_bps, 150_000);
    assert_eq!(allocation.get(&pid("c")).unwrap().bitrate_bps, 150_000);
}

#[test]
fn lower_priority_never_forwarded_before_higher() {
    let units = thumbnails(4);
    for budget in (0..700_000).step_by(12_500) {
        let allocation = allocate(budget, &units);
        let forwarded: Vec<bool> = allocation
            .sources()
            .iter()
            .map(|s| s.is_forwarded())
            .collect();
        assert!(
            forwarded.windows(2).all(|w| w[0] || !w[1]),
            "gap in forwarding at {budget}: {forwarded:?}"
        );
    }
}

fn controller(count: usize, budget: i64) -> AllocationController {
    let conference = StaticConference::new(members(&NAMES[..count]));
    let controller = AllocationController::builder(conference).build().unwrap();
    controller.bandwidth_changed(budget);
    controller.priority_order_changed(pids(&NAMES[..count]));
    controller
}

proptest! {
    #[test]
    fn hysteresis_law(previous in 1i64..1_000_000_000, current in 0i64..2_000_000_000) {
        let gate = BandwidthChangeGate::default();
        let react = gate.should_react(BandwidthEstimate::bps(previous), BandwidthEstimate::bps(current));
        let decrease = (previous - current) as f64;
        let threshold = 0.15 * previous as f64;

        if current > previous {
            prop_assert!(react);
        } else if decrease < threshold {
            prop_assert!(!react);
        } else if decrease > threshold {
            prop_assert!(react);
        }
    }

    #[test]
    fn deterministic(count in 1usize..=6, budget in 0i64..6_000_000) {
        let first = controller(count, budget).allocation();
        let second = controller(count, budget).allocation();
        prop_assert!(first.is_same_as(&second));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn monotonic_budget(
        count in 1usize..=6,
        stage in any::<bool>(),
        low in 0i64..3_000_000,
        extra in 0i64..3_000_000,
    ) {
        let units = if stage { on_stage_first(count) } else { thumbnails(count) };
        let low_total = allocate(low, &units).target_bps();
        let high_total = allocate(low + extra, &units).target_bps();
        prop_assert!(high_total >= low_total, "{low_total} > {high_total}");
    }

    #[test]
    fn stays_within_budget_unless_forcing(count in 1usize..=6, budget in 49_500i64..3_000_000) {
        let units = thumbnails(count);
        let allocation = allocate(budget, &units);
        assert_le!(allocation.target_bps(), budget as u64);
        assert_ge!(allocation.forwarded_count(), 1);
        prop_assert!(!allocation.is_oversending());
    }
}
