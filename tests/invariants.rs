use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use downlink_adapt::*;

mod common;
use common::{init_log, TestPolicy};

const NAMES: &[&str] = &["ann", "bob", "cid", "dee", "eve", "fay"];

fn random_index(rng: &mut StdRng) -> Vec<(u32, u32, &'static str, u64)> {
    let mut layers = vec![];
    let mut id = 1;
    let attendees = rng.random_range(1..=NAMES.len());
    for (group, name) in NAMES.iter().take(attendees).enumerate() {
        let count = rng.random_range(1..=3);
        let mut kbps = rng.random_range(50..200);
        for _ in 0..count {
            layers.push((id, group as u32 + 1, *name, kbps));
            id += 1;
            kbps += rng.random_range(100..800);
        }
    }
    layers
}

fn random_prefs(rng: &mut StdRng) -> Vec<(&'static str, u32, TargetSize)> {
    let mut prefs = vec![];
    for name in NAMES {
        if !rng.random_bool(0.8) {
            continue;
        }
        let size = match rng.random_range(0..3) {
            0 => TargetSize::Low,
            1 => TargetSize::Medium,
            _ => TargetSize::High,
        };
        prefs.push((*name, rng.random_range(1..=3), size));
    }
    prefs
}

/// Pause the tile of a random attendee the way an application would.
fn app_pause(p: &mut TestPolicy, rng: &mut StdRng, held: &mut BTreeSet<&'static str>) {
    let name = NAMES[rng.random_range(0..NAMES.len())];
    let Some(tiles) = p.tile_binder_mut() else {
        return;
    };
    if tiles.tile_for_attendee(name).is_some() {
        return;
    }
    let tile_id = tiles.add_remote_tile(&name.into());
    tiles.bind_stream(tile_id);
    tiles.pause(tile_id);
    held.insert(name);

    let now = p.now;
    p.evaluate(now);
    p.resubscribe();
}

/// Attendees in `held` have tiles paused by the application and belong to neither side.
fn check_exactly_one(p: &TestPolicy, held: &BTreeSet<&str>) {
    let set = p.optimal_receive_set();
    let chosen: BTreeSet<&str> = set.streams.iter().map(|s| &*s.attendee_id).collect();

    for pref in p.preferences() {
        if !p.catalog().has_attendee(&pref.attendee_id) || held.contains(&*pref.attendee_id) {
            continue;
        }
        let is_chosen = chosen.contains(&*pref.attendee_id);
        let is_paused = set.bandwidth_paused.contains(&pref.attendee_id);
        assert!(
            is_chosen != is_paused,
            "{} chosen: {} paused: {} at {:?}",
            pref.attendee_id,
            is_chosen,
            is_paused,
            p.duration()
        );
    }

    let mut groups = BTreeSet::new();
    for s in &set.streams {
        assert!(groups.insert(s.group_id), "two layers of group {}", s.group_id);
        assert!(p.catalog().all_stream_ids().contains(&s.stream_id));
    }
}

#[test]
fn every_preferred_attendee_chosen_or_paused() {
    init_log();

    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..20 {
        let mut p = TestPolicy::new();
        let mut held = BTreeSet::new();
        p.index(&random_index(&mut rng));
        p.prefs(&random_prefs(&mut rng));
        p.resubscribe();
        check_exactly_one(&p, &held);

        let mut estimate: f64 = rng.random_range(200.0..4000.0);

        for step in 0..60 {
            if step % 20 == 19 {
                p.index(&random_index(&mut rng));
                p.resubscribe();
            } else if step % 25 == 24 {
                p.prefs(&random_prefs(&mut rng));
                p.resubscribe();
            } else if step % 15 == 14 {
                p.reset();
                let now = p.now;
                p.evaluate(now);
                p.resubscribe();
            } else if step % 10 == 7 && rng.random_bool(0.3) {
                app_pause(&mut p, &mut rng, &mut held);
            } else {
                estimate = (estimate * rng.random_range(0.7..1.3)).clamp(100.0, 6000.0);
                let lost = if rng.random_bool(0.1) { rng.random_range(1..10) } else { 0 };
                p.tick(estimate, estimate * 0.8, lost);
            }
            check_exactly_one(&p, &held);
        }
    }
}

#[test]
fn selection_within_target_when_committed() {
    init_log();

    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..50 {
        let mut p = TestPolicy::new();
        p.index(&random_index(&mut rng));
        p.prefs(&random_prefs(&mut rng));

        // Still in startup, so every pass commits a fresh selection.
        let total: Bitrate = p
            .optimal_receive_set()
            .streams
            .iter()
            .map(|s| s.avg_bitrate)
            .sum();
        assert!(total <= p.target_rate(), "{} > {}", total, p.target_rate());
    }
}
