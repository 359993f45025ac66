use std::cell::RefCell;
use std::rc::Rc;

use downlink_adapt::*;

mod common;
use common::{init_log, TestPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notice {
    Pause(TileId),
    Unpause(TileId),
}

#[derive(Clone, Default)]
struct Notices(Rc<RefCell<Vec<Notice>>>);

impl Notices {
    fn take(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

impl DownlinkObserver for Notices {
    fn tile_will_be_paused_by_downlink_policy(&mut self, tile_id: TileId) {
        self.0.borrow_mut().push(Notice::Pause(tile_id));
    }

    fn tile_will_be_unpaused_by_downlink_policy(&mut self, tile_id: TileId) {
        self.0.borrow_mut().push(Notice::Unpause(tile_id));
    }
}

/// Budget for one of the two 600 kbps streams.
fn tight() -> TestPolicy {
    let config = PolicyConfig::default().set_default_bandwidth(Bitrate::kbps(700));
    TestPolicy::with_config(config)
}

fn setup(p: &mut TestPolicy) {
    p.prefs(&[("a", 1, TargetSize::High), ("b", 2, TargetSize::High)]);
    p.index(&[(1, 1, "a", 600), (2, 2, "b", 600)]);
}

fn tile_of(p: &TestPolicy, attendee: &str) -> TileState {
    p.tile_binder()
        .and_then(|t| t.tile_for_attendee(attendee))
        .expect("tile for attendee")
}

#[test]
fn paused_then_unpaused_when_bandwidth_returns() {
    init_log();

    let mut p = tight();
    let notices = Notices::default();
    p.add_observer(notices.clone());
    setup(&mut p);

    let tile = tile_of(&p, "b");
    assert!(tile.paused);
    assert_eq!(notices.take(), vec![Notice::Pause(tile.tile_id)]);
    assert!(p.bandwidth_paused().contains("b"));

    p.tick(3000.0, 0.0, 0);
    assert_eq!(p.chosen(), vec![1, 2]);
    assert!(!tile_of(&p, "b").paused);
    assert_eq!(notices.take(), vec![Notice::Unpause(tile.tile_id)]);
    assert!(p.bandwidth_paused().is_empty());
}

#[test]
fn existing_tile_is_paused_in_place() {
    init_log();

    let mut p = tight();
    let tid = p
        .tile_binder_mut()
        .map(|t| t.add_remote_tile(&"b".into()))
        .unwrap();
    let notices = Notices::default();
    p.add_observer(notices.clone());
    setup(&mut p);

    assert_eq!(p.tile_binder().map(|t| t.len()), Some(1));
    assert!(tile_of(&p, "b").paused);
    assert_eq!(notices.take(), vec![Notice::Pause(tid)]);

    // Repeated passes don't pause again.
    let now = p.now;
    p.evaluate(now);
    assert!(notices.take().is_empty());
}

#[test]
fn removed_observer_not_notified() {
    init_log();

    let mut p = tight();
    let notices = Notices::default();
    let id = p.add_observer(notices.clone());
    assert!(p.remove_observer(id));
    assert!(!p.remove_observer(id));

    setup(&mut p);
    assert!(p.bandwidth_paused().contains("b"));
    assert!(notices.take().is_empty());
}

#[test]
fn binder_bound_late() {
    init_log();

    let config = PolicyConfig::default().set_default_bandwidth(Bitrate::kbps(700));
    let mut p: DownlinkPolicy<MemoryTiles> = DownlinkPolicy::with_config(config).unwrap();
    let now = std::time::Instant::now();

    p.update_catalog(now, common::index(&[(1, 1, "a", 600), (2, 2, "b", 600)]));
    assert!(p.bandwidth_paused().contains("b"));

    assert!(p.bind_tiles(MemoryTiles::new()).is_none());
    p.evaluate(now);
    let tile = p.tile_binder().and_then(|t| t.tile_for_attendee("b"));
    assert!(tile.map(|t| t.paused).unwrap_or(false));
}

#[test]
fn reset_releases_bandwidth_paused_tiles() {
    init_log();

    let mut p = tight();
    let notices = Notices::default();
    p.add_observer(notices.clone());
    setup(&mut p);

    let tile = tile_of(&p, "b");
    assert!(tile.paused);
    assert_eq!(notices.take(), vec![Notice::Pause(tile.tile_id)]);

    p.reset();
    assert!(!tile_of(&p, "b").paused);
    assert_eq!(notices.take(), vec![Notice::Unpause(tile.tile_id)]);

    let now = p.now;
    p.evaluate(now);
    p.tick(5000.0, 0.0, 0);
    p.tick(5000.0, 0.0, 0);

    assert_eq!(p.chosen(), vec![1, 2]);
    assert!(p.bandwidth_paused().is_empty());
    assert!(p.app_paused_streams().is_empty());
    assert!(!tile_of(&p, "b").paused);
}
