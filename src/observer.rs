use std::fmt;

use crate::{ObserverId, TileId};

/// Receives notice of tile pause changes made by the downlink policy.
///
/// Both methods default to doing nothing. They are called right before the policy
/// calls the corresponding [`TileBinder`][crate::TileBinder] method.
pub trait DownlinkObserver {
    fn tile_will_be_paused_by_downlink_policy(&mut self, tile_id: TileId) {
        let _ = tile_id;
    }

    fn tile_will_be_unpaused_by_downlink_policy(&mut self, tile_id: TileId) {
        let _ = tile_id;
    }
}

#[derive(Default)]
pub(crate) struct Observers {
    list: Vec<(ObserverId, Box<dyn DownlinkObserver>)>,
    last_id: ObserverId,
}

impl Observers {
    pub fn add(&mut self, observer: Box<dyn DownlinkObserver>) -> ObserverId {
        self.last_id = self.last_id.next();
        self.list.push((self.last_id, observer));
        self.last_id
    }

    pub fn remove(&mut self, id: ObserverId) -> bool {
        let len = self.list.len();
        self.list.retain(|(i, _)| *i != id);
        self.list.len() != len
    }

    pub fn will_pause(&mut self, tile_id: TileId) {
        for (_, o) in &mut self.list {
            o.tile_will_be_paused_by_downlink_policy(tile_id);
        }
    }

    pub fn will_unpause(&mut self, tile_id: TileId) {
        for (_, o) in &mut self.list {
            o.tile_will_be_unpaused_by_downlink_policy(tile_id);
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("len", &self.list.len())
            .finish()
    }
}
