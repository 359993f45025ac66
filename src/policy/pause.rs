use std::collections::BTreeSet;

use super::DownlinkPolicy;
use crate::catalog::StreamDescriptor;
use crate::util::Pii;
use crate::{AttendeeId, Preferences, TileBinder};

impl<B: TileBinder> DownlinkPolicy<B> {
    /// Remove stream-less tiles of attendees that left or lost their preference.
    pub(super) fn clean_bw_paused_tiles(
        &mut self,
        remote: &[StreamDescriptor],
        prefs: &Preferences,
    ) {
        let Some(tiles) = self.tiles.as_mut() else {
            return;
        };

        for tile in tiles.remote_video_tiles() {
            if tile.bound_stream {
                continue;
            }
            let Some(attendee) = &tile.bound_attendee else {
                continue;
            };
            let in_catalog = remote.iter().any(|s| &s.attendee_id == attendee);
            if !in_catalog || !prefs.contains(attendee) {
                debug!("Remove tile {} of {}", tile.tile_id, Pii(attendee));
                tiles.remove_tile(tile.tile_id);
                self.bw_paused.remove(attendee);
            }
        }
    }

    /// Take streams of tiles the application paused out of consideration.
    ///
    /// Streams already subscribed for them are kept in `chosen`.
    pub(super) fn handle_app_paused_streams(
        &mut self,
        remote: Vec<StreamDescriptor>,
        chosen: &mut Vec<StreamDescriptor>,
    ) -> Vec<StreamDescriptor> {
        self.app_paused.clear();

        let Some(tiles) = self.tiles.as_ref() else {
            return remote;
        };

        let paused: BTreeSet<AttendeeId> = tiles
            .remote_video_tiles()
            .into_iter()
            .filter(|t| t.paused)
            .filter_map(|t| t.bound_attendee)
            .filter(|a| !self.bw_paused.contains(a))
            .collect();

        if paused.is_empty() {
            return remote;
        }

        let (held, rest): (Vec<_>, Vec<_>) = remote
            .into_iter()
            .partition(|s| paused.contains(&s.attendee_id));

        for s in held {
            if self.subscribed.contains(&s.stream_id) {
                chosen.push(s.clone());
            }
            self.app_paused.insert(s.stream_id);
        }

        trace!("App paused streams: {:?}", self.app_paused);

        rest
    }

    /// Pause attendees with streams but nothing chosen, unpause those who got one.
    pub(super) fn process_bw_paused(
        &mut self,
        with_preference: &[StreamDescriptor],
        chosen: &[StreamDescriptor],
        prefs: &Preferences,
    ) {
        let next: BTreeSet<AttendeeId> = prefs
            .iter()
            .map(|p| &p.attendee_id)
            .filter(|a| with_preference.iter().any(|s| &s.attendee_id == *a))
            .filter(|a| !chosen.iter().any(|s| &s.attendee_id == *a))
            .cloned()
            .collect();

        let Some(tiles) = self.tiles.as_mut() else {
            self.bw_paused = next;
            return;
        };
        let observers = &mut self.observers;

        for attendee in &next {
            match tiles.tile_for_attendee(attendee) {
                Some(tile) if tile.paused => {}
                Some(tile) => {
                    info!("Pause tile {} of {} for bandwidth", tile.tile_id, Pii(attendee));
                    observers.will_pause(tile.tile_id);
                    tiles.pause(tile.tile_id);
                }
                None => {
                    let tile_id = tiles.add_tile(attendee);
                    info!("Add paused tile {} for {}", tile_id, Pii(attendee));
                    observers.will_pause(tile_id);
                    tiles.pause(tile_id);
                }
            }
        }

        for attendee in self.bw_paused.difference(&next) {
            let Some(tile) = tiles.tile_for_attendee(attendee) else {
                continue;
            };
            if tile.paused {
                info!("Unpause tile {} of {}", tile.tile_id, Pii(attendee));
                observers.will_unpause(tile.tile_id);
                tiles.unpause(tile.tile_id);
            }
        }

        self.bw_paused = next;
    }

    /// Unpause everything we paused, used when there is nothing to allocate.
    pub(super) fn release_bw_paused(&mut self) {
        let paused = std::mem::take(&mut self.bw_paused);
        let Some(tiles) = self.tiles.as_mut() else {
            return;
        };
        for attendee in &paused {
            let Some(tile) = tiles.tile_for_attendee(attendee) else {
                continue;
            };
            if tile.paused {
                self.observers.will_unpause(tile.tile_id);
                tiles.unpause(tile.tile_id);
            }
        }
    }
}
