//! Video tile lifecycle as seen by the policy.

use serde::{Deserialize, Serialize};

use crate::{AttendeeId, TileId};

/// Snapshot of one video tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileState {
    pub tile_id: TileId,
    /// Attendee the tile shows, if bound.
    pub bound_attendee: Option<AttendeeId>,
    /// Whether a received video stream is bound to the tile.
    pub bound_stream: bool,
    pub paused: bool,
    pub active: bool,
    /// Shows our own camera.
    pub local: bool,
}

impl TileState {
    pub fn is_bound_to(&self, attendee_id: &str) -> bool {
        self.bound_attendee.as_deref() == Some(attendee_id)
    }
}

/// The host's video tiles.
///
/// The policy pauses tiles of attendees it cannot afford, creates paused placeholder
/// tiles for attendees that never had one, and reads tiles paused by the application.
pub trait TileBinder {
    /// All tiles, local included.
    fn video_tiles(&self) -> Vec<TileState>;

    /// Tiles showing remote attendees.
    fn remote_video_tiles(&self) -> Vec<TileState> {
        self.video_tiles().into_iter().filter(|t| !t.local).collect()
    }

    fn tile(&self, id: TileId) -> Option<TileState>;

    fn pause(&mut self, id: TileId);

    fn unpause(&mut self, id: TileId);

    /// Create a tile bound to an attendee without any stream.
    fn add_tile(&mut self, attendee_id: &AttendeeId) -> TileId;

    fn remove_tile(&mut self, id: TileId);

    /// The first tile bound to the attendee.
    fn tile_for_attendee(&self, attendee_id: &str) -> Option<TileState> {
        self.video_tiles()
            .into_iter()
            .find(|t| t.is_bound_to(attendee_id))
    }
}

/// In-memory [`TileBinder`].
///
/// ```
/// # use downlink_adapt::{MemoryTiles, TileBinder, AttendeeId};
/// let mut tiles = MemoryTiles::new();
/// let id = tiles.add_remote_tile(&AttendeeId::new("a"));
///
/// tiles.pause(id);
/// assert!(tiles.tile(id).unwrap().paused);
/// ```
#[derive(Debug, Default)]
pub struct MemoryTiles {
    tiles: Vec<TileState>,
    last_id: TileId,
}

impl MemoryTiles {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> TileId {
        self.last_id = self.last_id.next();
        self.last_id
    }

    /// A tile showing a received stream from the attendee.
    pub fn add_remote_tile(&mut self, attendee_id: &AttendeeId) -> TileId {
        let tile_id = self.next_id();
        self.tiles.push(TileState {
            tile_id,
            bound_attendee: Some(attendee_id.clone()),
            bound_stream: true,
            paused: false,
            active: true,
            local: false,
        });
        tile_id
    }

    /// A tile showing our own camera.
    pub fn add_local_tile(&mut self, attendee_id: &AttendeeId) -> TileId {
        let tile_id = self.next_id();
        self.tiles.push(TileState {
            tile_id,
            bound_attendee: Some(attendee_id.clone()),
            bound_stream: true,
            paused: false,
            active: true,
            local: true,
        });
        tile_id
    }

    /// Bind a received stream to a tile, e.g. after a placeholder got its video.
    pub fn bind_stream(&mut self, id: TileId) {
        if let Some(t) = self.get_mut(id) {
            t.bound_stream = true;
            t.active = true;
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    fn get_mut(&mut self, id: TileId) -> Option<&mut TileState> {
        self.tiles.iter_mut().find(|t| t.tile_id == id)
    }
}

impl TileBinder for MemoryTiles {
    fn video_tiles(&self) -> Vec<TileState> {
        self.tiles.clone()
    }

    fn tile(&self, id: TileId) -> Option<TileState> {
        self.tiles.iter().find(|t| t.tile_id == id).cloned()
    }

    fn pause(&mut self, id: TileId) {
        if let Some(t) = self.get_mut(id) {
            t.paused = true;
        }
    }

    fn unpause(&mut self, id: TileId) {
        if let Some(t) = self.get_mut(id) {
            t.paused = false;
        }
    }

    fn add_tile(&mut self, attendee_id: &AttendeeId) -> TileId {
        let tile_id = self.next_id();
        self.tiles.push(TileState {
            tile_id,
            bound_attendee: Some(attendee_id.clone()),
            bound_stream: false,
            paused: false,
            active: false,
            local: false,
        });
        tile_id
    }

    fn remove_tile(&mut self, id: TileId) {
        self.tiles.retain(|t| t.tile_id != id);
    }
}
