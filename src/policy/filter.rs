use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::catalog::StreamDescriptor;
use crate::{Bitrate, Degradation, Preferences, StreamId};

/// Content share layers below this max bitrate report the max in the average.
const LOW_CONTENT_MAX: Bitrate = Bitrate::kbps(100);

/// Frame rate floor used when weighing layers.
const MIN_FRAME_RATE: u32 = 15;

/// Pixel count floor used when weighing layers.
const MIN_PIXELS: u64 = 320 * 480;

/// Replace missing or bogus averages with the max.
pub(crate) fn normalize(streams: &mut [StreamDescriptor]) {
    for s in streams {
        if s.avg_bitrate.is_zero() || s.avg_bitrate > s.max_bitrate {
            if s.is_content() && s.max_bitrate < LOW_CONTENT_MAX {
                s.max_bitrate = s.avg_bitrate;
            } else {
                s.avg_bitrate = s.max_bitrate;
            }
        }
    }
}

/// Drop layers that would make an upgrade path step down in resolution or frame rate.
///
/// Only attendees with at least three layers are affected. The input order is kept.
pub(crate) fn layer_paths(
    streams: Vec<StreamDescriptor>,
    prefs: &Preferences,
) -> Vec<StreamDescriptor> {
    let mut remove: BTreeSet<StreamId> = BTreeSet::new();

    for pref in prefs {
        let mut layers: Vec<&StreamDescriptor> = streams
            .iter()
            .filter(|s| s.attendee_id == pref.attendee_id)
            .collect();

        if layers.len() < 3 {
            continue;
        }

        let max_fps = layers
            .iter()
            .map(|s| s.max_frame_rate)
            .fold(MIN_FRAME_RATE, u32::max);
        let max_pixels = layers
            .iter()
            .map(|s| s.total_pixels())
            .fold(MIN_PIXELS, u64::max);

        layers.sort_by(|a, b| ladder_order(pref.degradation, a, b, max_fps, max_pixels));

        let mut last: Option<&StreamDescriptor> = None;
        for info in layers {
            if let Some(l) = last {
                let fps_drop = l.max_frame_rate > info.max_frame_rate + 2;
                if fps_drop || info.total_pixels() < l.total_pixels() {
                    trace!("Skip layer {} in upgrade path", info.stream_id);
                    remove.insert(info.stream_id);
                    continue;
                }
            }
            last = Some(info);
        }
    }

    streams
        .into_iter()
        .filter(|s| !remove.contains(&s.stream_id))
        .collect()
}

fn ladder_order(
    degradation: Degradation,
    a: &StreamDescriptor,
    b: &StreamDescriptor,
    max_fps: u32,
    max_pixels: u64,
) -> Ordering {
    match degradation {
        // To upgrade resolution first, order by frame rate and only by resolution
        // when frame rates are close.
        Degradation::MaintainResolution => {
            if a.max_frame_rate.abs_diff(b.max_frame_rate) < 2 {
                a.total_pixels().cmp(&b.total_pixels())
            } else {
                a.max_frame_rate.cmp(&b.max_frame_rate)
            }
        }
        Degradation::MaintainFramerate => {
            if a.total_pixels() == b.total_pixels() {
                a.max_frame_rate.cmp(&b.max_frame_rate)
            } else {
                a.total_pixels().cmp(&b.total_pixels())
            }
        }
        Degradation::Balanced => {
            let wa = balanced_weight(a, max_fps, max_pixels);
            let wb = balanced_weight(b, max_fps, max_pixels);
            wa.total_cmp(&wb)
        }
    }
}

/// Bitrate weighted so that low layers lean towards resolution and high layers
/// towards frame rate.
fn balanced_weight(s: &StreamDescriptor, max_fps: u32, max_pixels: u64) -> f64 {
    // Higher prefers resolution at low rates.
    const FRAMERATE_EXPONENT: f64 = 5.0;
    // Higher prefers frame rate at high rates.
    const RESOLUTION_BASE: f64 = 2.0;

    let fps = s.max_frame_rate as f64 / max_fps as f64;
    let pixels = s.total_pixels() as f64 / max_pixels as f64;
    let exponent = FRAMERATE_EXPONENT * fps * (RESOLUTION_BASE * 2.0).powf(pixels);

    s.avg_bitrate.as_kbps() * 2.0_f64.powf(exponent)
}
