use crate::catalog::StreamDescriptor;
use crate::{Bitrate, Preferences};

/// Budget bookkeeping for one evaluation pass.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Rates {
    /// Budget for the pass.
    pub target: Bitrate,
    /// Sum of averages chosen so far.
    pub chosen_total: Bitrate,
    /// Cost of the first upgrade we could not afford. Zero if none.
    pub delta_to_next_upgrade: Bitrate,
}

impl Rates {
    pub fn new(target: Bitrate) -> Self {
        Rates {
            target,
            ..Default::default()
        }
    }

    fn fits(&self, extra: Bitrate) -> bool {
        self.chosen_total + extra <= self.target
    }

    fn record_delta(
        &mut self,
        delta: Bitrate,
        candidate: &StreamDescriptor,
        upgrade: &mut Option<StreamDescriptor>,
    ) {
        if self.delta_to_next_upgrade.is_zero() {
            self.delta_to_next_upgrade = delta;
            *upgrade = Some(candidate.clone());
        }
    }
}

/// Fill `chosen` band by band in priority order.
///
/// `candidates` must be sorted by ascending bitrate. Returns the stream of the first
/// unaffordable subscribe or upgrade, which is what a probe would try.
pub(crate) fn priority_policy(
    rates: &mut Rates,
    candidates: &[StreamDescriptor],
    prefs: &Preferences,
    chosen: &mut Vec<StreamDescriptor>,
) -> Option<StreamDescriptor> {
    let mut upgrade = None;
    let highest = prefs.highest_priority()?;

    for priority in prefs.priorities() {
        // Lowest affordable layer per group.
        for pref in prefs.band(priority) {
            for info in candidates.iter().filter(|s| s.attendee_id == pref.attendee_id) {
                if chosen.iter().any(|s| s.group_id == info.group_id) {
                    continue;
                }
                if rates.fits(info.avg_bitrate) {
                    chosen.push(info.clone());
                    rates.chosen_total += info.avg_bitrate;
                } else {
                    rates.record_delta(info.avg_bitrate, info, &mut upgrade);
                }
            }
        }

        // Upgrade within the band.
        for pref in prefs.band(priority) {
            for info in candidates.iter().filter(|s| s.attendee_id == pref.attendee_id) {
                let Some(idx) = chosen.iter().position(|s| {
                    s.group_id == info.group_id
                        && s.max_bitrate <= info.max_bitrate
                        && s.avg_bitrate < info.avg_bitrate
                }) else {
                    continue;
                };

                if !has_simulcast(candidates, info)
                    || !pref.target_size.allows(info.avg_bitrate, info.is_content())
                {
                    trace!(
                        "Stream {} not an upgrade within target {:?}",
                        info.stream_id,
                        pref.target_size
                    );
                    continue;
                }

                let increase = info.avg_bitrate - chosen[idx].avg_bitrate;
                if rates.fits(increase) {
                    rates.chosen_total += increase;
                    chosen[idx] = info.clone();
                } else {
                    rates.record_delta(increase, info, &mut upgrade);
                }
            }
        }

        // Lower bands get nothing until the top band is fully served.
        if priority == highest && !rates.delta_to_next_upgrade.is_zero() {
            break;
        }
    }

    upgrade
}

fn has_simulcast(candidates: &[StreamDescriptor], info: &StreamDescriptor) -> bool {
    candidates
        .iter()
        .filter(|s| s.attendee_id == info.attendee_id && s.group_id == info.group_id)
        .count()
        > 1
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::catalog::StreamSource;
    use crate::{Preference, TargetSize};

    fn layer(id: u32, group: u32, att: &str, kbps: u64) -> StreamDescriptor {
        let s = StreamSource::video(id, group, att, Bitrate::kbps(kbps));
        StreamDescriptor {
            stream_id: s.stream_id,
            group_id: s.group_id,
            attendee_id: s.attendee_id,
            max_bitrate: s.max_bitrate,
            avg_bitrate: s.max_bitrate,
            max_frame_rate: s.max_frame_rate,
            width: 0,
            height: 0,
            disabled_by_webrtc: false,
            disabled_by_uplink_policy: false,
        }
    }

    fn sorted(mut v: Vec<StreamDescriptor>) -> Vec<StreamDescriptor> {
        v.sort_by(|a, b| {
            a.max_bitrate
                .total_cmp(&b.max_bitrate)
                .then(a.stream_id.cmp(&b.stream_id))
        });
        v
    }

    fn prefs(v: &[(&str, u32, TargetSize)]) -> Preferences {
        let mut b = Preferences::builder();
        for (a, p, t) in v {
            b.add(Preference::new(*a, *p, *t));
        }
        b.build()
    }

    fn run(target: u64, c: &[StreamDescriptor], p: &Preferences) -> (Rates, Vec<u32>, Option<u32>) {
        let mut rates = Rates::new(Bitrate::kbps(target));
        let mut chosen = vec![];
        let up = priority_policy(&mut rates, c, p, &mut chosen);
        let ids = chosen.iter().map(|s| *s.stream_id).collect();
        (rates, ids, up.map(|s| *s.stream_id))
    }

    #[test]
    fn picks_highest_affordable_layer() {
        let c = sorted(vec![layer(1, 1, "a", 100), layer(2, 1, "a", 300)]);
        let p = prefs(&[("a", 1, TargetSize::High)]);
        let (rates, ids, up) = run(2000, &c, &p);
        assert_eq!(ids, vec![2]);
        assert_eq!(up, None);
        assert!(rates.delta_to_next_upgrade.is_zero());
    }

    #[test]
    fn records_first_unaffordable_upgrade() {
        let c = sorted(vec![layer(1, 1, "a", 100), layer(2, 1, "a", 300)]);
        let p = prefs(&[("a", 1, TargetSize::High)]);
        let (rates, ids, up) = run(250, &c, &p);
        assert_eq!(ids, vec![1]);
        assert_eq!(up, Some(2));
        assert_eq!(rates.delta_to_next_upgrade, Bitrate::kbps(200));
    }

    #[test]
    fn target_size_caps_upgrade() {
        let c = sorted(vec![layer(1, 1, "a", 200), layer(2, 1, "a", 1000)]);
        let p = prefs(&[("a", 1, TargetSize::Medium)]);
        let (rates, ids, up) = run(5000, &c, &p);
        assert_eq!(ids, vec![1]);
        assert_eq!(up, None);
        assert!(rates.delta_to_next_upgrade.is_zero());
    }

    #[test]
    fn strict_priority_no_borrowing_down() {
        let c = sorted(vec![
            layer(1, 1, "a", 100),
            layer(2, 1, "a", 600),
            layer(3, 2, "b", 50),
        ]);
        let p = prefs(&[("a", 1, TargetSize::High), ("b", 2, TargetSize::High)]);
        let (_, ids, up) = run(500, &c, &p);
        // "a" can't reach its top layer, so "b" gets nothing.
        assert_eq!(ids, vec![1]);
        assert_eq!(up, Some(2));
    }

    #[test]
    fn lower_bands_served_when_top_is_complete() {
        let c = sorted(vec![
            layer(1, 1, "a", 100),
            layer(2, 1, "a", 300),
            layer(3, 2, "b", 50),
            layer(4, 2, "b", 400),
        ]);
        let p = prefs(&[("a", 1, TargetSize::High), ("b", 2, TargetSize::High)]);
        let (rates, ids, up) = run(500, &c, &p);
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(up, Some(4));
        assert_eq!(rates.delta_to_next_upgrade, Bitrate::kbps(350));
    }

    #[test]
    fn randomized_budget_never_exceeded() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..500 {
            let attendees = rng.random_range(1..6);
            let mut c = vec![];
            let mut id = 1;
            let mut pv = vec![];
            for a in 0..attendees {
                let name = format!("att{}", a);
                let layers = rng.random_range(1..4);
                for _ in 0..layers {
                    let kbps = rng.random_range(50..1500);
                    c.push(layer(id, a + 1, &name, kbps));
                    id += 1;
                }
                let size = match rng.random_range(0..3) {
                    0 => TargetSize::Low,
                    1 => TargetSize::Medium,
                    _ => TargetSize::High,
                };
                pv.push(Preference::new(name, rng.random_range(1..4), size));
            }
            let mut b = Preferences::builder();
            for pref in pv {
                b.add(pref);
            }
            let p = b.build();
            let c = sorted(c);

            let target = Bitrate::kbps(rng.random_range(0..4000));
            let mut rates = Rates::new(target);
            let mut chosen = vec![];
            priority_policy(&mut rates, &c, &p, &mut chosen);

            let total: Bitrate = chosen.iter().map(|s| s.avg_bitrate).sum();
            assert!(total <= target, "{} > {}", total, target);
            assert_eq!(total, rates.chosen_total);

            // One layer per group.
            let mut groups: Vec<_> = chosen.iter().map(|s| s.group_id).collect();
            let n = groups.len();
            groups.sort();
            groups.dedup();
            assert_eq!(groups.len(), n);
        }
    }
}
