//! Subscription preferences set by the host application.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AttendeeId, Bitrate};

/// Desired display size of a remote video, mapped to a bitrate ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetSize {
    /// Thumbnail sized, up to 300kbps.
    Low,
    /// Up to 600kbps.
    Medium,
    /// Best available quality. No ceiling.
    High,
}

impl TargetSize {
    /// The bitrate ceiling this size maps to.
    pub fn bitrate(&self) -> Bitrate {
        match self {
            TargetSize::Low => Bitrate::kbps(300),
            TargetSize::Medium => Bitrate::kbps(600),
            TargetSize::High => Bitrate::kbps(1200),
        }
    }

    /// Whether a layer with the given average bitrate may be upgraded to.
    ///
    /// `High` is a request for the best video regardless of the ceiling. Content share
    /// averages run well below their max, so only `Medium` content falls back to the
    /// camera rule.
    pub(crate) fn allows(&self, avg: Bitrate, is_content: bool) -> bool {
        match self {
            TargetSize::High => true,
            _ if !is_content => avg <= self.bitrate(),
            TargetSize::Medium => avg <= self.bitrate(),
            TargetSize::Low => false,
        }
    }
}

/// How to walk the layer ladder when an attendee sends three or more layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Degradation {
    /// Slight preference for resolution, weighted by bitrate.
    #[default]
    Balanced,
    /// Upgrade resolution first, frame rate last.
    MaintainResolution,
    /// Upgrade frame rate first, resolution last.
    MaintainFramerate,
}

/// One attendee's subscription preference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Preference {
    /// Attendee this applies to.
    pub attendee_id: AttendeeId,
    /// Lower is more important. Equal priorities form a band.
    pub priority: u32,
    /// Bitrate ceiling.
    pub target_size: TargetSize,
    /// Layer ordering for 3+ layer senders.
    #[serde(default)]
    pub degradation: Degradation,
}

impl Preference {
    pub fn new(attendee_id: impl Into<AttendeeId>, priority: u32, target_size: TargetSize) -> Self {
        Preference {
            attendee_id: attendee_id.into(),
            priority,
            target_size,
            degradation: Degradation::default(),
        }
    }

    pub fn with_degradation(mut self, degradation: Degradation) -> Self {
        self.degradation = degradation;
        self
    }
}

/// An ordered set of preferences, at most one per attendee.
///
/// Always sorted by ascending priority. Insertion order is kept among equal
/// priorities.
///
/// ```
/// # use downlink_adapt::{Preference, Preferences, TargetSize};
/// let mut b = Preferences::builder();
/// b.add(Preference::new("b", 2, TargetSize::Low));
/// b.add(Preference::new("a", 1, TargetSize::High));
/// let prefs = b.build();
///
/// assert_eq!(prefs.highest_priority(), Some(1));
/// assert_eq!(&*prefs.iter().next().unwrap().attendee_id, "a");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Preference>", into = "Vec<Preference>")]
pub struct Preferences {
    items: Vec<Preference>,
}

impl Preferences {
    pub fn builder() -> PreferencesBuilder {
        PreferencesBuilder::default()
    }

    /// The default set: everyone at priority 1 with `High` target.
    pub fn all_high<'a>(attendees: impl IntoIterator<Item = &'a AttendeeId>) -> Self {
        let mut b = Preferences::builder();
        for a in attendees {
            b.add(Preference::new(a.clone(), 1, TargetSize::High));
        }
        b.build()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preference> + '_ {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn highest_priority(&self) -> Option<u32> {
        self.items.first().map(|p| p.priority)
    }

    pub fn get(&self, attendee_id: &str) -> Option<&Preference> {
        self.items.iter().find(|p| &*p.attendee_id == attendee_id)
    }

    pub fn contains(&self, attendee_id: &str) -> bool {
        self.get(attendee_id).is_some()
    }

    /// Distinct priorities in ascending order.
    pub(crate) fn priorities(&self) -> Vec<u32> {
        let mut v: Vec<u32> = self.items.iter().map(|p| p.priority).collect();
        v.dedup();
        v
    }

    /// All preferences in the given priority band.
    pub(crate) fn band(&self, priority: u32) -> impl Iterator<Item = &Preference> + '_ {
        self.items.iter().filter(move |p| p.priority == priority)
    }

    /// Change this set.
    pub fn modify(&self) -> PreferencesBuilder {
        PreferencesBuilder {
            items: self.items.clone(),
        }
    }
}

/// Structural: same attendee/priority/target triples regardless of order.
impl PartialEq for Preferences {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self.items.iter().all(|p| other.items.contains(p))
    }
}

impl Eq for Preferences {}

/// Goes through the builder, so order and uniqueness hold for any input.
impl From<Vec<Preference>> for Preferences {
    fn from(items: Vec<Preference>) -> Self {
        let mut b = Preferences::builder();
        for pref in items {
            b.add(pref);
        }
        b.build()
    }
}

impl From<Preferences> for Vec<Preference> {
    fn from(prefs: Preferences) -> Self {
        prefs.items
    }
}

impl<'a> IntoIterator for &'a Preferences {
    type Item = &'a Preference;
    type IntoIter = std::slice::Iter<'a, Preference>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl fmt::Display for Preferences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, p) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}:{:?}", p.priority, p.attendee_id, p.target_size)?;
        }
        write!(f, "]")
    }
}

/// Builder for [`Preferences`].
#[derive(Debug, Default)]
pub struct PreferencesBuilder {
    items: Vec<Preference>,
}

impl PreferencesBuilder {
    /// Add a preference. An existing preference for the same attendee is replaced.
    pub fn add(&mut self, pref: Preference) -> &mut Self {
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|p| p.attendee_id == pref.attendee_id)
        {
            *existing = pref;
        } else {
            self.items.push(pref);
        }
        self
    }

    /// Replace the preference of an attendee already added. Unknown attendees are ignored.
    pub fn replace(&mut self, pref: Preference) -> &mut Self {
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|p| p.attendee_id == pref.attendee_id)
        {
            *existing = pref;
        }
        self
    }

    /// Remove the preference for an attendee, if any.
    pub fn remove(&mut self, attendee_id: &str) -> &mut Self {
        self.items.retain(|p| &*p.attendee_id != attendee_id);
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.items.clear();
        self
    }

    pub fn build(&mut self) -> Preferences {
        let mut items = std::mem::take(&mut self.items);
        // Stable, ties keep insertion order.
        items.sort_by_key(|p| p.priority);
        Preferences { items }
    }
}
