use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

macro_rules! num_id {
    ($id:ident, $t:ty) => {
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $id($t);

        impl Deref for $id {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<$t> for $id {
            fn from(v: $t) -> Self {
                $id(v)
            }
        }

        impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

num_id!(StreamId, u32);
num_id!(GroupId, u32);
num_id!(Ssrc, u32);
num_id!(TileId, u32);
num_id!(ObserverId, u64);

impl TileId {
    pub(crate) fn next(&self) -> Self {
        TileId(self.0 + 1)
    }
}

impl ObserverId {
    pub(crate) fn next(&self) -> Self {
        ObserverId(self.0 + 1)
    }
}

/// Suffix the signaling layer appends to an attendee id for its content share.
pub const CONTENT_SUFFIX: &str = "#content";

/// Identifies a meeting attendee.
///
/// Attendee ids are opaque strings handed to us by signaling. They are cloned into
/// every descriptor and preference, so the string is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttendeeId(Arc<str>);

impl AttendeeId {
    pub fn new(v: &str) -> Self {
        AttendeeId(v.into())
    }

    /// Whether this id refers to a content share rather than a camera.
    pub fn is_content(&self) -> bool {
        self.0.ends_with(CONTENT_SUFFIX)
    }
}

impl Deref for AttendeeId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for AttendeeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl<'a> From<&'a str> for AttendeeId {
    fn from(v: &'a str) -> Self {
        AttendeeId::new(v)
    }
}

impl From<String> for AttendeeId {
    fn from(v: String) -> Self {
        AttendeeId(v.into())
    }
}

impl fmt::Display for AttendeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for AttendeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttendeeId({})", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn content_share_detection() {
        assert!(AttendeeId::new("abc#content").is_content());
        assert!(!AttendeeId::new("abc").is_content());
        assert!(!AttendeeId::new("#contentabc").is_content());
    }

    #[test]
    fn num_ids_deref() {
        let s: StreamId = 7.into();
        assert_eq!(*s, 7);
        assert_eq!(s.to_string(), "7");
        assert_eq!(TileId::from(1).next(), TileId::from(2));
    }
}
