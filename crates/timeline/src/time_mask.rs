//! Visibility index over a template's units.
//!
//! Each unit is addressed by a [`UnitId`], its index in the template. The
//! bake loop keys every per-unit collection (layers, decoders) by that id
//! so a tick never hashes tag strings.

use std::collections::HashMap;

use crate::unit::TimelineUnit;

/// Stable id of a unit within one template snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub usize);

impl UnitId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    start_ms: u64,
    end_ms: u64,
}

impl Interval {
    fn contains(&self, t_ms: i64) -> bool {
        t_ms >= 0 && (t_ms as u64) >= self.start_ms && (t_ms as u64) < self.end_ms
    }
}

/// Visibility of every unit at one timestamp, indexed by [`UnitId`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Visibility {
    flags: Vec<bool>,
}

impl Visibility {
    pub fn is_visible(&self, id: UnitId) -> bool {
        self.flags.get(id.0).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (UnitId, bool)> + '_ {
        self.flags.iter().enumerate().map(|(i, v)| (UnitId(i), *v))
    }

    pub fn visible_ids(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.iter().filter(|(_, v)| *v).map(|(id, _)| id)
    }

    pub fn visible_count(&self) -> usize {
        self.flags.iter().filter(|v| **v).count()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Build a visibility set by hand (tests, custom drivers).
    pub fn from_flags(flags: Vec<bool>) -> Self {
        Self { flags }
    }
}

/// Status entry returned by [`TimeMask::visibility_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityStatus<'a> {
    pub tag: &'a str,
    pub visible: bool,
}

/// Derived index answering "which units are visible at `t`".
///
/// Built once from a frozen unit set; the unit set cannot change underneath
/// it, so queries are a pure function of the timestamp.
#[derive(Debug, Clone)]
pub struct TimeMask {
    tags: Vec<String>,
    intervals: Vec<Interval>,
    index: HashMap<String, UnitId>,
    duration_ms: u64,
}

impl TimeMask {
    pub fn from_units(units: &[TimelineUnit]) -> Self {
        let tags: Vec<String> = units.iter().map(|u| u.tag.clone()).collect();
        let intervals: Vec<Interval> = units
            .iter()
            .map(|u| Interval {
                start_ms: u.start_delay_ms,
                end_ms: u.end_ms(),
            })
            .collect();
        let index = tags
            .iter()
            .enumerate()
            .map(|(i, tag)| (tag.clone(), UnitId(i)))
            .collect();
        let duration_ms = intervals.iter().map(|i| i.end_ms).max().unwrap_or(0);

        Self {
            tags,
            intervals,
            index,
            duration_ms,
        }
    }

    /// Total timeline duration: the latest unit end.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn id_of(&self, tag: &str) -> Option<UnitId> {
        self.index.get(tag).copied()
    }

    pub fn tag_of(&self, id: UnitId) -> Option<&str> {
        self.tags.get(id.0).map(String::as_str)
    }

    /// Visibility of all units at `t_ms`.
    pub fn visibility_at(&self, t_ms: i64) -> Visibility {
        Visibility {
            flags: self.intervals.iter().map(|i| i.contains(t_ms)).collect(),
        }
    }

    /// Tagged visibility of all units at `t_ms`, in unit order.
    pub fn visibility_status(&self, t_ms: i64) -> Vec<VisibilityStatus<'_>> {
        self.tags
            .iter()
            .zip(&self.intervals)
            .map(|(tag, interval)| VisibilityStatus {
                tag,
                visible: interval.contains(t_ms),
            })
            .collect()
    }

    pub fn is_visible(&self, tag: &str, t_ms: i64) -> bool {
        self.id_of(tag)
            .map(|id| self.intervals[id.0].contains(t_ms))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_units() -> Vec<TimelineUnit> {
        vec![
            TimelineUnit::new("a", "a.mp4", 1000),
            TimelineUnit::new("b", "b.mp4", 1000).with_start_delay(1000),
        ]
    }

    #[test]
    fn test_duration_is_latest_end() {
        let mask = TimeMask::from_units(&two_units());
        assert_eq!(mask.duration_ms(), 2000);
        assert_eq!(TimeMask::from_units(&[]).duration_ms(), 0);
    }

    #[test]
    fn test_handover_at_boundary() {
        let mask = TimeMask::from_units(&two_units());
        assert!(mask.is_visible("a", 999));
        assert!(!mask.is_visible("b", 999));
        assert!(!mask.is_visible("a", 1000));
        assert!(mask.is_visible("b", 1000));
        assert!(!mask.is_visible("b", 2000));
    }

    #[test]
    fn test_status_follows_unit_order() {
        let mask = TimeMask::from_units(&two_units());
        let status = mask.visibility_status(1500);
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].tag, "a");
        assert!(!status[0].visible);
        assert_eq!(status[1].tag, "b");
        assert!(status[1].visible);
    }

    #[test]
    fn test_ids_are_unit_indices() {
        let mask = TimeMask::from_units(&two_units());
        assert_eq!(mask.id_of("b"), Some(UnitId(1)));
        assert_eq!(mask.tag_of(UnitId(0)), Some("a"));
        assert_eq!(mask.id_of("ghost"), None);

        let visibility = mask.visibility_at(10);
        assert!(visibility.is_visible(UnitId(0)));
        assert!(!visibility.is_visible(UnitId(1)));
        assert!(!visibility.is_visible(UnitId(7)));
        assert_eq!(visibility.visible_ids().collect::<Vec<_>>(), vec![UnitId(0)]);
    }

    #[test]
    fn test_overlapping_units() {
        let units = vec![
            TimelineUnit::new("bg", "bg.png", 3000),
            TimelineUnit::new("fg", "fg.mp4", 1000).with_start_delay(500),
        ];
        let mask = TimeMask::from_units(&units);
        assert_eq!(mask.visibility_at(700).visible_count(), 2);
        assert_eq!(mask.visibility_at(1600).visible_count(), 1);
        assert_eq!(mask.visibility_at(-33).visible_count(), 0);
    }
}
