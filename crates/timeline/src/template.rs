//! Live timeline and its frozen template snapshot.

use std::collections::HashSet;

use glcv_common::clock::MAX_TIMELINE_MS;
use glcv_common::error::GlcvError;
use serde::{Deserialize, Serialize};

use crate::unit::TimelineUnit;

/// Frozen snapshot of a timeline, consumed by one bake.
///
/// Edits to the [`Timeline`] it was taken from never reach an existing
/// template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Output aspect ratio (width / height).
    pub aspect_ratio: f32,

    /// Units in placement order.
    pub units: Vec<TimelineUnit>,
}

impl Template {
    /// Create a template, validating it on the way.
    pub fn new(aspect_ratio: f32, units: Vec<TimelineUnit>) -> Result<Self, TimelineError> {
        let template = Self {
            aspect_ratio,
            units,
        };
        template.validate()?;
        Ok(template)
    }

    /// Check the invariants a bake relies on.
    pub fn validate(&self) -> Result<(), TimelineError> {
        if !(self.aspect_ratio.is_finite() && self.aspect_ratio > 0.0) {
            return Err(TimelineError::InvalidAspectRatio(self.aspect_ratio));
        }

        let mut seen = HashSet::with_capacity(self.units.len());
        for unit in &self.units {
            if unit.tag.is_empty() {
                return Err(TimelineError::EmptyTag);
            }
            if !seen.insert(unit.tag.as_str()) {
                return Err(TimelineError::DuplicateTag(unit.tag.clone()));
            }
            let end = unit.start_delay_ms.checked_add(unit.trimmed_duration_ms);
            if end.map_or(true, |end| end > MAX_TIMELINE_MS) || unit.start_clip_ms > MAX_TIMELINE_MS {
                return Err(TimelineError::TooLong(unit.tag.clone()));
            }
        }
        Ok(())
    }

    pub fn unit(&self, tag: &str) -> Option<&TimelineUnit> {
        self.units.iter().find(|u| u.tag == tag)
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Mutable timeline the surrounding application edits.
#[derive(Debug, Clone)]
pub struct Timeline {
    aspect_ratio: f32,
    units: Vec<TimelineUnit>,
}

impl Timeline {
    pub fn new(aspect_ratio: f32) -> Self {
        Self {
            aspect_ratio,
            units: Vec::new(),
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: f32) -> Result<(), TimelineError> {
        if !(aspect_ratio.is_finite() && aspect_ratio > 0.0) {
            return Err(TimelineError::InvalidAspectRatio(aspect_ratio));
        }
        self.aspect_ratio = aspect_ratio;
        Ok(())
    }

    pub fn units(&self) -> &[TimelineUnit] {
        &self.units
    }

    /// Place a new unit. Tags must be unique.
    pub fn add_unit(&mut self, unit: TimelineUnit) -> Result<(), TimelineError> {
        if unit.tag.is_empty() {
            return Err(TimelineError::EmptyTag);
        }
        if self.units.iter().any(|u| u.tag == unit.tag) {
            return Err(TimelineError::DuplicateTag(unit.tag));
        }
        self.units.push(unit);
        Ok(())
    }

    /// Replace a placed unit wholesale, keeping its position.
    pub fn replace_unit(&mut self, unit: TimelineUnit) -> Result<TimelineUnit, TimelineError> {
        let slot = self
            .units
            .iter_mut()
            .find(|u| u.tag == unit.tag)
            .ok_or_else(|| TimelineError::UnknownTag(unit.tag.clone()))?;
        Ok(std::mem::replace(slot, unit))
    }

    pub fn remove_unit(&mut self, tag: &str) -> Result<TimelineUnit, TimelineError> {
        let index = self
            .units
            .iter()
            .position(|u| u.tag == tag)
            .ok_or_else(|| TimelineError::UnknownTag(tag.to_string()))?;
        Ok(self.units.remove(index))
    }

    /// Freeze the current state for a bake.
    pub fn snapshot(&self) -> Template {
        Template {
            aspect_ratio: self.aspect_ratio,
            units: self.units.clone(),
        }
    }
}

/// Errors raised while editing or validating a timeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimelineError {
    #[error("Duplicate unit tag: {0}")]
    DuplicateTag(String),

    #[error("Unknown unit tag: {0}")]
    UnknownTag(String),

    #[error("Unit tag must not be empty")]
    EmptyTag,

    #[error("Invalid aspect ratio: {0}")]
    InvalidAspectRatio(f32),

    #[error("Unit {0} runs past the longest supported timeline")]
    TooLong(String),
}

impl From<TimelineError> for GlcvError {
    fn from(err: TimelineError) -> Self {
        GlcvError::timeline(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(tag: &str) -> TimelineUnit {
        TimelineUnit::new(tag, format!("/media/{tag}.mp4"), 1000)
    }

    #[test]
    fn test_add_rejects_duplicate_tag() {
        let mut timeline = Timeline::new(16.0 / 9.0);
        timeline.add_unit(unit("a")).unwrap();
        let err = timeline.add_unit(unit("a")).unwrap_err();
        assert_eq!(err, TimelineError::DuplicateTag("a".to_string()));
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let mut timeline = Timeline::new(1.0);
        timeline.add_unit(unit("a")).unwrap();
        let snapshot = timeline.snapshot();

        timeline
            .replace_unit(unit("a").with_start_delay(5000))
            .unwrap();
        timeline.add_unit(unit("b")).unwrap();

        assert_eq!(snapshot.units.len(), 1);
        assert_eq!(snapshot.units[0].start_delay_ms, 0);
        assert_eq!(timeline.units()[0].start_delay_ms, 5000);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut timeline = Timeline::new(1.0);
        timeline.add_unit(unit("a")).unwrap();
        timeline.add_unit(unit("b")).unwrap();
        let old = timeline.replace_unit(unit("a").with_z_position(3)).unwrap();
        assert_eq!(old.z_position, 0);
        assert_eq!(timeline.units()[0].tag, "a");
        assert_eq!(timeline.units()[0].z_position, 3);
    }

    #[test]
    fn test_remove_unknown_tag() {
        let mut timeline = Timeline::new(1.0);
        assert!(matches!(
            timeline.remove_unit("ghost"),
            Err(TimelineError::UnknownTag(_))
        ));
    }

    #[test]
    fn test_template_validation() {
        assert!(Template::new(0.0, vec![]).is_err());
        assert!(Template::new(1.0, vec![unit("a"), unit("a")]).is_err());
        assert!(Template::new(1.5, vec![unit("a"), unit("b")]).is_ok());
    }

    #[test]
    fn test_template_rejects_overlong_units() {
        let huge = TimelineUnit::new("a", "/media/a.mp4", 10_000_000_000_000);
        assert_eq!(
            Template::new(1.0, vec![huge]).unwrap_err(),
            TimelineError::TooLong("a".to_string())
        );

        let overflowing = unit("b").with_start_delay(u64::MAX);
        assert!(Template::new(1.0, vec![overflowing]).is_err());

        let fits = TimelineUnit::new("c", "/media/c.mp4", MAX_TIMELINE_MS);
        assert!(Template::new(1.0, vec![fits]).is_ok());
    }

    #[test]
    fn test_timeline_error_converts() {
        let err: GlcvError = TimelineError::EmptyTag.into();
        assert!(err.to_string().contains("must not be empty"));
    }
}
