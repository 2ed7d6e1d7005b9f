//! Audio mute decisions across the units of one bake.

/// Collects one mute answer per unit and decides whether the output needs
/// an audio track at all.
#[derive(Debug, Default, Clone)]
pub struct MuteCalculator {
    answers: Vec<(String, bool)>,
}

impl MuteCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a unit and return whether its audio is muted: either the
    /// user asked for it or the source has nothing to play.
    pub fn add_entry(&mut self, tag: impl Into<String>, mute_preference: bool, has_audio: bool) -> bool {
        let muted = mute_preference || !has_audio;
        self.answers.push((tag.into(), muted));
        muted
    }

    /// True when at least one recorded unit plays sound.
    pub fn should_sound_at_least_one(&self) -> bool {
        self.answers.iter().any(|(_, muted)| !muted)
    }

    /// Tags of the units that play sound, in insertion order.
    pub fn sounding_tags(&self) -> impl Iterator<Item = &str> {
        self.answers
            .iter()
            .filter(|(_, muted)| !muted)
            .map(|(tag, _)| tag.as_str())
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answers_follow_preference_and_audio_presence() {
        let mut calc = MuteCalculator::new();
        assert!(calc.add_entry("file1", true, true));
        assert!(calc.add_entry("file2", true, false));
        assert!(calc.add_entry("file3", false, false));
        assert!(!calc.add_entry("file4", false, true));
        assert!(calc.should_sound_at_least_one());
    }

    #[test]
    fn test_all_muted_means_no_audio() {
        let mut calc = MuteCalculator::new();
        assert!(calc.add_entry("file1", true, true));
        assert!(calc.add_entry("file2", true, false));
        assert!(calc.add_entry("file3", false, false));
        assert!(calc.add_entry("file4", false, false));
        assert!(!calc.should_sound_at_least_one());
    }

    #[test]
    fn test_all_sounding() {
        let mut calc = MuteCalculator::new();
        for tag in ["file1", "file2", "file3", "file4"] {
            assert!(!calc.add_entry(tag, false, true));
        }
        assert!(calc.should_sound_at_least_one());
        assert_eq!(calc.sounding_tags().count(), 4);
    }

    #[test]
    fn test_mixed_answers() {
        let mut calc = MuteCalculator::new();
        assert!(calc.add_entry("file1", true, true));
        assert!(calc.add_entry("file2", true, false));
        assert!(calc.add_entry("file3", false, false));
        assert!(!calc.add_entry("file4", false, true));
        assert!(calc.add_entry("file5", true, true));
        assert!(calc.add_entry("file6", true, true));
        assert!(!calc.add_entry("file7", false, true));
        assert!(calc.should_sound_at_least_one());
        assert_eq!(calc.sounding_tags().collect::<Vec<_>>(), vec!["file4", "file7"]);
    }

    #[test]
    fn test_same_source_under_several_tags() {
        let mut calc = MuteCalculator::new();
        assert!(calc.add_entry("file1", true, true));
        assert!(calc.add_entry("file1_1", true, true));
        assert!(!calc.add_entry("file1_2", false, true));
        assert!(calc.should_sound_at_least_one());
    }

    #[test]
    fn test_empty_calculator_is_silent() {
        let calc = MuteCalculator::new();
        assert!(calc.is_empty());
        assert!(!calc.should_sound_at_least_one());
    }
}
