//! Frame-rate throttling for passive decoders.

/// Accepts presentation timestamps at most once per target frame duration.
///
/// The reference instant moves by exactly one frame duration per accepted
/// timestamp, so accepted frames stay on a grid anchored at the first one
/// however irregular the candidates are.
#[derive(Debug, Clone)]
pub struct SpeedController {
    frame_duration_us: i64,
    reference_us: Option<i64>,
}

impl SpeedController {
    pub fn new(target_fps: u32) -> Self {
        Self {
            frame_duration_us: 1_000_000 / target_fps.max(1) as i64,
            reference_us: None,
        }
    }

    pub fn frame_duration_us(&self) -> i64 {
        self.frame_duration_us
    }

    /// Reference instant of the last accepted frame, if any.
    pub fn reference_us(&self) -> Option<i64> {
        self.reference_us
    }

    /// Whether the frame at `pts_us` should be decoded.
    pub fn test(&mut self, pts_us: i64) -> bool {
        let Some(reference) = self.reference_us else {
            self.reference_us = Some(pts_us);
            return true;
        };
        if pts_us < reference + self.frame_duration_us {
            return false;
        }
        self.reference_us = Some(reference + self.frame_duration_us);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_call_anchors() {
        let mut speed = SpeedController::new(30);
        assert!(speed.test(5_000));
        assert_eq!(speed.reference_us(), Some(5_000));
    }

    #[test]
    fn test_matching_rates_accept_every_tick() {
        let mut speed = SpeedController::new(30);
        let accepted = (0..90)
            .map(|i| i * 1_000_000 / 30)
            .filter(|pts| speed.test(*pts))
            .count();
        assert_eq!(accepted, 90);
    }

    #[test]
    fn test_double_rate_ticks_are_halved() {
        let mut speed = SpeedController::new(30);
        let accepted = (0..60)
            .map(|i| i * 1_000_000 / 60)
            .filter(|pts| speed.test(*pts))
            .count();
        assert_eq!(accepted, 30);
    }

    #[test]
    fn test_late_frame_does_not_move_grid() {
        let mut speed = SpeedController::new(10);
        assert!(speed.test(0));
        assert!(speed.test(350_000));
        assert_eq!(speed.reference_us(), Some(100_000));
        assert!(speed.test(350_000));
        assert!(speed.test(350_000));
        assert!(!speed.test(350_000));
    }

    proptest! {
        #[test]
        fn accepted_frames_stay_on_grid(
            fps in 1u32..120,
            start in 0i64..1_000_000,
            gaps in proptest::collection::vec(0i64..100_000, 1..200),
        ) {
            let mut speed = SpeedController::new(fps);
            let step = speed.frame_duration_us();
            let mut pts = start;
            let mut accepted = 0i64;
            for gap in gaps {
                if speed.test(pts) {
                    prop_assert!(pts >= start + accepted * step);
                    accepted += 1;
                    prop_assert_eq!(speed.reference_us(), Some(start + (accepted - 1) * step));
                }
                pts += gap;
            }
        }
    }
}
