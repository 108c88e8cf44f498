//! Gesture planning
//!
//! A request becomes a list of timed frames (or key transitions) before any
//! backend is involved. Plans are plain data, so the router can replay the
//! same plan from the start on every backend it falls back to.

use std::time::Duration;

use touch_protocol::{
    GestureKind, GesturePhase, KEYBOARD_USAGE_PAGE, KeyStroke, PRIMARY_FINGER, Point, TouchStep,
    VirtualKeyCode,
};

use crate::backends::KeyTransition;
use crate::codec::FrameEntry;
use crate::config::InjectorConfig;
use crate::platform::ScreenMetrics;
use crate::session::MultiTouchSession;
use crate::{InjectorError, InjectorResult};

/// One finger's part of a planned frame, in points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedTouch {
    pub finger: u8,
    pub phase: GesturePhase,
    pub at: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFrame {
    /// Offset from the start of the gesture
    pub offset: Duration,
    pub touches: Vec<PlannedTouch>,
}

impl PlannedFrame {
    fn single(offset: Duration, phase: GesturePhase, at: Point) -> Self {
        Self {
            offset,
            touches: vec![PlannedTouch {
                finger: PRIMARY_FINGER,
                phase,
                at,
            }],
        }
    }

    /// Run the frame through `session`, producing entries that carry the
    /// session's touch identities
    pub fn apply(&self, session: &mut MultiTouchSession) -> InjectorResult<Vec<FrameEntry>> {
        self.touches
            .iter()
            .map(|t| {
                let (x, y) = (t.at.x, t.at.y);
                let contact = match t.phase {
                    GesturePhase::Down => session.down(t.finger, x, y)?,
                    GesturePhase::Move => session.move_to(t.finger, x, y)?,
                    GesturePhase::Up => session.lift(t.finger, Some((x, y)))?,
                };
                Ok(FrameEntry {
                    phase: t.phase,
                    contact,
                })
            })
            .collect()
    }

    /// Phase recorded for the frame: any down wins, then any up
    pub fn phase(&self) -> GesturePhase {
        let has = |p| self.touches.iter().any(|t| t.phase == p);
        if has(GesturePhase::Down) {
            GesturePhase::Down
        } else if has(GesturePhase::Up) {
            GesturePhase::Up
        } else {
            GesturePhase::Move
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TouchPlan {
    pub gesture: &'static str,
    pub frames: Vec<PlannedFrame>,
}

impl TouchPlan {
    pub fn duration(&self) -> Duration {
        self.frames.last().map(|f| f.offset).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedKey {
    pub offset: Duration,
    pub key: KeyTransition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyPlan {
    pub gesture: &'static str,
    pub keys: Vec<PlannedKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Touch(TouchPlan),
    Keys(KeyPlan),
}

impl Plan {
    pub fn gesture(&self) -> &'static str {
        match self {
            Plan::Touch(plan) => plan.gesture,
            Plan::Keys(plan) => plan.gesture,
        }
    }
}

/// Builds plans using the configured timings and screen bounds
#[derive(Debug, Clone)]
pub struct GesturePlanner {
    metrics: ScreenMetrics,
    tap_dwell: Duration,
    double_tap_gap: Duration,
    swipe_duration: Duration,
    drag_duration: Duration,
    long_press_duration: Duration,
    swipe_steps: u32,
    drag_steps: u32,
    key_interval: Duration,
}

impl GesturePlanner {
    pub fn new(config: &InjectorConfig, metrics: ScreenMetrics) -> Self {
        Self {
            metrics,
            tap_dwell: config.tap_dwell(),
            double_tap_gap: config.double_tap_gap(),
            swipe_duration: Duration::from_millis(config.swipe_duration_ms),
            drag_duration: Duration::from_millis(config.drag_duration_ms),
            long_press_duration: Duration::from_millis(config.long_press_duration_ms),
            swipe_steps: config.swipe_steps,
            drag_steps: config.drag_steps,
            key_interval: config.key_interval(),
        }
    }

    pub fn plan(&self, kind: &GestureKind) -> InjectorResult<Plan> {
        let ms = |v: &Option<u64>| v.map(Duration::from_millis);
        Ok(match kind {
            GestureKind::Tap { at } => Plan::Touch(self.tap(*at)?),
            GestureKind::DoubleTap { at } => Plan::Touch(self.double_tap(*at)?),
            GestureKind::LongPress { at, duration_ms } => {
                Plan::Touch(self.long_press(*at, ms(duration_ms))?)
            }
            GestureKind::Swipe {
                from,
                to,
                duration_ms,
            } => Plan::Touch(self.swipe(*from, *to, ms(duration_ms))?),
            GestureKind::Drag {
                from,
                to,
                duration_ms,
            } => Plan::Touch(self.drag(*from, *to, ms(duration_ms))?),
            GestureKind::MultiTouch { steps } => Plan::Touch(self.multi_touch(steps)?),
            GestureKind::Key { usage, down } => Plan::Keys(self.key(*usage, *down)),
            GestureKind::Text { text } => Plan::Keys(self.text(text)?),
        })
    }

    pub fn tap(&self, at: Point) -> InjectorResult<TouchPlan> {
        let at = self.metrics.clamp(at)?;
        Ok(TouchPlan {
            gesture: "tap",
            frames: vec![
                PlannedFrame::single(Duration::ZERO, GesturePhase::Down, at),
                PlannedFrame::single(self.tap_dwell, GesturePhase::Up, at),
            ],
        })
    }

    pub fn double_tap(&self, at: Point) -> InjectorResult<TouchPlan> {
        let at = self.metrics.clamp(at)?;
        let second = self.tap_dwell + self.double_tap_gap;
        Ok(TouchPlan {
            gesture: "double_tap",
            frames: vec![
                PlannedFrame::single(Duration::ZERO, GesturePhase::Down, at),
                PlannedFrame::single(self.tap_dwell, GesturePhase::Up, at),
                PlannedFrame::single(second, GesturePhase::Down, at),
                PlannedFrame::single(second + self.tap_dwell, GesturePhase::Up, at),
            ],
        })
    }

    /// Down, hold, Up. No intermediate moves.
    pub fn long_press(&self, at: Point, duration: Option<Duration>) -> InjectorResult<TouchPlan> {
        let at = self.metrics.clamp(at)?;
        let duration = duration.unwrap_or(self.long_press_duration);
        Ok(TouchPlan {
            gesture: "long_press",
            frames: vec![
                PlannedFrame::single(Duration::ZERO, GesturePhase::Down, at),
                PlannedFrame::single(duration, GesturePhase::Up, at),
            ],
        })
    }

    pub fn swipe(
        &self,
        from: Point,
        to: Point,
        duration: Option<Duration>,
    ) -> InjectorResult<TouchPlan> {
        self.stroke(
            "swipe",
            from,
            to,
            duration.unwrap_or(self.swipe_duration),
            self.swipe_steps,
        )
    }

    pub fn drag(
        &self,
        from: Point,
        to: Point,
        duration: Option<Duration>,
    ) -> InjectorResult<TouchPlan> {
        self.stroke(
            "drag",
            from,
            to,
            duration.unwrap_or(self.drag_duration),
            self.drag_steps,
        )
    }

    /// Down at `from`, `steps` evenly spaced moves ending at `to`, Up at `to`
    fn stroke(
        &self,
        gesture: &'static str,
        from: Point,
        to: Point,
        duration: Duration,
        steps: u32,
    ) -> InjectorResult<TouchPlan> {
        let from = self.metrics.clamp(from)?;
        let to = self.metrics.clamp(to)?;

        let mut frames = Vec::with_capacity(steps as usize + 2);
        frames.push(PlannedFrame::single(Duration::ZERO, GesturePhase::Down, from));
        for k in 1..=steps {
            let t = f64::from(k) / f64::from(steps);
            frames.push(PlannedFrame::single(
                duration * k / steps,
                GesturePhase::Move,
                from.lerp(to, t),
            ));
        }
        frames.push(PlannedFrame::single(duration, GesturePhase::Up, to));

        Ok(TouchPlan { gesture, frames })
    }

    /// One frame per script step carrying every finger in contact; fingers
    /// not named by the step are repeated as stationary moves. Fingers still
    /// down at the end are lifted in a final frame.
    pub fn multi_touch(&self, steps: &[TouchStep]) -> InjectorResult<TouchPlan> {
        if steps.is_empty() {
            return Err(InjectorError::EmptyGesture);
        }

        let mut session = MultiTouchSession::new();
        let mut frames = Vec::with_capacity(steps.len() + 1);
        let mut offset = Duration::ZERO;

        for step in steps {
            let at = self.metrics.clamp(Point::new(step.x, step.y))?;
            let mut touches: Vec<PlannedTouch> = session
                .contacts()
                .filter(|c| c.point.finger != step.finger)
                .map(|c| PlannedTouch {
                    finger: c.point.finger,
                    phase: GesturePhase::Move,
                    at: c.point.position(),
                })
                .collect();
            touches.push(PlannedTouch {
                finger: step.finger,
                phase: step.phase,
                at,
            });
            touches.sort_by_key(|t| t.finger);

            let frame = PlannedFrame { offset, touches };
            frame.apply(&mut session)?;
            frames.push(frame);
            offset += Duration::from_millis(step.hold_ms);
        }

        if !session.is_empty() {
            let frame = PlannedFrame {
                offset,
                touches: session
                    .contacts()
                    .map(|c| PlannedTouch {
                        finger: c.point.finger,
                        phase: GesturePhase::Up,
                        at: c.point.position(),
                    })
                    .collect(),
            };
            frame.apply(&mut session)?;
            frames.push(frame);
        }

        Ok(TouchPlan {
            gesture: "multi_touch",
            frames,
        })
    }

    pub fn key(&self, usage: u16, down: bool) -> KeyPlan {
        KeyPlan {
            gesture: "key",
            keys: vec![PlannedKey {
                offset: Duration::ZERO,
                key: KeyTransition {
                    usage_page: KEYBOARD_USAGE_PAGE,
                    usage,
                    down,
                },
            }],
        }
    }

    /// Press and release per character, wrapped in shift where needed. Every
    /// character is mapped before anything is planned.
    pub fn text(&self, text: &str) -> InjectorResult<KeyPlan> {
        let strokes = text
            .chars()
            .map(KeyStroke::from_char)
            .collect::<Result<Vec<_>, _>>()?;

        let shift = VirtualKeyCode::LeftShift.usage();
        let mut transitions = Vec::with_capacity(strokes.len() * 4);
        for stroke in strokes {
            let usage = stroke.key.usage();
            if stroke.shift {
                transitions.push((shift, true));
            }
            transitions.push((usage, true));
            transitions.push((usage, false));
            if stroke.shift {
                transitions.push((shift, false));
            }
        }

        let keys = transitions
            .into_iter()
            .enumerate()
            .map(|(i, (usage, down))| PlannedKey {
                offset: self.key_interval * i as u32,
                key: KeyTransition {
                    usage_page: KEYBOARD_USAGE_PAGE,
                    usage,
                    down,
                },
            })
            .collect();

        Ok(KeyPlan {
            gesture: "text",
            keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> GesturePlanner {
        GesturePlanner::new(&InjectorConfig::default(), ScreenMetrics::default())
    }

    fn phases(plan: &TouchPlan) -> Vec<GesturePhase> {
        plan.frames.iter().map(|f| f.phase()).collect()
    }

    #[test]
    fn test_tap_is_down_then_up_after_dwell() {
        let plan = planner().tap(Point::new(50.0, 60.0)).unwrap();
        assert_eq!(phases(&plan), vec![GesturePhase::Down, GesturePhase::Up]);
        assert_eq!(plan.frames[1].offset, Duration::from_millis(50));
        assert_eq!(plan.frames[1].touches[0].at, Point::new(50.0, 60.0));
    }

    #[test]
    fn test_double_tap_repeats_after_gap() {
        let plan = planner().double_tap(Point::new(5.0, 5.0)).unwrap();
        assert_eq!(
            phases(&plan),
            vec![GesturePhase::Down, GesturePhase::Up, GesturePhase::Down, GesturePhase::Up]
        );
        assert_eq!(plan.frames[2].offset, Duration::from_millis(170));
        assert_eq!(plan.duration(), Duration::from_millis(220));
    }

    #[test]
    fn test_long_press_has_no_moves() {
        let plan = planner()
            .long_press(Point::new(20.0, 20.0), Some(Duration::from_millis(400)))
            .unwrap();
        assert_eq!(phases(&plan), vec![GesturePhase::Down, GesturePhase::Up]);
        assert_eq!(plan.duration(), Duration::from_millis(400));
    }

    #[test]
    fn test_swipe_interpolates_evenly() {
        let plan = planner()
            .swipe(
                Point::new(10.0, 10.0),
                Point::new(100.0, 100.0),
                Some(Duration::from_millis(300)),
            )
            .unwrap();
        assert_eq!(plan.frames.len(), 22);
        assert_eq!(plan.frames[0].phase(), GesturePhase::Down);
        assert_eq!(plan.frames[21].phase(), GesturePhase::Up);

        for k in 1..=20u32 {
            let frame = &plan.frames[k as usize];
            let expected = 10.0 + 90.0 * f64::from(k) / 20.0;
            assert_eq!(frame.phase(), GesturePhase::Move);
            assert!((frame.touches[0].at.x - expected).abs() < 1e-9);
            assert!((frame.touches[0].at.y - expected).abs() < 1e-9);
            assert_eq!(frame.offset, Duration::from_millis(15) * k);
        }
    }

    #[test]
    fn test_drag_uses_fine_steps() {
        let plan = planner()
            .drag(Point::new(0.0, 0.0), Point::new(10.0, 0.0), None)
            .unwrap();
        assert_eq!(plan.frames.len(), 52);
        assert_eq!(plan.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_points_clamped_into_screen() {
        let plan = planner().tap(Point::new(-40.0, 9000.0)).unwrap();
        assert_eq!(plan.frames[0].touches[0].at, Point::new(0.0, 666.0));
    }

    #[test]
    fn test_non_finite_point_rejected() {
        let result = planner().tap(Point::new(f64::NAN, 1.0));
        assert!(matches!(result, Err(InjectorError::InvalidCoordinates { .. })));
    }

    #[test]
    fn test_multi_touch_carries_active_fingers() {
        let steps = [
            TouchStep::new(1, GesturePhase::Down, 10.0, 10.0),
            TouchStep::new(2, GesturePhase::Down, 50.0, 50.0).hold(30),
            TouchStep::new(2, GesturePhase::Move, 60.0, 60.0),
            TouchStep::new(2, GesturePhase::Up, 60.0, 60.0),
        ];
        let plan = planner().multi_touch(&steps).unwrap();

        // trailing frame lifts finger 1
        assert_eq!(plan.frames.len(), 5);
        assert_eq!(plan.frames[1].touches.len(), 2);
        assert_eq!(plan.frames[1].touches[0].phase, GesturePhase::Move);
        assert_eq!(plan.frames[1].touches[1].phase, GesturePhase::Down);
        assert_eq!(plan.frames[2].offset, Duration::from_millis(30));
        let last = &plan.frames[4];
        assert_eq!(last.touches.len(), 1);
        assert_eq!(last.touches[0].finger, 1);
        assert_eq!(last.touches[0].phase, GesturePhase::Up);
    }

    #[test]
    fn test_multi_touch_reuse_before_lift() {
        let steps = [
            TouchStep::new(2, GesturePhase::Down, 10.0, 10.0),
            TouchStep::new(2, GesturePhase::Down, 20.0, 20.0),
        ];
        let result = planner().multi_touch(&steps);
        assert!(matches!(result, Err(InjectorError::ReuseBeforeLift { finger: 2 })));
    }

    #[test]
    fn test_multi_touch_empty_script() {
        assert!(matches!(planner().multi_touch(&[]), Err(InjectorError::EmptyGesture)));
    }

    #[test]
    fn test_text_wraps_shifted_characters() {
        let plan = planner().text("aB").unwrap();
        let shift = VirtualKeyCode::LeftShift.usage();
        let a = VirtualKeyCode::A.usage();
        let b = VirtualKeyCode::B.usage();
        let seq: Vec<(u16, bool)> = plan.keys.iter().map(|k| (k.key.usage, k.key.down)).collect();
        assert_eq!(
            seq,
            vec![(a, true), (a, false), (shift, true), (b, true), (b, false), (shift, false)]
        );
        assert!(plan.keys.iter().all(|k| k.key.usage_page == KEYBOARD_USAGE_PAGE));
        assert_eq!(plan.keys[5].offset, Duration::from_millis(40));
    }

    #[test]
    fn test_text_rejects_unsupported_character() {
        assert!(matches!(planner().text("hé"), Err(InjectorError::Protocol(_))));
    }
}
