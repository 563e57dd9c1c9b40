use std::time::{Duration, Instant};

use ossm_stroke::pattern::{MotionTarget, Pattern, PatternKind, PatternState};

const MAX_SPEED: u32 = 18_000;
const MAX_ACCELERATION: u32 = 200_000;

fn pattern(kind: PatternKind, speed: i32, stroke: i32, depth: i32, sensation: f32) -> Pattern {
    let mut pattern = Pattern::new(kind);
    pattern.set_speed_limit(MAX_SPEED, MAX_ACCELERATION, 20);
    pattern.set_speed(speed);
    pattern.set_stroke(stroke);
    pattern.set_depth(depth);
    pattern.set_sensation(sensation);
    pattern
}

fn assert_in_bounds(target: &MotionTarget, depth: i32, context: &str) {
    assert!(
        (0..=depth.max(0)).contains(&target.position),
        "{}: position {} outside [0, {}]",
        context,
        target.position,
        depth
    );
    assert!(target.speed <= MAX_SPEED, "{}: speed {}", context, target.speed);
    assert!(
        target.acceleration <= MAX_ACCELERATION,
        "{}: acceleration {}",
        context,
        target.acceleration
    );
}

#[test]
fn targets_stay_within_bounds() {
    let speeds = [0, 1, 250, 3000, 18_000, 1_000_000];
    let strokes = [0, 1, 700, 2760, 9000];
    let depths = [0, 1, 1380, 2760];
    let sensations = [-100.0, -73.5, -1.0, 0.0, 0.4, 50.0, 100.0];

    for kind in PatternKind::ALL {
        for &speed in &speeds {
            for &stroke in &strokes {
                for &depth in &depths {
                    for &sensation in &sensations {
                        let mut pattern = pattern(kind, speed, stroke, depth, sensation);
                        for index in 0..40 {
                            let target = pattern.next_target(index);
                            let context = format!(
                                "{} speed={} stroke={} depth={} sensation={} index={}",
                                kind, speed, stroke, depth, sensation, index
                            );
                            assert_in_bounds(&target, depth, &context);
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn idle_target_is_fixed_while_speed_is_zero() {
    for kind in PatternKind::ALL {
        let mut pattern = pattern(kind, 0, 1000, 2500, 30.0);
        let first = pattern.next_target(0);
        assert!(!first.skip);
        assert_eq!(first.speed, 900);
        assert_eq!(first.acceleration, 100_000);
        for index in [1, 2, 7, 100, 101] {
            assert_eq!(pattern.next_target(index), first, "{}", kind);
        }
    }
}

#[test]
fn idle_position_depends_on_pattern() {
    let idle = |kind, sensation| pattern(kind, 0, 1000, 2500, sensation).next_target(0).position;
    assert_eq!(idle(PatternKind::SimplePenetration, 0.0), 0);
    assert_eq!(idle(PatternKind::Deeper, 0.0), 1500);
    assert_eq!(idle(PatternKind::Insist, -40.0), 1500);
    // short stroke in front: depth minus 60% of the stroke
    assert_eq!(idle(PatternKind::Insist, 40.0), 1900);
}

#[test]
fn positions_alternate_with_index_parity() {
    // (kind, odd index, even index)
    let cases = [
        (PatternKind::SimplePenetration, 2500, 0),
        (PatternKind::RoboStroke, 1500, 2500),
        (PatternKind::TeasingPounding, 1500, 2500),
    ];
    for (kind, odd, even) in cases {
        let mut pattern = pattern(kind, 4000, 1000, 2500, 20.0);
        for index in 0..20 {
            let expected = if index % 2 == 1 { odd } else { even };
            assert_eq!(pattern.next_target(index).position, expected, "{} index {}", kind, index);
        }
    }
}

#[test]
fn neutral_sensation_splits_time_evenly() {
    for kind in [PatternKind::TeasingPounding, PatternKind::HalfnHalf] {
        let mut pattern = pattern(kind, 2000, 1000, 2500, 0.0);
        pattern.next_target(0);
        let timing = match pattern.diagnostics() {
            PatternState::TeasingPounding(p) => *p.timing(),
            PatternState::HalfnHalf(p) => *p.timing(),
            other => panic!("unexpected state {:?}", other),
        };
        assert_eq!(timing.time_of_in_stroke, timing.time_of_out_stroke);
        assert_eq!(timing.time_of_in_stroke, timing.time_of_stroke / 2.0);
    }
}

#[test]
fn deeper_ramps_through_eleven_rungs() {
    let mut pattern = pattern(PatternKind::Deeper, 2000, 110, 500, 0.0);
    let mut amplitudes = Vec::new();
    for index in 0..44 {
        let target = pattern.next_target(index);
        if let PatternState::Deeper(deeper) = pattern.diagnostics() {
            assert_eq!(deeper.rungs(), 11);
            assert_eq!(deeper.slope(), 10);
            if index % 2 == 0 {
                amplitudes.push(deeper.amplitude());
                assert_eq!(target.position, 390 + deeper.amplitude());
            } else {
                assert_eq!(target.position, 390);
            }
        }
    }
    let ramp: Vec<i32> = (1..=11).map(|rung| rung * 10).collect();
    assert_eq!(amplitudes.len(), 22);
    assert_eq!(amplitudes[..11], ramp[..]);
    assert_eq!(amplitudes[11..], ramp[..]);
}

#[test]
fn stop_n_go_pause_follows_sensation() {
    let pause = |sensation| match pattern(PatternKind::StopNGo, 2000, 1000, 2500, sensation).diagnostics() {
        PatternState::StopNGo(p) => p.pause(),
        other => panic!("unexpected state {:?}", other),
    };
    assert_eq!(pause(-100.0), Duration::from_millis(100));
    assert_eq!(pause(0.0), Duration::from_millis(5050));
    assert_eq!(pause(100.0), Duration::from_millis(10_000));
}

#[test]
fn stop_n_go_holds_still_during_the_pause() {
    let mut pattern = pattern(PatternKind::StopNGo, 2000, 1000, 2500, -100.0);
    let t0 = Instant::now();
    assert!(!pattern.next_target_at(0, t0).skip);
    // first series is a single stroke, the pause starts once out
    let out = pattern.next_target_at(1, t0);
    assert!(!out.skip);
    assert_eq!(out.position, 1500);

    let held = pattern.next_target_at(2, t0 + Duration::from_millis(99));
    assert!(held.skip);
    assert_eq!(held.position, 1500);
    assert!(held.speed > 0);

    let resumed = pattern.next_target_at(2, t0 + Duration::from_millis(100));
    assert!(!resumed.skip);
    assert_eq!(resumed.position, 2500);
}

#[test]
fn insist_direction_follows_sensation_sign() {
    for (sensation, in_front) in [(50.0, true), (-50.0, false)] {
        let mut pattern = pattern(PatternKind::Insist, 2000, 1000, 2500, sensation);
        pattern.next_target(0);
        match pattern.diagnostics() {
            PatternState::Insist(insist) => {
                assert_eq!(insist.stroke_in_front(), in_front);
                assert_eq!(insist.real_stroke(), 500);
                assert_eq!(insist.stroke_fraction(), 0.5);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }
}

#[test]
fn repeated_setters_change_nothing() {
    for kind in PatternKind::ALL {
        let mut once = pattern(kind, 3000, 1200, 2600, 35.0);
        let mut twice = pattern(kind, 3000, 1200, 2600, 35.0);
        twice.set_speed(3000);
        twice.set_stroke(1200);
        twice.set_depth(2600);
        twice.set_sensation(35.0);
        twice.set_sensation(35.0);

        let t0 = Instant::now();
        for index in 0..30 {
            let now = t0 + Duration::from_millis(index as u64 * 50);
            assert_eq!(once.next_target_at(index, now), twice.next_target_at(index, now), "{}", kind);
        }
    }
}

#[test]
fn names_parse_back_to_kinds() {
    for (index, kind) in PatternKind::ALL.into_iter().enumerate() {
        assert_eq!(kind.name().parse::<PatternKind>().unwrap(), kind);
        assert_eq!(index.to_string().parse::<PatternKind>().unwrap(), kind);
        assert_eq!(Pattern::from(kind).name(), kind.name());
    }
    assert!("7".parse::<PatternKind>().is_err());
}
