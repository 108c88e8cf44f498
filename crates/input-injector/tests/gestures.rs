use std::sync::Arc;
use std::time::Duration;

use input_injector::backends::BackendKind;
use input_injector::codec::{EventMask, HidEvent};
use input_injector::loopback::{
    ChannelMode, DEFAULT_FRONTMOST_PID, FocusChange, Loopback, Payload,
};
use input_injector::{
    FALLBACK_SENDER_ID, FailureKind, GestureInjector, InjectorConfig, RequestProcessor,
    TouchInjector,
};
use touch_protocol::{
    GesturePacket, GesturePhase, GestureRequest, Point, TouchStep, VirtualKeyCode,
};

fn fast_config() -> InjectorConfig {
    InjectorConfig {
        tap_dwell_ms: 1,
        double_tap_gap_ms: 1,
        long_press_duration_ms: 5,
        swipe_duration_ms: 20,
        drag_duration_ms: 20,
        key_interval_ms: 0,
        ..InjectorConfig::default()
    }
}

fn injector(loopback: &Loopback, config: InjectorConfig) -> TouchInjector {
    TouchInjector::new(config, loopback.platform())
}

fn digitizer(event: &HidEvent) -> &input_injector::codec::DigitizerEvent {
    match event {
        HidEvent::Digitizer(e) => e,
        HidEvent::Keyboard(_) => panic!("expected a digitizer event"),
    }
}

#[test]
fn test_tap_is_one_down_and_one_up_on_one_backend() {
    let loopback = Loopback::new();
    let injector = injector(&loopback, fast_config());

    assert!(injector.tap(Point::new(100.0, 200.0), None));

    let attempts = injector.recent_dispatches(0);
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].phase, GesturePhase::Down);
    assert_eq!(attempts[1].phase, GesturePhase::Up);
    assert!(attempts.iter().all(|a| a.success));
    assert_eq!(attempts[0].backend_name(), attempts[1].backend_name());
    assert_eq!(attempts[0].gesture_id, attempts[1].gesture_id);

    // down, liftoff, range teardown
    let events = loopback.hid_events(BackendKind::DirectBus);
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.sender_id() == FALLBACK_SENDER_ID));
    let down = &digitizer(&events[0]).children[0];
    assert!(down.mask.contains(EventMask::RANGE | EventMask::TOUCH | EventMask::POSITION));
    assert!((down.x - 100.0 / 375.0).abs() < 1e-9);
    let teardown = &digitizer(&events[2]).children[0];
    assert!(!teardown.range);
}

#[test]
fn test_fallback_reaches_third_backend() {
    let loopback = Loopback::new();
    loopback.set_mode(BackendKind::DirectBus, ChannelMode::Unavailable);
    loopback.set_mode(BackendKind::Connection, ChannelMode::Unavailable);
    let injector = injector(&loopback, fast_config());

    assert!(injector.tap(Point::new(10.0, 10.0), Some("auto")));

    let attempts = injector.recent_dispatches(0);
    let summary: Vec<_> = attempts
        .iter()
        .map(|a| (a.backend_name(), a.phase, a.success))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("sim", GesturePhase::Down, false),
            ("conn", GesturePhase::Down, false),
            ("bks", GesturePhase::Down, true),
            ("bks", GesturePhase::Up, true),
        ]
    );
    assert_eq!(attempts[0].failure, Some(FailureKind::BackendUnavailable));
    assert_eq!(attempts[2].target_pid, Some(DEFAULT_FRONTMOST_PID));

    // nothing from the failed backends reached any consumer
    assert!(
        loopback
            .delivered()
            .iter()
            .all(|d| d.backend == BackendKind::FocusRouted)
    );
    assert_eq!(
        loopback.focus_changes(),
        vec![
            FocusChange::Set(DEFAULT_FRONTMOST_PID),
            FocusChange::Cleared(DEFAULT_FRONTMOST_PID)
        ]
    );
}

#[test]
fn test_rejecting_backend_replays_whole_gesture_on_next() {
    let loopback = Loopback::new();
    loopback.set_mode(BackendKind::DirectBus, ChannelMode::Rejecting);
    let injector = injector(&loopback, fast_config());

    assert!(injector.swipe(Point::new(0.0, 0.0), Point::new(50.0, 50.0), None, None));

    let conn: Vec<_> = injector
        .recent_dispatches(0)
        .into_iter()
        .filter(|a| a.backend == Some(BackendKind::Connection))
        .collect();
    assert_eq!(conn.len(), 22);
    assert_eq!(conn[0].phase, GesturePhase::Down);
    assert!(loopback.hid_events(BackendKind::DirectBus).is_empty());
}

#[test]
fn test_explicit_method_does_not_fall_back() {
    let loopback = Loopback::new();
    loopback.set_mode(BackendKind::Legacy, ChannelMode::Rejecting);
    let injector = injector(&loopback, fast_config());

    assert!(!injector.tap(Point::new(10.0, 10.0), Some("old")));
    let attempts = injector.recent_dispatches(0);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].failure, Some(FailureKind::DeliveryRejected));
    assert!(loopback.delivered().is_empty());
}

#[test]
fn test_swipe_emits_interpolated_phases() {
    let loopback = Loopback::new();
    let injector = injector(&loopback, InjectorConfig::default());

    assert!(injector.swipe(
        Point::new(10.0, 10.0),
        Point::new(100.0, 100.0),
        Some(Duration::from_millis(300)),
        Some("sim"),
    ));

    let attempts = injector.recent_dispatches(0);
    assert_eq!(attempts.len(), 22);
    assert_eq!(attempts[0].phase, GesturePhase::Down);
    assert!(attempts[1..21].iter().all(|a| a.phase == GesturePhase::Move));
    assert_eq!(attempts[21].phase, GesturePhase::Up);

    let events = loopback.hid_events(BackendKind::DirectBus);
    assert_eq!(events.len(), 23);
    assert!(events.windows(2).all(|w| w[0].timestamp() < w[1].timestamp()));

    for k in 1..=20 {
        let child = &digitizer(&events[k]).children[0];
        let expected = 10.0 + 90.0 * k as f64 / 20.0;
        assert!((child.x * 375.0 - expected).abs() < 1e-6);
        assert!((child.y * 667.0 - expected).abs() < 1e-6);
        assert_eq!(child.mask, EventMask::POSITION);
    }
}

#[test]
fn test_degraded_credential_refuses_delivery() {
    let loopback = Loopback::new();
    let config = InjectorConfig {
        sender_fallback_enabled: false,
        ..fast_config()
    };
    let injector = injector(&loopback, config);

    assert!(!injector.tap(Point::new(10.0, 10.0), None));
    assert!(!injector.sender_id_captured());

    let attempts = injector.recent_dispatches(0);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].failure, Some(FailureKind::DegradedCredential));
    assert_eq!(attempts[0].backend, None);
    assert!(loopback.delivered().is_empty());

    // accessibility needs no sender
    assert!(injector.tap(Point::new(10.0, 10.0), Some("a11y")));
    assert_eq!(loopback.delivered_by(BackendKind::Accessibility).len(), 2);
}

#[test]
fn test_reuse_before_lift_is_rejected() {
    let loopback = Loopback::new();
    let injector = injector(&loopback, fast_config());
    let steps = [
        TouchStep::new(2, GesturePhase::Down, 10.0, 10.0),
        TouchStep::new(2, GesturePhase::Down, 20.0, 20.0),
    ];

    assert!(!injector.multi_touch(&steps, None));
    assert_eq!(
        injector.last_dispatch().and_then(|a| a.failure),
        Some(FailureKind::InvalidRequest)
    );
    assert!(loopback.delivered().is_empty());
}

#[test]
fn test_multi_touch_keeps_identities_per_finger() {
    let loopback = Loopback::new();
    let injector = injector(&loopback, fast_config());
    let steps = [
        TouchStep::new(1, GesturePhase::Down, 10.0, 10.0),
        TouchStep::new(2, GesturePhase::Down, 40.0, 40.0),
        TouchStep::new(2, GesturePhase::Move, 60.0, 60.0),
        TouchStep::new(2, GesturePhase::Up, 60.0, 60.0),
        TouchStep::new(1, GesturePhase::Up, 10.0, 10.0),
    ];

    assert!(injector.multi_touch(&steps, Some("sim")));

    let events = loopback.hid_events(BackendKind::DirectBus);
    let identity_of = |event: &HidEvent, finger: u8| {
        digitizer(event)
            .children
            .iter()
            .find(|c| c.index == finger)
            .map(|c| c.identity)
    };
    let first = identity_of(&events[0], 1);
    assert!(first.is_some());
    assert_eq!(identity_of(&events[1], 1), first);
    assert_eq!(identity_of(&events[2], 1), first);
    assert_ne!(identity_of(&events[1], 2), first);
}

#[test]
fn test_strict_focus_route_needs_a_routed_dispatch() {
    let loopback = Loopback::new();
    loopback.set_mode(BackendKind::FocusRouted, ChannelMode::Unrouted);
    let config = InjectorConfig {
        reject_unverified: true,
        ..fast_config()
    };
    let injector = injector(&loopback, config);

    assert!(!injector.tap(Point::new(10.0, 10.0), Some("bks")));
    let last = injector.last_dispatch().unwrap();
    assert_eq!(last.failure, Some(FailureKind::DeliveryRejected));
    // override restored even though the gesture was refused
    assert_eq!(
        loopback.focus_changes().last(),
        Some(&FocusChange::Cleared(DEFAULT_FRONTMOST_PID))
    );

    loopback.set_mode(BackendKind::FocusRouted, ChannelMode::Working);
    assert!(injector.tap(Point::new(10.0, 10.0), Some("bks")));
}

#[test]
fn test_strict_bus_needs_captured_sender() {
    let loopback = Loopback::new();
    let config = InjectorConfig {
        reject_unverified: true,
        ..fast_config()
    };
    let injector = injector(&loopback, config);

    assert!(!injector.tap(Point::new(10.0, 10.0), Some("sim")));
    let last = injector.last_dispatch().unwrap();
    assert_eq!(last.failure, Some(FailureKind::DegradedCredential));
    assert_eq!(last.backend, Some(BackendKind::DirectBus));
    assert!(loopback.delivered().is_empty());

    injector.set_sender_override(0xABC, false).unwrap();
    assert!(injector.tap(Point::new(10.0, 10.0), Some("sim")));
    assert!(
        loopback
            .hid_events(BackendKind::DirectBus)
            .iter()
            .all(|e| e.sender_id() == 0xABC)
    );
}

#[test]
fn test_explicit_focus_target_skips_frontmost_query() {
    let loopback = Loopback::new();
    loopback.set_frontmost_pid(None);
    let injector = injector(&loopback, fast_config());
    assert!(!injector.tap(Point::new(1.0, 1.0), Some("bks")));

    let config = InjectorConfig {
        target_pid: Some(77),
        transient_focus_override: false,
        ..fast_config()
    };
    let targeted = TouchInjector::new(config, loopback.platform());
    assert!(targeted.tap(Point::new(1.0, 1.0), Some("bks")));
    assert!(
        loopback
            .delivered_by(BackendKind::FocusRouted)
            .iter()
            .all(|d| d.target_pid == Some(77))
    );
    assert!(loopback.focus_changes().is_empty());
}

#[test]
fn test_legacy_events_carry_device_pixels() {
    let loopback = Loopback::new();
    let injector = injector(&loopback, fast_config());

    assert!(injector.long_press(Point::new(30.0, 40.0), None, Some("legacy")));

    let delivered = loopback.delivered_by(BackendKind::Legacy);
    assert_eq!(delivered.len(), 2);
    match &delivered[0].payload {
        Payload::Legacy(event) => {
            assert_eq!((event.x, event.y), (60.0, 80.0));
            assert_eq!(event.phase, GesturePhase::Down);
            assert_eq!(event.sender_id, FALLBACK_SENDER_ID);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn test_client_opened_once() {
    let loopback = Loopback::new();
    let injector = injector(&loopback, fast_config());

    assert!(injector.tap(Point::new(1.0, 1.0), None));
    assert!(injector.double_tap(Point::new(1.0, 1.0), None));
    assert_eq!(loopback.client_opens(), 1);
    assert_eq!(loopback.connection_opens(), 0);
}

#[test]
fn test_typing_wraps_shift() {
    let loopback = Loopback::new();
    let injector = injector(&loopback, fast_config());

    assert!(injector.type_text("Hi"));

    let keys: Vec<(u16, bool)> = loopback
        .hid_events(BackendKind::DirectBus)
        .iter()
        .filter_map(|e| match e {
            HidEvent::Keyboard(k) => Some((k.usage, k.down)),
            HidEvent::Digitizer(_) => None,
        })
        .collect();
    let shift = VirtualKeyCode::LeftShift.usage();
    let h = VirtualKeyCode::H.usage();
    let i = VirtualKeyCode::I.usage();
    assert_eq!(
        keys,
        vec![
            (shift, true),
            (h, true),
            (h, false),
            (shift, false),
            (i, true),
            (i, false)
        ]
    );

    assert!(!injector.type_text("naïve"));
    assert_eq!(loopback.hid_events(BackendKind::DirectBus).len(), 6);
}

#[test]
fn test_key_usage_falls_back_past_touch_only_backends() {
    let loopback = Loopback::new();
    loopback.set_mode(BackendKind::DirectBus, ChannelMode::Unavailable);
    loopback.set_mode(BackendKind::Connection, ChannelMode::Rejecting);
    let injector = injector(&loopback, fast_config());

    assert!(injector.send_key_usage(VirtualKeyCode::Enter.usage(), true));
    assert_eq!(loopback.hid_events(BackendKind::FocusRouted).len(), 1);

    loopback.set_mode(BackendKind::FocusRouted, ChannelMode::Rejecting);
    assert!(!injector.send_key_usage(VirtualKeyCode::Enter.usage(), false));
    assert!(loopback.delivered_by(BackendKind::Legacy).is_empty());
}

#[test]
fn test_out_of_screen_points_are_clamped() {
    let loopback = Loopback::new();
    let injector = injector(&loopback, fast_config());

    assert!(injector.tap(Point::new(-20.0, 5000.0), Some("ax")));
    match &loopback.delivered_by(BackendKind::Accessibility)[0].payload {
        Payload::Accessibility(event) => {
            assert_eq!(event.fingers[0].x, 0.0);
            assert_eq!(event.fingers[0].y, 666.0);
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert!(!injector.tap(Point::new(f64::INFINITY, 1.0), None));
}

#[test]
fn test_request_processor_drives_injector() {
    let loopback = Loopback::new();
    let injector: Arc<dyn GestureInjector> = Arc::new(injector(&loopback, fast_config()));
    let mut processor = RequestProcessor::new(injector);

    let packet = GesturePacket::new(1, GestureRequest::tap(5.0, 5.0));
    assert!(processor.process_bytes(&packet.to_bytes().unwrap()).unwrap());
    assert_eq!(loopback.hid_events(BackendKind::DirectBus).len(), 3);
}
