//! Gapless scheduling integration tests
//!
//! Drives the pure schedule queue the way the output callback would,
//! without opening an audio device.

use chime::playback::ScheduleQueue;

/// 500ms of samples at the 24kHz playback rate
const HALF_SECOND: usize = 12_000;

#[test]
fn back_to_back_chunks_are_scheduled_gaplessly() {
    let mut queue = ScheduleQueue::new();

    // Three prompt 500ms chunks pack the timeline with no gaps
    let first = queue.schedule(vec![0.1; HALF_SECOND]);
    let second = queue.schedule(vec![0.2; HALF_SECOND]);
    let third = queue.schedule(vec![0.3; HALF_SECOND]);

    assert_eq!(first.start, 0);
    assert_eq!(second.start, 12_000);
    assert_eq!(third.start, 24_000);
    assert_eq!(queue.next_start(), 36_000);
}

#[test]
fn active_transition_fires_once_per_burst() {
    let mut queue = ScheduleQueue::new();

    let first = queue.schedule(vec![0.0; 100]);
    let second = queue.schedule(vec![0.0; 100]);
    assert!(first.became_active);
    assert!(!second.became_active);

    // Drain everything; the set empties exactly once
    assert!(!queue.advance(100));
    assert!(queue.advance(100));
    assert!(!queue.advance(100));

    // A new burst re-activates
    let next = queue.schedule(vec![0.0; 10]);
    assert!(next.became_active);
}

#[test]
fn late_chunk_starts_at_the_clock_not_in_the_past() {
    let mut queue = ScheduleQueue::new();

    queue.schedule(vec![0.0; 100]);
    queue.advance(250);

    // The cursor caught up to the clock; a late arrival plays immediately
    let outcome = queue.schedule(vec![0.0; 50]);
    assert_eq!(outcome.start, 250);
    assert_eq!(queue.next_start(), 300);
}

#[test]
fn cursor_survives_a_force_stop() {
    let mut queue = ScheduleQueue::new();

    queue.schedule(vec![0.0; 1_000]);
    queue.advance(400);
    queue.clear();

    assert_eq!(queue.active_sources(), 0);
    // next_start is never rewound by clear
    assert_eq!(queue.next_start(), 1_000);

    let outcome = queue.schedule(vec![0.0; 10]);
    assert_eq!(outcome.start, 1_000);
}

#[test]
fn clearing_an_empty_queue_reports_no_transition() {
    let mut queue = ScheduleQueue::new();
    queue.clear();
    assert!(!queue.advance(100));
    assert_eq!(queue.next_start(), 0);
}

#[test]
fn mix_plays_sources_in_schedule_order() {
    let mut queue = ScheduleQueue::new();

    queue.schedule(vec![0.5; 4]);
    queue.schedule(vec![0.25; 4]);

    let mut out = vec![0.0_f32; 8];
    let drained = queue.mix_into(&mut out, 1);

    assert!(drained);
    assert!(out[..4].iter().all(|&s| (s - 0.5).abs() < f32::EPSILON));
    assert!(out[4..].iter().all(|&s| (s - 0.25).abs() < f32::EPSILON));
}
