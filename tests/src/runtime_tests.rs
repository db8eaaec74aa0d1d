//! Async event loop tests on tokio's paused clock
//!
//! The loop below has the same shape as the firmware metronome task: wait for
//! either the next key event or the next deadline, poll, and park on the key
//! channel while dormant.

use std::time::Duration as StdDuration;

use metronome_core::hal::mock::{MockBypass, MockFlash, MockHaptic, MockLight};
use metronome_core::test_utils::keypad;
use metronome_core::test_utils::simulator::{MockMetronome, PRESET_OFFSET};
use metronome_core::{Color, Instant, KeyEvent, Metronome, MetronomeConfig, PowerState};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until};

/// Core instant for the current tokio time
fn core_now(start: tokio::time::Instant) -> Instant {
    Instant::from_micros(start.elapsed().as_micros() as u64)
}

fn tokio_at(start: tokio::time::Instant, at: Instant) -> tokio::time::Instant {
    start + StdDuration::from_micros(at.as_micros())
}

fn boot() -> MockMetronome {
    Metronome::new(
        MockLight::new(),
        MockHaptic::new(),
        MockBypass::new(),
        MockFlash::new(),
        PRESET_OFFSET,
        MetronomeConfig::default(),
        Instant::from_millis(0),
    )
}

/// Run until the key channel closes; returns the metronome and the number of
/// dormant reports
async fn run(
    mut metronome: MockMetronome,
    mut keys: mpsc::Receiver<KeyEvent>,
    start: tokio::time::Instant,
) -> (MockMetronome, u32) {
    let mut dormant = 0;

    loop {
        let event = match metronome.next_deadline() {
            Some(deadline) => tokio::select! {
                event = keys.recv() => match event {
                    Some(event) => Some(event),
                    None => break,
                },
                _ = sleep_until(tokio_at(start, deadline)) => None,
            },
            None => match keys.recv().await {
                Some(event) => Some(event),
                None => break,
            },
        };

        let now = core_now(start);
        if metronome.poll(now) == PowerState::Dormant {
            dormant += 1;
            let wake = match event {
                Some(event) => event,
                None => match keys.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };
            let now = core_now(start);
            metronome.resume(now);
            metronome.handle_key(wake, now);
            continue;
        }

        if let Some(event) = event {
            metronome.handle_key(event, now);
        }
    }

    (metronome, dormant)
}

async fn click(keys: &mpsc::Sender<KeyEvent>, key: u8) {
    keys.send(KeyEvent::press(key)).await.unwrap();
    keys.send(KeyEvent::release(key)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_event_loop_plays_typed_tempo() {
    println!("🕒 Testing event loop with typed tempo...");

    let start = tokio::time::Instant::now();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(run(boot(), rx, start));

    click(&tx, keypad::digit(1)).await;
    click(&tx, keypad::digit(2)).await;
    click(&tx, keypad::digit(0)).await;

    sleep(StdDuration::from_millis(2050)).await;
    drop(tx);
    let (metronome, dormant) = task.await.unwrap();

    let light = metronome.engine().notifier().light();
    assert_eq!(metronome.engine().tempo(), 120);
    assert_eq!(light.count(Color::Accent), 4);
    assert_eq!(dormant, 0);

    println!("  ✅ 4 beats in 2 s at 120 BPM");
}

#[tokio::test(start_paused = true)]
async fn test_event_loop_sleeps_and_wakes_on_key() {
    println!("😴 Testing dormancy in the event loop...");

    let start = tokio::time::Instant::now();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(run(boot(), rx, start));

    sleep(StdDuration::from_secs(700)).await;
    click(&tx, keypad::digit(9)).await;
    sleep(StdDuration::from_millis(100)).await;

    drop(tx);
    let (metronome, dormant) = task.await.unwrap();

    assert_eq!(dormant, 1);
    assert_eq!(metronome.engine().tempo(), 9);
    assert!(!metronome.engine().is_paused());
    assert!(metronome.activity().last() >= Instant::from_secs(700));

    println!("  ✅ Dormant once, woken by the first key");
}

#[tokio::test(start_paused = true)]
async fn test_save_during_loop_queues_held_keys() {
    println!("💾 Testing save hold window in the event loop...");

    let start = tokio::time::Instant::now();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(run(boot(), rx, start));

    click(&tx, keypad::digit(9)).await;
    click(&tx, keypad::digit(0)).await;
    sleep(StdDuration::from_millis(100)).await;

    tx.send(KeyEvent::long_press(keypad::preset(2))).await.unwrap();
    tx.send(KeyEvent::release(keypad::preset(2))).await.unwrap();
    // Toggle accent while the save confirmation is showing
    tx.send(KeyEvent::long_press(keypad::KEY_ZERO)).await.unwrap();
    tx.send(KeyEvent::release(keypad::KEY_ZERO)).await.unwrap();

    sleep(StdDuration::from_millis(200)).await;
    drop(tx);
    let (metronome, _) = task.await.unwrap();

    let saved = metronome.store().preset(2).unwrap();
    assert_eq!((saved.tempo, saved.subdivision, saved.accent), (90, 1, true));
    // Still inside the 500 ms hold: the accent toggle is queued, not applied
    assert!(metronome.engine().accent());
    assert!(metronome.is_holding());
    assert_eq!(metronome.held_events(), 3);

    println!("  ✅ Preset saved, keys queued during the hold");
}
