//! End-to-end keypad scenarios on the simulated metronome

#[cfg(test)]
mod tests {
    use metronome_core::test_utils::keypad::{self, KEY_STAR, KEY_ZERO};
    use metronome_core::test_utils::simulator::{Simulator, PRESET_OFFSET};
    use metronome_core::{interval, Color, Duration, HapticPattern, MetronomeConfig, Preset, Step};
    use rstest::rstest;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_tap_tempo_scenario() {
        println!("\n=== Tap Tempo ===");
        let mut sim = Simulator::new();

        keypad::tap(&mut sim, 2, ms(500));
        assert_eq!(sim.tempo(), 240);

        sim.advance(ms(500));
        sim.click(KEY_ZERO);
        assert_eq!(sim.tempo(), 160);
        println!("✓ 240 BPM after two taps, 160 BPM after three");

        // A pause longer than the input timeout starts a new session
        sim.advance(ms(2500));
        keypad::tap(&mut sim, 2, ms(1000));
        assert_eq!(sim.tempo(), 120);
    }

    #[test]
    fn test_double_tap_at_same_instant() {
        let mut sim = Simulator::new();

        keypad::tap(&mut sim, 2, ms(500));
        assert_eq!(sim.tempo(), 240);
        assert_eq!(sim.metronome().input().tap_average(), Duration::from_micros(250_000));

        // Zero interval halves the average: 60_000_000 / 125_000 = 480, saturated
        sim.click(KEY_ZERO);
        assert_eq!(sim.metronome().input().tap_count(), 3);
        assert_eq!(sim.metronome().input().tap_average(), Duration::from_micros(125_000));
        assert_eq!(sim.tempo(), 255);
        assert!(!sim.metronome().engine().is_paused());
    }

    #[test]
    fn test_digit_entry_scenario() {
        let mut sim = Simulator::new();

        sim.click(keypad::digit(9));
        assert_eq!(sim.tempo(), 9);
        sim.advance(ms(500));
        sim.click(keypad::digit(0));
        assert_eq!(sim.tempo(), 90);

        // After the timeout the zero key taps again
        sim.advance(ms(2000));
        sim.click(KEY_ZERO);
        assert_eq!(sim.metronome().input().tap_count(), 1);
        assert!(sim.metronome().engine().is_paused());
    }

    #[rstest]
    #[case(0, Preset::new(60, 1, false))]
    #[case(1, Preset::new(90, 1, false))]
    #[case(2, Preset::new(60, 2, true))]
    #[case(3, Preset::new(150, 1, false))]
    fn test_default_preset_recall(#[case] slot: u8, #[case] expected: Preset) {
        let mut sim = Simulator::new();
        sim.click(keypad::preset(slot));

        let state = sim.metronome().engine().state();
        assert_eq!(
            Preset::new(state.tempo, state.subdivision, state.accent),
            expected
        );
        assert!(!state.paused);
        assert_eq!(
            sim.metronome().engine().interval(),
            interval(expected.tempo, expected.subdivision)
        );
    }

    fn save_120_in_two(sim: &mut Simulator, slot: u8) {
        keypad::type_number(sim, 120, ms(100));
        sim.hold(keypad::digit(2), ms(800), ms(100));
        assert_eq!(sim.metronome().engine().subdivision(), 2);
        sim.hold(keypad::preset(slot), ms(800), ms(100));
    }

    #[test]
    fn test_preset_survives_power_cycle() {
        println!("\n=== Preset Persistence ===");
        let mut sim = Simulator::new();
        save_120_in_two(&mut sim, 0);
        assert_eq!(sim.metronome().store().preset(0), Some(Preset::new(120, 2, true)));

        let mut sim = sim.restart();
        assert!(sim.metronome().engine().is_paused());
        assert_eq!(sim.metronome().store().preset(0), Some(Preset::new(120, 2, true)));
        assert_eq!(sim.metronome().store().preset(3), Some(Preset::new(150, 1, false)));

        sim.click(keypad::preset(0));
        let state = sim.metronome().engine().state();
        assert_eq!((state.tempo, state.subdivision, state.accent), (120, 2, true));
        println!("✓ Slot A restored after restart");
    }

    #[test]
    fn test_corrupt_record_falls_back_to_defaults() {
        let mut sim = Simulator::new();
        save_120_in_two(&mut sim, 0);

        let mut flash = sim.into_flash();
        flash.poke(PRESET_OFFSET as usize, b'X');

        let sim = Simulator::with_flash(flash, MetronomeConfig::default());
        assert_eq!(sim.metronome().store().preset(0), Some(Preset::new(60, 1, false)));
    }

    #[test]
    fn test_save_hold_window_silences_beats() {
        let mut sim = Simulator::new();
        keypad::type_number(&mut sim, 120, ms(0));
        sim.advance(ms(1000));
        let saved_at = sim.now();
        sim.long_press(keypad::preset(1));
        assert_eq!(sim.light().current(), Some(Color::Saved));

        sim.clear_beats();
        sim.advance(ms(2000));
        sim.release(keypad::preset(1));
        assert_eq!(sim.metronome().input().release_lock(), None);

        let first = sim.beats().first().copied().unwrap();
        assert_eq!(first.at, saved_at + ms(500) + ms(500));
        assert!(sim.beats().iter().all(|beat| beat.at > saved_at + ms(500)));
    }

    #[test]
    fn test_hold_repeat_restarts_once_per_tick() {
        println!("\n=== Hold Repeat ===");
        let mut sim = Simulator::new();
        keypad::type_number(&mut sim, 120, ms(10));
        sim.advance(ms(80));

        sim.press(KEY_STAR);
        assert_eq!(sim.tempo(), 121);
        sim.advance(ms(500));
        sim.long_press(KEY_STAR);

        let generation = sim.metronome().engine().generation();
        let repeat_start = sim.now();
        sim.advance(ms(1000));
        sim.release(KEY_STAR);

        // One step every 50 ms while held
        assert_eq!(sim.tempo(), 141);

        let ticks = sim
            .beats()
            .iter()
            .filter(|beat| beat.at > repeat_start)
            .count() as u32;
        assert!(ticks >= 2);
        assert_eq!(sim.metronome().engine().generation() - generation, ticks);
        println!("✓ {} ticks, {} restarts", ticks, ticks);

        // Released: the last pending step is applied at the next tick only
        let before = sim.metronome().engine().generation();
        sim.advance(ms(2000));
        assert_eq!(sim.metronome().engine().generation(), before + 1);
        assert_eq!(sim.metronome().engine().interval(), interval(141, 1));
    }

    #[test]
    fn test_inverted_step_direction() {
        let config = MetronomeConfig {
            invert_step_direction: true,
            ..MetronomeConfig::default()
        };
        let mut sim = Simulator::with_config(config);
        keypad::type_number(&mut sim, 100, ms(10));

        sim.click(KEY_STAR);
        assert_eq!(sim.tempo(), 99);
        sim.click(keypad::step(Step::Increase));
        assert_eq!(sim.tempo(), 100);
    }

    #[test]
    fn test_idle_dormancy() {
        println!("\n=== Idle Power ===");
        let mut sim = Simulator::new();
        sim.advance(Duration::from_secs(600));
        assert_eq!(sim.dormant_reports(), 0);
        sim.advance(Duration::from_secs(5));
        assert_eq!(sim.dormant_reports(), 1);
        sim.advance(Duration::from_secs(3600));
        assert_eq!(sim.dormant_reports(), 1);
        println!("✓ Dormant reported exactly once");
    }

    #[test]
    fn test_key_before_timeout_keeps_awake() {
        let mut sim = Simulator::new();
        sim.advance(Duration::from_secs(599));
        // Accent toggle: activity without starting the beat
        sim.long_press(KEY_ZERO);
        sim.release(KEY_ZERO);
        assert!(sim.metronome().engine().is_paused());

        sim.advance(Duration::from_secs(1));
        assert_eq!(sim.dormant_reports(), 0);
        sim.advance(Duration::from_secs(595));
        assert_eq!(sim.dormant_reports(), 0);
        sim.advance(Duration::from_secs(5));
        assert_eq!(sim.dormant_reports(), 1);
    }

    #[test]
    fn test_running_metronome_never_sleeps() {
        let mut sim = Simulator::new();
        keypad::type_number(&mut sim, 60, ms(10));
        sim.advance(Duration::from_secs(1800));
        assert_eq!(sim.dormant_reports(), 0);
    }

    #[test]
    fn test_beats_stay_on_grid() {
        println!("\n=== Drift ===");
        let mut sim = Simulator::new();
        sim.hold(keypad::digit(3), ms(800), ms(100));
        sim.click(keypad::digit(7));
        let anchor = sim.now();
        let period = interval(7, 3).unwrap();

        sim.advance(Duration::from_secs(60));
        let beats = sim.beats();
        assert_eq!(beats.len(), 21);
        for (i, beat) in beats.iter().enumerate() {
            let n = i as u32 + 1;
            assert_eq!(beat.at, anchor + period * n, "beat {}", n);
            assert_eq!(beat.accent, i % 3 == 0, "beat {}", n);
        }
        println!("✓ {} beats exactly on anchor + n * {} us", beats.len(), period.as_micros());
    }

    #[test]
    fn test_bypass_switch_silences_motor() {
        let mut sim = Simulator::new();
        sim.metronome_mut().engine_mut().bypass_mut().set_bypassed(true);
        keypad::type_number(&mut sim, 120, ms(0));
        sim.advance(ms(2000));

        assert_eq!(sim.light().count(Color::Accent), 4);
        assert_eq!(sim.haptic().count(HapticPattern::Accent), 0);
        assert_eq!(sim.haptic().count(HapticPattern::Normal), 0);
    }
}
