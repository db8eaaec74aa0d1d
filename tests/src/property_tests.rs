//! Property checks over tempo arithmetic and preset records

#[cfg(test)]
mod tests {
    use metronome_core::test_utils::keypad;
    use metronome_core::test_utils::simulator::Simulator;
    use metronome_core::preset::MAGIC;
    use metronome_core::{interval, Duration, Preset, PresetSet, MICROS_PER_MINUTE, PRESET_COUNT};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn interval_matches_truncated_division(tempo in 1u8..=255, subdivision in 1u8..=9) {
            let expected = MICROS_PER_MINUTE / tempo as u64 / subdivision as u64;
            prop_assert_eq!(interval(tempo, subdivision), Some(Duration::from_micros(expected)));
        }

        #[test]
        fn faster_tempo_never_lengthens_interval(tempo in 1u8..=254, subdivision in 1u8..=9) {
            let slow = interval(tempo, subdivision).unwrap();
            let fast = interval(tempo + 1, subdivision).unwrap();
            prop_assert!(fast <= slow);
        }

        #[test]
        fn bad_accent_byte_rejects_whole_record(slot in 0usize..4, byte in 2u8..=255) {
            let mut record = PresetSet::default().encode();
            record[MAGIC.len() + 2 * PRESET_COUNT + slot] = byte;
            prop_assert_eq!(PresetSet::decode(&record), None);
        }

        #[test]
        fn zero_tempo_rejects_whole_record(slot in 0usize..4) {
            let mut set = PresetSet::default();
            prop_assert!(set.set(slot, Preset::new(0, 1, false)));
            prop_assert_eq!(PresetSet::decode(&set.encode()), None);
        }

        #[test]
        fn typed_tempo_is_applied_when_in_range(value in 1u16..=255) {
            let mut sim = Simulator::new();
            keypad::type_number(&mut sim, value, Duration::from_millis(50));
            prop_assert_eq!(sim.tempo() as u16, value);
            prop_assert!(!sim.metronome().engine().is_paused());
        }

        #[test]
        fn steady_taps_land_near_the_tapped_tempo(period_ms in 240u64..=1500) {
            let mut sim = Simulator::new();
            keypad::tap(&mut sim, 16, Duration::from_millis(period_ms));

            // The running average converges on the tap period
            let expected = 60_000 / period_ms;
            let tempo = sim.tempo() as u64;
            prop_assert!(tempo.abs_diff(expected) <= 1, "tapped {} ms, got {} BPM", period_ms, tempo);
        }
    }

    #[test]
    fn test_zero_arguments_have_no_interval() {
        assert_eq!(interval(0, 1), None);
        assert_eq!(interval(120, 0), None);
    }
}
