//! Hardware adapters against embedded-hal-mock pins

#[cfg(test)]
mod tests {
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};
    use metronome_core::{
        BatteryMonitor, Color, EmbeddedHalBypass, EmbeddedHalLight, LightOutput, VibrationBypass,
    };

    #[test]
    fn test_common_anode_light_drives_pins_inverted() {
        println!("🔧 Testing RGB light pin levels...");

        let red = PinMock::new(&[
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ]);
        let green = PinMock::new(&[
            PinTransaction::set(State::High),
            PinTransaction::set(State::High),
        ]);
        let blue = PinMock::new(&[
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ]);
        let (mut r, mut g, mut b) = (red.clone(), green.clone(), blue.clone());

        let mut light = EmbeddedHalLight::new(red, green, blue, true);
        light.show(Color::Accent).unwrap();
        light.show(Color::Off).unwrap();

        r.done();
        g.done();
        b.done();
        println!("  ✅ Purple then dark on a common-anode LED");
    }

    #[test]
    fn test_bypass_follows_switch() {
        let pin = PinMock::new(&[
            PinTransaction::get(State::High),
            PinTransaction::get(State::Low),
        ]);
        let mut handle = pin.clone();

        let mut bypass = EmbeddedHalBypass::new(pin);
        assert!(bypass.is_bypassed());
        assert!(!bypass.is_bypassed());

        handle.done();
    }

    #[test]
    fn test_low_battery_indicator_latches_once() {
        let pin = PinMock::new(&[PinTransaction::set(State::High)]);
        let mut handle = pin.clone();

        let mut monitor = BatteryMonitor::new(pin);
        assert!(monitor.should_sample());
        assert!(monitor.report_low(3300));
        assert!(!monitor.report_low(3100));
        assert!(monitor.is_low());
        assert!(!monitor.should_sample());

        handle.done();
    }
}
