//! Peripheral roles - the side-effect sinks the application owns.
//!
//! A status LED, two motor drivers and the watchdog reset device.
//! All stateless: the pairing machine and supervisor tell them what to
//! do, nothing is read back.

use embedded_hal::digital::OutputPin;

/// Watchdog reset device: opened once at boot, counter cleared every
/// main-loop cycle.
pub trait Watchdog {
    fn clear_counter(&mut self);
}

/// The GPIO outputs this firmware drives.
pub struct PeripheralRoles<LED, M1, M2> {
    led: LED,
    motor1: M1,
    motor2: M2,
}

impl<LED, M1, M2> PeripheralRoles<LED, M1, M2>
where
    LED: OutputPin,
    M1: OutputPin,
    M2: OutputPin,
{
    /// Take ownership of the pins and drive everything low (off).
    pub fn new(mut led: LED, mut motor1: M1, mut motor2: M2) -> Self {
        let _ = led.set_low();
        let _ = motor1.set_low();
        let _ = motor2.set_low();
        Self { led, motor1, motor2 }
    }

    pub fn led(&mut self, on: bool) {
        let _ = if on {
            self.led.set_high()
        } else {
            self.led.set_low()
        };
    }

    pub fn motors_off(&mut self) {
        let _ = self.motor1.set_low();
        let _ = self.motor2.set_low();
    }

    /// Give the pins back (shutdown path tri-states them at the
    /// hardware level).
    pub fn release(self) -> (LED, M1, M2) {
        (self.led, self.motor1, self.motor2)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    #[derive(Default)]
    struct MockPin {
        level: bool,
        writes: u32,
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.level = false;
            self.writes += 1;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.level = true;
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn construction_drives_everything_low() {
        let roles = PeripheralRoles::new(MockPin::default(), MockPin::default(), MockPin::default());
        let (led, m1, m2) = roles.release();
        assert!(!led.level && !m1.level && !m2.level);
        assert_eq!((led.writes, m1.writes, m2.writes), (1, 1, 1));
    }

    #[test]
    fn led_follows_requests() {
        let mut roles =
            PeripheralRoles::new(MockPin::default(), MockPin::default(), MockPin::default());
        roles.led(true);
        roles.motors_off();
        let (led, m1, m2) = roles.release();
        assert!(led.level);
        assert!(!m1.level && !m2.level);
    }
}
