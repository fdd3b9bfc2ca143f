//! Operator stop button
//!
//! Each debounced press files one shutdown request. The first asks the
//! main loop to finish its tick and stop; a second press before it has
//! stopped is the panic stop. A press after the loop has stopped ends
//! the task.

use crate::clock::Clock;
use crate::config::button::DEBOUNCE_MS;
use crate::shutdown::ShutdownLatch;
use embedded_hal::digital::InputPin;
use embedded_hal_async::digital::Wait;

/// Watch an active-low button until a press lands after the loop stopped
pub async fn stop_button_task<B, C>(mut button: B, mut clock: C, shutdown: &ShutdownLatch)
where
    B: Wait + InputPin,
    C: Clock,
{
    loop {
        if button.wait_for_falling_edge().await.is_err() {
            clock.sleep_ms(DEBOUNCE_MS as u32).await;
            continue;
        }

        clock.sleep_ms(DEBOUNCE_MS as u32).await;
        // Bounce or glitch, not a press
        if !button.is_low().unwrap_or(false) {
            continue;
        }

        log::info!("Button: stop pressed");
        shutdown.request_shutdown();
        if shutdown.is_stopped() {
            log::info!("Button: loop already stopped, releasing button");
            return;
        }

        let _ = button.wait_for_high().await;
        clock.sleep_ms(DEBOUNCE_MS as u32).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mock::MockClock;
    use core::convert::Infallible;
    use futures::executor::block_on;

    fn panic_stop() -> ! {
        panic!("panic stop");
    }

    /// Button that reports one falling edge per wait; `levels[n]` is
    /// whether it still reads low after the n-th edge. The latch is
    /// marked stopped before edge `stop_at`.
    struct ScriptedButton<'a> {
        levels: &'a [bool],
        edges: usize,
        stop_at: usize,
        latch: &'a ShutdownLatch,
    }

    impl embedded_hal::digital::ErrorType for ScriptedButton<'_> {
        type Error = Infallible;
    }

    impl InputPin for ScriptedButton<'_> {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            self.is_low().map(|low| !low)
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(self.levels[self.edges - 1])
        }
    }

    impl Wait for ScriptedButton<'_> {
        async fn wait_for_high(&mut self) -> Result<(), Infallible> {
            Ok(())
        }

        async fn wait_for_low(&mut self) -> Result<(), Infallible> {
            Ok(())
        }

        async fn wait_for_rising_edge(&mut self) -> Result<(), Infallible> {
            Ok(())
        }

        async fn wait_for_falling_edge(&mut self) -> Result<(), Infallible> {
            self.edges += 1;
            if self.edges == self.stop_at {
                self.latch.mark_stopped();
            }
            Ok(())
        }

        async fn wait_for_any_edge(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    #[test]
    fn test_press_after_clean_stop_ends_task() {
        let latch = ShutdownLatch::new(panic_stop);
        let button = ScriptedButton {
            levels: &[true, true],
            edges: 0,
            stop_at: 2,
            latch: &latch,
        };

        block_on(stop_button_task(button, MockClock::new(), &latch));

        assert!(latch.is_stopped());
    }

    #[test]
    fn test_bounce_is_not_a_press() {
        let latch = ShutdownLatch::new(panic_stop);
        // Glitch, real press, then a press once the loop has stopped.
        // Counting the glitch would make the real press a panic stop.
        let button = ScriptedButton {
            levels: &[false, true, true],
            edges: 0,
            stop_at: 3,
            latch: &latch,
        };

        block_on(stop_button_task(button, MockClock::new(), &latch));

        assert!(latch.is_stopped());
    }

    #[test]
    #[should_panic(expected = "panic stop")]
    fn test_two_presses_before_stop_abort() {
        let latch = ShutdownLatch::new(panic_stop);
        let button = ScriptedButton {
            levels: &[true, true],
            edges: 0,
            stop_at: usize::MAX,
            latch: &latch,
        };

        block_on(stop_button_task(button, MockClock::new(), &latch));
    }
}
