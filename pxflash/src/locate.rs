//! Finding the port a bootloader is listening on.
//!
//! A board only stays in its bootloader for a few seconds after reset, and a
//! USB bootloader's port may not even exist yet when the upload starts. The
//! locator therefore polls every candidate once per tick until one answers
//! GET_DEVICE with a valid info block and sync pair, or the wait runs out.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace};

use crate::error::{Error, Result};
use crate::port::{Port, PortOpener, SerialConfig};
use crate::protocol::{BoardIdentity, identify};

/// Delay between probe rounds.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Give up after this long.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(12);

/// Timing of the probe loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatorConfig {
    /// Sleep before each probe round.
    pub tick: Duration,
    /// Total time to keep probing.
    pub max_wait: Duration,
    /// Read timeout for ports opened while probing.
    pub read_timeout: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            max_wait: DEFAULT_MAX_WAIT,
            read_timeout: crate::port::DEFAULT_TIMEOUT,
        }
    }
}

impl LocatorConfig {
    /// Set the total wait.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set the read timeout used on probed ports.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Source of elapsed time and sleeping.
pub trait Clock {
    /// Time since the clock was created.
    fn elapsed(&self) -> Duration;

    /// Block for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and [`thread::sleep`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Start a clock at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.start
            .elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Polls candidate ports for a responding bootloader.
pub struct PortLocator<O, C = SystemClock> {
    opener: O,
    clock: C,
    config: LocatorConfig,
    interrupted: fn() -> bool,
}

impl<O: PortOpener> PortLocator<O, SystemClock> {
    /// Create a locator on the wall clock.
    pub fn new(opener: O, config: LocatorConfig) -> Self {
        Self::with_clock(opener, SystemClock::new(), config)
    }
}

impl<O: PortOpener, C: Clock> PortLocator<O, C> {
    /// Create a locator with an explicit clock.
    pub fn with_clock(opener: O, clock: C, config: LocatorConfig) -> Self {
        Self {
            opener,
            clock,
            config,
            interrupted: crate::is_interrupted_requested,
        }
    }

    /// Find the first candidate with a bootloader behind it.
    ///
    /// Each round sleeps one tick, calls `on_tick` with the time waited so
    /// far, then tries the candidates in order. Ports that fail to open or
    /// identify are closed before moving on. The winning port is returned
    /// open, with its input flushed.
    pub fn locate<F>(
        &mut self,
        candidates: &[String],
        baud_rate: u32,
        mut on_tick: F,
    ) -> Result<(O::Port, BoardIdentity)>
    where
        F: FnMut(Duration),
    {
        if candidates.is_empty() {
            return Err(self.not_found(candidates));
        }

        debug!(
            "Waiting up to {:?} for a bootloader on {}",
            self.config
                .max_wait,
            candidates.join(", ")
        );

        while self
            .clock
            .elapsed()
            < self
                .config
                .max_wait
        {
            if (self.interrupted)() {
                return Err(Error::Interrupted);
            }

            self.clock
                .sleep(
                    self.config
                        .tick,
                );
            on_tick(
                self.clock
                    .elapsed(),
            );

            for name in candidates {
                match self.probe(name, baud_rate) {
                    Ok(found) => {
                        info!("Found bootloader on {name}");
                        return Ok(found);
                    },
                    Err(e) => trace!("No bootloader on {name}: {e}"),
                }
            }
        }

        Err(self.not_found(candidates))
    }

    fn probe(&mut self, name: &str, baud_rate: u32) -> Result<(O::Port, BoardIdentity)> {
        let config = SerialConfig::new(name, baud_rate).with_timeout(
            self.config
                .read_timeout,
        );
        let mut port = self
            .opener
            .open(&config)?;

        let identified = identify(&mut port).and_then(|identity| {
            port.clear_input()?;
            Ok(identity)
        });

        match identified {
            Ok(identity) => Ok((port, identity)),
            Err(e) => {
                if let Err(close_err) = port.close() {
                    debug!("Failed to close {name}: {close_err}");
                }
                Err(e)
            },
        }
    }

    fn not_found(&self, candidates: &[String]) -> Error {
        Error::PortNotFound {
            ports: candidates.to_vec(),
            waited_secs: self
                .clock
                .elapsed()
                .as_secs_f32(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::SimBootloader;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeClock {
        now: Duration,
        sleeps: usize,
    }

    impl Clock for FakeClock {
        fn elapsed(&self) -> Duration {
            self.now
        }

        fn sleep(&mut self, duration: Duration) {
            self.now += duration;
            self.sleeps += 1;
        }
    }

    type Factory = Box<dyn FnMut(&str, usize) -> Result<SimBootloader>>;

    /// Opener whose ports come from a factory given the port name and the
    /// number of open attempts made so far.
    struct FakeOpener {
        factory: Factory,
        attempts: Vec<String>,
        configs: Vec<SerialConfig>,
    }

    impl FakeOpener {
        fn new(factory: impl FnMut(&str, usize) -> Result<SimBootloader> + 'static) -> Self {
            Self {
                factory: Box::new(factory),
                attempts: Vec::new(),
                configs: Vec::new(),
            }
        }
    }

    impl PortOpener for FakeOpener {
        type Port = SimBootloader;

        fn open(&mut self, config: &SerialConfig) -> Result<SimBootloader> {
            let attempt = self
                .attempts
                .len();
            self.attempts
                .push(
                    config
                        .port_name
                        .clone(),
                );
            self.configs
                .push(config.clone());
            (self.factory)(&config.port_name, attempt)
        }
    }

    fn missing() -> Error {
        Error::Io(io::Error::new(io::ErrorKind::NotFound, "no such port"))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn locator(opener: FakeOpener) -> PortLocator<FakeOpener, FakeClock> {
        let mut locator =
            PortLocator::with_clock(opener, FakeClock::default(), LocatorConfig::default());
        locator.interrupted = || false;
        locator
    }

    #[test]
    fn test_second_candidate_found_in_first_tick() {
        let opener = FakeOpener::new(|name, _| match name {
            "A" => Err(missing()),
            _ => Ok(SimBootloader::new(9).named(name)),
        });
        let mut locator = locator(opener);
        let mut ticks = Vec::new();

        let (port, identity) = locator
            .locate(&names(&["A", "B"]), 115_200, |t| ticks.push(t))
            .unwrap();

        assert_eq!(port.name(), "B");
        assert_eq!(identity.board_type, 9);
        assert!(!port.closed);
        assert_eq!(ticks, vec![Duration::from_millis(100)]);
        assert_eq!(locator.opener.attempts, vec!["A", "B"]);
        assert_eq!(locator.clock.sleeps, 1);
    }

    #[test]
    fn test_probe_uses_requested_baud_and_timeout() {
        let opener = FakeOpener::new(|name, _| Ok(SimBootloader::new(9).named(name)));
        let config = LocatorConfig::default().with_read_timeout(Duration::from_millis(500));
        let mut locator = PortLocator::with_clock(opener, FakeClock::default(), config);
        locator.interrupted = || false;

        locator
            .locate(&names(&["/dev/ttyACM0"]), 57_600, |_| {})
            .unwrap();

        let used = &locator.opener.configs[0];
        assert_eq!(used.baud_rate, 57_600);
        assert_eq!(used.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_non_bootloader_port_is_closed_and_skipped() {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&closed);
        let opener = FakeOpener::new(move |name, _| {
            let mut sim = SimBootloader::new(9).named(name);
            sim.close_log = Some(Arc::clone(&log));
            if name == "modem" {
                sim.silent = true;
            }
            Ok(sim)
        });
        let mut locator = locator(opener);

        let (port, _) = locator
            .locate(&names(&["modem", "px4"]), 115_200, |_| {})
            .unwrap();

        assert_eq!(port.name(), "px4");
        assert_eq!(*closed.lock().unwrap(), vec!["modem"]);
    }

    #[test]
    fn test_bad_magic_port_is_rejected() {
        let opener = FakeOpener::new(|name, _| {
            let mut sim = SimBootloader::new(9).named(name);
            if name == "other" {
                sim.magic = 0;
            }
            Ok(sim)
        });
        let mut locator = locator(opener);

        let (port, _) = locator
            .locate(&names(&["other", "px4"]), 115_200, |_| {})
            .unwrap();

        assert_eq!(port.name(), "px4");
    }

    #[test]
    fn test_board_appearing_later_is_found() {
        // Port shows up on the third round.
        let opener = FakeOpener::new(|name, attempt| {
            if attempt < 2 {
                Err(missing())
            } else {
                Ok(SimBootloader::new(5).named(name))
            }
        });
        let mut locator = locator(opener);
        let mut ticks = 0;

        let (_, identity) = locator
            .locate(&names(&["/dev/ttyACM0"]), 115_200, |_| ticks += 1)
            .unwrap();

        assert_eq!(identity.board_type, 5);
        assert_eq!(ticks, 3);
    }

    #[test]
    fn test_gives_up_after_max_wait() {
        let opener = FakeOpener::new(|_, _| Err(missing()));
        let mut locator = locator(opener);
        let mut ticks = 0;

        let err = locator
            .locate(&names(&["A", "B"]), 115_200, |_| ticks += 1)
            .unwrap_err();

        match err {
            Error::PortNotFound { ports, waited_secs } => {
                assert_eq!(ports, vec!["A", "B"]);
                assert!((waited_secs - 12.0).abs() < 0.01);
            },
            other => panic!("expected PortNotFound, got {other:?}"),
        }
        assert_eq!(ticks, 120);
        assert_eq!(
            locator
                .opener
                .attempts
                .len(),
            240
        );
    }

    #[test]
    fn test_no_candidates_fails_immediately() {
        let opener = FakeOpener::new(|_, _| Err(missing()));
        let mut locator = locator(opener);

        let err = locator
            .locate(&[], 115_200, |_| {})
            .unwrap_err();

        assert!(matches!(err, Error::PortNotFound { ref ports, .. } if ports.is_empty()));
        assert_eq!(locator.clock.sleeps, 0);
    }

    #[test]
    fn test_interrupt_stops_probing() {
        let opener = FakeOpener::new(|_, _| Err(missing()));
        let mut locator = locator(opener);
        locator.interrupted = || true;

        let err = locator
            .locate(&names(&["A"]), 115_200, |_| {})
            .unwrap_err();

        assert!(matches!(err, Error::Interrupted));
        assert!(
            locator
                .opener
                .attempts
                .is_empty()
        );
    }
}
