//! Adaptive device supervision.
//!
//! When the active source has been silent for too long, the recorder asks
//! the supervisor to look for a device that is actually carrying signal.
//! Scans are rate-limited and run on a transient thread so the chunker
//! never stalls; the result is applied through [`DeviceSwitcher`] only
//! after re-checking that it is still relevant.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(test)]
use mockall::automock;

use crate::devices::auto_detect::{find_active_device, ScanOptions, MIC_KEYWORDS};

/// Minimum spacing between scans.
const SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Probe threshold for hot-swap scans, slightly above the auto-select
/// threshold so marginal sources do not cause flapping.
const SWITCH_THRESHOLD: f32 = 0.005;

const SWITCH_PROBE_DURATION: f64 = 0.5;

/// The recorder-side surface the supervisor drives.
#[cfg_attr(test, automock)]
pub trait DeviceSwitcher: Send + Sync {
    fn is_recording(&self) -> bool;
    fn current_device(&self) -> Option<usize>;
    /// Instantaneous RMS of the incumbent source.
    fn recent_rms(&self) -> f32;
    fn switch_device(&self, device_index: usize) -> bool;
}

/// A scan hit: a device seen carrying signal.
#[derive(Debug, Clone)]
pub struct ScanHit {
    pub index: usize,
    pub name: String,
    pub rms_level: f32,
}

type Scanner = dyn Fn(Option<usize>) -> Option<ScanHit> + Send + Sync;

/// Probes peer devices on demand and triggers hot-swaps.
pub struct DeviceSupervisor {
    scanner: Arc<Scanner>,
    last_scan: Mutex<Option<Instant>>,
}

impl DeviceSupervisor {
    /// Supervisor using real device probes at the given sample rate.
    pub fn new(sample_rate: u32) -> Self {
        let scanner: Arc<Scanner> = Arc::new(move |current: Option<usize>| {
            let options = ScanOptions {
                probe_duration: SWITCH_PROBE_DURATION,
                threshold: SWITCH_THRESHOLD,
                prefer_virtual: true,
                exclude_keywords: MIC_KEYWORDS.iter().map(|k| k.to_string()).collect(),
                exclude_indices: current.into_iter().collect(),
            };
            find_active_device(sample_rate, &options).map(|active| ScanHit {
                index: active.device.index,
                name: active.device.name,
                rms_level: active.rms_level,
            })
        });
        Self::with_scanner(scanner)
    }

    /// Supervisor with an injected scanner.
    pub fn with_scanner(scanner: Arc<Scanner>) -> Self {
        Self {
            scanner,
            last_scan: Mutex::new(None),
        }
    }

    /// Scan for a better source unless one ran within the last 5 seconds.
    /// The scan itself runs detached; this call never blocks on audio I/O.
    pub fn maybe_probe(&self, switcher: Arc<dyn DeviceSwitcher>) {
        {
            let mut last_scan = self.last_scan.lock().expect("Supervisor scan mutex poisoned");
            if let Some(last) = *last_scan {
                if last.elapsed() < SCAN_INTERVAL {
                    tracing::debug!("device scan suppressed by rate limit");
                    return;
                }
            }
            *last_scan = Some(Instant::now());
        }

        let scanner = self.scanner.clone();
        let current = switcher.current_device();

        thread::spawn(move || {
            tracing::debug!("scanning for alternative devices (current: {:?})", current);
            run_scan(scanner.as_ref(), switcher.as_ref(), current);
        });
    }
}

/// One scan pass: find a candidate and apply it if it still makes sense.
fn run_scan(scanner: &Scanner, switcher: &dyn DeviceSwitcher, current: Option<usize>) {
    let Some(hit) = scanner(current) else {
        tracing::debug!("no alternative device found");
        return;
    };

    if Some(hit.index) == current {
        return;
    }

    // The probe took real time; a stale result must not override what
    // happened meanwhile.
    if !switcher.is_recording() {
        tracing::debug!("discarding probe result: recorder stopped");
        return;
    }
    if switcher.current_device() != current {
        tracing::debug!("discarding probe result: device already changed");
        return;
    }

    if hit.rms_level > switcher.recent_rms() {
        tracing::info!(
            "better signal found: [{}] {} (RMS {:.4})",
            hit.index,
            hit.name,
            hit.rms_level
        );
        switcher.switch_device(hit.index);
    } else {
        tracing::debug!(
            "candidate [{}] {} not louder than incumbent",
            hit.index,
            hit.name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hit(index: usize) -> ScanHit {
        ScanHit {
            index,
            name: format!("Device {}", index),
            rms_level: 0.1,
        }
    }

    #[test]
    fn test_run_scan_switches_to_louder_device() {
        let mut switcher = MockDeviceSwitcher::new();
        switcher.expect_is_recording().return_const(true);
        switcher.expect_current_device().return_const(Some(0usize));
        switcher.expect_recent_rms().return_const(0.0f32);
        switcher
            .expect_switch_device()
            .withf(|&index| index == 3)
            .times(1)
            .return_const(true);

        run_scan(&|_| Some(hit(3)), &switcher, Some(0));
    }

    #[test]
    fn test_run_scan_discards_result_after_stop() {
        let mut switcher = MockDeviceSwitcher::new();
        switcher.expect_is_recording().return_const(false);
        switcher.expect_switch_device().times(0);

        run_scan(&|_| Some(hit(3)), &switcher, Some(0));
    }

    #[test]
    fn test_run_scan_discards_result_after_device_change() {
        let mut switcher = MockDeviceSwitcher::new();
        switcher.expect_is_recording().return_const(true);
        // a swap happened while the probe was running
        switcher.expect_current_device().return_const(Some(7usize));
        switcher.expect_switch_device().times(0);

        run_scan(&|_| Some(hit(3)), &switcher, Some(0));
    }

    #[test]
    fn test_run_scan_ignores_quieter_candidate() {
        let mut switcher = MockDeviceSwitcher::new();
        switcher.expect_is_recording().return_const(true);
        switcher.expect_current_device().return_const(Some(0usize));
        switcher.expect_recent_rms().return_const(0.5f32);
        switcher.expect_switch_device().times(0);

        run_scan(&|_| Some(hit(3)), &switcher, Some(0));
    }

    #[test]
    fn test_run_scan_skips_current_device() {
        let mut switcher = MockDeviceSwitcher::new();
        switcher.expect_switch_device().times(0);

        run_scan(&|_| Some(hit(0)), &switcher, Some(0));
    }

    struct CountingSwitcher {
        switches: AtomicUsize,
    }

    impl DeviceSwitcher for CountingSwitcher {
        fn is_recording(&self) -> bool {
            true
        }
        fn current_device(&self) -> Option<usize> {
            Some(0)
        }
        fn recent_rms(&self) -> f32 {
            0.0
        }
        fn switch_device(&self, _device_index: usize) -> bool {
            self.switches.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn test_maybe_probe_is_rate_limited() {
        let scans = Arc::new(AtomicUsize::new(0));
        let scan_counter = scans.clone();
        let supervisor = DeviceSupervisor::with_scanner(Arc::new(move |_| {
            scan_counter.fetch_add(1, Ordering::SeqCst);
            Some(ScanHit {
                index: 3,
                name: "Device 3".to_string(),
                rms_level: 0.1,
            })
        }));

        let switcher = Arc::new(CountingSwitcher {
            switches: AtomicUsize::new(0),
        });

        // burst of triggers inside one rate-limit window
        for _ in 0..5 {
            supervisor.maybe_probe(switcher.clone());
        }

        // let the single detached scan finish
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(scans.load(Ordering::SeqCst), 1);
        assert_eq!(switcher.switches.load(Ordering::SeqCst), 1);
    }
}
