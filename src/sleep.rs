//! Sleep backends: realise a requested inter-packet delay with a selectable
//! timing primitive, per §4.A. All variants support early wake via
//! `CancelToken` when the engine aborts mid-sleep.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::options::AccurateMode;

/// Shared abort signal the sleep backends wait on so a multi-millisecond
/// sleep can be cut short immediately rather than only at its next poll,
/// per the "permitted enhancement" in Design Notes §9.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap();
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Reset for a new `replay()` call — mirrors `abort` being sticky only
    /// "until next replay" (§5).
    pub fn reset(&self) {
        *self.inner.0.lock().unwrap() = false;
    }

    /// Wait up to `dur`, returning early if cancelled. Returns `true` if
    /// cancelled.
    fn wait_timeout(&self, dur: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap();
        if *guard {
            return true;
        }
        let (guard, _) = cvar.wait_timeout(guard, dur).unwrap();
        *guard
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Upper bound on a single poll chunk for busy/partial-sleep backends, per
/// Design Notes §9 ("short chunks ≤1 ms and re-check").
const POLL_CHUNK: Duration = Duration::from_millis(1);

/// A concrete sleep primitive. Returned by `SleepBackendKind::build()`.
pub trait SleepBackend: Send {
    /// Sleep until `deadline`, waking early if `cancel` is signalled.
    /// Returns `true` if woken early by cancellation.
    fn sleep_until(&mut self, deadline: Instant, cancel: &CancelToken) -> bool;
}

fn poll_until_cancellable(deadline: Instant, cancel: &CancelToken) -> bool {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        let remaining = deadline - now;
        let chunk = remaining.min(POLL_CHUNK);
        if cancel.wait_timeout(chunk) {
            return true;
        }
    }
}

/// Busy-poll wall clock until the deadline. Highest CPU cost, best
/// resolution for very short delays.
struct GetTimeOfDayBackend;

impl SleepBackend for GetTimeOfDayBackend {
    fn sleep_until(&mut self, deadline: Instant, cancel: &CancelToken) -> bool {
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return true;
            }
            std::hint::spin_loop();
        }
        false
    }
}

/// Request an OS sleep for the full interval via `nanosleep(2)`, then
/// tight-poll any remainder (nanosleep commonly overshoots by a scheduling
/// quantum on non-realtime kernels).
struct NanoSleepBackend;

impl SleepBackend for NanoSleepBackend {
    fn sleep_until(&mut self, deadline: Instant, cancel: &CancelToken) -> bool {
        let now = Instant::now();
        if deadline <= now {
            return false;
        }
        let remaining = deadline - now;
        if remaining > POLL_CHUNK {
            let coarse = remaining - POLL_CHUNK;
            let spec = libc::timespec {
                tv_sec: coarse.as_secs() as libc::time_t,
                tv_nsec: coarse.subsec_nanos() as libc::c_long,
            };
            // Safety: `spec` is a valid, fully initialised timespec on the
            // stack; nanosleep's interruption (EINTR) is harmless here
            // since we re-poll the remainder below regardless.
            unsafe {
                libc::nanosleep(&spec, std::ptr::null_mut());
            }
        }
        poll_until_cancellable(deadline, cancel)
    }
}

/// Block on a zero-fdset `select(2)` with the remaining interval as its
/// timeout — a portable way to get an interruptible, sub-millisecond sleep
/// without a dedicated timer fd.
struct SelectBackend;

impl SleepBackend for SelectBackend {
    fn sleep_until(&mut self, deadline: Instant, cancel: &CancelToken) -> bool {
        let now = Instant::now();
        if deadline <= now {
            return false;
        }
        let remaining = (deadline - now).min(POLL_CHUNK);
        let mut tv = libc::timeval {
            tv_sec: remaining.as_secs() as libc::time_t,
            tv_usec: remaining.subsec_micros() as libc::suseconds_t,
        };
        // Safety: no fd sets are passed (nfds=0), so this is equivalent to
        // a portable interruptible sleep for `remaining`.
        unsafe {
            libc::select(
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut tv,
            );
        }
        if cancel.is_cancelled() {
            return true;
        }
        if Instant::now() < deadline {
            poll_until_cancellable(deadline, cancel)
        } else {
            false
        }
    }
}

/// Spin on a calibrated high-resolution counter (`quanta`'s TSC-backed
/// clock where available) instead of hand-rolled `rdtsc` inline asm —
/// `quanta` already does the calibration §4.A calls for.
struct RdtscBackend {
    clock: quanta::Clock,
}

impl RdtscBackend {
    fn new() -> Self {
        Self {
            clock: quanta::Clock::new(),
        }
    }
}

impl SleepBackend for RdtscBackend {
    fn sleep_until(&mut self, deadline: Instant, cancel: &CancelToken) -> bool {
        let now_instant = Instant::now();
        if deadline <= now_instant {
            return false;
        }
        let budget = deadline - now_instant;
        let start = self.clock.now();
        loop {
            if cancel.is_cancelled() {
                return true;
            }
            if self.clock.now().duration_since(start) >= budget {
                return false;
            }
            std::hint::spin_loop();
        }
    }
}

/// Read an x86 I/O port (`0x80`, the POST-diagnostic port) each iteration;
/// each read costs roughly 1µs on real hardware, giving a coarse spin-wait
/// without burning a full CPU core on pure computation. Requires `ioperm()`
/// privileges (root) at runtime — absent those, `sleep_until` falls back to
/// a plain poll rather than silently corrupting timing.
#[cfg(all(feature = "ioport", target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
struct IoPortBackend {
    have_permission: bool,
}

#[cfg(all(feature = "ioport", target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
impl IoPortBackend {
    fn new() -> Self {
        // Safety: ioperm() only grants this process permission to access
        // port 0x80; failure (non-root) is handled by falling back below.
        let rc = unsafe { libc::ioperm(0x80, 1, 1) };
        Self {
            have_permission: rc == 0,
        }
    }

    #[inline]
    fn read_port_80(&self) {
        // Safety: gated on have_permission, which reflects a successful
        // prior ioperm() call for exactly this port.
        unsafe {
            let mut _value: u8;
            std::arch::asm!("in al, 0x80", out("al") _value, options(nomem, nostack, preserves_flags));
        }
    }
}

#[cfg(all(feature = "ioport", target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
impl SleepBackend for IoPortBackend {
    fn sleep_until(&mut self, deadline: Instant, cancel: &CancelToken) -> bool {
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return true;
            }
            if self.have_permission {
                self.read_port_80();
            } else {
                std::hint::spin_loop();
            }
        }
        false
    }
}

/// Use the OS monotonic clock directly (`Instant`, which on every target
/// Rust supports is already backed by a monotonic absolute-time API), in a
/// blocking `thread::sleep` plus short final poll for accuracy.
struct AbsTimeBackend;

impl SleepBackend for AbsTimeBackend {
    fn sleep_until(&mut self, deadline: Instant, cancel: &CancelToken) -> bool {
        let now = Instant::now();
        if deadline <= now {
            return false;
        }
        let remaining = deadline - now;
        if remaining > POLL_CHUNK {
            if cancel.wait_timeout(remaining - POLL_CHUNK) {
                return true;
            }
        }
        poll_until_cancellable(deadline, cancel)
    }
}

/// Build-time/runtime backend selector, kept as a runtime table rather than
/// pure `#[cfg]` dispatch so unsupported selections become a clean
/// `ReplayError::Configuration` instead of a compile failure, per Design
/// Notes §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepBackendKind(AccurateMode);

impl From<AccurateMode> for SleepBackendKind {
    fn from(mode: AccurateMode) -> Self {
        SleepBackendKind(mode)
    }
}

impl SleepBackendKind {
    pub fn is_available(self) -> bool {
        match self.0 {
            AccurateMode::GetTimeOfDay
            | AccurateMode::NanoSleep
            | AccurateMode::Select
            | AccurateMode::AbsTime => true,
            AccurateMode::Rdtsc => cfg!(feature = "rdtsc"),
            AccurateMode::IoPort => {
                cfg!(feature = "ioport")
                    && cfg!(target_os = "linux")
                    && cfg!(any(target_arch = "x86", target_arch = "x86_64"))
            }
        }
    }

    pub fn build(self) -> Box<dyn SleepBackend> {
        match self.0 {
            AccurateMode::GetTimeOfDay => Box::new(GetTimeOfDayBackend),
            AccurateMode::NanoSleep => Box::new(NanoSleepBackend),
            AccurateMode::Select => Box::new(SelectBackend),
            AccurateMode::AbsTime => Box::new(AbsTimeBackend),
            #[cfg(feature = "rdtsc")]
            AccurateMode::Rdtsc => Box::new(RdtscBackend::new()),
            #[cfg(not(feature = "rdtsc"))]
            AccurateMode::Rdtsc => unreachable!("Rdtsc unavailable, checked by is_available()"),
            #[cfg(all(feature = "ioport", target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
            AccurateMode::IoPort => Box::new(IoPortBackend::new()),
            #[cfg(not(all(
                feature = "ioport",
                target_os = "linux",
                any(target_arch = "x86", target_arch = "x86_64")
            )))]
            AccurateMode::IoPort => unreachable!("IoPort unavailable, checked by is_available()"),
        }
    }
}
