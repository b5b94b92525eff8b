//! Context/options module, component H: owns everything a running replay
//! needs. Split in two per the concurrency model in §5: `ReplayContext`
//! itself (sources, caches, egress handles) is exclusively owned by
//! whichever thread calls `replay()`, while `ReplayControl` is the cheap,
//! `Arc`-cloneable handle observer threads use to abort/suspend/inspect —
//! the Rust analogue of other threads holding the same `tcpreplay_t *` and
//! touching only its `volatile` fields.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::cache::PacketMemoryCache;
use crate::error::{ReplayError, TaggedMessage};
use crate::options::{InterfaceSlot, Options};
use crate::routing::RoutingCache;
use crate::send::{DatalinkSendPacket, SendPacket};
use crate::sleep::CancelToken;
use crate::source::{FdSource, FileSource, PacketSource};
use crate::types::{LinkType, Stats, StatsSnapshot};

/// The restricted control surface: abort/suspend/restart/is_running/
/// is_suspended/get_stats/get_current_source/geterr/getwarn, per §5. Safe
/// to call concurrently with a `replay()` call running on another thread
/// holding the owning `ReplayContext`.
pub struct ReplayControl {
    stats: Stats,
    running: AtomicBool,
    aborted: AtomicBool,
    suspended: AtomicBool,
    current_source: AtomicUsize,
    error: Mutex<Option<TaggedMessage>>,
    warning: Mutex<Option<TaggedMessage>>,
    cancel: CancelToken,
    suspend_tx: Sender<()>,
    suspend_rx: Receiver<()>,
}

impl ReplayControl {
    fn new() -> Arc<Self> {
        let (suspend_tx, suspend_rx) = unbounded();
        Arc::new(Self {
            stats: Stats::new(),
            running: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            current_source: AtomicUsize::new(0),
            error: Mutex::new(None),
            warning: Mutex::new(None),
            cancel: CancelToken::new(),
            suspend_tx,
            suspend_rx,
        })
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
        self.cancel.cancel();
        let _ = self.suspend_tx.send(());
    }

    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Relaxed);
    }

    pub fn restart(&self) {
        self.suspended.store(false, Ordering::Relaxed);
        let _ = self.suspend_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Relaxed)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn get_current_source(&self) -> usize {
        self.current_source.load(Ordering::Relaxed)
    }

    pub fn geterr(&self) -> Option<TaggedMessage> {
        self.error.lock().unwrap().clone()
    }

    pub fn getwarn(&self) -> Option<TaggedMessage> {
        self.warning.lock().unwrap().clone()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Block the calling (worker) thread while suspended, waking on
    /// `restart()`/`abort()` instead of a fixed poll interval. Returns
    /// `true` if the suspension ended because of an abort.
    pub(crate) fn wait_while_suspended(&self) -> bool {
        while self.is_suspended() {
            if self.is_aborted() {
                return true;
            }
            let _ = self
                .suspend_rx
                .recv_timeout(std::time::Duration::from_millis(100));
        }
        self.is_aborted()
    }

    pub(crate) fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::Relaxed);
    }

    pub(crate) fn reset_abort(&self) {
        self.aborted.store(false, Ordering::Relaxed);
        self.cancel.reset();
    }

    pub(crate) fn set_current_source(&self, index: usize) {
        self.current_source.store(index, Ordering::Relaxed);
    }

    pub(crate) fn set_error(&self, msg: TaggedMessage) {
        *self.error.lock().unwrap() = Some(msg);
    }

    pub(crate) fn set_warning(&self, msg: TaggedMessage) {
        *self.warning.lock().unwrap() = Some(msg);
    }
}

/// The worker-owned state: options, egress handles, per-source caches, and
/// the routing cache. Holds an `Arc<ReplayControl>` internally so
/// `replay()` can flip atomics and stash errors without needing `&mut`
/// access threaded through every call.
pub struct ReplayContext {
    pub options: Options,
    primary: Option<Box<dyn SendPacket>>,
    secondary: Option<Box<dyn SendPacket>>,
    pub routing: RoutingCache,
    caches: Vec<PacketMemoryCache>,
    control: Arc<ReplayControl>,
}

impl ReplayContext {
    pub fn new(options: Options) -> Self {
        let caches = options
            .sources
            .iter()
            .map(|_| PacketMemoryCache::new())
            .collect();
        Self {
            options,
            primary: None,
            secondary: None,
            routing: RoutingCache::new(),
            caches,
            control: ReplayControl::new(),
        }
    }

    /// A cheap, `Send + Sync` handle observer threads can clone and hold
    /// onto independently of this `ReplayContext`, which stays with the
    /// thread that calls `replay()`.
    pub fn control(&self) -> Arc<ReplayControl> {
        self.control.clone()
    }

    /// Open live egress interfaces (if named) and validate link-type
    /// consistency across both, per invariant 2. Call once before `replay`.
    pub fn init(&mut self) -> Result<(), ReplayError> {
        if let Some(name) = self.options.intf1_name.clone() {
            self.primary = Some(Box::new(DatalinkSendPacket::open(&name)?));
        }
        if let Some(name) = self.options.intf2_name.clone() {
            self.secondary = Some(Box::new(DatalinkSendPacket::open(&name)?));
        }
        if let (Some(p), Some(s)) = (&self.primary, &self.secondary) {
            if p.dlt() != s.dlt() {
                return Err(ReplayError::configuration(
                    "primary and secondary interfaces report different link types",
                ));
            }
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(p) = &mut self.primary {
            p.close();
        }
        if let Some(s) = &mut self.secondary {
            s.close();
        }
        self.primary = None;
        self.secondary = None;
    }

    /// Resolve `name` against the live interface list, open it as the given
    /// slot's egress, and reject it if its link type disagrees with the
    /// other egress already open — the Rust counterpart of the original's
    /// `tcpreplay_set_interface`/`get_interface`, folded into one call since
    /// here "resolve" and "open" aren't split across a separate interface
    /// list owned by the caller.
    pub fn set_interface(&mut self, slot: InterfaceSlot, name: &str) -> Result<(), ReplayError> {
        let resolved = pnet_datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| ReplayError::configuration(format!("invalid interface name/alias: {name}")))?
            .name;

        let opened = DatalinkSendPacket::open(&resolved)?;
        let other_dlt = match slot {
            InterfaceSlot::Primary => self.secondary.as_ref().map(|s| s.dlt()),
            InterfaceSlot::Secondary => self.primary.as_ref().map(|s| s.dlt()),
        };
        if let Some(other_dlt) = other_dlt {
            if other_dlt != opened.dlt() {
                return Err(ReplayError::configuration(format!(
                    "DLT type mismatch for {resolved} ({:?}) and the other egress ({:?})",
                    opened.dlt(),
                    other_dlt
                )));
            }
        }

        match slot {
            InterfaceSlot::Primary => {
                self.options.intf1_name = Some(resolved);
                self.primary = Some(Box::new(opened));
            }
            InterfaceSlot::Secondary => {
                self.options.intf2_name = Some(resolved);
                self.secondary = Some(Box::new(opened));
            }
        }
        Ok(())
    }

    /// Load a routing cache from disk and attach it, enforcing invariant 3:
    /// a routing cache only makes sense with exactly one configured source.
    pub fn set_tcpprep_cache(&mut self, path: impl AsRef<Path>) -> Result<(), ReplayError> {
        if self.options.sources.len() > 1 {
            return Err(ReplayError::configuration(
                "a routing cache requires exactly one configured source",
            ));
        }
        let cache = crate::routing::read_cache(path.as_ref())?;
        self.options.comment = cache.comment.clone();
        self.routing = cache;
        Ok(())
    }

    /// Inject a mock egress for tests, bypassing `init`'s live-interface
    /// resolution entirely.
    pub fn set_primary_for_test(&mut self, sp: Box<dyn SendPacket>) {
        self.primary = Some(sp);
    }

    pub fn set_secondary_for_test(&mut self, sp: Box<dyn SendPacket>) {
        self.secondary = Some(sp);
    }

    pub fn primary_mut(&mut self) -> Option<&mut Box<dyn SendPacket>> {
        self.primary.as_mut()
    }

    pub fn secondary_mut(&mut self) -> Option<&mut Box<dyn SendPacket>> {
        self.secondary.as_mut()
    }

    pub fn open_source(&self, index: usize) -> Result<Box<dyn PacketSource>, ReplayError> {
        use crate::options::SourceSpec;
        match &self.options.sources[index] {
            SourceSpec::Filename(path) => Ok(Box::new(FileSource::open(path)?)),
            SourceSpec::Fd(fd) => Ok(Box::new(FdSource::open(*fd)?)),
            SourceSpec::Cache => Err(ReplayError::state(
                "cache-backed sources are read via the packet memory cache, not open_source",
            )),
        }
    }

    pub fn cache(&self, index: usize) -> &PacketMemoryCache {
        &self.caches[index]
    }

    pub fn cache_mut(&mut self, index: usize) -> &mut PacketMemoryCache {
        &mut self.caches[index]
    }

    pub fn sleep_backend(&self) -> crate::sleep::SleepBackendKind {
        crate::sleep::SleepBackendKind::from(self.options.accurate)
    }

    pub fn stats(&self) -> &Stats {
        &self.control.stats
    }

    // --- Thin passthroughs so a caller that only has `&ReplayContext` (not
    // yet a cloned `ReplayControl`) can still drive the common cases. ---

    pub fn abort(&self) {
        self.control.abort();
    }

    pub fn suspend(&self) {
        self.control.suspend();
    }

    pub fn restart(&self) {
        self.control.restart();
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn is_suspended(&self) -> bool {
        self.control.is_suspended()
    }

    pub fn is_aborted(&self) -> bool {
        self.control.is_aborted()
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.control.get_stats()
    }

    pub fn get_current_source(&self) -> usize {
        self.control.get_current_source()
    }

    pub fn geterr(&self) -> Option<TaggedMessage> {
        self.control.geterr()
    }

    pub fn getwarn(&self) -> Option<TaggedMessage> {
        self.control.getwarn()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.control.cancel_token()
    }

    pub(crate) fn wait_while_suspended(&self) -> bool {
        self.control.wait_while_suspended()
    }

    pub(crate) fn set_running(&self, value: bool) {
        self.control.set_running(value);
    }

    pub(crate) fn reset_abort(&self) {
        self.control.reset_abort();
    }

    pub(crate) fn set_current_source(&self, index: usize) {
        self.control.set_current_source(index);
    }

    pub(crate) fn set_error(&self, msg: TaggedMessage) {
        self.control.set_error(msg);
    }

    pub(crate) fn set_warning(&self, msg: TaggedMessage) {
        self.control.set_warning(msg);
    }

    pub(crate) fn link_type(&self) -> Option<LinkType> {
        self.primary.as_ref().map(|p| p.dlt())
    }
}
