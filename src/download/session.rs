//! Per-site fetch state: the current transport, its gate and escalation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use super::engine::DownloadStats;
use super::gate::ConcurrencyGate;
use crate::registry::{SiteDefinition, TransportKind};
use crate::transport::{FetchError, Transport, TransportOptions};

/// Transport, gate and blocked-response bookkeeping for one site.
#[derive(Debug)]
pub(crate) struct SiteSession {
    site: Arc<SiteDefinition>,
    options: TransportOptions,
    transport: RwLock<Arc<Transport>>,
    gate: Arc<ConcurrencyGate>,
    workers: usize,
    blocked: AtomicUsize,
    escalated: AtomicBool,
    threshold: usize,
}

impl SiteSession {
    /// Selects the site's transport and sizes the gate to
    /// `min(workers, transport.max_safe_concurrency())`.
    pub(crate) fn new(
        site: Arc<SiteDefinition>,
        workers: usize,
        threshold: usize,
        options: TransportOptions,
    ) -> Result<Self, FetchError> {
        let transport = Transport::select(&site, &options)?;
        let ceiling = workers.min(transport.max_safe_concurrency());
        debug!(
            site = %site.id,
            transport = transport.kind().as_str(),
            workers,
            ceiling,
            "site session opened"
        );
        Ok(Self {
            site,
            options,
            transport: RwLock::new(Arc::new(transport)),
            gate: ConcurrencyGate::new(ceiling),
            workers,
            blocked: AtomicUsize::new(0),
            escalated: AtomicBool::new(false),
            threshold: threshold.max(1),
        })
    }

    pub(crate) fn site(&self) -> &SiteDefinition {
        &self.site
    }

    pub(crate) fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    /// The transport in effect right now.
    pub(crate) fn transport(&self) -> Arc<Transport> {
        Arc::clone(&self.transport.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn blocked_count(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Records a `Blocked` response. Returns true if this call escalated the site
    /// to the browser-simulating transport.
    ///
    /// The gate ceiling is lowered before the new transport becomes visible, so no
    /// task that can see the browser transport is admitted at the old ceiling.
    pub(crate) fn record_blocked(&self, stats: &DownloadStats) -> bool {
        stats.increment_blocked();
        let count = self.blocked.fetch_add(1, Ordering::SeqCst) + 1;
        if count < self.threshold || self.transport().kind() != TransportKind::Lightweight {
            return false;
        }
        if self.escalated.swap(true, Ordering::SeqCst) {
            return false;
        }

        let browser = match Transport::build(TransportKind::BrowserSim, &self.options) {
            Ok(browser) => browser,
            Err(error) => {
                warn!(
                    site = %self.site.id,
                    error = %error,
                    "cannot build browser transport; staying on lightweight"
                );
                return false;
            }
        };

        let ceiling = self
            .gate
            .lower_ceiling(self.workers.min(browser.max_safe_concurrency()));
        *self.transport.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(browser);
        stats.increment_escalations();
        warn!(
            site = %self.site.id,
            blocked = count,
            ceiling,
            "site is blocking requests; escalated to browser transport"
        );
        true
    }
}
