//! Proxy pool: egress identities with health tracking and quarantine.
//!
//! Each handle carries a health score that moves down on blocked/timeout
//! outcomes, up on success, and decays exponentially toward a neutral
//! baseline over time. Handles below the quarantine threshold are benched
//! for a cool-down interval. A handle is never leased to more concurrent
//! tasks than its lease cap allows.
//!
//! With no proxies configured the pool runs in direct mode: `acquire`
//! hands out a direct-egress lease and health tracking is a no-op.

use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::ScrapeError;

/// How a fetch attempt ended, from the pool's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success,
    Blocked,
    Timeout,
    TransportError,
}

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Maximum concurrent leases per handle.
    pub max_leases: u32,
    /// Health score below which a handle is quarantined.
    pub quarantine_threshold: f64,
    /// How long a quarantined handle stays ineligible.
    pub quarantine_cooldown: Duration,
    /// Time constant for exponential decay of health toward neutral.
    pub health_decay: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            max_leases: 1,
            quarantine_threshold: -3.0,
            quarantine_cooldown: Duration::from_secs(30),
            health_decay: Duration::from_secs(60),
        }
    }
}

const HEALTH_CAP: f64 = 5.0;

/// One egress identity.
#[derive(Debug)]
struct ProxyHandle {
    address: String,
    health: f64,
    last_used: Option<Instant>,
    active_leases: u32,
    quarantined_until: Option<Instant>,
    /// When `health` was last adjusted, for decay.
    health_at: Instant,
}

impl ProxyHandle {
    fn new(address: String) -> Self {
        Self {
            address,
            health: 0.0,
            last_used: None,
            active_leases: 0,
            quarantined_until: None,
            health_at: Instant::now(),
        }
    }

    /// Apply exponential decay toward the neutral baseline (0).
    fn decay_health(&mut self, time_constant: Duration, now: Instant) {
        let elapsed = now.duration_since(self.health_at).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        let factor = (-elapsed / time_constant.as_secs_f64()).exp();
        self.health *= factor;
        self.health_at = now;
    }

    fn is_quarantined(&self, now: Instant) -> bool {
        self.quarantined_until.is_some_and(|until| until > now)
    }
}

/// A checked-out egress identity. Must be returned via `ProxyPool::release`.
/// `address` is None for direct egress.
#[derive(Debug, Clone)]
pub struct ProxyLease {
    pub address: Option<String>,
    index: Option<usize>,
}

impl ProxyLease {
    fn direct() -> Self {
        Self {
            address: None,
            index: None,
        }
    }
}

/// Shared pool of egress identities.
#[derive(Debug)]
pub struct ProxyPool {
    config: ProxyPoolConfig,
    handles: RwLock<Vec<ProxyHandle>>,
    /// Round-robin cursor so load spreads across healthy handles.
    cursor: RwLock<usize>,
}

impl ProxyPool {
    pub fn new(addresses: Vec<String>, config: ProxyPoolConfig) -> Self {
        let handles: Vec<ProxyHandle> = addresses
            .into_iter()
            .filter(|a| !a.trim().is_empty())
            .map(|a| ProxyHandle::new(a.trim().to_string()))
            .collect();

        if handles.is_empty() {
            info!("proxy pool running in direct mode (no proxies configured)");
        } else {
            info!(proxies = handles.len(), "proxy pool configured");
        }

        Self {
            config,
            handles: RwLock::new(handles),
            cursor: RwLock::new(0),
        }
    }

    /// Whether the pool has no proxies and egress is direct.
    pub async fn is_direct(&self) -> bool {
        self.handles.read().await.is_empty()
    }

    /// Check out a handle, preferring one different from `avoid` so retries
    /// rotate egress. Fails with `Unavailable` when every handle is
    /// quarantined or at its lease cap; the caller backs off and retries
    /// the whole pool.
    pub async fn acquire(&self, avoid: Option<&str>) -> Result<ProxyLease, ScrapeError> {
        let mut handles = self.handles.write().await;
        if handles.is_empty() {
            return Ok(ProxyLease::direct());
        }

        let now = Instant::now();
        let len = handles.len();
        let start = {
            let mut cursor = self.cursor.write().await;
            let s = *cursor % len;
            *cursor = (*cursor + 1) % len;
            s
        };

        let mut fallback: Option<usize> = None;
        for offset in 0..len {
            let idx = (start + offset) % len;
            let handle = &mut handles[idx];
            handle.decay_health(self.config.health_decay, now);

            // Quarantine expiry: score returns to neutral.
            if handle.quarantined_until.is_some() && !handle.is_quarantined(now) {
                handle.quarantined_until = None;
                handle.health = 0.0;
                debug!(proxy = %handle.address, "quarantine expired");
            }

            if handle.is_quarantined(now) || handle.active_leases >= self.config.max_leases {
                continue;
            }

            if avoid == Some(handle.address.as_str()) {
                fallback.get_or_insert(idx);
                continue;
            }

            handle.active_leases += 1;
            handle.last_used = Some(now);
            return Ok(ProxyLease {
                address: Some(handle.address.clone()),
                index: Some(idx),
            });
        }

        // Only the avoided handle is usable; lease it rather than fail.
        if let Some(idx) = fallback {
            let handle = &mut handles[idx];
            handle.active_leases += 1;
            handle.last_used = Some(now);
            return Ok(ProxyLease {
                address: Some(handle.address.clone()),
                index: Some(idx),
            });
        }

        Err(ScrapeError::Unavailable)
    }

    /// Check a handle back in with the attempt's outcome.
    pub async fn release(&self, lease: ProxyLease, outcome: ProxyOutcome) {
        let Some(index) = lease.index else {
            return; // direct egress, nothing to track
        };

        let mut handles = self.handles.write().await;
        let Some(handle) = handles.get_mut(index) else {
            return;
        };

        let now = Instant::now();
        handle.active_leases = handle.active_leases.saturating_sub(1);
        handle.decay_health(self.config.health_decay, now);

        match outcome {
            ProxyOutcome::Success => {
                handle.health = (handle.health + 1.0).min(HEALTH_CAP);
            }
            ProxyOutcome::Blocked => handle.health -= 2.0,
            ProxyOutcome::Timeout => handle.health -= 1.5,
            ProxyOutcome::TransportError => handle.health -= 1.0,
        }

        if handle.health < self.config.quarantine_threshold && !handle.is_quarantined(now) {
            handle.quarantined_until = Some(now + self.config.quarantine_cooldown);
            warn!(
                proxy = %handle.address,
                health = handle.health,
                cooldown_secs = self.config.quarantine_cooldown.as_secs(),
                "proxy quarantined"
            );
        }
    }

    /// Number of handles currently eligible for leasing.
    pub async fn healthy_count(&self) -> usize {
        let handles = self.handles.read().await;
        let now = Instant::now();
        handles.iter().filter(|h| !h.is_quarantined(now)).count()
    }
}
