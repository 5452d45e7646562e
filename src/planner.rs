use std::time::Duration;
use tokio::time::Instant;

use crate::config::{Config, QuotaConfig};
use crate::error::DiscoveryError;

/// A category of external calls sharing one quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    /// Repository search (30/min documented)
    Search,
    /// Code search (10/min documented)
    CodeSearch,
    /// Everything else under the hourly REST quota
    Rest,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Search => "search",
            EndpointClass::CodeSearch => "code_search",
            EndpointClass::Rest => "rest",
        }
    }
}

#[derive(Debug)]
struct BudgetState {
    consumed: u32,
    window_start: Instant,
}

enum Decision {
    Admit,
    /// Slot consumed, but we are inside the safety margin: pace before issuing.
    Pace(Duration),
    /// Window exhausted: wait this long, then retry.
    Wait(Duration),
}

/// Rolling-window quota for one endpoint class.
///
/// An explicitly owned object (handed to the planner, never a process-wide
/// singleton) so several missions can run with independent budgets in one
/// process. Uses `tokio::time` throughout, which lets tests pause the clock.
pub struct QuotaBudget {
    capacity: u32,
    window: Duration,
    /// Above this consumption level, grants are paced rather than immediate.
    soft_limit: u32,
    /// Fair (FIFO) mutex: queued callers are admitted first-come-first-served.
    queue: tokio::sync::Mutex<()>,
    state: parking_lot::Mutex<BudgetState>,
}

impl QuotaBudget {
    pub fn new(quota: QuotaConfig, safety_margin_pct: u32) -> Self {
        let capacity = quota.capacity.max(1);
        let margin = (capacity as u64 * safety_margin_pct as u64).div_ceil(100) as u32;
        Self {
            capacity,
            window: Duration::from_secs(quota.window_secs),
            soft_limit: capacity.saturating_sub(margin),
            queue: tokio::sync::Mutex::new(()),
            state: parking_lot::Mutex::new(BudgetState {
                consumed: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// Suspend until a call slot is available, then consume it.
    /// Returns how long the caller was held.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        // Holding the queue lock across waits keeps admission FCFS.
        let _turn = self.queue.lock().await;
        loop {
            match self.try_consume() {
                Decision::Admit => return started.elapsed(),
                Decision::Pace(pause) => {
                    tokio::time::sleep(pause).await;
                    return started.elapsed();
                }
                Decision::Wait(wait) => {
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Non-blocking variant: consume a slot or report how long until one
    /// frees up.
    pub fn try_acquire(&self, class: EndpointClass) -> Result<(), DiscoveryError> {
        match self.try_consume() {
            Decision::Admit | Decision::Pace(_) => Ok(()),
            Decision::Wait(wait) => Err(DiscoveryError::QuotaExceeded {
                class: class.as_str(),
                retry_in_secs: wait.as_secs().max(1),
            }),
        }
    }

    fn try_consume(&self) -> Decision {
        let mut state = self.state.lock();
        let now = Instant::now();
        if now.duration_since(state.window_start) >= self.window {
            state.consumed = 0;
            state.window_start = now;
        }
        if state.consumed >= self.capacity {
            let reset_at = state.window_start + self.window;
            return Decision::Wait(reset_at.saturating_duration_since(now));
        }
        state.consumed += 1;
        if state.consumed > self.soft_limit {
            // Spread the remaining slots over the window instead of bursting
            // into the hard boundary.
            Decision::Pace(self.window / self.capacity)
        } else {
            Decision::Admit
        }
    }

    /// Adopt the authoritative remaining/reset values reported by the service
    /// (clock drift, quota shared with other consumers). Never fails the
    /// caller; future acquires simply pace off the corrected bookkeeping.
    pub fn reconcile(&self, remaining: u32, reset_in: Duration) {
        let mut state = self.state.lock();
        state.consumed = self.capacity - remaining.min(self.capacity);
        // Place the window so that it ends when the service says it resets.
        let elapsed = self.window.saturating_sub(reset_in);
        let now = Instant::now();
        state.window_start = now.checked_sub(elapsed).unwrap_or(now);
    }
}

/// Gates all outbound calls: one independent [`QuotaBudget`] per endpoint
/// class.
pub struct Planner {
    search: QuotaBudget,
    code_search: QuotaBudget,
    rest: QuotaBudget,
}

impl Planner {
    pub fn new(config: &Config) -> Self {
        let margin = config.quota_safety_margin_pct;
        Self {
            search: QuotaBudget::new(config.search_quota, margin),
            code_search: QuotaBudget::new(config.code_search_quota, margin),
            rest: QuotaBudget::new(config.rest_quota, margin),
        }
    }

    pub async fn acquire(&self, class: EndpointClass) -> Duration {
        let waited = self.budget(class).acquire().await;
        if waited > Duration::from_secs(1) {
            tracing::debug!("waited {:.1}s for a {} slot", waited.as_secs_f64(), class.as_str());
        }
        waited
    }

    pub fn try_acquire(&self, class: EndpointClass) -> Result<(), DiscoveryError> {
        self.budget(class).try_acquire(class)
    }

    pub fn reconcile(&self, class: EndpointClass, remaining: u32, reset_in: Duration) {
        tracing::debug!(
            "reconciling {} quota: remaining={remaining}, reset in {}s",
            class.as_str(),
            reset_in.as_secs()
        );
        self.budget(class).reconcile(remaining, reset_in);
    }

    fn budget(&self, class: EndpointClass) -> &QuotaBudget {
        match class {
            EndpointClass::Search => &self.search,
            EndpointClass::CodeSearch => &self.code_search,
            EndpointClass::Rest => &self.rest,
        }
    }
}
