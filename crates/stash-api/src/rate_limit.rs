//! Per-campaign write throttling for the update route.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use stash_core::DocumentId;

use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window limit on writes per campaign.
///
/// A campaign's window starts at its first write and resets once `window`
/// has elapsed. Expired windows are pruned as new campaigns arrive.
#[derive(Clone)]
pub struct WriteRateLimiter {
    inner: Arc<Mutex<LimiterState>>,
    window: Duration,
    limit: u32,
}

#[derive(Default)]
struct LimiterState {
    windows: HashMap<DocumentId, Window>,
    allowed: u64,
    limited: u64,
}

#[derive(Clone, Copy)]
struct Window {
    opened_at: Instant,
    writes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub writes_allowed: u64,
    pub writes_limited: u64,
    pub tracked_campaigns: usize,
}

impl WriteRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.rate_limit_window, config.write_limit_per_window)
    }

    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LimiterState::default())),
            window,
            limit,
        }
    }

    /// Count one write for `campaign_id`, or reject it with the seconds left
    /// in the current window.
    pub fn check(&self, campaign_id: DocumentId) -> Result<(), AppError> {
        self.check_at(campaign_id, Instant::now())
    }

    fn check_at(&self, campaign_id: DocumentId, now: Instant) -> Result<(), AppError> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.windows.contains_key(&campaign_id) {
            let window = self.window;
            state
                .windows
                .retain(|_, open| now.duration_since(open.opened_at) < window);
        }

        let window = state.windows.entry(campaign_id).or_insert(Window {
            opened_at: now,
            writes: 0,
        });
        let elapsed = now.duration_since(window.opened_at);
        if elapsed >= self.window {
            *window = Window {
                opened_at: now,
                writes: 0,
            };
        }

        if window.writes < self.limit {
            window.writes += 1;
            state.allowed += 1;
            return Ok(());
        }

        let retry_after_secs = self
            .window
            .saturating_sub(now.duration_since(window.opened_at))
            .as_secs()
            .max(1);
        state.limited += 1;
        drop(state);

        tracing::warn!(campaign_id = %campaign_id, retry_after_secs, "write rate limit exceeded");
        Err(AppError::too_many_requests(
            format!("too many writes to campaign {campaign_id}"),
            retry_after_secs,
        ))
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        RateLimitMetricsSnapshot {
            writes_allowed: state.allowed,
            writes_limited: state.limited,
            tracked_campaigns: state.windows.len(),
        }
    }
}
