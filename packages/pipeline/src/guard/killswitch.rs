//! Killswitch admission check.
//!
//! Denies before any downstream work: a global import flag plus a
//! per-tenant blocklist. An unexpected error inside the guard itself
//! fails OPEN — the request proceeds and
//! `killswitch_fallback_open_total` is incremented. Unavailability of the
//! guard must not black-hole traffic.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::common::metrics::{names, SharedMetrics};

use super::config::GuardConfig;

/// Outcome of a killswitch evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillswitchCheck {
    /// No switch applies.
    Allowed,
    /// A switch denies this request.
    Denied,
    /// The guard itself failed; request proceeds (fail-open).
    FallbackOpen,
}

impl KillswitchCheck {
    pub fn proceeds(&self) -> bool {
        !matches!(self, KillswitchCheck::Denied)
    }
}

type ErrorHook = Box<dyn Fn() -> Result<()> + Send + Sync>;

pub struct Killswitch {
    config: Arc<GuardConfig>,
    metrics: SharedMetrics,
    /// Test hook: raised errors simulate guard-internal failures.
    error_hook: Mutex<Option<ErrorHook>>,
}

impl Killswitch {
    pub fn new(config: Arc<GuardConfig>, metrics: SharedMetrics) -> Self {
        metrics.set(
            names::KILLSWITCH_STATE,
            &[("switch_name", "global_import")],
            if config.killswitch_global_import_disabled {
                1.0
            } else {
                0.0
            },
        );
        Self {
            config,
            metrics,
            error_hook: Mutex::new(None),
        }
    }

    /// Install a hook that runs inside every check; an Err from the hook
    /// exercises the fail-open path.
    pub fn set_error_hook(&self, hook: Option<ErrorHook>) {
        *self.error_hook.lock() = hook;
    }

    pub fn check(&self, tenant_id: &str) -> KillswitchCheck {
        match self.evaluate(tenant_id) {
            Ok(denied) => {
                if denied {
                    warn!(tenant_id = %tenant_id, "killswitch denied request");
                    KillswitchCheck::Denied
                } else {
                    KillswitchCheck::Allowed
                }
            }
            Err(e) => {
                error!(error = %e, "killswitch internal error, failing open");
                self.metrics.inc(
                    names::KILLSWITCH_ERROR_TOTAL,
                    &[("error_type", "exception")],
                );
                self.metrics.inc(names::KILLSWITCH_FALLBACK_OPEN_TOTAL, &[]);
                KillswitchCheck::FallbackOpen
            }
        }
    }

    fn evaluate(&self, tenant_id: &str) -> Result<bool> {
        if let Some(hook) = self.error_hook.lock().as_ref() {
            hook()?;
        }
        if self.config.killswitch_global_import_disabled {
            return Ok(true);
        }
        Ok(self.config.disabled_tenants().contains(tenant_id))
    }
}
