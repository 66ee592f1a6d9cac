use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::trace::{TraceEvent, TraceLevel, TraceSink};

use super::error::Error;
use super::provider::{LeaseDefinition, LeaseProvider, LeaseProviderErrorKind};

const MIN_LEASE_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_LEASE_TIMEOUT: Duration = Duration::from_secs(60);
const RENEWAL_SAFETY_MARGIN: Duration = Duration::from_secs(3);
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Subscription to [`LeaseManager`] ownership-change notifications. A subscriber only ever
/// observes changes from the moment it subscribed onward: copy-on-fire, never blocks the
/// publisher on subscriber work.
pub struct ChangeSubscription {
    receiver: watch::Receiver<u64>,
}

impl ChangeSubscription {
    /// Waits for the next ownership transition.
    pub async fn changed(&mut self) {
        let _ = self.receiver.changed().await;
    }
}

struct State {
    held_lease_id: Option<String>,
    last_renewal_at: Option<DateTime<Utc>>,
    last_renewal_latency: Duration,
}

impl State {
    fn seeking() -> Self {
        Self {
            held_lease_id: None,
            last_renewal_at: None,
            last_renewal_latency: Duration::ZERO,
        }
    }
}

/// Maintains best-effort ownership of a named lease against `provider`, publishing
/// ownership transitions and releasing the lease on shutdown.
pub struct LeaseManager {
    provider: Arc<dyn LeaseProvider>,
    trace: Arc<dyn TraceSink>,
    account_name: String,
    host_id: String,
    instance_id: String,
    lease_timeout: Duration,
    renewal_interval: Duration,
    retry_interval: Duration,
    state: Mutex<State>,
    in_flight: Mutex<bool>,
    disposed: AtomicBool,
    change_tx: watch::Sender<u64>,
    abort_handle: Mutex<Option<AbortHandle>>,
}

impl LeaseManager {
    /// `lease_timeout` must be within `[15s, 60s]`. `renewal_interval` defaults to
    /// `lease_timeout - 3s`; the retry cadence while seeking is fixed at 5s.
    ///
    /// Starts the internal tick loop immediately: the first tick fires with no delay, and
    /// every tick after that is spaced by `retry_interval` until the first successful
    /// acquire, after which the cadence becomes `renewal_interval`.
    pub fn new(
        provider: Arc<dyn LeaseProvider>,
        account_name: impl Into<String>,
        host_id: impl Into<String>,
        instance_id: impl Into<String>,
        lease_timeout: Duration,
        trace: Arc<dyn TraceSink>,
        renewal_interval: Option<Duration>,
    ) -> Result<Arc<Self>, Error> {
        if lease_timeout < MIN_LEASE_TIMEOUT || lease_timeout > MAX_LEASE_TIMEOUT {
            return Err(Error::InvalidArgument(lease_timeout));
        }
        let renewal_interval = renewal_interval.unwrap_or(lease_timeout - RENEWAL_SAFETY_MARGIN);

        let (change_tx, _) = watch::channel(0u64);
        let this = Arc::new(Self {
            provider,
            trace,
            account_name: account_name.into(),
            host_id: host_id.into(),
            instance_id: instance_id.into(),
            lease_timeout,
            renewal_interval,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            state: Mutex::new(State::seeking()),
            in_flight: Mutex::new(false),
            disposed: AtomicBool::new(false),
            change_tx,
            abort_handle: Mutex::new(None),
        });
        this.clone().start_tick_loop();
        Ok(this)
    }

    pub fn has_lease(&self) -> bool {
        self.state.lock().held_lease_id.is_some()
    }

    pub fn lease_id(&self) -> Option<String> {
        self.state.lock().held_lease_id.clone()
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        ChangeSubscription {
            receiver: self.change_tx.subscribe(),
        }
    }

    fn start_tick_loop(self: Arc<Self>) {
        let (abort_handle, abort_reg) = AbortHandle::new_pair();
        *self.abort_handle.lock() = Some(abort_handle);
        tokio::spawn(Abortable::new(
            async move {
                loop {
                    self.tick().await;
                    let delay = if self.has_lease() {
                        self.renewal_interval
                    } else {
                        self.retry_interval
                    };
                    tokio::time::sleep(delay).await;
                }
            },
            abort_reg,
        ));
    }

    /// One tick: drops itself if a previous tick is still in flight, otherwise runs
    /// `acquire_or_renew` to completion and clears the guard.
    async fn tick(self: &Arc<Self>) {
        {
            let mut in_flight = self.in_flight.lock();
            if *in_flight {
                return;
            }
            *in_flight = true;
        }
        self.acquire_or_renew().await;
        *self.in_flight.lock() = false;
    }

    async fn acquire_or_renew(self: &Arc<Self>) {
        let held = self.lease_id();
        let def = LeaseDefinition {
            account_name: self.account_name.clone(),
            namespace: self.account_name.clone(),
            name: LeaseDefinition::host_lock_name(&self.host_id),
            period: self.lease_timeout,
            lease_id: Some(held.clone().unwrap_or_else(|| self.instance_id.clone())),
        };
        let request_start = Instant::now();

        if held.is_some() {
            match self.provider.renew(&def).await {
                Ok(()) => self.record_success(request_start),
                Err(e) => {
                    let reason = if e.kind == LeaseProviderErrorKind::Conflict {
                        self.conflict_message()
                    } else {
                        format!("Server error: {}", e.message)
                    };
                    self.process_error(reason);
                }
            }
        } else {
            match self.provider.acquire(&def).await {
                Ok(new_lease_id) => {
                    self.set_held(Some(new_lease_id));
                    self.record_success(request_start);
                    self.log_info(format!(
                        "Host lock lease acquired by instance ID '{}'.",
                        self.instance_id
                    ));
                }
                Err(e) => {
                    let reason = if e.kind == LeaseProviderErrorKind::Conflict {
                        "Another host has acquired the lease.".to_string()
                    } else {
                        format!("Server error: {}", e.message)
                    };
                    self.process_error(reason);
                }
            }
        }
    }

    fn record_success(&self, request_start: Instant) {
        let mut state = self.state.lock();
        state.last_renewal_at = Some(Utc::now());
        state.last_renewal_latency = request_start.elapsed();
    }

    fn conflict_message(&self) -> String {
        let state = self.state.lock();
        let Some(last_renewal_at) = state.last_renewal_at else {
            return "Another host has acquired the lease.".to_string();
        };
        let ms_ago = Utc::now()
            .signed_duration_since(last_renewal_at)
            .num_milliseconds()
            .max(0);
        format!(
            "Another host has acquired the lease. The last successful renewal completed at {} \
             ({} milliseconds ago) with a duration of {} milliseconds.",
            last_renewal_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ms_ago,
            state.last_renewal_latency.as_millis(),
        )
    }

    fn process_error(&self, reason: String) {
        if self.has_lease() {
            self.set_held(None);
            self.log_info(format!("Failed to renew host lock lease: {reason}"));
        } else {
            self.log_verbose(format!(
                "Host instance '{}' failed to acquire host lock lease: {reason}",
                self.instance_id
            ));
        }
    }

    /// Sets `held_lease_id`, firing exactly one change notification if the value actually
    /// transitioned under case-insensitive compare.
    fn set_held(&self, new_id: Option<String>) {
        let changed = {
            let mut state = self.state.lock();
            let changed = !lease_ids_equal(&state.held_lease_id, &new_id);
            state.held_lease_id = new_id;
            changed
        };
        if changed {
            self.change_tx.send_modify(|generation| *generation += 1);
        }
    }

    fn log_info(&self, message: String) {
        self.trace.trace(TraceEvent::new(TraceLevel::Info, message));
    }

    fn log_verbose(&self, message: String) {
        self.trace
            .trace(TraceEvent::new(TraceLevel::Verbose, message));
    }

    /// Stops the tick loop, releases the lease if held (best-effort: errors are swallowed,
    /// the lease store will garbage-collect on `period` regardless), and marks the manager
    /// disposed. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.abort_handle.lock().take() {
            handle.abort();
        }
        if let Some(held_id) = self.lease_id() {
            let def = LeaseDefinition {
                account_name: self.account_name.clone(),
                namespace: self.account_name.clone(),
                name: LeaseDefinition::host_lock_name(&self.host_id),
                period: self.lease_timeout,
                lease_id: Some(held_id),
            };
            if let Err(e) = self.provider.release(&def).await {
                log::debug!("best-effort lease release failed: {e}");
            }
        }
    }
}

fn lease_ids_equal(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}
