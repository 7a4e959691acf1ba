//! Named timer manager: one-shot, repeating, and cron timers.
//!
//! Each timer is backed by a tokio sleep task. A per-name generation
//! counter lets replacement and cancellation race safely with delivery:
//! a stale task re-checks its generation under the lock before delivering,
//! so a replaced or cancelled timer either fires exactly once or not at
//! all, never twice.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use reflex_core::{normalize_cron, EngineError, Timer, TimerConfig};

/// Callback invoked on each timer expiry (the engine's ingress).
pub type ExpiryHandler = Arc<dyn Fn(Timer) + Send + Sync>;

struct Entry {
    timer: Timer,
    generation: u64,
    abort: AbortHandle,
}

enum Reschedule {
    Fixed(Duration),
    Cron(Box<Schedule>),
    None,
}

pub struct TimerManager {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    handler: Arc<RwLock<Option<ExpiryHandler>>>,
    next_generation: AtomicU64,
    stopped: Arc<AtomicBool>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            handler: Arc::new(RwLock::new(None)),
            next_generation: AtomicU64::new(1),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install the expiry handler. Expiries before a handler is set are
    /// dropped with a warning.
    pub fn set_expiry_handler(&self, handler: ExpiryHandler) {
        *self.handler.write().expect("timer handler lock poisoned") = Some(handler);
    }

    /// Schedule (or replace) a named timer.
    ///
    /// Replacing cancels the prior wake before the new one is scheduled, so
    /// a replaced timer never double-fires. Invalid durations and cron
    /// expressions are rejected here.
    pub fn set_timer(
        &self,
        config: TimerConfig,
        correlation_id: Option<String>,
    ) -> Result<Timer, EngineError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(EngineError::ServiceUnavailable("timer manager stopped".to_string()));
        }
        if config.name.trim().is_empty() {
            return Err(EngineError::Timer("timer name must not be empty".to_string()));
        }

        let now = Utc::now();
        let (initial_sleep, fire_at, duration_ms, reschedule) =
            match (&config.duration, &config.cron) {
                (Some(_), Some(_)) => {
                    return Err(EngineError::Timer(
                        "timer cannot have both duration and cron".to_string(),
                    ));
                }
                (None, None) => {
                    return Err(EngineError::Timer(
                        "timer needs either a duration or a cron expression".to_string(),
                    ));
                }
                (Some(spec), None) => {
                    let duration = spec.to_duration()?;
                    let reschedule = if config.repeat {
                        Reschedule::Fixed(duration)
                    } else {
                        Reschedule::None
                    };
                    (
                        duration,
                        now + chrono::Duration::from_std(duration)
                            .unwrap_or_else(|_| chrono::Duration::zero()),
                        Some(duration.as_millis() as u64),
                        reschedule,
                    )
                }
                (None, Some(expr)) => {
                    let schedule = Schedule::from_str(&normalize_cron(expr)).map_err(|e| {
                        EngineError::Timer(format!("invalid cron expression '{}': {}", expr, e))
                    })?;
                    let next = schedule.after(&now).next().ok_or_else(|| {
                        EngineError::Timer(format!("cron '{}' has no upcoming fire time", expr))
                    })?;
                    let sleep = (next - now).to_std().unwrap_or(Duration::ZERO);
                    (sleep, next, None, Reschedule::Cron(Box::new(schedule)))
                }
            };

        let timer = Timer {
            name: config.name.clone(),
            created_at: now,
            fire_at,
            duration_ms,
            cron: config.cron.clone(),
            repeat: config.repeat || config.cron.is_some(),
            count: 0,
            max_count: config.max_count,
            on_expire: config.on_expire.clone(),
            correlation_id,
        };

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        // Insert under the lock before the task can wake: a short timer must
        // find its entry when the sleep elapses.
        let mut entries = self.entries.write().expect("timer entries lock poisoned");
        let task = tokio::spawn(run_timer(
            Arc::clone(&self.entries),
            Arc::clone(&self.handler),
            Arc::clone(&self.stopped),
            config.name.clone(),
            generation,
            initial_sleep,
            reschedule,
        ));
        if let Some(old) = entries.insert(
            config.name.clone(),
            Entry { timer: timer.clone(), generation, abort: task.abort_handle() },
        ) {
            // Cancel the prior wake; its generation is stale either way.
            old.abort.abort();
            debug!(name = %config.name, "replaced existing timer");
        }

        Ok(timer)
    }

    /// Cancel a timer. Returns whether a pending timer existed.
    pub fn cancel_timer(&self, name: &str) -> bool {
        let removed = self
            .entries
            .write()
            .expect("timer entries lock poisoned")
            .remove(name);
        match removed {
            Some(entry) => {
                entry.abort.abort();
                true
            }
            None => false,
        }
    }

    pub fn get_timer(&self, name: &str) -> Option<Timer> {
        self.entries
            .read()
            .expect("timer entries lock poisoned")
            .get(name)
            .map(|e| e.timer.clone())
    }

    /// All pending timers, ordered by name.
    pub fn list(&self) -> Vec<Timer> {
        let entries = self.entries.read().expect("timer entries lock poisoned");
        let mut timers: Vec<Timer> = entries.values().map(|e| e.timer.clone()).collect();
        timers.sort_by(|a, b| a.name.cmp(&b.name));
        timers
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("timer entries lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every pending wake. No deliveries happen after this returns.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut entries = self.entries.write().expect("timer entries lock poisoned");
        for (_, entry) in entries.drain() {
            entry.abort.abort();
        }
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep-fire loop for one scheduled timer.
async fn run_timer(
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    handler: Arc<RwLock<Option<ExpiryHandler>>>,
    stopped: Arc<AtomicBool>,
    name: String,
    generation: u64,
    initial_sleep: Duration,
    reschedule: Reschedule,
) {
    let mut deadline = tokio::time::Instant::now() + initial_sleep;

    loop {
        tokio::time::sleep_until(deadline).await;

        // Decide under the lock whether this wake still owns the name.
        let fired: Option<(Timer, bool)> = {
            let mut map = entries.write().expect("timer entries lock poisoned");
            match map.get_mut(&name) {
                Some(entry) if entry.generation == generation => {
                    entry.timer.count += 1;
                    let exhausted = entry
                        .timer
                        .max_count
                        .map(|max| entry.timer.count >= max)
                        .unwrap_or(false);

                    let next_sleep = if exhausted {
                        None
                    } else {
                        match &reschedule {
                            Reschedule::Fixed(interval) => Some(*interval),
                            Reschedule::Cron(schedule) => {
                                let now = Utc::now();
                                schedule
                                    .after(&now)
                                    .next()
                                    .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
                            }
                            Reschedule::None => None,
                        }
                    };

                    let snapshot = entry.timer.clone();
                    match next_sleep {
                        Some(sleep) => {
                            deadline += sleep;
                            entry.timer.fire_at = Utc::now()
                                + chrono::Duration::from_std(sleep)
                                    .unwrap_or_else(|_| chrono::Duration::zero());
                            Some((snapshot, true))
                        }
                        None => {
                            map.remove(&name);
                            Some((snapshot, false))
                        }
                    }
                }
                _ => None,
            }
        };

        match fired {
            Some((timer, continues)) => {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                let handler = handler.read().expect("timer handler lock poisoned").clone();
                match handler {
                    Some(h) => h(timer),
                    None => warn!(name = %name, "timer expired with no handler installed"),
                }
                if !continues {
                    break;
                }
            }
            None => break,
        }
    }
}
