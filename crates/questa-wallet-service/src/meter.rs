//! Metered usage billing
//!
//! Converts wall-clock entertainment-app usage into whole-token charges
//! at a fixed rate. Each tick recomputes the tokens due from the absolute
//! elapsed time instead of incrementing a per-tick counter, so tick
//! drift, missed ticks, and process suspensions catch up exactly on
//! resume: a stalled loop charges `floor(stall / seconds_per_token)` on
//! the next tick, never zero and never one-per-missed-tick.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use questa_core::{Error, Result, UsageSession};
use questa_storage_sqlite::SessionStore;

use crate::cancel::CancelToken;
use crate::config::MeterConfig;
use crate::engine::{SharedDb, WalletEngine};
use crate::storage_err;

/// Billing session state machine: `Idle -> Running -> {Stopped, Exhausted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeterState {
    /// No session has started
    Idle,
    /// A session is accruing charges
    Running,
    /// The session ended normally
    Stopped,
    /// The session ended because the balance ran out
    Exhausted,
}

type StopCallback = Arc<dyn Fn(MeterState) + Send + Sync>;

struct ActiveSession {
    app_name: String,
    /// Monotonic start for in-process elapsed time
    started: Instant,
    /// Wall-clock start persisted for cross-restart replay
    started_at_ms: i64,
    /// Tokens already charged; session-scoped, never carried over
    charged: i64,
}

struct MeterInner {
    state: MeterState,
    session: Option<ActiveSession>,
}

/// Usage meter. Cheap to clone; all clones share the session.
#[derive(Clone)]
pub struct UsageMeter {
    engine: WalletEngine,
    config: MeterConfig,
    inner: Arc<Mutex<MeterInner>>,
    cancel: CancelToken,
    on_stop: Option<StopCallback>,
}

impl UsageMeter {
    /// Create a meter charging through the given engine
    pub fn new(engine: WalletEngine, config: MeterConfig) -> Self {
        Self {
            engine,
            config,
            inner: Arc::new(Mutex::new(MeterInner {
                state: MeterState::Idle,
                session: None,
            })),
            cancel: CancelToken::new(),
            on_stop: None,
        }
    }

    /// Invoke the callback when a session ends (stopped or exhausted)
    pub fn with_stop_callback(
        mut self,
        callback: impl Fn(MeterState) + Send + Sync + 'static,
    ) -> Self {
        self.on_stop = Some(Arc::new(callback));
        self
    }

    fn db(&self) -> &SharedDb {
        &self.engine.parts().db
    }

    /// Current state
    pub fn state(&self) -> MeterState {
        self.inner.lock().state
    }

    /// Tokens charged to the running session so far
    pub fn session_tokens_charged(&self) -> i64 {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|s| s.charged)
            .unwrap_or(0)
    }

    /// Start a usage session for an entertainment app.
    ///
    /// Rejects when a session is already running or the balance cannot
    /// cover a single billing unit. Persists the session record so an
    /// interrupted process can replay it on next launch.
    pub async fn start(&self, app_name: &str) -> Result<()> {
        {
            let inner = self.inner.lock();
            if inner.state == MeterState::Running {
                return Err(Error::Validation(
                    "a usage session is already running".to_string(),
                ));
            }
        }

        let balance = self.engine.balance()?;
        if balance < 1 {
            return Err(Error::InsufficientBalance {
                required: 1,
                available: balance,
            });
        }

        let started_at_ms = chrono::Utc::now().timestamp_millis();
        let record = UsageSession {
            app_name: app_name.to_string(),
            started_at: started_at_ms,
            tokens_charged: 0,
            active: true,
        };
        {
            let db = self.db().lock();
            SessionStore::new(&db).save(&record).map_err(storage_err)?;
        }

        let mut inner = self.inner.lock();
        inner.state = MeterState::Running;
        inner.session = Some(ActiveSession {
            app_name: app_name.to_string(),
            started: Instant::now(),
            started_at_ms,
            charged: 0,
        });
        // A stale ticker that misses this reset only ticks idempotently
        // until it observes a non-running state
        self.cancel.reset();

        tracing::info!(
            "Usage session started for {} ({} tokens available)",
            app_name,
            balance
        );
        Ok(())
    }

    /// One billing step: charge whatever the elapsed time says is due.
    ///
    /// Returns the tokens charged this tick. Transitions to `Exhausted`
    /// (whole tokens only, no partial charge) when the balance cannot
    /// cover the due amount.
    pub async fn tick(&self) -> Result<i64> {
        let snapshot = {
            let inner = self.inner.lock();
            match (&inner.state, &inner.session) {
                (MeterState::Running, Some(session)) => {
                    let elapsed_ms = session.started.elapsed().as_millis() as i64;
                    let expected = elapsed_ms / self.config.ms_per_token();
                    Some((
                        session.app_name.clone(),
                        elapsed_ms,
                        expected - session.charged,
                    ))
                }
                _ => None,
            }
        };
        let Some((app_name, elapsed_ms, due)) = snapshot else {
            return Ok(0);
        };

        if due <= 0 {
            return Ok(0);
        }

        let balance = self.engine.balance()?;
        if balance < due {
            tracing::info!(
                "Balance exhausted for {}: {} due, {} available",
                app_name,
                due,
                balance
            );
            self.finish(MeterState::Exhausted).await?;
            return Ok(0);
        }

        let description = format!("{} usage ({}s)", app_name, elapsed_ms / 1_000);
        match self.engine.spend(due, &description, Some(&app_name)).await {
            Ok(()) => {}
            Err(Error::InsufficientBalance { .. }) => {
                self.finish(MeterState::Exhausted).await?;
                return Ok(0);
            }
            Err(e) => return Err(e),
        }

        let record = {
            let mut inner = self.inner.lock();
            inner.session.as_mut().map(|session| {
                session.charged += due;
                UsageSession {
                    app_name: session.app_name.clone(),
                    started_at: session.started_at_ms,
                    tokens_charged: session.charged,
                    active: true,
                }
            })
        };
        if let Some(record) = record {
            let db = self.db().lock();
            if let Err(e) = SessionStore::new(&db).save(&record) {
                tracing::warn!("Failed to persist session progress: {}", e);
            }
        }

        Ok(due)
    }

    /// Stop the running session.
    ///
    /// Performs a final reconciliation charge for any elapsed-but-uncharged
    /// interval, then discards the session state. The charged counter is
    /// session-scoped: the next session starts from zero.
    pub async fn stop(&self) -> Result<i64> {
        let snapshot = {
            let inner = self.inner.lock();
            match (&inner.state, &inner.session) {
                (MeterState::Running, Some(session)) => Some((
                    session.app_name.clone(),
                    session.started.elapsed().as_millis() as i64,
                    session.charged,
                )),
                _ => None,
            }
        };
        let Some((app_name, elapsed_ms, charged)) = snapshot else {
            return Err(Error::Validation("no usage session is running".to_string()));
        };

        let due = elapsed_ms / self.config.ms_per_token() - charged;
        let mut final_charge = 0;
        if due > 0 {
            let balance = self.engine.balance()?;
            if balance >= due {
                let description = format!("{} usage ({}s)", app_name, elapsed_ms / 1_000);
                self.engine.spend(due, &description, Some(&app_name)).await?;
                final_charge = due;
            } else {
                tracing::warn!(
                    "Skipping final charge of {} for {}: only {} available",
                    due,
                    app_name,
                    balance
                );
            }
        }

        self.finish(MeterState::Stopped).await?;
        tracing::info!(
            "Usage session stopped for {}: {} token(s) charged",
            app_name,
            charged + final_charge
        );
        Ok(charged + final_charge)
    }

    /// Replay a session that was active when the process was interrupted.
    ///
    /// Charges the full elapsed interval once (clamped to the available
    /// balance) and discards the record, so the session is never resumed
    /// indefinitely and never charged twice.
    pub async fn replay_interrupted(&self) -> Result<Option<i64>> {
        let persisted = {
            let db = self.db().lock();
            SessionStore::new(&db).load().map_err(storage_err)?
        };
        let Some(session) = persisted else {
            return Ok(None);
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        // A backwards clock jump must not produce a negative interval
        let elapsed_ms = (now_ms - session.started_at).max(0);
        let due = (elapsed_ms / self.config.ms_per_token() - session.tokens_charged).max(0);
        let available = self.engine.balance()?;
        let charge = due.min(available);

        if charge > 0 {
            let description = format!("{} usage (recovered session)", session.app_name);
            self.engine
                .spend(charge, &description, Some(&session.app_name))
                .await?;
        }

        {
            let db = self.db().lock();
            SessionStore::new(&db).clear().map_err(storage_err)?;
        }

        tracing::info!(
            "Replayed interrupted {} session: charged {} token(s)",
            session.app_name,
            charge
        );
        Ok(Some(charge))
    }

    async fn finish(&self, final_state: MeterState) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            inner.state = final_state;
            inner.session = None;
        }
        {
            let db = self.db().lock();
            SessionStore::new(&db).clear().map_err(storage_err)?;
        }
        self.cancel.cancel();
        if let Some(callback) = &self.on_stop {
            callback(final_state);
        }
        Ok(())
    }

    /// Spawn the fixed-cadence tick loop onto the runtime
    pub fn spawn_ticker(&self) -> tokio::task::JoinHandle<()> {
        let meter = self.clone();
        tokio::spawn(async move { meter.run().await })
    }

    /// Drive ticks until the session ends or the token is cancelled
    pub async fn run(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms.max(1)));
        // Catch-up comes from elapsed time, not from replaying missed ticks
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    if self.state() != MeterState::Running {
                        break;
                    }
                    if let Err(e) = self.tick().await {
                        tracing::error!("Billing tick failed: {}", e);
                    }
                }
            }
        }
    }
}
