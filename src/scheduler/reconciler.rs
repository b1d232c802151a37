//! Reconciliation loop
//!
//! One pass walks the task list in order: logins first come first, then
//! every eligible grid ladder runs one cycle. A cycle reads the ladder and
//! position, matches a tier, checks for outstanding orders, and runs buy and
//! sell admission independently.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::report::{CycleOutcome, CycleReport, SideStatus};
use super::session::{Clock, Eligibility, SessionState, SystemClock};
use super::shutdown::Shutdown;
use super::tasks::{LoginTask, Task, TaskSource};
use crate::actuator::{Actuator, LoginRequest, OrderRequest, SubmitOutcome, TimedActuator};
use crate::config::{Config, SchedulerConfig};
use crate::error::{ActuatorError, CycleError};
use crate::notifier::{Event, Notifier};
use crate::oms::{
    price_deviation, AdmissionController, AdmissionRequest, AdmissionVerdict, GuardDecision,
    OrderExecutor, OutstandingOrderGuard, RejectReason, TierMatcher, TierResolution,
};
use crate::store::{LadderStore, TelemetryUpdate};
use crate::types::{
    DriftRecord, HaltCause, HaltLatch, LadderRung, LadderSnapshot, LadderTelemetry, MatchBasis,
    PositionSnapshot, Side,
};

/// Longest single sleep while a blackout is active
const BLACKOUT_POLL: Duration = Duration::from_secs(60);

/// How a pass over the task list ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed { cycles: usize },
    NoTasks,
    Blackout { remaining: Duration },
    SurfaceLost,
    SessionLost,
    Interrupted,
}

/// Pre-admission breaker: drift too large for the matched rung to absorb
pub fn breaker_trip(drift: &DriftRecord, rung: &LadderRung) -> Option<(Side, HaltCause)> {
    let raw = drift.raw_difference;
    if raw > 0 && raw > rung.buy_quantity {
        Some((Side::Buy, HaltCause::ExcessHolding))
    } else if raw < 0 && raw.abs() > rung.sell_quantity {
        Some((Side::Sell, HaltCause::Shortfall))
    } else {
        None
    }
}

/// Rejections that happen every cycle in normal operation
fn is_routine(reason: RejectReason) -> bool {
    matches!(
        reason,
        RejectReason::HaltActive | RejectReason::BelowCostBasisViolation | RejectReason::ZeroQuantity
    )
}

pub struct ReconciliationLoop {
    settings: SchedulerConfig,
    actuator: Arc<dyn Actuator>,
    store: Arc<dyn LadderStore>,
    notifier: Arc<dyn Notifier>,
    tasks: Arc<dyn TaskSource>,
    clock: Arc<dyn Clock>,
    matcher: TierMatcher,
    admission: AdmissionController,
    guard: OutstandingOrderGuard,
    executor: OrderExecutor,
    drift_warning_threshold: i64,
    /// Last announced out-of-range drift per ladder, as (tier, raw difference)
    drift_alerts: Mutex<HashMap<String, (String, i64)>>,
    session: SessionState,
    last_tasks: Vec<Task>,
}

impl ReconciliationLoop {
    pub fn new(
        config: &Config,
        actuator: Arc<dyn Actuator>,
        store: Arc<dyn LadderStore>,
        notifier: Arc<dyn Notifier>,
        tasks: Arc<dyn TaskSource>,
    ) -> Self {
        let engine = &config.engine;
        let timed: Arc<dyn Actuator> = Arc::new(TimedActuator::new(
            actuator,
            config.scheduler.actuator_timeout(),
        ));

        Self {
            settings: config.scheduler.clone(),
            actuator: timed,
            store,
            notifier,
            tasks,
            clock: Arc::new(SystemClock),
            matcher: TierMatcher::new(engine.match_mode, engine.drift_warning_threshold),
            admission: AdmissionController::new(engine.max_price_deviation),
            guard: OutstandingOrderGuard::new(engine.order_price_epsilon),
            executor: OrderExecutor::new(),
            drift_warning_threshold: engine.drift_warning_threshold,
            drift_alerts: Mutex::new(HashMap::new()),
            session: SessionState::new(),
            last_tasks: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Run passes until shutdown is requested
    pub async fn run(&mut self, mut shutdown: Shutdown) {
        info!("Starting reconciliation loop...");

        loop {
            if shutdown.is_triggered() {
                break;
            }

            let outcome = self.run_pass(&shutdown).await;
            let delay = self.delay_after(outcome);
            debug!("Pass finished: {:?}, next pass in {:?}", outcome, delay);

            if !shutdown.sleep(delay).await {
                break;
            }
        }

        info!("Reconciliation loop stopped");
    }

    pub fn delay_after(&self, outcome: PassOutcome) -> Duration {
        match outcome {
            PassOutcome::Completed { .. } => self.settings.pass_delay(),
            PassOutcome::NoTasks => self.settings.idle_backoff(),
            PassOutcome::Blackout { remaining } => remaining.clamp(Duration::from_secs(1), BLACKOUT_POLL),
            PassOutcome::SurfaceLost => self.settings.surface_backoff(),
            PassOutcome::SessionLost => self.settings.recovery_backoff(),
            PassOutcome::Interrupted => Duration::ZERO,
        }
    }

    /// One sweep over the task list
    pub async fn run_pass(&mut self, shutdown: &Shutdown) -> PassOutcome {
        let now = self.clock.now();

        if let Some(window) = self.settings.blackout {
            if window.contains(now.time()) {
                if !self.session.in_blackout {
                    self.session.in_blackout = true;
                    info!("Entering blackout window {}", window);
                    self.emit(Event::BlackoutEntered { window }).await;
                }
                return PassOutcome::Blackout {
                    remaining: window.remaining(now).unwrap_or(BLACKOUT_POLL),
                };
            }
        }
        if self.session.in_blackout {
            self.session.in_blackout = false;
            info!("Blackout window over, resuming");
            self.emit(Event::BlackoutExited).await;
        }

        let tasks = self.load_tasks();
        if tasks.is_empty() {
            debug!("No tasks configured");
            return PassOutcome::NoTasks;
        }

        let configured: HashSet<&str> = tasks
            .iter()
            .filter_map(|t| match t {
                Task::GridTrading(grid) => Some(grid.ladder_id.as_str()),
                Task::AutoLogin(_) => None,
            })
            .collect();
        self.session.retain_ladders(&configured);
        self.drift_alerts
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|ladder_id, _| configured.contains(ladder_id.as_str()));

        if self.session.logged_in && !self.session_alive().await {
            return self.recover_session().await;
        }

        let has_login_task = tasks.iter().any(|t| matches!(t, Task::AutoLogin(_)));
        if !has_login_task && !self.session.logged_in && self.session_alive().await {
            info!("Actuator session is alive, no login task configured");
            self.session.logged_in = true;
        }

        let mut cycles = 0;
        for task in &tasks {
            if shutdown.is_triggered() {
                return PassOutcome::Interrupted;
            }

            let grid = match task {
                Task::AutoLogin(login) => {
                    self.handle_login(login).await;
                    continue;
                }
                Task::GridTrading(grid) => grid,
            };

            if !self.session.logged_in {
                debug!("Skipping ladder {}: not logged in", grid.ladder_id);
                continue;
            }

            let now = self.clock.now();
            let eligibility = self
                .session
                .cycle_state(&grid.ladder_id, grid.status)
                .eligibility(grid, now);
            if eligibility != Eligibility::Execute {
                debug!("Skipping ladder {}: {:?}", grid.ladder_id, eligibility);
                continue;
            }

            if !self.surface_ready().await {
                warn!("Actuator surface not ready, aborting sweep");
                self.emit(Event::ActuatorLost).await;
                return PassOutcome::SurfaceLost;
            }

            self.session
                .cycle_state(&grid.ladder_id, grid.status)
                .last_execution_time = Some(self.clock.now());

            match self.run_cycle(&grid.ladder_id).await {
                Ok(report) => {
                    cycles += 1;
                    info!(
                        "Ladder {} cycle done: tier {} buy={} sell={}",
                        report.ladder_id, report.tier_id, report.buy, report.sell
                    );
                    self.emit(Event::CycleSummary(Box::new(report))).await;
                }
                Err(e) if e.is_session_fatal() => {
                    error!("Ladder {} cycle lost the session: {}", grid.ladder_id, e);
                    return self.recover_session().await;
                }
                Err(e) => {
                    warn!("Ladder {} cycle skipped: {}", grid.ladder_id, e);
                }
            }
        }

        PassOutcome::Completed { cycles }
    }

    /// One reconciliation cycle for a ladder
    pub async fn run_cycle(&self, ladder_id: &str) -> Result<CycleReport, CycleError> {
        let snapshot = self.store.load_snapshot(ladder_id).await?;
        for issue in &snapshot.issues {
            warn!(
                "Ladder {} row {} ({}) ignored: {}",
                ladder_id, issue.row, issue.tier_id, issue.error
            );
        }

        let instrument = snapshot.instrument.as_str();
        let mut telemetry = snapshot.telemetry.clone();
        self.reset_daily_stats(ladder_id, &mut telemetry).await;

        let current_price = self.actuator.get_price(instrument).await?;
        if !(current_price.is_finite() && current_price > 0.0) {
            return Err(ActuatorError::Transient(format!(
                "invalid price {} for {}",
                current_price, instrument
            ))
            .into());
        }
        let actual_quantity = self.actuator.get_position(instrument).await?;
        if actual_quantity < 0 {
            return Err(ActuatorError::Transient(format!(
                "negative position {} for {}",
                actual_quantity, instrument
            ))
            .into());
        }

        let position = PositionSnapshot {
            actual_quantity,
            last_known_quantity: telemetry.last_known_quantity.unwrap_or(actual_quantity),
            current_price,
            average_cost: snapshot.average_cost,
        };
        debug!(
            "Ladder {}: {} price {:.2}, holding {}, avg cost {:.2}",
            ladder_id, instrument, current_price, actual_quantity, snapshot.average_cost
        );

        let fill_change = position.quantity_change();
        let mut update = self.fill_update(&telemetry, &position);
        if fill_change != 0 {
            info!(
                "Ladder {}: fill detected, holding {} -> {} ({:+})",
                ladder_id, position.last_known_quantity, actual_quantity, fill_change
            );
            self.emit(Event::FillDetected {
                ladder_id: ladder_id.to_string(),
                instrument: instrument.to_string(),
                change: fill_change,
                quantity: actual_quantity,
            })
            .await;
        }

        let resolution = self.matcher.resolve(&snapshot.ladder, &position);
        if let Ok(r) = &resolution {
            update.current_tier = Some(r.rung.tier_id.clone());
            let last_drift = update.last_drift.unwrap_or(telemetry.last_drift);
            if r.basis == MatchBasis::Quantity && r.drift.raw_difference == 0 && last_drift != 0 {
                info!("Ladder {}: holdings match tier {} again", ladder_id, r.rung.tier_id);
                update.last_drift = Some(0);
            }
        }
        self.write_telemetry(ladder_id, &update).await;
        let resolution = resolution?;

        if self.drift_alert_due(ladder_id, &resolution) {
            self.emit(Event::DriftExcess {
                ladder_id: ladder_id.to_string(),
                tier_id: resolution.rung.tier_id.clone(),
                raw_difference: resolution.drift.raw_difference,
                threshold: self.drift_warning_threshold,
            })
            .await;
        }

        let mut halt = snapshot.control.halt;
        if let Some((side, cause)) = breaker_trip(&resolution.drift, &resolution.rung) {
            self.engage_halt(ladder_id, &mut halt, side, cause).await;
        }

        let rung = &resolution.rung;
        let mut report = CycleReport {
            ladder_id: ladder_id.to_string(),
            instrument: instrument.to_string(),
            tier_id: rung.tier_id.clone(),
            actual_quantity,
            target_quantity: rung.target_quantity,
            current_price,
            average_cost: snapshot.average_cost,
            fill_change,
            drift: resolution.drift,
            buy_price: rung.buy_price,
            sell_price: rung.sell_price,
            outcome: CycleOutcome::Evaluated,
            buy: SideStatus::Skipped,
            sell: SideStatus::Skipped,
        };

        match self
            .guard
            .check(self.actuator.as_ref(), instrument, rung.buy_price, rung.sell_price)
            .await?
        {
            GuardDecision::Waiting { open_price, side } => {
                report.outcome = CycleOutcome::Waiting { open_price, side };
                return Ok(report);
            }
            GuardDecision::CancelFailed { open_price } => {
                return Err(CycleError::CancelFailed { open_price });
            }
            GuardDecision::Proceed { cancelled } => {
                if let Some(price) = cancelled {
                    info!("Ladder {}: cancelled stale order at {:.2}", ladder_id, price);
                }
            }
        }

        let mut last_approved = snapshot.control.last_approved_tier.clone();
        report.buy = self
            .process_side(&snapshot, Side::Buy, &resolution, &position, &mut halt, &mut last_approved)
            .await?;
        report.sell = self
            .process_side(&snapshot, Side::Sell, &resolution, &position, &mut halt, &mut last_approved)
            .await?;

        Ok(report)
    }

    async fn process_side(
        &self,
        snapshot: &LadderSnapshot,
        side: Side,
        resolution: &TierResolution,
        position: &PositionSnapshot,
        halt: &mut HaltLatch,
        last_approved: &mut Option<String>,
    ) -> Result<SideStatus, CycleError> {
        let ladder_id = snapshot.ladder_id.as_str();
        let rung = &resolution.rung;

        if !snapshot.control.is_enabled(side) {
            debug!("Ladder {}: {} disabled", ladder_id, side);
            return Ok(SideStatus::Disabled);
        }

        let verdict = self.admission.evaluate(&AdmissionRequest {
            side,
            rung,
            drift: &resolution.drift,
            current_price: position.current_price,
            average_cost: position.average_cost,
            last_approved_tier: last_approved.as_deref(),
            halt: *halt,
        });

        if let AdmissionVerdict::Rejected(reason) = verdict {
            info!(
                "Ladder {}: {} at tier {} rejected: {}",
                ladder_id, side, rung.tier_id, reason
            );
            if reason == RejectReason::PriceDeviationExceeded {
                let order_price = match side {
                    Side::Buy => rung.buy_price,
                    Side::Sell => rung.sell_price,
                };
                if let Some(deviation) = price_deviation(order_price, position.current_price) {
                    warn!(
                        "Ladder {}: {} price {} is {} from market {} (limit {})",
                        ladder_id,
                        side,
                        order_price,
                        deviation.round_dp(4),
                        position.current_price,
                        self.admission.max_price_deviation()
                    );
                }
                self.engage_halt(ladder_id, halt, side, HaltCause::PriceDeviation)
                    .await;
            }
            if !is_routine(reason) {
                self.emit(Event::OrderRejected {
                    ladder_id: ladder_id.to_string(),
                    tier_id: rung.tier_id.clone(),
                    side,
                    reason,
                })
                .await;
            }
            return Ok(SideStatus::Rejected(reason));
        }

        let order = OrderRequest {
            instrument: snapshot.instrument.clone(),
            side,
            price: rung.order_price(side),
            quantity: resolution.drift.quantity(side),
        };

        match self.executor.submit(self.actuator.as_ref(), &order).await? {
            SubmitOutcome::Accepted => {
                if side == Side::Buy {
                    if let Err(e) = self
                        .store
                        .set_last_approved_tier(ladder_id, Some(&rung.tier_id))
                        .await
                    {
                        error!("Ladder {}: failed to record approved tier: {}", ladder_id, e);
                    }
                    *last_approved = Some(rung.tier_id.clone());
                }
                self.emit(Event::OrderSubmitted {
                    ladder_id: ladder_id.to_string(),
                    instrument: order.instrument.clone(),
                    tier_id: rung.tier_id.clone(),
                    side,
                    price: order.price,
                    quantity: order.quantity,
                })
                .await;
                Ok(SideStatus::Submitted {
                    price: order.price,
                    quantity: order.quantity,
                })
            }
            SubmitOutcome::InsufficientFunds => {
                if side == Side::Buy {
                    self.engage_halt(ladder_id, halt, side, HaltCause::InsufficientFunds)
                        .await;
                }
                self.emit(Event::OrderFailed {
                    ladder_id: ladder_id.to_string(),
                    side,
                    detail: "insufficient funds".to_string(),
                })
                .await;
                Ok(SideStatus::InsufficientFunds)
            }
            SubmitOutcome::Failed(detail) => {
                self.emit(Event::OrderFailed {
                    ladder_id: ladder_id.to_string(),
                    side,
                    detail: detail.clone(),
                })
                .await;
                Ok(SideStatus::Failed(detail))
            }
        }
    }

    /// Latch a side; the in-cycle latch holds even if persisting it fails
    async fn engage_halt(&self, ladder_id: &str, halt: &mut HaltLatch, side: Side, cause: HaltCause) {
        if halt.is_halted(side) {
            return;
        }
        halt.set(side, true);
        warn!("Ladder {}: engaging {} halt ({})", ladder_id, side, cause);

        if let Err(e) = self.store.set_halt(ladder_id, side, true).await {
            error!("Ladder {}: failed to persist {} halt: {}", ladder_id, side, e);
        }
        self.emit(Event::HaltEngaged {
            ladder_id: ladder_id.to_string(),
            side,
            cause,
        })
        .await;
    }

    fn fill_update(&self, telemetry: &LadderTelemetry, position: &PositionSnapshot) -> TelemetryUpdate {
        let mut update = TelemetryUpdate {
            last_price: Some(position.current_price),
            last_known_quantity: Some(position.actual_quantity),
            ..TelemetryUpdate::default()
        };

        let change = position.quantity_change();
        if change > 0 {
            update.last_drift = Some(change);
            update.buy_fill_count = Some(telemetry.buy_fill_count.saturating_add(1));
        } else if change < 0 {
            update.last_drift = Some(change);
            update.sell_fill_count = Some(telemetry.sell_fill_count.saturating_add(1));
        }
        update
    }

    async fn reset_daily_stats(&self, ladder_id: &str, telemetry: &mut LadderTelemetry) {
        let Some(window) = self.settings.daily_reset else {
            return;
        };
        let now = self.clock.now();
        let today = now.date();
        if !window.contains(now.time()) || telemetry.last_reset_date == Some(today) {
            return;
        }

        let update = TelemetryUpdate::daily_reset(today);
        match self.store.write_telemetry(ladder_id, &update).await {
            Ok(()) => {
                update.apply_to(telemetry);
                info!("Ladder {}: daily statistics reset for {}", ladder_id, today);
                self.emit(Event::DailyReset {
                    ladder_id: ladder_id.to_string(),
                    date: today,
                })
                .await;
            }
            Err(e) => warn!("Ladder {}: daily reset failed: {}", ladder_id, e),
        }
    }

    /// Whether an out-of-range drift should be announced.
    ///
    /// The same tier and raw difference is announced once. A ladder back
    /// within the threshold forgets its last alert so the next excursion is
    /// announced again.
    fn drift_alert_due(&self, ladder_id: &str, resolution: &TierResolution) -> bool {
        let mut alerts = self
            .drift_alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !resolution.drift_exceeded {
            alerts.remove(ladder_id);
            return false;
        }
        let current = (
            resolution.rung.tier_id.clone(),
            resolution.drift.raw_difference,
        );
        let due = alerts.get(ladder_id) != Some(&current);
        if !due {
            debug!(
                "Ladder {}: drift {:+} at tier {} already announced",
                ladder_id, current.1, current.0
            );
        }
        alerts.insert(ladder_id.to_string(), current);
        due
    }

    async fn write_telemetry(&self, ladder_id: &str, update: &TelemetryUpdate) {
        if let Err(e) = self.store.write_telemetry(ladder_id, update).await {
            warn!("Ladder {}: telemetry write failed: {}", ladder_id, e);
        }
    }

    async fn handle_login(&mut self, login: &LoginTask) {
        if self.session.executed_logins.contains(&login.account_id) {
            return;
        }
        if !login.is_due(self.clock.now().time()) {
            debug!(
                "Login for {} not due ({} from {})",
                login.account_id, login.status, login.start_time
            );
            return;
        }

        info!("Logging in account {}", login.account_id);
        let request = LoginRequest {
            account_id: login.account_id.clone(),
            extra: login.extra.clone(),
        };
        let success = match self.actuator.login(&request).await {
            Ok(success) => success,
            Err(e) => {
                warn!("Login for {} failed: {}", login.account_id, e);
                false
            }
        };

        if success {
            self.session.executed_logins.insert(login.account_id.clone());
            self.session.logged_in = true;
        }
        self.emit(Event::Login {
            account_id: login.account_id.clone(),
            success,
        })
        .await;
    }

    async fn recover_session(&mut self) -> PassOutcome {
        warn!("Actuator session lost, resetting session state");
        self.emit(Event::SessionLost).await;
        self.session.reset_session();
        PassOutcome::SessionLost
    }

    fn load_tasks(&mut self) -> Vec<Task> {
        match self.tasks.load() {
            Ok(tasks) => {
                self.last_tasks = tasks.clone();
                tasks
            }
            Err(e) => {
                warn!("Failed to load tasks, keeping previous list: {}", e);
                self.last_tasks.clone()
            }
        }
    }

    async fn surface_ready(&self) -> bool {
        match self.actuator.surface_ready().await {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Surface check failed: {}", e);
                false
            }
        }
    }

    async fn session_alive(&self) -> bool {
        match self.actuator.session_alive().await {
            Ok(alive) => alive,
            Err(e) => {
                warn!("Session check failed: {}", e);
                false
            }
        }
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.notifier.notify(event.channel(), &event).await {
            warn!("Notification {} failed: {}", event.kind(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rung(buy_q: i64, sell_q: i64) -> LadderRung {
        LadderRung {
            tier_id: "B".to_string(),
            avg_price_threshold: None,
            target_quantity: 30,
            buy_price: 95.0,
            buy_quantity: buy_q,
            sell_price: 105.0,
            sell_quantity: sell_q,
        }
    }

    #[test]
    fn test_breaker_trips_on_excess_holding() {
        let r = rung(5, 5);
        let drift = DriftRecord::between(&r, 37);
        assert_eq!(breaker_trip(&drift, &r), Some((Side::Buy, HaltCause::ExcessHolding)));

        // within the buy quantity is absorbed
        let drift = DriftRecord::between(&r, 35);
        assert_eq!(breaker_trip(&drift, &r), None);
    }

    #[test]
    fn test_breaker_trips_on_shortfall() {
        let r = rung(5, 5);
        let drift = DriftRecord::between(&r, 20);
        assert_eq!(breaker_trip(&drift, &r), Some((Side::Sell, HaltCause::Shortfall)));

        let drift = DriftRecord::between(&r, 25);
        assert_eq!(breaker_trip(&drift, &r), None);
        assert_eq!(breaker_trip(&DriftRecord::neutral(&r), &r), None);
    }

    #[test]
    fn test_routine_rejections() {
        assert!(is_routine(RejectReason::BelowCostBasisViolation));
        assert!(is_routine(RejectReason::HaltActive));
        assert!(!is_routine(RejectReason::PriceDeviationExceeded));
        assert!(!is_routine(RejectReason::SameTierRepeat));
    }
}
