use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chauffeur_core::{
    ActorContext, BookingRepository, BusinessRules, Clock, DashboardStats, NoopStatsCache, NotificationPort,
    StatsCache, SystemClock,
};
use chauffeur_shared::{
    Booking, BookingChanges, BookingDraft, BookingHistory, BookingNotification, BookingStatus, Masked,
    NotificationKind,
};

use crate::audit::AuditTrail;
use crate::error::BookingError;
use crate::intake::{plan_intake, IntakePlan};
use crate::policy::{format_hours_until, CancellationOutcome, CancellationPolicy};
use crate::reference::ReferenceGenerator;
use crate::round_trip::{LockedPair, PairOutcome, RoundTripCoordinator};
use crate::status::StatusRequest;

/// Per-call write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Commit without telling anyone, e.g. for back-office data fixes.
    pub suppress_notification: bool,
}

impl WriteOptions {
    pub fn silent() -> Self {
        Self { suppress_notification: true }
    }
}

/// Committed state after a booking operation.
#[derive(Debug, Clone)]
pub struct BookingUpdate {
    pub booking: Booking,
    pub sibling: Option<Booking>,
    pub changed: bool,
    /// Whether a notification was delivered.
    pub notified: bool,
}

/// What cancelling right now would cost, without cancelling.
#[derive(Debug, Clone, Serialize)]
pub struct CancellationQuote {
    pub booking_id: Uuid,
    pub outcome: CancellationOutcome,
    pub notice: String,
    pub sibling_outcome: Option<CancellationOutcome>,
    /// Charge when the whole round trip is cancelled together.
    pub round_trip_full_charge: bool,
}

/// Entry point for every booking read and write.
///
/// Writes follow one order: validate, lock, mutate, persist rows, persist
/// history, commit, invalidate the stats cache, notify. Everything up to the
/// commit runs under the configured transaction deadline.
pub struct BookingService<R: BookingRepository> {
    repo: Arc<R>,
    notifier: Arc<dyn NotificationPort>,
    stats_cache: Arc<dyn StatsCache>,
    clock: Arc<dyn Clock>,
    coordinator: RoundTripCoordinator,
    references: ReferenceGenerator,
    rules: BusinessRules,
}

impl<R: BookingRepository> BookingService<R> {
    pub fn new(repo: Arc<R>, notifier: Arc<dyn NotificationPort>, rules: BusinessRules) -> Self {
        Self {
            repo,
            notifier,
            stats_cache: Arc::new(NoopStatsCache),
            clock: Arc::new(SystemClock),
            coordinator: RoundTripCoordinator::new(CancellationPolicy::new(&rules)),
            references: ReferenceGenerator::new(rules.reference_prefix.clone(), rules.reference_attempts),
            rules,
        }
    }

    pub fn with_stats_cache(mut self, cache: Arc<dyn StatsCache>) -> Self {
        self.stats_cache = cache;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &CancellationPolicy {
        self.coordinator.policy()
    }

    /// Creates one leg, or both legs of a round trip, in a single transaction.
    pub async fn create_booking(
        &self,
        draft: &BookingDraft,
        actor: &ActorContext,
        options: WriteOptions,
    ) -> Result<BookingUpdate, BookingError> {
        let now = self.clock.now();
        let plan = plan_intake(draft, actor, self.policy(), now)?;

        let deadline = self.rules.transaction_deadline();
        let (outbound, return_leg) = match tokio::time::timeout(deadline, self.insert_plan(plan, actor, now)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(?deadline, "Booking creation exceeded deadline, rolled back");
                return Err(BookingError::Timeout(deadline));
            }
        };
        info!(
            reference = %outbound.reference,
            return_reference = return_leg.as_ref().map(|leg| leg.reference.as_str()),
            status = %outbound.status,
            passenger = %Masked(&outbound.passenger_email),
            "Booking created"
        );

        let kind = if outbound.status == BookingStatus::Confirmed {
            NotificationKind::Confirmed
        } else {
            NotificationKind::New
        };
        self.invalidate_stats().await;
        let event = BookingNotification {
            kind,
            booking: outbound.clone(),
            sibling: return_leg.clone(),
            previous_status: None,
            occurred_at: now,
        };
        let notified = self.notify(event, options).await;

        Ok(BookingUpdate { booking: outbound, sibling: return_leg, changed: true, notified })
    }

    /// Moves a booking to a new status; sibling rules follow from the round-trip link.
    pub async fn transition_status(
        &self,
        id: Uuid,
        request: StatusRequest,
        actor: &ActorContext,
        options: WriteOptions,
    ) -> Result<BookingUpdate, BookingError> {
        let now = self.clock.now();
        let outcome = self
            .with_locked_booking(id, |pair| self.coordinator.transition(pair, &request, actor, now))
            .await?;
        if !outcome.is_unchanged() {
            info!(
                reference = %outcome.leg.reference,
                requested = %request.target,
                status = %outcome.leg.status,
                sibling_followed = outcome.sibling_changed,
                actor = %actor.id,
                "Booking status changed"
            );
        }
        Ok(self.finish(outcome, options).await)
    }

    /// Cancels the leg and its still-active sibling together.
    pub async fn cancel_round_trip(
        &self,
        id: Uuid,
        reason: &str,
        actor: &ActorContext,
        options: WriteOptions,
    ) -> Result<BookingUpdate, BookingError> {
        let now = self.clock.now();
        let outcome = self
            .with_locked_booking(id, |pair| self.coordinator.cancel_pair(pair, Some(reason), actor, now))
            .await?;
        info!(
            reference = %outcome.leg.reference,
            status = %outcome.leg.status,
            sibling_cancelled = outcome.sibling_changed,
            "Round trip cancelled"
        );
        Ok(self.finish(outcome, options).await)
    }

    /// Cancels one leg of a round trip and keeps the other active.
    pub async fn cancel_single_leg(
        &self,
        id: Uuid,
        reason: &str,
        actor: &ActorContext,
        options: WriteOptions,
    ) -> Result<BookingUpdate, BookingError> {
        let now = self.clock.now();
        let outcome = self
            .with_locked_booking(id, |pair| self.coordinator.cancel_single_leg(pair, Some(reason), actor, now))
            .await?;
        info!(reference = %outcome.leg.reference, status = %outcome.leg.status, "Single trip cancelled");
        Ok(self.finish(outcome, options).await)
    }

    /// Edits a booking's fields. Outbound edits sync shared fields to the return leg.
    pub async fn update_booking(
        &self,
        id: Uuid,
        changes: &BookingChanges,
        actor: &ActorContext,
        options: WriteOptions,
    ) -> Result<BookingUpdate, BookingError> {
        let now = self.clock.now();
        let outcome = self
            .with_locked_booking(id, |pair| self.coordinator.apply_changes(pair, changes, actor, now))
            .await?;
        if outcome.is_unchanged() {
            debug!(reference = %outcome.leg.reference, "Save without changes, nothing written");
        } else {
            info!(
                reference = %outcome.leg.reference,
                status = %outcome.leg.status,
                sibling_synced = outcome.sibling_changed,
                actor = %actor.id,
                "Booking updated"
            );
        }
        Ok(self.finish(outcome, options).await)
    }

    /// Deletes one leg. Its history stays; a sibling stays with its link cleared.
    pub async fn delete_booking(
        &self,
        id: Uuid,
        reason: Option<&str>,
        actor: &ActorContext,
    ) -> Result<BookingUpdate, BookingError> {
        let now = self.clock.now();
        let outcome = self
            .with_locked_booking(id, |pair| self.coordinator.remove_leg(pair, reason, actor, now))
            .await?;
        warn!(reference = %outcome.leg.reference, actor = %actor.id, "Booking deleted");
        Ok(self.finish(outcome, WriteOptions::default()).await)
    }

    /// Appends a correction entry for an earlier history entry.
    pub async fn record_correction(
        &self,
        booking_id: Uuid,
        entry_id: Uuid,
        reason: &str,
        actor: &ActorContext,
    ) -> Result<BookingHistory, BookingError> {
        if !actor.is_privileged {
            return Err(BookingError::PrivilegeRequired { action: "Recording a history correction" });
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BookingError::validation("reason", "a correction needs a reason"));
        }
        let original = self
            .repo
            .history_for(booking_id)
            .await?
            .into_iter()
            .find(|entry| entry.id == entry_id)
            .ok_or(BookingError::HistoryEntryNotFound(entry_id))?;

        let deadline = self.rules.transaction_deadline();
        let now = self.clock.now();
        let entry = match tokio::time::timeout(deadline, self.append_correction(&original, reason, actor, now)).await {
            Ok(result) => result?,
            Err(_) => return Err(BookingError::Timeout(deadline)),
        };
        info!(booking_id = %booking_id, corrects = %entry_id, "History correction recorded");
        Ok(entry)
    }

    pub async fn get_booking(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.repo.get_booking(id).await?.ok_or(BookingError::NotFound(id))
    }

    pub async fn find_by_reference(&self, reference: &str) -> Result<Option<Booking>, BookingError> {
        Ok(self.repo.find_by_reference(reference).await?)
    }

    pub async fn history(&self, booking_id: Uuid) -> Result<Vec<BookingHistory>, BookingError> {
        Ok(self.repo.history_for(booking_id).await?)
    }

    /// Read-only preview of the cancellation policy for a leg and its sibling.
    pub async fn cancellation_quote(&self, id: Uuid) -> Result<CancellationQuote, BookingError> {
        let now = self.clock.now();
        let booking = self.get_booking(id).await?;
        let sibling = match booking.linked_booking {
            Some(sibling_id) => self.repo.get_booking(sibling_id).await?,
            None => None,
        };

        let outcome = self.policy().cancellation_outcome(&booking, now);
        let sibling_outcome = sibling
            .as_ref()
            .filter(|s| !s.status.is_terminal())
            .map(|s| self.policy().cancellation_outcome(s, now));
        Ok(CancellationQuote {
            booking_id: id,
            notice: format_hours_until(outcome.hours_until),
            round_trip_full_charge: outcome.full_charge || sibling_outcome.is_some_and(|o| o.full_charge),
            outcome,
            sibling_outcome,
        })
    }

    /// Dashboard counters, served from the stats cache while it is fresh.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats, BookingError> {
        match self.stats_cache.get().await {
            Ok(Some(stats)) => return Ok(stats),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Stats cache read failed, computing from storage"),
        }

        let now = self.clock.now();
        let mut stats = self.repo.dashboard_stats(self.policy().business_date(now)).await?;
        stats.computed_at = Some(now);
        if let Err(err) = self.stats_cache.put(&stats, self.rules.stats_ttl_seconds).await {
            warn!(error = %err, "Failed to cache dashboard stats");
        }
        Ok(stats)
    }

    /// Runs `mutate` on a booking and its sibling with both rows locked, then
    /// persists the outcome and commits. Rows are locked in ascending id order.
    /// Lock waits that time out surface as `ConcurrentModification`; the whole
    /// scope is bounded by the transaction deadline.
    pub async fn with_locked_booking<F>(&self, id: Uuid, mutate: F) -> Result<PairOutcome, BookingError>
    where
        F: FnOnce(LockedPair) -> Result<PairOutcome, BookingError> + Send,
    {
        let deadline = self.rules.transaction_deadline();
        match tokio::time::timeout(deadline, self.locked_transaction(id, mutate)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(booking_id = %id, ?deadline, "Booking transaction exceeded deadline, rolled back");
                Err(BookingError::Timeout(deadline))
            }
        }
    }

    async fn locked_transaction<F>(&self, id: Uuid, mutate: F) -> Result<PairOutcome, BookingError>
    where
        F: FnOnce(LockedPair) -> Result<PairOutcome, BookingError> + Send,
    {
        let mut tx = self.repo.begin().await?;
        match self.mutate_locked(&mut tx, id, mutate).await {
            Ok(outcome) => {
                self.repo.commit(tx).await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = self.repo.rollback(tx).await {
                    warn!(booking_id = %id, error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn mutate_locked<F>(&self, tx: &mut R::Tx, id: Uuid, mutate: F) -> Result<PairOutcome, BookingError>
    where
        F: FnOnce(LockedPair) -> Result<PairOutcome, BookingError> + Send,
    {
        let head = self.repo.read_booking(tx, id).await?.ok_or(BookingError::NotFound(id))?;
        let sibling_id = head.linked_booking;

        let mut lock_order: Vec<Uuid> = std::iter::once(id).chain(sibling_id).collect();
        lock_order.sort();
        lock_order.dedup();

        let mut leg = None;
        let mut sibling = None;
        for row_id in lock_order {
            let row = self
                .repo
                .lock_booking(tx, row_id)
                .await
                .map_err(|err| BookingError::from_lock(err, id))?;
            if row_id == id {
                leg = row;
            } else {
                sibling = row;
            }
        }

        let leg = leg.ok_or(BookingError::NotFound(id))?;
        if leg.linked_booking != sibling_id {
            return Err(BookingError::ConcurrentModification { booking_id: id });
        }
        let sibling = match sibling {
            Some(s) if s.linked_booking == Some(id) => Some(s),
            Some(s) => {
                warn!(booking_id = %id, sibling_id = %s.id, "Linked booking does not point back, treating leg as standalone");
                None
            }
            None => None,
        };

        let outcome = mutate(LockedPair { leg, sibling })?;
        self.persist(tx, &outcome).await?;
        Ok(outcome)
    }

    async fn persist(&self, tx: &mut R::Tx, outcome: &PairOutcome) -> Result<(), BookingError> {
        if outcome.leg_changed && !outcome.leg_deleted {
            self.repo.update_booking(tx, &outcome.leg).await?;
        }
        if outcome.sibling_changed {
            if let Some(sibling) = &outcome.sibling {
                self.repo.update_booking(tx, sibling).await?;
            }
        }
        if outcome.leg_deleted {
            self.repo.delete_booking(tx, outcome.leg.id).await?;
        }
        for entry in &outcome.history {
            self.repo.append_history(tx, entry).await?;
        }
        Ok(())
    }

    async fn insert_plan(
        &self,
        plan: IntakePlan,
        actor: &ActorContext,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(Booking, Option<Booking>), BookingError> {
        let mut tx = self.repo.begin().await?;
        match self.insert_legs(&mut tx, plan, actor, now).await {
            Ok(legs) => {
                self.repo.commit(tx).await?;
                Ok(legs)
            }
            Err(err) => {
                if let Err(rollback_err) = self.repo.rollback(tx).await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn insert_legs(
        &self,
        tx: &mut R::Tx,
        plan: IntakePlan,
        actor: &ActorContext,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(Booking, Option<Booking>), BookingError> {
        let IntakePlan { mut outbound, mut return_leg } = plan;
        let date = self.policy().business_date(now);

        outbound.reference = self.allocate_reference(tx, date).await?;
        self.repo.insert_booking(tx, &outbound).await?;
        if let Some(leg) = return_leg.as_mut() {
            leg.reference = self.allocate_reference(tx, date).await?;
            self.repo.insert_booking(tx, leg).await?;
        }

        self.repo.append_history(tx, &AuditTrail::created(&outbound, actor, now)).await?;
        if let Some(leg) = &return_leg {
            self.repo.append_history(tx, &AuditTrail::created(leg, actor, now)).await?;
        }
        Ok((outbound, return_leg))
    }

    async fn allocate_reference(&self, tx: &mut R::Tx, date: chrono::NaiveDate) -> Result<String, BookingError> {
        for attempt in 1..=self.references.attempts() {
            let candidate = self.references.candidate(date, &mut rand::thread_rng());
            if !self.repo.reference_exists(tx, &candidate).await? {
                if attempt > 1 {
                    debug!(reference = %candidate, attempt, "Booking reference found after retries");
                }
                return Ok(candidate);
            }
        }
        let reference = self.references.fallback(date);
        warn!(
            reference = %reference,
            attempts = self.references.attempts(),
            "Booking reference candidates exhausted, using UUID-derived suffix"
        );
        Ok(reference)
    }

    async fn append_correction(
        &self,
        original: &BookingHistory,
        reason: &str,
        actor: &ActorContext,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<BookingHistory, BookingError> {
        let mut tx = self.repo.begin().await?;
        let result = async {
            let current = self.repo.read_booking(&mut tx, original.booking_id).await?;
            let entry = AuditTrail::correction(original, current.as_ref(), actor, reason.to_string(), now);
            self.repo.append_history(&mut tx, &entry).await?;
            Ok::<_, BookingError>(entry)
        }
        .await;
        match result {
            Ok(entry) => {
                self.repo.commit(tx).await?;
                Ok(entry)
            }
            Err(err) => {
                if let Err(rollback_err) = self.repo.rollback(tx).await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn finish(&self, outcome: PairOutcome, options: WriteOptions) -> BookingUpdate {
        if outcome.is_unchanged() {
            return BookingUpdate { booking: outcome.leg, sibling: outcome.sibling, changed: false, notified: false };
        }
        self.invalidate_stats().await;

        let notified = match outcome.notification {
            Some(plan) => {
                let event = BookingNotification {
                    kind: plan.kind,
                    booking: outcome.leg.clone(),
                    sibling: if plan.include_sibling { outcome.sibling.clone() } else { None },
                    previous_status: plan.previous_status,
                    occurred_at: self.clock.now(),
                };
                self.notify(event, options).await
            }
            None => false,
        };
        BookingUpdate { booking: outcome.leg, sibling: outcome.sibling, changed: true, notified }
    }

    async fn invalidate_stats(&self) {
        if let Err(err) = self.stats_cache.invalidate().await {
            warn!(error = %err, "Failed to invalidate dashboard stats");
        }
    }

    async fn notify(&self, event: BookingNotification, options: WriteOptions) -> bool {
        if options.suppress_notification {
            debug!(reference = %event.booking.reference, kind = ?event.kind, "Notification suppressed by caller");
            return false;
        }
        match self.notifier.notify(&event).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    reference = %event.booking.reference,
                    kind = ?event.kind,
                    error = %err,
                    "Booking committed but notification failed"
                );
                false
            }
        }
    }
}
