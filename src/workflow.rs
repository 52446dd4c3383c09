//! Servicio de promociones: orquesta verificación, revisión, apelación y
//! finalización sobre los repositorios inyectados.
//!
//! El servicio no guarda estado propio. La unicidad de solicitudes abiertas y
//! el reclamo de la finalización los resuelve el repositorio de solicitudes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::EscalafonConfig;
use crate::credentials::{CredentialProvider, CredentialStore};
use crate::eligibility::{EligibilityReport, EligibilityVerifier, VerifierSettings, requirements_for};
use crate::error::{EscalafonError, Result};
use crate::faculty::{FacultyDirectory, FacultyMember, RankStartSource, RankUpdateSink};
use crate::ladder::{Rank, RankRequirementConfig};
use crate::ledger::{
    ConsumptionLedger, ConsumptionRecord, DrainReport, LedgerRetryQueue, QueuedWrite,
    spent_credentials,
};
use crate::notify::{NotificationEvent, NotificationSink};
use crate::selector::select;
use crate::state_machine::{
    DecisionOutcome, PromotionRequest, RequestRepository, RequestStatus, ReviewStage,
    StateMachine, StatusChange, Transition,
};

/// The repositories and external systems the service works against.
#[derive(Clone)]
pub struct Stores {
    pub faculty: Arc<dyn FacultyDirectory>,
    pub rank_start: Arc<dyn RankStartSource>,
    pub rank_updates: Arc<dyn RankUpdateSink>,
    pub credentials: Arc<dyn CredentialStore>,
    pub ledger: Arc<dyn ConsumptionLedger>,
    pub retry_queue: Arc<LedgerRetryQueue>,
    pub requests: Arc<dyn RequestRepository>,
}

/// What a call to [`PromotionService::finalize`] did.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeOutcome {
    pub request: PromotionRequest,
    /// Records written to the ledger.
    pub consumed: Vec<ConsumptionRecord>,
    /// Records whose write failed and now wait in the retry queue.
    pub deferred: Vec<ConsumptionRecord>,
    /// Post-claim steps that failed without undoing the finalization.
    pub best_effort_failures: Vec<String>,
    /// The request had already been finalized; nothing was done.
    pub already_finalized: bool,
}

/// What a call to [`PromotionService::retry_rank_updates`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RankRetryReport {
    /// Requests whose rank update reached the faculty directory.
    pub applied: Vec<String>,
    /// Requests still waiting for their rank update.
    pub still_pending: Vec<String>,
}

pub struct PromotionService<N: NotificationSink> {
    stores: Stores,
    notifier: N,
    clock: Arc<dyn Clock>,
    settings: VerifierSettings,
    gate_final_approval: bool,
    notify_timeout: Duration,
}

impl<N: NotificationSink> PromotionService<N> {
    pub fn new(stores: Stores, notifier: N, clock: Arc<dyn Clock>, config: &EscalafonConfig) -> Self {
        Self {
            stores,
            notifier,
            clock,
            settings: VerifierSettings::from(config),
            gate_final_approval: config.gate_final_approval,
            notify_timeout: Duration::from_millis(config.notify_timeout_ms),
        }
    }

    /// Requirement config for moving up from `current_rank`.
    pub fn resolve_requirements(&self, current_rank: &str) -> Result<RankRequirementConfig> {
        requirements_for(current_rank, self.settings.unknown_rank_policy).map(|(config, _)| config)
    }

    /// Read-only eligibility check of `faculty_id` against the next rank after
    /// `current_rank`.
    pub fn verify_eligibility(&self, faculty_id: &str, current_rank: &str) -> Result<EligibilityReport> {
        let verifier = EligibilityVerifier {
            credentials: self.stores.credentials.as_ref(),
            ledger: self.stores.ledger.as_ref(),
            retry_queue: self.stores.retry_queue.as_ref(),
            rank_start: self.stores.rank_start.as_ref(),
            settings: &self.settings,
        };
        verifier.verify(faculty_id, current_rank, self.clock.today())
    }

    pub fn faculty_member(&self, faculty_id: &str) -> Result<FacultyMember> {
        self.stores
            .faculty
            .find(faculty_id)?
            .ok_or_else(|| EscalafonError::FacultyNotFound(faculty_id.to_string()))
    }

    pub async fn submit_request(
        &self,
        faculty_id: &str,
        rank_from: Rank,
        rank_to: Rank,
        metadata: BTreeMap<String, String>,
    ) -> Result<PromotionRequest> {
        let member = self.faculty_member(faculty_id)?;
        if let Some(pending) = self
            .stores
            .requests
            .for_faculty(faculty_id)?
            .into_iter()
            .find(|r| r.rank_update_pending)
        {
            return Err(EscalafonError::RankUpdatePending {
                faculty_id: faculty_id.to_string(),
                request_id: pending.id,
            });
        }
        match rank_from.next() {
            None => return Err(EscalafonError::TopOfLadder(rank_from)),
            Some(next) if next != rank_to => {
                return Err(EscalafonError::Validation(format!(
                    "{rank_from} can only be promoted to {next}, not {rank_to}"
                )));
            }
            Some(_) => {}
        }
        if member.current_rank != rank_from {
            return Err(EscalafonError::Validation(format!(
                "{faculty_id} currently holds {}, not {rank_from}",
                member.current_rank
            )));
        }

        let now = self.clock.now();
        let mut request = PromotionRequest::new(faculty_id, rank_from, rank_to, metadata, now);
        request.history.push(StatusChange {
            at: now,
            actor: faculty_id.to_string(),
            from: RequestStatus::Pendiente,
            to: RequestStatus::Pendiente,
            stage: ReviewStage::Presidente,
            note: Some("submitted".into()),
        });
        let request = self.stores.requests.insert_open(request)?;
        info!(request_id = %request.id, faculty_id, from = %rank_from, to = %rank_to, "Promotion request submitted");

        self.notify(&request, NotificationEvent::Submitted).await;
        Ok(request)
    }

    /// Records a reviewer decision at `level`.
    pub async fn decide(
        &self,
        request_id: &str,
        outcome: DecisionOutcome,
        level: ReviewStage,
        reviewer: &str,
        reason: Option<&str>,
    ) -> Result<PromotionRequest> {
        let mut request = self.request(request_id)?;
        let transition = StateMachine::decide(&request, outcome, level, reason)?;

        if transition == Transition::Advance(ReviewStage::Aprobado) && self.gate_final_approval {
            let report = self.verify_eligibility(&request.faculty_id, request.rank_from.name())?;
            if !report.overall_pass {
                let failed: Vec<String> = report.failed_dimensions().map(|d| d.dimension.to_string()).collect();
                warn!(
                    request_id,
                    failed = %failed.join(", "),
                    "Commission approval refused, requirements not met"
                );
                return Err(EscalafonError::NotEligible {
                    faculty_id: request.faculty_id.clone(),
                    target: request.rank_to,
                });
            }
        }

        let expected = request.version;
        StateMachine::apply(&mut request, &transition, reviewer, reason, self.clock.now());
        let request = self.stores.requests.update(request, expected)?;
        info!(
            request_id,
            %level,
            reviewer,
            status = %request.status,
            stage = %request.review_stage,
            "Decision recorded"
        );

        if matches!(transition, Transition::Reject(_)) {
            self.notify(&request, NotificationEvent::Rejected).await;
        }
        Ok(request)
    }

    /// Appeals a rejected request, opening a new one before the commission.
    pub async fn appeal(&self, request_id: &str, justification: &str, by: &str) -> Result<PromotionRequest> {
        if justification.trim().is_empty() {
            return Err(EscalafonError::Validation("an appeal requires a justification".into()));
        }
        let original = self.request(request_id)?;
        StateMachine::check_appeal(&original)?;

        let now = self.clock.now();
        let mut appeal = PromotionRequest::appeal_of(&original, justification, now);
        appeal.history.push(StatusChange {
            at: now,
            actor: by.to_string(),
            from: original.status,
            to: RequestStatus::Apelacion,
            stage: ReviewStage::Comision,
            note: Some(justification.to_string()),
        });

        let expected = original.version;
        let mut closed = original;
        closed.superseded_by = Some(appeal.id.clone());
        closed
            .observations
            .push(format!("Apelada el {} mediante la solicitud {}", now.date_naive(), appeal.id));

        let (_, appeal) = self.stores.requests.supersede(closed, expected, appeal)?;
        info!(request_id, appeal_id = %appeal.id, "Appeal opened");

        self.notify(&appeal, NotificationEvent::Appealed).await;
        Ok(appeal)
    }

    /// Closes an approved request and spends the credentials that fund it.
    ///
    /// Once the request is claimed nothing is rolled back. A failed rank
    /// update stays marked on the request and is retried by the next
    /// `finalize` or [`Self::retry_rank_updates`]. Failed ledger writes go to
    /// the retry queue and the notification is best-effort.
    pub async fn finalize(&self, request_id: &str, actor: &str) -> Result<FinalizeOutcome> {
        let mut request = self.request(request_id)?;
        if request.status == RequestStatus::Finalizado {
            let mut failures = Vec::new();
            let request = self.apply_pending_rank(request, &mut failures);
            let mut outcome = self.already_finalized(request)?;
            outcome.best_effort_failures = failures;
            return Ok(outcome);
        }
        let transition = StateMachine::finalize(&request)?;

        let config = RankRequirementConfig::for_rank(request.rank_from)
            .ok_or(EscalafonError::TopOfLadder(request.rank_from))?;
        let spent = spent_credentials(
            self.stores.ledger.as_ref(),
            &self.stores.retry_queue,
            &request.faculty_id,
        )?;
        let available =
            CredentialProvider::new(self.stores.credentials.as_ref()).available(&request.faculty_id, &spent)?;
        let selection = select(&available, &config, &self.settings.affiliation);

        let now = self.clock.now();
        let expected = request.version;
        StateMachine::apply(&mut request, &transition, actor, None, now);
        let request = match self.stores.requests.update(request, expected) {
            Ok(request) => request,
            Err(EscalafonError::ConcurrentUpdate(id)) => {
                let current = self.request(&id)?;
                if current.status == RequestStatus::Finalizado {
                    return self.already_finalized(current);
                }
                return Err(EscalafonError::ConcurrentUpdate(id));
            }
            Err(e) => return Err(e),
        };
        info!(request_id, selected = selection.len(), "Promotion request finalized");
        if selection.is_empty() {
            warn!(request_id, "No credentials left to consume for this promotion");
        }

        let mut best_effort_failures = Vec::new();
        let request = self.apply_pending_rank(request, &mut best_effort_failures);
        let mut outcome = FinalizeOutcome {
            request,
            consumed: Vec::new(),
            deferred: Vec::new(),
            best_effort_failures,
            already_finalized: false,
        };
        let request = &outcome.request;

        for record in selection.to_records(request, now) {
            match self.stores.ledger.record(record.clone()) {
                Ok(()) => outcome.consumed.push(record),
                Err(EscalafonError::AlreadyConsumed(key)) => {
                    warn!(request_id, credential = %key, "Credential already consumed, skipping");
                    outcome
                        .best_effort_failures
                        .push(format!("ledger: {key} already consumed"));
                }
                Err(e) => match self.stores.retry_queue.enqueue(record.clone(), &e) {
                    Ok(()) => outcome.deferred.push(record),
                    Err(queue_err) => {
                        error!(
                            request_id,
                            credential = %record.key(),
                            error = %queue_err,
                            "Ledger write lost, retry queue unavailable"
                        );
                        outcome
                            .best_effort_failures
                            .push(format!("ledger: {} not queued: {queue_err}", record.key()));
                    }
                },
            }
        }

        if let Some(failure) = self.notify(&outcome.request, NotificationEvent::Finalized).await {
            outcome.best_effort_failures.push(failure);
        }
        Ok(outcome)
    }

    /// Drains the ledger retry queue with exponential backoff.
    pub async fn retry_ledger_writes(&self) -> Result<DrainReport> {
        let report = self
            .stores
            .retry_queue
            .drain_with_backoff(self.stores.ledger.as_ref())
            .await?;
        info!(
            written = report.written,
            pending = report.still_pending,
            dead_lettered = report.dead_lettered,
            "Ledger retry finished"
        );
        Ok(report)
    }

    /// Retries the rank update of every finalized request still marked as
    /// pending.
    pub fn retry_rank_updates(&self) -> Result<RankRetryReport> {
        let mut report = RankRetryReport::default();
        for request in self.stores.requests.all()? {
            if !request.rank_update_pending {
                continue;
            }
            let mut failures = Vec::new();
            let request = self.apply_pending_rank(request, &mut failures);
            if request.rank_update_pending {
                report.still_pending.push(request.id);
            } else {
                report.applied.push(request.id);
            }
        }
        info!(
            applied = report.applied.len(),
            pending = report.still_pending.len(),
            "Rank update retry finished"
        );
        Ok(report)
    }

    /// Ledger writes that ran out of retries.
    pub fn dead_letters(&self) -> Result<Vec<QueuedWrite>> {
        self.stores.retry_queue.dead_letters()
    }

    pub fn request(&self, request_id: &str) -> Result<PromotionRequest> {
        self.stores
            .requests
            .get(request_id)?
            .ok_or_else(|| EscalafonError::RequestNotFound(request_id.to_string()))
    }

    pub fn requests_for(&self, faculty_id: &str) -> Result<Vec<PromotionRequest>> {
        self.stores.requests.for_faculty(faculty_id)
    }

    pub fn consumption_for(&self, request_id: &str) -> Result<Vec<ConsumptionRecord>> {
        self.stores.ledger.records_for_request(request_id)
    }

    fn already_finalized(&self, request: PromotionRequest) -> Result<FinalizeOutcome> {
        let consumed = self.stores.ledger.records_for_request(&request.id)?;
        info!(request_id = %request.id, "Request already finalized, nothing to do");
        Ok(FinalizeOutcome {
            request,
            consumed,
            deferred: Vec::new(),
            best_effort_failures: Vec::new(),
            already_finalized: true,
        })
    }

    /// Runs the pending rank update of `request`, returning its latest state.
    /// A failure is logged and added to `failures`.
    fn apply_pending_rank(&self, request: PromotionRequest, failures: &mut Vec<String>) -> PromotionRequest {
        match self.complete_rank_update(&request) {
            Ok(Some(updated)) => updated,
            Ok(None) => request,
            Err(e) => {
                error!(
                    request_id = %request.id,
                    faculty_id = %request.faculty_id,
                    error = %e,
                    "Rank update failed, left pending for retry"
                );
                failures.push(format!("rank update pending: {e}"));
                self.request(&request.id).unwrap_or(request)
            }
        }
    }

    /// Whoever clears `rank_update_pending` by version check makes the
    /// `set_rank` call, so it never runs twice for one claim. `None` when
    /// nothing was pending or another caller took it.
    fn complete_rank_update(&self, request: &PromotionRequest) -> Result<Option<PromotionRequest>> {
        if !request.rank_update_pending {
            return Ok(None);
        }
        let mut taken = request.clone();
        taken.rank_update_pending = false;
        let taken = match self.stores.requests.update(taken, request.version) {
            Ok(taken) => taken,
            Err(EscalafonError::ConcurrentUpdate(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let effective_on = taken.finalized_at().unwrap_or_else(|| self.clock.now()).date_naive();
        if let Err(e) = self
            .stores
            .rank_updates
            .set_rank(&taken.faculty_id, taken.rank_to, effective_on)
        {
            let mut pending = taken.clone();
            pending.rank_update_pending = true;
            if let Err(mark_err) = self.stores.requests.update(pending, taken.version) {
                error!(request_id = %taken.id, error = %mark_err, "Could not keep rank update marked as pending");
            }
            return Err(e);
        }
        Ok(Some(taken))
    }

    /// Sends `event` for `request`. Returns the failure instead of raising it.
    async fn notify(&self, request: &PromotionRequest, event: NotificationEvent) -> Option<String> {
        let payload = json!({
            "request_id": request.id,
            "status": request.status,
            "review_stage": request.review_stage,
            "rank_from": request.rank_from.name(),
            "rank_to": request.rank_to.name(),
            "reason": request.decision_reason,
        });
        let sent = tokio::time::timeout(
            self.notify_timeout,
            self.notifier.notify(&request.faculty_id, event, payload),
        )
        .await;

        let failure = match sent {
            Ok(Ok(())) => return None,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", self.notify_timeout.as_millis()),
        };
        warn!(request_id = %request.id, %event, error = %failure, "Notification failed");
        Some(format!("notification {event}: {failure}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::credentials::{CredentialCatalog, CredentialKey, CredentialKind, Evaluation, Publication, Training};
    use crate::eligibility::Dimension;
    use crate::faculty::FacultyRoster;
    use crate::ledger::{MemoryLedger, RetryConfig};
    use crate::state_machine::MemoryRequestRepository;
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    const FACULTY: &str = "1801";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<NotificationEvent>>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn events(&self) -> Vec<NotificationEvent> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl NotificationSink for RecordingNotifier {
        async fn notify(&self, _faculty_id: &str, event: NotificationEvent, _payload: serde_json::Value) -> Result<()> {
            self.sent.lock().unwrap().push(event);
            if self.fail {
                return Err(EscalafonError::Notification("webhook down".into()));
            }
            Ok(())
        }
    }

    /// Roster that counts rank updates and refuses them while `down` is set.
    struct CountingRoster {
        roster: FacultyRoster,
        set_rank_calls: AtomicU32,
        down: AtomicBool,
    }

    impl FacultyDirectory for CountingRoster {
        fn find(&self, faculty_id: &str) -> Result<Option<FacultyMember>> {
            self.roster.find(faculty_id)
        }
    }

    impl RankUpdateSink for CountingRoster {
        fn set_rank(&self, faculty_id: &str, rank: Rank, effective_on: NaiveDate) -> Result<()> {
            self.set_rank_calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(EscalafonError::Storage("hr offline".into()));
            }
            self.roster.set_rank(faculty_id, rank, effective_on)
        }
    }

    impl RankStartSource for CountingRoster {
        fn hr_rank_start(&self, faculty_id: &str) -> Result<Option<NaiveDate>> {
            self.roster.hr_rank_start(faculty_id)
        }
        fn account_created(&self, faculty_id: &str) -> Result<Option<NaiveDate>> {
            self.roster.account_created(faculty_id)
        }
    }

    /// Ledger whose writes fail while `down` is set.
    struct SwitchableLedger {
        down: std::sync::atomic::AtomicBool,
        inner: MemoryLedger,
    }

    impl ConsumptionLedger for SwitchableLedger {
        fn record(&self, record: ConsumptionRecord) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(EscalafonError::Storage("ledger offline".into()));
            }
            self.inner.record(record)
        }
        fn consumed_ids(&self, faculty_id: &str, kind: CredentialKind) -> Result<BTreeSet<u64>> {
            self.inner.consumed_ids(faculty_id, kind)
        }
        fn records_for_request(&self, request_id: &str) -> Result<Vec<ConsumptionRecord>> {
            self.inner.records_for_request(request_id)
        }
        fn records_for_faculty(&self, faculty_id: &str) -> Result<Vec<ConsumptionRecord>> {
            self.inner.records_for_faculty(faculty_id)
        }
    }

    /// Another finalizer claims the request right before our claim lands.
    #[derive(Default)]
    struct RacingRepository {
        inner: MemoryRequestRepository,
        raced: AtomicBool,
    }

    impl RequestRepository for RacingRepository {
        fn insert_open(&self, request: PromotionRequest) -> Result<PromotionRequest> {
            self.inner.insert_open(request)
        }
        fn get(&self, request_id: &str) -> Result<Option<PromotionRequest>> {
            self.inner.get(request_id)
        }
        fn update(&self, request: PromotionRequest, expected_version: u64) -> Result<PromotionRequest> {
            if request.status == RequestStatus::Finalizado && !self.raced.swap(true, Ordering::SeqCst) {
                let mut winner = self.inner.get(&request.id)?.unwrap();
                StateMachine::apply(&mut winner, &Transition::Finalize, "other-node", None, Utc::now());
                self.inner.update(winner, expected_version)?;
                return Err(EscalafonError::ConcurrentUpdate(request.id));
            }
            self.inner.update(request, expected_version)
        }
        fn supersede(
            &self,
            original: PromotionRequest,
            expected_version: u64,
            appeal: PromotionRequest,
        ) -> Result<(PromotionRequest, PromotionRequest)> {
            self.inner.supersede(original, expected_version, appeal)
        }
        fn for_faculty(&self, faculty_id: &str) -> Result<Vec<PromotionRequest>> {
            self.inner.for_faculty(faculty_id)
        }
        fn all(&self) -> Result<Vec<PromotionRequest>> {
            self.inner.all()
        }
    }

    struct Harness {
        service: PromotionService<RecordingNotifier>,
        notifier: RecordingNotifier,
        roster: Arc<CountingRoster>,
        ledger: Arc<SwitchableLedger>,
        queue: Arc<LedgerRetryQueue>,
    }

    fn publication(id: u64, year: i32) -> Publication {
        Publication {
            id,
            faculty_id: FACULTY.into(),
            title: format!("Artículo {id}"),
            kind: "article".into(),
            date: date(year, 3, 1),
            affiliation: "Universidad Técnica de Ambato".into(),
        }
    }

    fn evaluation(id: u64, year: i32, term: u8) -> Evaluation {
        Evaluation {
            id,
            faculty_id: FACULTY.into(),
            period: format!("{year}-{term}"),
            year,
            term,
            score_obtained: 80.0,
            score_max: 100.0,
        }
    }

    fn training(id: u64, start: NaiveDate, hours: f64, pedagogical: bool) -> Training {
        Training {
            id,
            faculty_id: FACULTY.into(),
            title: format!("Curso {id}"),
            hours,
            start_date: start,
            end_date: start,
            is_pedagogical: pedagogical,
            has_authority_exemption: false,
        }
    }

    /// Five UTA publications (2019-2023), four 80% evaluations (2022-1..2023-2)
    /// and 100 training hours, 30 of them pedagogical.
    fn scenario_catalog() -> CredentialCatalog {
        let mut catalog = CredentialCatalog::default();
        for (i, year) in (2019..=2023).enumerate() {
            catalog = catalog.with_publication(publication(i as u64 + 1, year));
        }
        for (id, (year, term)) in [(2022, 1), (2022, 2), (2023, 1), (2023, 2)].into_iter().enumerate() {
            catalog = catalog.with_evaluation(evaluation(id as u64 + 1, year, term));
        }
        catalog
            .with_training(training(1, date(2022, 9, 1), 70.0, false))
            .with_training(training(2, date(2023, 9, 1), 30.0, true))
    }

    fn harness_with(catalog: CredentialCatalog, config: EscalafonConfig, notifier: RecordingNotifier) -> Harness {
        harness_on(catalog, config, notifier, Arc::new(MemoryRequestRepository::new()))
    }

    fn harness_on(
        catalog: CredentialCatalog,
        config: EscalafonConfig,
        notifier: RecordingNotifier,
        requests: Arc<dyn RequestRepository>,
    ) -> Harness {
        let roster = Arc::new(CountingRoster {
            roster: FacultyRoster::new([FacultyMember {
                id: FACULTY.into(),
                name: "María Pérez".into(),
                email: "mperez@uta.edu.ec".into(),
                current_rank: Rank::TitularAuxiliar1,
                rank_started_on: Some(date(2019, 1, 1)),
                account_created_on: None,
            }]),
            set_rank_calls: AtomicU32::new(0),
            down: AtomicBool::new(false),
        });
        let ledger = Arc::new(SwitchableLedger {
            down: Default::default(),
            inner: MemoryLedger::new(),
        });
        let queue = Arc::new(LedgerRetryQueue::new(RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
        }));
        let stores = Stores {
            faculty: roster.clone(),
            rank_start: roster.clone(),
            rank_updates: roster.clone(),
            credentials: Arc::new(catalog),
            ledger: ledger.clone(),
            retry_queue: queue.clone(),
            requests,
        };
        let service = PromotionService::new(
            stores,
            notifier.clone(),
            Arc::new(FixedClock::on(date(2024, 6, 1))),
            &config,
        );
        Harness {
            service,
            notifier,
            roster,
            ledger,
            queue,
        }
    }

    fn harness() -> Harness {
        harness_with(scenario_catalog(), EscalafonConfig::default(), RecordingNotifier::default())
    }

    async fn submit(h: &Harness) -> PromotionRequest {
        h.service
            .submit_request(FACULTY, Rank::TitularAuxiliar1, Rank::TitularAuxiliar2, BTreeMap::new())
            .await
            .unwrap()
    }

    async fn approve_through(h: &Harness, request_id: &str, levels: &[ReviewStage]) -> PromotionRequest {
        let mut last = None;
        for level in levels {
            last = Some(
                h.service
                    .decide(request_id, DecisionOutcome::Approve, *level, "reviewer", None)
                    .await
                    .unwrap(),
            );
        }
        last.unwrap()
    }

    const ALL_LEVELS: [ReviewStage; 3] = [ReviewStage::Presidente, ReviewStage::TalentoHumano, ReviewStage::Comision];

    #[test]
    fn scenario_candidate_is_eligible() {
        let h = harness();
        let report = h.service.verify_eligibility(FACULTY, "Titular Auxiliar 1").unwrap();
        assert!(report.overall_pass, "{:#?}", report.dimensions);
        assert_eq!(report.requirements.target_rank, Rank::TitularAuxiliar2);
        assert!(!report.fallback_thresholds);
    }

    #[test]
    fn two_evaluations_fail_with_count_message() {
        let catalog = CredentialCatalog::default()
            .with_publication(publication(1, 2019))
            .with_evaluation(evaluation(1, 2023, 1))
            .with_evaluation(evaluation(2, 2023, 2))
            .with_training(training(1, date(2023, 1, 1), 100.0, true));
        let h = harness_with(catalog, EscalafonConfig::default(), RecordingNotifier::default());

        let report = h.service.verify_eligibility(FACULTY, "Titular Auxiliar 1").unwrap();
        assert!(!report.overall_pass);
        let evaluation = report.dimension(Dimension::PerformanceEvaluation).unwrap();
        assert!(!evaluation.passed);
        assert!(evaluation.message.contains("2 analyzed, 4 required"), "{}", evaluation.message);
    }

    #[test]
    fn unknown_rank_is_a_validation_error() {
        let h = harness();
        let err = h.service.verify_eligibility(FACULTY, "Profesor Ocasional").unwrap_err();
        assert!(matches!(err, EscalafonError::UnknownRank(_)));
        assert_eq!(err.class(), crate::error::ErrorClass::Validation);
    }

    #[tokio::test]
    async fn finalize_consumes_oldest_credentials() {
        let h = harness();
        let request = submit(&h).await;
        let approved = approve_through(&h, &request.id, &ALL_LEVELS).await;
        assert_eq!(approved.review_stage, ReviewStage::Aprobado);
        assert!(approved.approval_date.is_some());

        let outcome = h.service.finalize(&request.id, "system").await.unwrap();
        assert!(!outcome.already_finalized);
        assert!(outcome.best_effort_failures.is_empty(), "{:?}", outcome.best_effort_failures);
        assert_eq!(outcome.request.status, RequestStatus::Finalizado);
        assert!(!outcome.request.rank_update_pending);

        let keys: BTreeSet<CredentialKey> = outcome.consumed.iter().map(|r| r.key()).collect();
        let publications: Vec<u64> = outcome
            .consumed
            .iter()
            .filter(|r| r.credential_type == CredentialKind::Publication)
            .map(|r| r.credential_id)
            .collect();
        assert_eq!(publications, vec![1]);
        for id in 1..=4 {
            assert!(keys.contains(&CredentialKey::new(CredentialKind::Evaluation, id)));
        }
        assert_eq!(keys.len(), outcome.consumed.len());

        let member = h.service.faculty_member(FACULTY).unwrap();
        assert_eq!(member.current_rank, Rank::TitularAuxiliar2);
        assert_eq!(member.rank_started_on, Some(date(2024, 6, 1)));
        assert_eq!(h.roster.set_rank_calls.load(Ordering::SeqCst), 1);

        // Four publications remain spendable.
        let spent = spent_credentials(h.ledger.as_ref(), &h.queue, FACULTY).unwrap();
        let provider = CredentialProvider::new(h.service.stores.credentials.as_ref());
        assert_eq!(provider.available_publications(FACULTY, &spent).unwrap().len(), 4);

        assert_eq!(
            h.notifier.events(),
            vec![NotificationEvent::Submitted, NotificationEvent::Finalized]
        );
    }

    #[tokio::test]
    async fn finalize_is_idempotent() {
        let h = harness();
        let request = submit(&h).await;
        approve_through(&h, &request.id, &ALL_LEVELS).await;

        let first = h.service.finalize(&request.id, "system").await.unwrap();
        let second = h.service.finalize(&request.id, "system").await.unwrap();

        assert!(second.already_finalized);
        assert_eq!(second.consumed, first.consumed);
        assert_eq!(h.ledger.inner.len().unwrap(), first.consumed.len());
        assert_eq!(h.roster.set_rank_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn finalize_before_approval_is_refused() {
        let h = harness();
        let request = submit(&h).await;
        approve_through(&h, &request.id, &ALL_LEVELS[..2]).await;
        let err = h.service.finalize(&request.id, "system").await.unwrap_err();
        assert!(matches!(err, EscalafonError::InvalidTransition { action: "finalize", .. }));
        assert!(h.ledger.inner.is_empty().unwrap());
    }

    #[tokio::test]
    async fn availability_only_shrinks_after_finalize() {
        let h = harness();
        let provider = CredentialProvider::new(h.service.stores.credentials.as_ref());
        let before = provider
            .available(FACULTY, &spent_credentials(h.ledger.as_ref(), &h.queue, FACULTY).unwrap())
            .unwrap()
            .keys();

        let request = submit(&h).await;
        approve_through(&h, &request.id, &ALL_LEVELS).await;
        h.service.finalize(&request.id, "system").await.unwrap();

        let after = provider
            .available(FACULTY, &spent_credentials(h.ledger.as_ref(), &h.queue, FACULTY).unwrap())
            .unwrap()
            .keys();
        assert!(after.len() < before.len());
        assert!(after.iter().all(|k| before.contains(k)));
    }

    #[tokio::test]
    async fn credentials_are_consumed_at_most_once_across_promotions() {
        let config = EscalafonConfig {
            gate_final_approval: false,
            ..EscalafonConfig::default()
        };
        let h = harness_with(scenario_catalog(), config, RecordingNotifier::default());

        let first = submit(&h).await;
        approve_through(&h, &first.id, &ALL_LEVELS).await;
        h.service.finalize(&first.id, "system").await.unwrap();

        let second = h
            .service
            .submit_request(FACULTY, Rank::TitularAuxiliar2, Rank::TitularAgregado1, BTreeMap::new())
            .await
            .unwrap();
        approve_through(&h, &second.id, &ALL_LEVELS).await;
        let outcome = h.service.finalize(&second.id, "system").await.unwrap();

        let second_pubs: Vec<u64> = outcome
            .consumed
            .iter()
            .filter(|r| r.credential_type == CredentialKind::Publication)
            .map(|r| r.credential_id)
            .collect();
        assert_eq!(second_pubs, vec![2, 3, 4]);

        let all = h.ledger.inner.records_for_faculty(FACULTY).unwrap();
        let unique: BTreeSet<_> = all.iter().map(|r| r.key()).collect();
        assert_eq!(unique.len(), all.len());
        assert_eq!(h.roster.set_rank_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_open_request_is_a_conflict() {
        let h = harness();
        let first = submit(&h).await;
        let err = h
            .service
            .submit_request(FACULTY, Rank::TitularAuxiliar1, Rank::TitularAuxiliar2, BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EscalafonError::AlreadyPending { ref request_id, .. } if *request_id == first.id));
        assert_eq!(err.class(), crate::error::ErrorClass::Conflict);
        assert_eq!(h.service.requests_for(FACULTY).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn submit_validates_ranks() {
        let h = harness();
        let skip = h
            .service
            .submit_request(FACULTY, Rank::TitularAuxiliar1, Rank::TitularAgregado1, BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(skip, EscalafonError::Validation(_)));

        let wrong_current = h
            .service
            .submit_request(FACULTY, Rank::TitularAgregado1, Rank::TitularAgregado2, BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(wrong_current, EscalafonError::Validation(_)));

        let top = h
            .service
            .submit_request(FACULTY, Rank::TitularPrincipal1, Rank::TitularPrincipal1, BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(top, EscalafonError::TopOfLadder(_)));

        let unknown = h
            .service
            .submit_request("0000", Rank::TitularAuxiliar1, Rank::TitularAuxiliar2, BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(unknown, EscalafonError::FacultyNotFound(_)));
    }

    #[tokio::test]
    async fn commission_approval_requires_eligibility() {
        let catalog = CredentialCatalog::default()
            .with_publication(publication(1, 2019))
            .with_evaluation(evaluation(1, 2023, 1))
            .with_evaluation(evaluation(2, 2023, 2));
        let h = harness_with(catalog, EscalafonConfig::default(), RecordingNotifier::default());
        let request = submit(&h).await;
        approve_through(&h, &request.id, &ALL_LEVELS[..2]).await;

        let err = h
            .service
            .decide(&request.id, DecisionOutcome::Approve, ReviewStage::Comision, "comision", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EscalafonError::NotEligible { .. }));
        assert_eq!(h.service.request(&request.id).unwrap().review_stage, ReviewStage::Comision);
    }

    #[tokio::test]
    async fn rejected_then_appealed() {
        let h = harness();
        let request = submit(&h).await;
        let rejected = h
            .service
            .decide(
                &request.id,
                DecisionOutcome::Reject,
                ReviewStage::Presidente,
                "presidente",
                Some("incomplete file"),
            )
            .await
            .unwrap();
        assert_eq!(rejected.status, RequestStatus::RechazadoPresidente);
        assert_eq!(rejected.decided_by.as_deref(), Some("presidente"));

        let appeal = h.service.appeal(&request.id, "documents attached", FACULTY).await.unwrap();
        assert_eq!(appeal.status, RequestStatus::Apelacion);
        assert_eq!(appeal.review_stage, ReviewStage::Comision);
        assert_eq!(appeal.rank_from, request.rank_from);
        assert_eq!(appeal.rank_to, request.rank_to);
        assert_eq!(appeal.supersedes.as_deref(), Some(request.id.as_str()));

        let original = h.service.request(&request.id).unwrap();
        assert_eq!(original.status, RequestStatus::RechazadoPresidente);
        assert_eq!(original.superseded_by.as_deref(), Some(appeal.id.as_str()));
        assert!(original.observations.iter().any(|o| o.contains(&appeal.id)));

        let again = h.service.appeal(&request.id, "once more", FACULTY).await.unwrap_err();
        assert!(matches!(again, EscalafonError::AlreadyAppealed(_)));

        // The appeal goes straight to the commission and can be finalized.
        approve_through(&h, &appeal.id, &[ReviewStage::Comision]).await;
        let outcome = h.service.finalize(&appeal.id, "system").await.unwrap();
        assert_eq!(outcome.request.status, RequestStatus::Finalizado);

        assert_eq!(
            h.notifier.events(),
            vec![
                NotificationEvent::Submitted,
                NotificationEvent::Rejected,
                NotificationEvent::Appealed,
                NotificationEvent::Finalized,
            ]
        );
    }

    #[tokio::test]
    async fn appeal_of_open_request_is_refused() {
        let h = harness();
        let request = submit(&h).await;
        let err = h.service.appeal(&request.id, "why not", FACULTY).await.unwrap_err();
        assert!(matches!(err, EscalafonError::InvalidTransition { action: "appeal", .. }));

        let err = h.service.appeal(&request.id, "  ", FACULTY).await.unwrap_err();
        assert!(matches!(err, EscalafonError::Validation(_)));
    }

    #[tokio::test]
    async fn failed_ledger_writes_are_queued_and_retried() {
        let h = harness();
        let request = submit(&h).await;
        approve_through(&h, &request.id, &ALL_LEVELS).await;

        h.ledger.down.store(true, Ordering::SeqCst);
        let outcome = h.service.finalize(&request.id, "system").await.unwrap();
        assert_eq!(outcome.request.status, RequestStatus::Finalizado);
        assert!(outcome.consumed.is_empty());
        assert!(!outcome.deferred.is_empty());

        // Queued keys are already spent.
        let spent = spent_credentials(h.ledger.as_ref(), &h.queue, FACULTY).unwrap();
        assert!(spent.contains(CredentialKind::Publication, 1));

        h.ledger.down.store(false, Ordering::SeqCst);
        let report = h.service.retry_ledger_writes().await.unwrap();
        assert_eq!(report.written, outcome.deferred.len());
        assert_eq!(report.still_pending, 0);
        assert_eq!(h.service.consumption_for(&request.id).unwrap().len(), outcome.deferred.len());
    }

    #[tokio::test]
    async fn notification_failure_does_not_undo_finalize() {
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let h = harness_with(scenario_catalog(), EscalafonConfig::default(), notifier);
        let request = submit(&h).await;
        approve_through(&h, &request.id, &ALL_LEVELS).await;

        let outcome = h.service.finalize(&request.id, "system").await.unwrap();
        assert_eq!(outcome.request.status, RequestStatus::Finalizado);
        assert!(!outcome.consumed.is_empty());
        assert_eq!(outcome.best_effort_failures.len(), 1);
        assert!(outcome.best_effort_failures[0].contains("finalized"));
    }

    #[tokio::test]
    async fn failed_rank_update_stays_pending_until_retried() {
        let h = harness();
        let request = submit(&h).await;
        approve_through(&h, &request.id, &ALL_LEVELS).await;

        h.roster.down.store(true, Ordering::SeqCst);
        let outcome = h.service.finalize(&request.id, "system").await.unwrap();
        assert_eq!(outcome.request.status, RequestStatus::Finalizado);
        assert!(outcome.request.rank_update_pending);
        assert!(!outcome.consumed.is_empty());
        assert!(
            outcome.best_effort_failures.iter().any(|f| f.contains("hr offline")),
            "{:?}",
            outcome.best_effort_failures
        );
        assert_eq!(h.service.faculty_member(FACULTY).unwrap().current_rank, Rank::TitularAuxiliar1);

        // The same step cannot be requested again while the rank is owed.
        let err = h
            .service
            .submit_request(FACULTY, Rank::TitularAuxiliar1, Rank::TitularAuxiliar2, BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EscalafonError::RankUpdatePending { ref request_id, .. } if *request_id == request.id));
        assert_eq!(err.class(), crate::error::ErrorClass::Conflict);

        // Finalizing again retries the rank update without consuming more.
        let again = h.service.finalize(&request.id, "system").await.unwrap();
        assert!(again.already_finalized);
        assert!(again.request.rank_update_pending);
        assert_eq!(again.best_effort_failures.len(), 1);
        assert_eq!(h.ledger.inner.len().unwrap(), outcome.consumed.len());

        h.roster.down.store(false, Ordering::SeqCst);
        let report = h.service.retry_rank_updates().unwrap();
        assert_eq!(report.applied, vec![request.id.clone()]);
        assert!(report.still_pending.is_empty());

        let member = h.service.faculty_member(FACULTY).unwrap();
        assert_eq!(member.current_rank, Rank::TitularAuxiliar2);
        assert_eq!(member.rank_started_on, Some(date(2024, 6, 1)));
        assert!(!h.service.request(&request.id).unwrap().rank_update_pending);
        assert_eq!(h.roster.set_rank_calls.load(Ordering::SeqCst), 3);

        // Nothing left to do afterwards.
        let settled = h.service.finalize(&request.id, "system").await.unwrap();
        assert!(settled.best_effort_failures.is_empty());
        assert!(h.service.retry_rank_updates().unwrap().applied.is_empty());
        assert_eq!(h.roster.set_rank_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn refinalize_applies_a_pending_rank_update() {
        let h = harness();
        let request = submit(&h).await;
        approve_through(&h, &request.id, &ALL_LEVELS).await;

        h.roster.down.store(true, Ordering::SeqCst);
        h.service.finalize(&request.id, "system").await.unwrap();
        h.roster.down.store(false, Ordering::SeqCst);

        let outcome = h.service.finalize(&request.id, "system").await.unwrap();
        assert!(outcome.already_finalized);
        assert!(outcome.best_effort_failures.is_empty());
        assert!(!outcome.request.rank_update_pending);
        assert_eq!(h.service.faculty_member(FACULTY).unwrap().current_rank, Rank::TitularAuxiliar2);
    }

    #[tokio::test]
    async fn losing_a_finalize_race_does_nothing() {
        let h = harness_on(
            scenario_catalog(),
            EscalafonConfig::default(),
            RecordingNotifier::default(),
            Arc::new(RacingRepository::default()),
        );
        let request = submit(&h).await;
        approve_through(&h, &request.id, &ALL_LEVELS).await;

        let outcome = h.service.finalize(&request.id, "system").await.unwrap();
        assert!(outcome.already_finalized);
        assert_eq!(outcome.request.status, RequestStatus::Finalizado);
        assert_eq!(h.roster.set_rank_calls.load(Ordering::SeqCst), 0);

        let records = h.ledger.inner.records_for_faculty(FACULTY).unwrap();
        let unique: BTreeSet<_> = records.iter().map(|r| r.key()).collect();
        assert_eq!(unique.len(), records.len());
        assert!(records.is_empty());
        assert!(h.queue.pending().unwrap().is_empty());
        assert!(!h.notifier.events().contains(&NotificationEvent::Finalized));
    }
}
