use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use brain_common::{EventBus, MessageStore, ReviewerQuery, SessionRegistry, TurnEndedEvent};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::debounce::Debouncer;
use super::stability::{StabilitySettings, wait_for_stable_count};
use super::status::{StatusEvent, SyncPhase, broadcast_status};
use crate::config::BrainToml;
use crate::errors::{BrainError, BrainResult};
use crate::ledger::{
    BrainSession, BrainSessionStatus, DbHandle, Execution, ExecutionStatus, INTERRUPTED_NOTE,
    ProgressEntry, ProgressKind,
};
use crate::rounds::{
    DEFAULT_INIT_MARKER, DialogueRound, InitRoundPolicy, MessageClassifier, RoundActivity,
    segment, select_pending,
};
use crate::signals::{
    InstructionContext, Signal, SignalParser, render_completion_notice, render_instruction,
    render_relay,
};
use crate::util::truncate_chars;
use crate::workflow::{Transition, WorkflowMachine, WorkflowState, allowed_signals};

const STATUS_CHANNEL_CAPACITY: usize = 256;

/// Note attached to executions whose reply carried no usable signal.
pub const NO_CLEAR_OUTCOME: &str = "no clear outcome";

/// Timing and filtering knobs of the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub debounce: Duration,
    /// Re-arms allowed while the session still reports thinking.
    pub max_rearms: u32,
    pub stability: StabilitySettings,
    pub result_snapshot_chars: usize,
    pub init_round_policy: InitRoundPolicy,
    pub init_marker: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(5000),
            max_rearms: 12,
            stability: StabilitySettings::default(),
            result_snapshot_chars: 4000,
            init_round_policy: InitRoundPolicy::default(),
            init_marker: DEFAULT_INIT_MARKER.to_string(),
        }
    }
}

/// External capabilities the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub messages: Arc<dyn MessageStore>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub reviewer: Arc<dyn ReviewerQuery>,
}

/// Result of one `sync_rounds` pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No live BrainSession supervises the primary session.
    NoSession,
    /// Another pass for the same BrainSession is running.
    AlreadyInFlight,
    NothingPending,
    /// Latest round was plain Q&A; only excluded rounds were recorded.
    QuestionOnly,
    /// Rounds recorded without starting a cycle.
    Recorded { rounds: Vec<u32> },
    CycleStarted { execution_id: String, rounds: Vec<u32> },
}

/// Result of handling a reviewer turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewOutcome {
    /// Not a reviewer of a live BrainSession, or no execution running.
    Unrelated,
    /// The reviewer has not replied to the latest instruction yet.
    AwaitingReply,
    NoClearOutcome { execution_id: String },
    Advanced {
        execution_id: String,
        transition: Transition,
        next_execution_id: Option<String>,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drops the BrainSession id from the in-flight set on every exit path.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, key: &str) -> Option<Self> {
        if !lock(set).insert(key.to_string()) {
            return None;
        }
        Some(Self {
            set,
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.key);
    }
}

struct Inner {
    settings: OrchestratorSettings,
    machine: WorkflowMachine,
    parser: SignalParser,
    classifier: MessageClassifier,
    db: DbHandle,
    collaborators: Collaborators,
    status_tx: broadcast::Sender<String>,
    debouncer: Debouncer,
    /// BrainSession ids with a `sync_rounds` pass running.
    in_flight: Mutex<HashSet<String>>,
    /// Reviewer session id -> BrainSession id. Rebuilt from the ledger on start.
    review_index: Mutex<HashMap<String, String>>,
    /// Primary session id -> sync phase. Absent means idle.
    phases: Mutex<HashMap<String, SyncPhase>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Drives the review workflow of supervised sessions.
///
/// Cheap to clone; clones share all state. Call [`SyncOrchestrator::shutdown`]
/// to stop the listener and pending timers.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        machine: WorkflowMachine,
        parser: SignalParser,
        classifier: MessageClassifier,
        db: DbHandle,
        collaborators: Collaborators,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                settings,
                machine,
                parser,
                classifier,
                db,
                collaborators,
                status_tx,
                debouncer: Debouncer::new(),
                in_flight: Mutex::new(HashSet::new()),
                review_index: Mutex::new(HashMap::new()),
                phases: Mutex::new(HashMap::new()),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(config: &BrainToml, db: DbHandle, collaborators: Collaborators) -> Self {
        Self::new(
            config.orchestrator_settings(),
            config.machine(),
            config.parser(),
            config.classifier(),
            db,
            collaborators,
        )
    }

    pub fn db(&self) -> &DbHandle {
        &self.inner.db
    }

    /// Receiver of JSON-encoded [`StatusEvent`]s.
    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.inner.status_tx.subscribe()
    }

    pub fn sync_phase(&self, main_session_id: &str) -> SyncPhase {
        lock(&self.inner.phases)
            .get(main_session_id)
            .copied()
            .unwrap_or_default()
    }

    fn set_phase(&self, main_session_id: &str, phase: SyncPhase) {
        let mut phases = lock(&self.inner.phases);
        if phase == SyncPhase::Idle {
            phases.remove(main_session_id);
        } else {
            phases.insert(main_session_id.to_string(), phase);
        }
    }

    fn notify(&self, event: StatusEvent) {
        broadcast_status(&self.inner.status_tx, &event);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Run the crash-recovery sweep, rebuild the reviewer index and start
    /// listening for turn-ended events. Returns the number of swept executions.
    pub async fn start(&self, bus: &EventBus) -> BrainResult<usize> {
        let swept = self.recover().await?;
        let indexed = self.rebuild_review_index().await?;

        let mut rx = bus.subscribe();
        let orchestrator = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => orchestrator.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Turn-ended listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Turn-ended listener stopped");
        });
        if let Some(previous) = lock(&self.inner.listener).replace(handle) {
            previous.abort();
        }

        tracing::info!(swept, indexed, "Brain orchestrator started");
        Ok(swept)
    }

    /// Stop listening and drop every pending debounce timer.
    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.inner.listener).take() {
            handle.abort();
        }
        self.inner.debouncer.cancel_all();
        lock(&self.inner.phases).clear();
        tracing::info!("Brain orchestrator stopped");
    }

    /// Fail every execution left running by a previous process.
    pub async fn recover(&self) -> BrainResult<usize> {
        let swept = self
            .inner
            .db
            .call(|db| db.fail_running_executions(INTERRUPTED_NOTE))
            .await?;
        if swept > 0 {
            tracing::warn!(swept, "Failed executions interrupted by a restart");
        }
        Ok(swept)
    }

    pub async fn rebuild_review_index(&self) -> BrainResult<usize> {
        let sessions = self.inner.db.call(|db| db.list_live_sessions()).await?;
        let mut index = lock(&self.inner.review_index);
        index.clear();
        for session in &sessions {
            index.insert(session.review_session_id.clone(), session.id.clone());
        }
        Ok(index.len())
    }

    fn handle_event(&self, event: TurnEndedEvent) {
        if !event.was_thinking {
            tracing::trace!(session_id = %event.session_id, "Ignoring turn end without output");
            return;
        }
        let orchestrator = self.clone();
        tokio::spawn(async move {
            match orchestrator.resolve_review_session(&event.session_id).await {
                Ok(Some(_)) => orchestrator.on_reviewer_turn_ended(&event.session_id),
                Ok(None) => orchestrator.on_main_session_turn_ended(&event.session_id),
                Err(e) => {
                    tracing::error!(session_id = %event.session_id, error = %e, "Failed to route turn-ended event");
                }
            }
        });
    }

    // ── BrainSession management ───────────────────────────────────────

    /// Supervise `main_session_id` with `review_session_id` as reviewer.
    /// Returns the live BrainSession if one already exists.
    pub async fn attach(
        &self,
        main_session_id: &str,
        review_session_id: &str,
    ) -> BrainResult<BrainSession> {
        let main = main_session_id.to_string();
        let review = review_session_id.to_string();
        let session = self
            .inner
            .db
            .call(move |db| match db.find_live_for_main(&main)? {
                Some(existing) => Ok(existing),
                None => db.create_brain_session(&main, &review),
            })
            .await?;
        lock(&self.inner.review_index)
            .insert(session.review_session_id.clone(), session.id.clone());
        tracing::info!(
            brain_session_id = %session.id,
            main_session_id,
            review_session_id = %session.review_session_id,
            "Brain session attached"
        );
        Ok(session)
    }

    /// Stop supervising. Any running execution is failed.
    pub async fn cancel(&self, brain_session_id: &str) -> BrainResult<()> {
        let session = self.load_session(brain_session_id).await?;
        let id = session.id.clone();
        self.inner
            .db
            .call(move |db| {
                if let Some(running) = db.running_execution(&id)? {
                    db.finish_execution(&running.id, ExecutionStatus::Failed, Some("cancelled"))?;
                }
                db.update_status(&id, BrainSessionStatus::Cancelled, None)
            })
            .await?;
        self.inner.debouncer.cancel(&session.main_session_id);
        self.inner
            .debouncer
            .cancel(&review_key(&session.review_session_id));
        lock(&self.inner.review_index).remove(&session.review_session_id);
        self.set_phase(&session.main_session_id, SyncPhase::Idle);
        tracing::info!(brain_session_id, "Brain session cancelled");
        Ok(())
    }

    async fn load_session(&self, brain_session_id: &str) -> BrainResult<BrainSession> {
        let id = brain_session_id.to_string();
        self.inner
            .db
            .call(move |db| db.get_brain_session(&id))
            .await?
            .ok_or_else(|| BrainError::SessionNotFound {
                id: brain_session_id.to_string(),
            })
    }

    /// BrainSession id reviewed by `review_session_id`, consulting the ledger
    /// when the in-memory index does not know it.
    async fn resolve_review_session(&self, review_session_id: &str) -> BrainResult<Option<String>> {
        let cached = lock(&self.inner.review_index).get(review_session_id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        let review = review_session_id.to_string();
        let found = self
            .inner
            .db
            .call(move |db| db.find_live_for_review(&review))
            .await?;
        Ok(found.map(|session| {
            lock(&self.inner.review_index)
                .insert(session.review_session_id.clone(), session.id.clone());
            session.id
        }))
    }

    async fn read_messages(&self, session_id: &str) -> BrainResult<Vec<brain_common::StoredMessage>> {
        wait_for_stable_count(
            self.inner.collaborators.messages.as_ref(),
            session_id,
            &self.inner.settings.stability,
        )
        .await;
        self.inner
            .collaborators
            .messages
            .get_all_messages(session_id)
            .await
            .map_err(|e| BrainError::MessageStore {
                session_id: session_id.to_string(),
                message: e.to_string(),
            })
    }

    // ── Primary session ───────────────────────────────────────────────

    /// Debounced entry point for a primary session's turn end.
    pub fn on_main_session_turn_ended(&self, main_session_id: &str) {
        self.set_phase(main_session_id, SyncPhase::Debouncing);
        self.arm_debounce(main_session_id.to_string(), 0);
    }

    fn arm_debounce(&self, main_session_id: String, rearms: u32) {
        let orchestrator = self.clone();
        let key = main_session_id.clone();
        self.inner
            .debouncer
            .schedule(&key, self.inner.settings.debounce, move || async move {
                orchestrator.debounce_fired(main_session_id, rearms).await;
            });
    }

    async fn debounce_fired(&self, main_session_id: String, rearms: u32) {
        let thinking = match self
            .inner
            .collaborators
            .sessions
            .get_session(&main_session_id)
            .await
        {
            Ok(info) => info.is_some_and(|s| s.thinking),
            Err(e) => {
                tracing::warn!(main_session_id = %main_session_id, error = %e, "Failed to read session state");
                false
            }
        };
        if thinking && rearms < self.inner.settings.max_rearms {
            tracing::debug!(main_session_id = %main_session_id, rearms, "Session still thinking, re-arming");
            self.arm_debounce(main_session_id, rearms + 1);
            return;
        }

        match self.sync_main_session(&main_session_id).await {
            Ok(outcome) => {
                tracing::debug!(main_session_id = %main_session_id, ?outcome, "Sync finished");
            }
            Err(e) => {
                self.set_phase(&main_session_id, SyncPhase::Idle);
                tracing::error!(main_session_id = %main_session_id, error = %e, "Sync failed");
            }
        }
    }

    /// Sync the live BrainSession supervising `main_session_id`, if any.
    pub async fn sync_main_session(&self, main_session_id: &str) -> BrainResult<SyncOutcome> {
        let main = main_session_id.to_string();
        let session = self
            .inner
            .db
            .call(move |db| db.find_live_for_main(&main))
            .await?;
        match session {
            Some(session) => self.sync_rounds(&session.id).await,
            None => {
                self.set_phase(main_session_id, SyncPhase::Idle);
                Ok(SyncOutcome::NoSession)
            }
        }
    }

    /// Extract new rounds of the primary session and start a review cycle
    /// when they call for one. Single-flight per BrainSession.
    pub async fn sync_rounds(&self, brain_session_id: &str) -> BrainResult<SyncOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.inner.in_flight, brain_session_id) else {
            tracing::debug!(brain_session_id, "Sync already in flight, skipping");
            return Ok(SyncOutcome::AlreadyInFlight);
        };

        let session = self.load_session(brain_session_id).await?;
        let main_id = session.main_session_id.clone();
        self.set_phase(&main_id, SyncPhase::Syncing);
        self.notify(StatusEvent::Syncing {
            brain_session_id: brain_session_id.to_string(),
        });

        let outcome = self.sync_rounds_inner(session).await;
        if !matches!(outcome, Ok(SyncOutcome::CycleStarted { .. })) {
            self.set_phase(&main_id, SyncPhase::Idle);
        }
        outcome
    }

    async fn sync_rounds_inner(&self, session: BrainSession) -> BrainResult<SyncOutcome> {
        let messages = self.read_messages(&session.main_session_id).await?;
        let rounds = segment(&messages, &self.inner.classifier);

        // Read the latest (state, context) right before deciding.
        let id = session.id.clone();
        let (session, persisted) = self
            .inner
            .db
            .call(move |db| {
                let session = db
                    .get_brain_session(&id)?
                    .ok_or_else(|| anyhow::anyhow!("Brain session {} not found", id))?;
                let persisted = db.round_numbers(&id)?;
                Ok((session, persisted))
            })
            .await?;

        let pending = select_pending(
            rounds,
            &persisted,
            session.state,
            self.inner.settings.init_round_policy,
            &self.inner.settings.init_marker,
        );
        if pending.is_empty() {
            return Ok(SyncOutcome::NothingPending);
        }

        if session.state.awaits_reply_done() {
            if !pending.latest_has_code_changes() {
                // Q&A stays pending so a later code round still sees it.
                self.record_rounds(&session.id, pending.excluded).await?;
                tracing::debug!(brain_session_id = %session.id, "Latest round has no code changes");
                return Ok(SyncOutcome::QuestionOnly);
            }

            let transition = self.inner.machine.apply(
                session.state,
                &session.context,
                Signal::AiReplyDone,
                None,
            )?;
            self.persist_transition(&session.id, &transition).await?;

            let to_review: Vec<DialogueRound> = pending
                .code_change_rounds()
                .into_iter()
                .cloned()
                .collect();
            let mut all = pending.reviewable;
            all.extend(pending.excluded);
            self.record_rounds(&session.id, all).await?;
            return self.start_cycle_outcome(&session.id, to_review).await;
        }

        let reviewable = pending.reviewable.clone();
        let mut all = pending.reviewable;
        all.extend(pending.excluded);
        let numbers = self.record_rounds(&session.id, all).await?;

        if session.state.is_terminal() || reviewable.is_empty() {
            return Ok(SyncOutcome::Recorded { rounds: numbers });
        }
        self.start_cycle_outcome(&session.id, reviewable).await
    }

    async fn start_cycle_outcome(
        &self,
        brain_session_id: &str,
        rounds: Vec<DialogueRound>,
    ) -> BrainResult<SyncOutcome> {
        let numbers = rounds.iter().map(|r| r.round_number).collect();
        let execution = self.trigger_review_cycle(brain_session_id, rounds).await?;
        Ok(SyncOutcome::CycleStarted {
            execution_id: execution.id,
            rounds: numbers,
        })
    }

    async fn record_rounds(
        &self,
        brain_session_id: &str,
        mut rounds: Vec<DialogueRound>,
    ) -> BrainResult<Vec<u32>> {
        if rounds.is_empty() {
            return Ok(Vec::new());
        }
        rounds.sort_by_key(|r| r.round_number);
        let numbers: Vec<u32> = rounds.iter().map(|r| r.round_number).collect();
        let id = brain_session_id.to_string();
        let inserted = self
            .inner
            .db
            .call(move |db| db.insert_rounds(&id, &rounds))
            .await?;
        tracing::debug!(brain_session_id, inserted, rounds = ?numbers, "Recorded rounds");
        Ok(numbers)
    }

    async fn persist_transition(
        &self,
        brain_session_id: &str,
        transition: &Transition,
    ) -> BrainResult<()> {
        let id = brain_session_id.to_string();
        let state = transition.to;
        let context = transition.context.clone();
        self.inner
            .db
            .call(move |db| db.update_workflow(&id, state, &context))
            .await?;
        tracing::info!(
            brain_session_id,
            from = %transition.from,
            to = %transition.to,
            signal = %transition.signal,
            forced = transition.forced,
            "Workflow advanced"
        );
        Ok(())
    }

    // ── Review cycle ──────────────────────────────────────────────────

    /// Start a reviewer cycle covering `rounds` (empty for an unprompted
    /// stage action). A running execution is superseded first.
    pub async fn trigger_review_cycle(
        &self,
        brain_session_id: &str,
        rounds: Vec<DialogueRound>,
    ) -> BrainResult<Execution> {
        let session = self.load_session(brain_session_id).await?;
        let working_dir = match self
            .inner
            .collaborators
            .sessions
            .get_session(&session.main_session_id)
            .await
        {
            Ok(info) => info.and_then(|i| i.working_dir().map(str::to_string)),
            Err(e) => {
                tracing::warn!(brain_session_id, error = %e, "Failed to read session metadata");
                None
            }
        };

        let limits = *self.inner.machine.limits();
        let prompt = render_instruction(&InstructionContext {
            state: session.state,
            context: &session.context,
            limits: &limits,
            working_dir: working_dir.as_deref(),
            rounds: &rounds,
        });
        let numbers: Vec<u32> = rounds.iter().map(|r| r.round_number).collect();

        let id = session.id.clone();
        let covered = numbers.clone();
        let stored_prompt = prompt.clone();
        let (execution, superseded) = self
            .inner
            .db
            .call(move |db| db.start_execution(&id, &covered, &stored_prompt))
            .await?;
        for old in &superseded {
            tracing::info!(brain_session_id, execution_id = %old, "Superseded running execution");
        }

        lock(&self.inner.review_index)
            .insert(session.review_session_id.clone(), session.id.clone());
        self.set_phase(&session.main_session_id, SyncPhase::AwaitingReviewer);
        self.notify(StatusEvent::Started {
            brain_session_id: session.id.clone(),
            execution_id: execution.id.clone(),
            rounds: numbers.clone(),
            state: session.state,
        });
        tracing::info!(
            brain_session_id,
            execution_id = %execution.id,
            state = %session.state,
            rounds = ?numbers,
            "Review cycle started"
        );

        if let Err(e) = self
            .inner
            .collaborators
            .reviewer
            .send(&session.review_session_id, &prompt)
            .await
        {
            let message = e.to_string();
            let exec_id = execution.id.clone();
            let note = format!("delivery failed: {}", message);
            let stored_note = note.clone();
            if let Err(db_err) = self
                .inner
                .db
                .call(move |db| db.finish_execution(&exec_id, ExecutionStatus::Failed, Some(&stored_note)))
                .await
            {
                tracing::error!(execution_id = %execution.id, error = %db_err, "Failed to mark execution failed");
            }
            self.set_phase(&session.main_session_id, SyncPhase::Idle);
            self.notify(StatusEvent::Done {
                brain_session_id: session.id.clone(),
                execution_id: execution.id.clone(),
                status: ExecutionStatus::Failed,
                state: session.state,
                signal: None,
                note: Some(note),
            });
            tracing::error!(
                brain_session_id,
                execution_id = %execution.id,
                error = %message,
                "Failed to deliver instruction to reviewer"
            );
            return Err(BrainError::DeliveryFailed {
                session_id: session.review_session_id,
                message,
            });
        }

        Ok(execution)
    }

    // ── Reviewer session ──────────────────────────────────────────────

    /// Debounced entry point for a reviewer session's turn end.
    pub fn on_reviewer_turn_ended(&self, review_session_id: &str) {
        let orchestrator = self.clone();
        let review = review_session_id.to_string();
        self.inner.debouncer.schedule(
            &review_key(review_session_id),
            self.inner.settings.debounce,
            move || async move {
                match orchestrator.handle_reviewer_reply(&review).await {
                    Ok(outcome) => {
                        tracing::debug!(review_session_id = %review, ?outcome, "Reviewer turn handled");
                    }
                    Err(e) => {
                        tracing::error!(review_session_id = %review, error = %e, "Reviewer turn failed");
                    }
                }
            },
        );
    }

    /// Parse the reviewer's latest reply and advance the workflow.
    pub async fn handle_reviewer_reply(&self, review_session_id: &str) -> BrainResult<ReviewOutcome> {
        let Some(brain_session_id) = self.resolve_review_session(review_session_id).await? else {
            return Ok(ReviewOutcome::Unrelated);
        };
        let id = brain_session_id.clone();
        let running = self
            .inner
            .db
            .call(move |db| db.running_execution(&id))
            .await?;
        let Some(execution) = running else {
            tracing::debug!(brain_session_id = %brain_session_id, "No running execution, ignoring reviewer reply");
            return Ok(ReviewOutcome::Unrelated);
        };

        let messages = self.read_messages(review_session_id).await?;
        let rounds = segment(&messages, &self.inner.classifier);
        let Some(last) = rounds
            .last()
            .filter(|r| !r.agent_replies.is_empty() && answers_execution(r, &execution))
        else {
            return Ok(ReviewOutcome::AwaitingReply);
        };
        let reply = last.ai_summary();

        let exec_id = execution.id.clone();
        let progress = progress_entries(last);
        self.inner
            .db
            .call(move |db| db.append_progress(&exec_id, &progress))
            .await?;

        let session = self.load_session(&brain_session_id).await?;
        self.set_phase(&session.main_session_id, SyncPhase::DispatchingResult);
        let outcome = self.dispatch_reply(&session, &execution, &reply).await;
        if !matches!(
            outcome,
            Ok(ReviewOutcome::Advanced {
                next_execution_id: Some(_),
                ..
            })
        ) {
            self.set_phase(&session.main_session_id, SyncPhase::Idle);
        }
        outcome
    }

    async fn dispatch_reply(
        &self,
        session: &BrainSession,
        execution: &Execution,
        reply: &str,
    ) -> BrainResult<ReviewOutcome> {
        let snapshot = truncate_chars(reply, self.inner.settings.result_snapshot_chars);
        let parsed = self
            .inner
            .parser
            .parse(reply, allowed_signals(session.state));

        let transition = parsed.as_ref().and_then(|p| {
            self.inner
                .machine
                .apply(session.state, &session.context, p.signal, p.detail.as_deref())
                .map_err(|e| tracing::warn!(brain_session_id = %session.id, error = %e, "Signal rejected"))
                .ok()
        });

        let Some(transition) = transition else {
            self.finish(&execution.id, &snapshot).await?;
            self.notify(StatusEvent::Done {
                brain_session_id: session.id.clone(),
                execution_id: execution.id.clone(),
                status: ExecutionStatus::Completed,
                state: session.state,
                signal: None,
                note: Some(NO_CLEAR_OUTCOME.to_string()),
            });
            tracing::warn!(
                brain_session_id = %session.id,
                execution_id = %execution.id,
                state = %session.state,
                "Reviewer reply carried no usable signal"
            );
            return Ok(ReviewOutcome::NoClearOutcome {
                execution_id: execution.id.clone(),
            });
        };

        self.persist_transition(&session.id, &transition).await?;
        self.finish(&execution.id, &snapshot).await?;
        self.notify(StatusEvent::Done {
            brain_session_id: session.id.clone(),
            execution_id: execution.id.clone(),
            status: ExecutionStatus::Completed,
            state: transition.to,
            signal: Some(transition.signal),
            note: transition.forced.then(|| "retry budget exhausted".to_string()),
        });

        let relay = (transition.to == WorkflowState::Developing && transition.changed_state())
            || transition.signal == Signal::Waiting;
        if relay {
            self.send_to_main(
                &session.main_session_id,
                &render_relay(reply, Some(transition.signal)),
            )
            .await;
        }

        if transition.to.is_terminal() {
            self.send_to_main(
                &session.main_session_id,
                &render_completion_notice(&transition.context),
            )
            .await;
            let id = session.id.clone();
            self.inner
                .db
                .call(move |db| db.update_status(&id, BrainSessionStatus::Completed, Some(&snapshot)))
                .await?;
            tracing::info!(
                brain_session_id = %session.id,
                failed = transition.context.failed_completion,
                "Workflow complete"
            );
        }

        let mut next_execution_id = None;
        if transition.changed_state() && transition.to.requires_unprompted_action() {
            let next = self.trigger_review_cycle(&session.id, Vec::new()).await?;
            next_execution_id = Some(next.id);
        }

        Ok(ReviewOutcome::Advanced {
            execution_id: execution.id.clone(),
            transition,
            next_execution_id,
        })
    }

    async fn finish(&self, execution_id: &str, result: &str) -> BrainResult<()> {
        let id = execution_id.to_string();
        let result = result.to_string();
        let finished = self
            .inner
            .db
            .call(move |db| db.finish_execution(&id, ExecutionStatus::Completed, Some(&result)))
            .await?;
        if !finished {
            tracing::debug!(execution_id, "Execution was no longer running");
        }
        Ok(())
    }

    /// Append a user message tagged as coming from the reviewer. Best effort:
    /// the workflow state is already persisted.
    async fn send_to_main(&self, main_session_id: &str, text: &str) {
        let content = json!({
            "role": "user",
            "content": {"type": "text", "text": text},
            "meta": {"sentFrom": self.inner.classifier.review_origin()},
        });
        if let Err(e) = self
            .inner
            .collaborators
            .messages
            .append_message(main_session_id, content)
            .await
        {
            tracing::warn!(main_session_id, error = %e, "Failed to relay message to main session");
        }
    }
}

/// A reviewer round answers an execution only if it began after the
/// execution was started or was opened by that execution's instruction.
/// Older rounds are replies to a previous cycle.
fn answers_execution(round: &DialogueRound, execution: &Execution) -> bool {
    if round.user_input.trim() == execution.prompt.trim() {
        return true;
    }
    DateTime::parse_from_rfc3339(&execution.created_at)
        .map(|created| round.started_at >= created.with_timezone(&Utc))
        .unwrap_or(false)
}

fn review_key(review_session_id: &str) -> String {
    format!("review:{}", review_session_id)
}

fn progress_entries(round: &DialogueRound) -> Vec<ProgressEntry> {
    round
        .activity
        .iter()
        .map(|activity| match activity {
            RoundActivity::Text(text) => ProgressEntry::new(ProgressKind::AssistantText, text.clone()),
            RoundActivity::ToolUse { name, input } => ProgressEntry::new(
                ProgressKind::ToolUse,
                match input {
                    Some(input) => format!("{} {}", name, truncate_chars(input, 500)),
                    None => name.clone(),
                },
            ),
            RoundActivity::ToolResult(text) => {
                ProgressEntry::new(ProgressKind::ToolResult, truncate_chars(text, 2000))
            }
        })
        .collect()
}
