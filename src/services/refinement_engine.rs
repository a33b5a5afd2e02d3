//! Refinement engine.
//!
//! Owns one refinement session from the initial draft to its terminal
//! outcome. Each round:
//!
//! - **EVALUATE** -- full cascading panel evaluation and aggregation.
//! - **CONTROL** -- budget, acceptance, plateau and oscillation checks.
//! - **ROUTE** -- pick accept, minor refine, major refine, reject or escalate.
//! - **FIX** -- targeted fix or regeneration, verified before it is kept.
//! - **RECORD** -- append the round to the iteration log.
//!
//! A session is an explicit value threaded through the loop, never shared
//! state, so any number of sessions may run concurrently on one engine.
//! Each round runs against a working copy that replaces the session only
//! once the round completes; a deadline or cancellation therefore always
//! leaves the last fully verified content in place.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::convergence_controller::{ConvergenceController, LoopControl};
use super::fix_executor::{FixMode, FixRequest, TargetedFixExecutor};
use super::judge_panel::JudgePanel;
use super::router::{RefinementRouter, RoutingContext};
use crate::domain::errors::{DomainResult, RefinementError};
use crate::domain::models::config::RefineryConfig;
use crate::domain::models::refinement::{
    AcceptReason, ActionKind, AggregatedVerdict, EscalationReason, FixStatus, HardLimit,
    IssueLedger, IterationLog, IterationRecord, LessonContent, QualityLock, RefinementAction,
    RefinementBudget, RefinementEvent, Reliability, Rubric, SessionOutcome, SessionReport,
    SessionState,
};
use crate::domain::ports::{
    ContentPipeline, EntailmentChecker, FixGenerator, JudgeService, LexicalEntailment,
};

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// External services a session drives.
#[derive(Clone)]
pub struct Collaborators {
    /// One to three judges in role order: cheap, primary, tiebreaker.
    pub judges: Vec<Arc<dyn JudgeService>>,
    pub fix_generator: Arc<dyn FixGenerator>,
    pub pipeline: Arc<dyn ContentPipeline>,
    /// Fix verifier; lexical entailment when unset.
    pub entailment: Option<Arc<dyn EntailmentChecker>>,
}

/// Run one refinement session to completion.
///
/// `rubric` replaces the rubric in `config`. The configuration is validated
/// before any model call is made.
pub async fn run_refinement_session(
    initial_content: LessonContent,
    rubric: Rubric,
    config: RefineryConfig,
    collaborators: Collaborators,
) -> DomainResult<SessionReport> {
    let config = RefineryConfig { rubric, ..config };
    RefinementEngine::new(collaborators, config)?
        .run_session(initial_content)
        .await
}

/// Mutable state of one session.
#[derive(Clone)]
struct Session {
    id: Uuid,
    state: SessionState,
    /// Last fully verified content.
    content: LessonContent,
    budget: RefinementBudget,
    log: IterationLog,
    ledger: IssueLedger,
    lock: QualityLock,
    /// Full-evaluation composites in round order.
    scores: Vec<f64>,
    last_verdict: Option<AggregatedVerdict>,
    rng: StdRng,
}

/// Runs refinement sessions against a fixed set of collaborators.
pub struct RefinementEngine {
    config: RefineryConfig,
    panel: JudgePanel,
    router: RefinementRouter,
    controller: ConvergenceController,
    fix_executor: TargetedFixExecutor,
    pipeline: Arc<dyn ContentPipeline>,
    events: broadcast::Sender<RefinementEvent>,
}

impl RefinementEngine {
    /// Build an engine. Fails on an invalid configuration or panel size.
    pub fn new(collaborators: Collaborators, config: RefineryConfig) -> DomainResult<Self> {
        config.validate()?;

        let Collaborators {
            judges,
            fix_generator,
            pipeline,
            entailment,
        } = collaborators;
        let entailment: Arc<dyn EntailmentChecker> =
            entailment.unwrap_or_else(|| Arc::new(LexicalEntailment::new()));

        let panel = JudgePanel::new(judges, config.rubric.clone(), config.aggregation.clone())?;
        let router = RefinementRouter::new(
            config.thresholds.clone(),
            &config.fix,
            config.aggregation.escalate_on_conflict,
        );
        let controller = ConvergenceController::new(
            config.convergence.clone(),
            config.thresholds.clone(),
            config.aggregation.escalate_on_conflict,
        );
        let fix_executor =
            TargetedFixExecutor::new(fix_generator, pipeline.clone(), entailment, config.fix.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            panel,
            router,
            controller,
            fix_executor,
            pipeline,
            events,
        })
    }

    pub fn config(&self) -> &RefineryConfig {
        &self.config
    }

    /// Subscribe to lifecycle events of every session run on this engine.
    pub fn subscribe(&self) -> broadcast::Receiver<RefinementEvent> {
        self.events.subscribe()
    }

    pub async fn run_session(&self, initial: LessonContent) -> DomainResult<SessionReport> {
        self.run_session_with_cancellation(initial, CancellationToken::new())
            .await
    }

    /// Run a session that stops between rounds once `cancel` fires.
    pub async fn run_session_with_cancellation(
        &self,
        initial: LessonContent,
        cancel: CancellationToken,
    ) -> DomainResult<SessionReport> {
        self.config.validate()?;

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.limits.max_elapsed();
        let rng = match self.config.fix.canary_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut session = Session {
            id: Uuid::new_v4(),
            state: SessionState::Evaluating,
            content: initial,
            budget: self.config.limits.budget(),
            log: IterationLog::new(),
            ledger: IssueLedger::new(),
            lock: QualityLock::new(
                self.config.fix.lock_threshold,
                self.config.fix.regression_tolerance,
            ),
            scores: Vec::new(),
            last_verdict: None,
            rng,
        };

        tracing::info!(
            session_id = %session.id,
            sections = session.content.sections.len(),
            judges = self.panel.len(),
            max_iterations = session.budget.max_iterations,
            "Starting refinement session"
        );
        self.emit(RefinementEvent::SessionStarted {
            session_id: session.id,
            sections: session.content.sections.len(),
            budget: session.budget.clone(),
            timestamp: Utc::now(),
        });

        let outcome = loop {
            // Let tasks woken by the previous round's events run before the
            // cancellation check.
            tokio::task::yield_now().await;
            if cancel.is_cancelled() {
                tracing::info!(session_id = %session.id, "Session cancelled between rounds");
                break SessionOutcome::Escalated {
                    reason: EscalationReason::Cancelled,
                };
            }

            session.budget.set_elapsed(started.elapsed());
            if let Some(limit) = session.budget.exhausted_limit() {
                break SessionOutcome::RejectedHardLimit { limit };
            }

            let mut working = session.clone();
            let recorded_before = working.log.len();
            let round = tokio::time::timeout_at(deadline, self.round(&mut working, started)).await;

            match round {
                Ok(result) => {
                    let terminal = result?;
                    session = working;
                    for record in &session.log.records()[recorded_before..] {
                        self.emit(RefinementEvent::IterationRecorded {
                            session_id: session.id,
                            record: record.clone(),
                            timestamp: Utc::now(),
                        });
                    }
                    if let Some(outcome) = terminal {
                        break outcome;
                    }
                }
                Err(_) => {
                    session.budget.set_elapsed(started.elapsed());
                    tracing::warn!(
                        session_id = %session.id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Session deadline hit mid-round; discarding the round"
                    );
                    let limit = session.budget.exhausted_limit().unwrap_or(HardLimit::ElapsedTime {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        max_ms: self.config.limits.max_elapsed().as_millis() as u64,
                    });
                    break SessionOutcome::RejectedHardLimit { limit };
                }
            }
        };

        if !session.state.is_terminal() {
            session.state = SessionState::Terminal;
        }
        session.budget.set_elapsed(started.elapsed());

        tracing::info!(
            session_id = %session.id,
            outcome = outcome.name(),
            detail = %outcome,
            iterations = session.budget.iterations_used,
            model_calls = session.budget.model_calls_used,
            tokens = session.budget.tokens_used,
            "Refinement session finished"
        );
        self.emit(RefinementEvent::SessionTerminated {
            session_id: session.id,
            outcome: outcome.clone(),
            iterations: session.budget.iterations_used,
            timestamp: Utc::now(),
        });

        Ok(SessionReport {
            session_id: session.id,
            final_content: session.content,
            outcome,
            iteration_log: session.log,
            issue_ledger: session.ledger,
            budget: session.budget,
            final_verdict: session.last_verdict,
        })
    }

    /// Run one round against `session`. Returns the terminal outcome when
    /// the round ends the session.
    async fn round(
        &self,
        session: &mut Session,
        started: Instant,
    ) -> DomainResult<Option<SessionOutcome>> {
        let round_start = Instant::now();
        let iteration = session.budget.iterations_used;

        // EVALUATE
        let evaluation = self
            .panel
            .evaluate(&session.content, session.budget.remaining_model_calls())
            .await;
        session
            .budget
            .consume_calls(evaluation.model_calls, evaluation.tokens_used);
        let mut round_calls = evaluation.model_calls;
        let mut round_tokens = evaluation.tokens_used;

        if evaluation.tiebreak_invoked {
            self.emit(RefinementEvent::TiebreakInvoked {
                session_id: session.id,
                iteration,
                timestamp: Utc::now(),
            });
        }

        let verdict = match self.panel.aggregator().aggregate(&evaluation) {
            Ok(verdict) => verdict,
            Err(err @ RefinementError::JudgeUnavailable { .. }) => {
                tracing::warn!(session_id = %session.id, iteration, error = %err, "No usable verdict");
                session.budget.consume_iteration();
                session.budget.set_elapsed(started.elapsed());
                session.log.push(IterationRecord {
                    iteration_index: iteration,
                    action: ActionKind::Escalate,
                    score_before: 0.0,
                    score_after: None,
                    elapsed_ms: elapsed_ms(round_start),
                    tokens_spent: round_tokens,
                    model_calls: round_calls,
                    reliability: Reliability::Low,
                    fix_status: None,
                    sections_touched: Vec::new(),
                    regressions: Vec::new(),
                });
                session.state = session.state.transition(SessionState::Terminal)?;
                return Ok(Some(SessionOutcome::Escalated {
                    reason: EscalationReason::JudgeUnavailable,
                }));
            }
            Err(err) => return Err(err),
        };

        session.budget.consume_iteration();
        session.budget.set_elapsed(started.elapsed());
        session
            .ledger
            .observe(&verdict.merged_issues, &verdict.responding_judges(), iteration);
        session.scores.push(verdict.composite_score);

        tracing::info!(
            session_id = %session.id,
            iteration,
            composite = verdict.composite_score,
            reliability = %verdict.reliability,
            agreement = verdict.overall_agreement,
            issues = verdict.merged_issues.len(),
            "Round evaluated"
        );
        self.emit(RefinementEvent::VerdictAggregated {
            session_id: session.id,
            iteration,
            composite: verdict.composite_score,
            reliability: verdict.reliability,
            judges_responded: verdict.judges_responded(),
            merged_issues: verdict.merged_issues.len(),
            timestamp: Utc::now(),
        });

        let regressions = session.lock.check(&verdict.criterion_scores);
        if !regressions.is_empty() {
            self.emit(RefinementEvent::RegressionDetected {
                session_id: session.id,
                iteration,
                regressions: regressions.clone(),
                timestamp: Utc::now(),
            });
        }

        let mut record = IterationRecord {
            iteration_index: iteration,
            action: ActionKind::Stop,
            score_before: verdict.composite_score,
            score_after: None,
            elapsed_ms: 0,
            tokens_spent: 0,
            model_calls: 0,
            reliability: verdict.reliability,
            fix_status: None,
            sections_touched: Vec::new(),
            regressions: regressions.clone(),
        };

        // CONTROL
        let control = self
            .controller
            .decide(&session.budget, &session.scores, &verdict, &regressions);
        if let LoopControl::Terminate(outcome) = control {
            record.action = match &outcome {
                SessionOutcome::Accepted { .. } => ActionKind::Accept,
                SessionOutcome::RejectedHardLimit { .. } => ActionKind::Stop,
                SessionOutcome::Escalated { .. } => ActionKind::Escalate,
            };
            if regressions.is_empty() {
                session.lock.confirm(&verdict.criterion_scores);
            }
            self.finish_record(session, record, round_start, round_calls, round_tokens);
            session.last_verdict = Some(verdict);
            session.state = session.state.transition(SessionState::Terminal)?;
            return Ok(Some(outcome));
        }

        // ROUTE
        let action = self.router.route(&RoutingContext {
            verdict: &verdict,
            history: &session.log,
            content: &session.content,
            regressions: &regressions,
        });
        record.action = action.kind();
        tracing::info!(session_id = %session.id, iteration, action = %action.kind(), "Action routed");
        self.emit(RefinementEvent::ActionRouted {
            session_id: session.id,
            iteration,
            action: action.kind(),
            timestamp: Utc::now(),
        });

        // FIX
        let terminal = match &action {
            RefinementAction::Accept => Some(SessionOutcome::Accepted {
                reason: AcceptReason::TargetReached,
                score: verdict.composite_score,
            }),
            RefinementAction::Escalate { reason } => Some(SessionOutcome::Escalated {
                reason: reason.clone(),
            }),
            RefinementAction::MinorRefine { recommendation }
            | RefinementAction::MajorRefine { recommendation } => {
                session.state = session.state.transition(SessionState::Fixing)?;
                let mode = if action.kind() == ActionKind::MajorRefine {
                    FixMode::Regenerate
                } else {
                    FixMode::Targeted
                };
                let request = FixRequest {
                    content: &session.content,
                    mode,
                    recommendation,
                    lock: &session.lock,
                    call_allowance: session.budget.remaining_model_calls(),
                };
                let outcome = self
                    .fix_executor
                    .execute(request, &self.panel, &mut session.rng)
                    .await;

                session.budget.consume_calls(outcome.model_calls, outcome.tokens_used);
                round_calls += outcome.model_calls;
                round_tokens += outcome.tokens_used;

                if let Some(reason) = &outcome.failure_reason {
                    tracing::warn!(
                        session_id = %session.id,
                        iteration,
                        reason = %reason,
                        "Fix not fully applied"
                    );
                }
                if !outcome.regressions.is_empty() {
                    self.emit(RefinementEvent::RegressionDetected {
                        session_id: session.id,
                        iteration,
                        regressions: outcome.regressions.clone(),
                        timestamp: Utc::now(),
                    });
                }
                self.emit(RefinementEvent::FixVerified {
                    session_id: session.id,
                    iteration,
                    status: outcome.status,
                    sections: outcome.sections_touched.clone(),
                    timestamp: Utc::now(),
                });

                session.ledger.mark_fixed(&outcome.fixed_issues, iteration);
                session.ledger.mark_superseded(&outcome.superseded_issues, iteration);
                if outcome.score_after.is_some() {
                    session.state = session.state.transition(SessionState::ReEvaluating)?;
                }
                session.content = outcome.content;
                record.score_after = outcome.score_after;
                record.fix_status = Some(outcome.status);
                record.sections_touched = outcome.sections_touched;
                record.regressions.extend(outcome.regressions);
                None
            }
            RefinementAction::Reject => {
                session.state = session.state.transition(SessionState::Fixing)?;
                let status = self
                    .regenerate_lesson(session, &mut round_calls, &mut round_tokens)
                    .await;
                if status == FixStatus::Regenerated {
                    session.ledger.supersede_all_open(iteration);
                    record.sections_touched = session.content.locators();
                }
                self.emit(RefinementEvent::FixVerified {
                    session_id: session.id,
                    iteration,
                    status,
                    sections: record.sections_touched.clone(),
                    timestamp: Utc::now(),
                });
                record.fix_status = Some(status);
                None
            }
        };

        if regressions.is_empty() {
            session.lock.confirm(&verdict.criterion_scores);
        }
        self.finish_record(session, record, round_start, round_calls, round_tokens);
        session.last_verdict = Some(verdict);

        let next = if terminal.is_some() {
            SessionState::Terminal
        } else {
            SessionState::Evaluating
        };
        session.state = session.state.transition(next)?;
        Ok(terminal)
    }

    /// Regenerate the whole lesson through the pipeline.
    async fn regenerate_lesson(
        &self,
        session: &mut Session,
        round_calls: &mut u32,
        round_tokens: &mut u64,
    ) -> FixStatus {
        if session.budget.remaining_model_calls() == 0 {
            tracing::warn!(session_id = %session.id, "No model calls left for regeneration");
            return FixStatus::Failed;
        }

        let result = self.pipeline.regenerate_lesson(&session.content).await;
        *round_calls += 1;
        match result {
            Ok(regenerated) => {
                session.budget.consume_calls(1, regenerated.tokens_used);
                *round_tokens += regenerated.tokens_used;
                session.content = regenerated.content;
                tracing::info!(session_id = %session.id, "Lesson regenerated");
                FixStatus::Regenerated
            }
            Err(err) => {
                session.budget.consume_calls(1, 0);
                tracing::warn!(session_id = %session.id, error = %err, "Lesson regeneration failed");
                FixStatus::Failed
            }
        }
    }

    fn finish_record(
        &self,
        session: &mut Session,
        mut record: IterationRecord,
        round_start: Instant,
        calls: u32,
        tokens: u64,
    ) {
        record.elapsed_ms = elapsed_ms(round_start);
        record.model_calls = calls;
        record.tokens_spent = tokens;
        tracing::debug!(
            session_id = %session.id,
            iteration = record.iteration_index,
            action = %record.action,
            fix_status = ?record.fix_status,
            elapsed_ms = record.elapsed_ms,
            "Iteration recorded"
        );
        session.log.push(record);
    }

    /// Log an event and publish it to subscribers.
    fn emit(&self, event: RefinementEvent) {
        if self.config.convergence.event_emission_enabled {
            tracing::info!(
                event_name = event.event_name(),
                session_id = %event.session_id(),
                "Refinement event: {}",
                event.event_name()
            );
        }
        if self.events.receiver_count() > 0 {
            // Lagging or departed receivers are not the session's concern.
            let _ = self.events.send(event);
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
