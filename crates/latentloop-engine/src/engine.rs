use std::collections::HashMap;
use std::sync::{Arc, Mutex, TryLockError};

use anyhow::{anyhow, bail, Result};
use image::RgbImage;
use latentloop_contracts::chat::{parse_feedback, parse_inbound, FeedbackKind, Inbound, Notice};
use latentloop_contracts::config::SearchConfig;
use latentloop_contracts::events::{now_utc_iso, EventPayload, EventScope, EventWriter};
use latentloop_contracts::models::{ModelSelectionError, ModelSelector};
use latentloop_contracts::runs::summary::{RevealedPick, SessionSummary};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};

use crate::grid::{compose_grid, GridLayout};
use crate::providers::{seed_fingerprint, InferenceProviderRegistry};
use crate::render::CandidateRenderer;
use crate::reseed::ReseedingStrategy;
use crate::session::{
    Candidate, FeedbackRecord, RevealLabel, Session, SessionEvent, SessionState,
};
use crate::store::SessionStore;

/// What the engine hands back to the transport for one inbound message.
pub enum Reply {
    Notice(Notice),
    Grid {
        session_id: String,
        stage: u32,
        image: RgbImage,
    },
    Reveal {
        session_id: String,
        label: RevealLabel,
        record: FeedbackRecord,
    },
    Finished(SessionSummary),
}

impl Reply {
    pub fn notice(&self) -> Option<&Notice> {
        match self {
            Reply::Notice(notice) => Some(notice),
            _ => None,
        }
    }
}

impl From<Notice> for Reply {
    fn from(notice: Notice) -> Self {
        Reply::Notice(notice)
    }
}

/// Runs every user's search session.
///
/// Messages for different users proceed in parallel. Messages for one user
/// are serialized by a per-user lock taken with `try_lock`, so a message
/// that arrives while that user's round is rendering is answered with
/// `GenerationInProgress` and leaves the session alone.
pub struct SearchEngine {
    config: SearchConfig,
    layout: GridLayout,
    reseeder: ReseedingStrategy,
    renderer: CandidateRenderer,
    selector: ModelSelector,
    providers: InferenceProviderRegistry,
    store: Arc<dyn SessionStore>,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    rng: Mutex<StdRng>,
    events: EventWriter,
}

impl SearchEngine {
    pub fn new(
        config: SearchConfig,
        providers: InferenceProviderRegistry,
        store: Arc<dyn SessionStore>,
        events: EventWriter,
    ) -> Result<Self> {
        config.validate()?;
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let engine = Self {
            layout: GridLayout::from_config(&config),
            reseeder: ReseedingStrategy::new(config.rows, config.cols, config.score_basic),
            renderer: CandidateRenderer::new(config.render.clone()),
            selector: ModelSelector::new(config.model_registry()),
            providers,
            store,
            user_locks: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
            events,
            config,
        };

        engine.events.emit(
            "service_started",
            map_object(json!({
                "rows": engine.config.rows,
                "cols": engine.config.cols,
                "stages_total": engine.config.stages_total,
                "score_basic": engine.config.score_basic,
                "providers": engine.providers.names(),
                "models": engine.selector.registry.names(),
            })),
        )?;
        Ok(engine)
    }

    /// Snapshot of a user's stored session, for inspection.
    pub fn session(&self, user_id: &str) -> Result<Option<Session>> {
        self.store.get(user_id)
    }

    pub fn handle_text(&self, user_id: &str, text: &str) -> Result<Vec<Reply>> {
        self.handle(user_id, parse_inbound(text))
    }

    pub fn handle(&self, user_id: &str, inbound: Inbound) -> Result<Vec<Reply>> {
        let lock = self.user_lock(user_id)?;
        let outcome = self.handle_exclusive(user_id, &lock, inbound);
        self.release_user_lock(user_id, lock)?;
        outcome
    }

    fn handle_exclusive(
        &self,
        user_id: &str,
        lock: &Mutex<()>,
        inbound: Inbound,
    ) -> Result<Vec<Reply>> {
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                self.emit_user("message_deferred", user_id, json!({}))?;
                return Ok(vec![Notice::GenerationInProgress.into()]);
            }
            Err(TryLockError::Poisoned(_)) => bail!("session lock poisoned for user {user_id}"),
        };

        match self.store.get(user_id)? {
            None => self.handle_idle(user_id, inbound),
            Some(session) => self.handle_active(user_id, session, inbound),
        }
    }

    fn user_lock(&self, user_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .user_locks
            .lock()
            .map_err(|_| anyhow!("user lock table poisoned"))?;
        Ok(Arc::clone(locks.entry(user_id.to_string()).or_default()))
    }

    /// Drops the user's lock entry once no other message holds or waits on
    /// it. The table only ever tracks users with a message in flight.
    fn release_user_lock(&self, user_id: &str, lock: Arc<Mutex<()>>) -> Result<()> {
        let mut locks = self
            .user_locks
            .lock()
            .map_err(|_| anyhow!("user lock table poisoned"))?;
        let tracked = locks
            .get(user_id)
            .is_some_and(|held| Arc::ptr_eq(held, &lock));
        // the table's copy plus ours
        if tracked && Arc::strong_count(&lock) == 2 {
            locks.remove(user_id);
        }
        // Released under the table lock so the next releaser sees our count gone.
        drop(lock);
        Ok(())
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.user_locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    fn handle_idle(&self, user_id: &str, inbound: Inbound) -> Result<Vec<Reply>> {
        let replies = match inbound {
            Inbound::Noop => Vec::new(),
            Inbound::Start | Inbound::Restart => vec![Notice::Welcome.into(), self.menu()],
            Inbound::Help => vec![Notice::Help.into()],
            Inbound::Models | Inbound::Cancel => vec![self.menu()],
            Inbound::SelectModel(name) => return self.select_model(user_id, &name),
            Inbound::Unknown { .. } | Inbound::Text(_) => {
                vec![Notice::Unrecognized.into(), self.menu()]
            }
        };
        Ok(replies)
    }

    fn handle_active(&self, user_id: &str, session: Session, inbound: Inbound) -> Result<Vec<Reply>> {
        let Some(kind) = session.feedback_kind() else {
            bail!(
                "session {} for user {user_id} was stored in state {:?}",
                session.id,
                session.state()
            );
        };
        let ask = Notice::AskFeedback {
            kind,
            candidates: session.candidates().len(),
        };

        match inbound {
            Inbound::Noop => Ok(Vec::new()),
            Inbound::Help => Ok(vec![Notice::Help.into(), ask.into()]),
            Inbound::Cancel => self.cancel(user_id, session, false),
            Inbound::Restart => self.cancel(user_id, session, true),
            Inbound::Text(text) => self.submit_feedback(user_id, session, kind, &text),
            Inbound::Start
            | Inbound::Models
            | Inbound::SelectModel(_)
            | Inbound::Unknown { .. } => Ok(vec![ask.into()]),
        }
    }

    fn select_model(&self, user_id: &str, name: &str) -> Result<Vec<Reply>> {
        let spec = match self
            .selector
            .select(name, |provider| self.providers.contains(provider))
        {
            Ok(spec) => spec,
            Err(ModelSelectionError::Unknown(model)) => {
                return Ok(vec![Notice::UnknownModel { model }.into(), self.menu()]);
            }
            Err(ModelSelectionError::Unsupported(model)) => {
                self.emit_user("model_unsupported", user_id, json!({ "model": model }))?;
                return Ok(vec![Notice::UnsupportedModel { model }.into()]);
            }
        };

        let mut session = Session::new(&spec);
        self.emit_for(
            "session_started",
            user_id,
            &session,
            json!({ "seed_dimension": session.seed_dimension }),
        )?;
        let mut replies = vec![Notice::ModelSelected {
            model: spec.name.clone(),
        }
        .into()];
        replies.extend(self.start_round(user_id, &mut session)?);
        self.persist(user_id, session)?;
        Ok(replies)
    }

    fn start_round(&self, user_id: &str, session: &mut Session) -> Result<Vec<Reply>> {
        let stage = session.advance_stage();
        if stage > self.config.stages_total {
            return self.terminate(user_id, session);
        }
        session.apply(SessionEvent::RoundStarted)?;
        self.emit_for("round_started", user_id, session, json!({}))?;

        let seeds = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| anyhow!("random source lock poisoned"))?;
            self.reseeder
                .next_seeds(stage, session.attractive(), session.seed_dimension, &mut *rng)?
        };
        let provider = self.providers.get(&session.provider).ok_or_else(|| {
            anyhow!(
                "no inference provider registered for '{}'",
                session.provider
            )
        })?;

        let mut candidates = Vec::with_capacity(seeds.len());
        let mut failures = 0usize;
        for (offset, seed) in seeds.into_iter().enumerate() {
            let index = offset + 1;
            let outcome = self.renderer.render(provider, &session.model, &seed, index);
            match &outcome.failure {
                Some(error) => {
                    failures += 1;
                    self.emit_for(
                        "candidate_failed",
                        user_id,
                        session,
                        json!({
                            "index": index,
                            "seed": seed_fingerprint(&seed),
                            "error": error,
                        }),
                    )?;
                }
                None => self.emit_for(
                    "candidate_rendered",
                    user_id,
                    session,
                    json!({
                        "index": index,
                        "seed": seed_fingerprint(&seed),
                        "width": outcome.image.width(),
                        "height": outcome.image.height(),
                    }),
                )?,
            }
            candidates.push(Candidate {
                index,
                seed,
                image: outcome.image,
                score: None,
            });
        }

        let grid = compose_grid(candidates.iter().map(|c| &c.image), &self.layout)?;
        session.install_round(candidates, self.layout.cells())?;
        session.apply(SessionEvent::RoundPresented)?;
        self.emit_for(
            "grid_composed",
            user_id,
            session,
            json!({
                "width": grid.width(),
                "height": grid.height(),
                "failures": failures,
            }),
        )?;

        Ok(vec![
            Notice::RoundReady {
                stage,
                stages_total: self.config.stages_total,
            }
            .into(),
            Reply::Grid {
                session_id: session.id.clone(),
                stage,
                image: grid,
            },
            Notice::AskFeedback {
                kind: FeedbackKind::Attractive,
                candidates: self.layout.cells(),
            }
            .into(),
        ])
    }

    fn submit_feedback(
        &self,
        user_id: &str,
        mut session: Session,
        kind: FeedbackKind,
        text: &str,
    ) -> Result<Vec<Reply>> {
        let candidates = session.candidates().len();
        let parsed = parse_feedback(text, candidates)
            .and_then(|feedback| session.record_feedback(kind, feedback));
        let record = match parsed {
            Ok(record) => record,
            Err(err) => {
                self.emit_for(
                    "feedback_rejected",
                    user_id,
                    &session,
                    json!({
                        "kind": kind_label(kind),
                        "text": text,
                        "reason": err.to_string(),
                    }),
                )?;
                return Ok(vec![Notice::InvalidFeedback {
                    kind,
                    reason: err.to_string(),
                }
                .into()]);
            }
        };

        self.emit_for(
            "feedback_recorded",
            user_id,
            &session,
            json!({
                "kind": kind_label(kind),
                "index": record.index,
                "score": record.score,
                "seed": seed_fingerprint(&record.seed),
            }),
        )?;

        let replies = match kind {
            FeedbackKind::Attractive => {
                session.apply(SessionEvent::AttractiveScored)?;
                vec![Notice::AskFeedback {
                    kind: FeedbackKind::Unattractive,
                    candidates,
                }
                .into()]
            }
            FeedbackKind::Unattractive => self.start_round(user_id, &mut session)?,
        };
        self.persist(user_id, session)?;
        Ok(replies)
    }

    fn cancel(&self, user_id: &str, mut session: Session, restart: bool) -> Result<Vec<Reply>> {
        session.apply(SessionEvent::Cancelled)?;
        self.store.delete(user_id)?;
        self.emit_for(
            "session_cancelled",
            user_id,
            &session,
            json!({ "restart": restart }),
        )?;

        let mut replies = vec![Notice::Cancelled.into()];
        if restart {
            replies.push(Notice::Welcome.into());
        }
        replies.push(self.menu());
        Ok(replies)
    }

    fn terminate(&self, user_id: &str, session: &mut Session) -> Result<Vec<Reply>> {
        session.apply(SessionEvent::StagesExhausted)?;

        let mut replies = Vec::new();
        let mut picks = Vec::new();
        for (label, record) in session.reveal(self.config.stages_total) {
            picks.push(RevealedPick {
                label: label.to_string(),
                stage: record.stage,
                index: record.index,
                score: record.score,
                seed_fingerprint: seed_fingerprint(&record.seed),
                image_file: None,
            });
            replies.push(Reply::Reveal {
                session_id: session.id.clone(),
                label,
                record: record.clone(),
            });
        }

        let summary = SessionSummary {
            session_id: session.id.clone(),
            user_id: user_id.to_string(),
            model: session.model.clone(),
            started_at: session.started_at.clone(),
            finished_at: now_utc_iso(),
            stages_total: self.config.stages_total,
            rounds_completed: session.attractive().len() as u32,
            picks,
        };
        self.emit_for(
            "session_terminated",
            user_id,
            session,
            json!({
                "rounds_completed": summary.rounds_completed,
                "picks": serde_json::to_value(&summary.picks)?,
            }),
        )?;

        replies.push(Reply::Finished(summary));
        replies.push(Notice::Finished.into());
        replies.push(self.menu());
        Ok(replies)
    }

    fn persist(&self, user_id: &str, session: Session) -> Result<()> {
        match session.state() {
            SessionState::Terminated | SessionState::Idle => {
                self.store.delete(user_id)?;
            }
            _ => self.store.put(user_id, session)?,
        }
        Ok(())
    }

    fn menu(&self) -> Reply {
        Notice::ModelMenu {
            models: self.selector.registry.names(),
        }
        .into()
    }

    fn emit_user(&self, event_type: &str, user_id: &str, extra: Value) -> Result<()> {
        self.events
            .emit_scoped(event_type, &EventScope::user(user_id), map_object(extra))?;
        Ok(())
    }

    fn emit_for(&self, event_type: &str, user_id: &str, session: &Session, extra: Value) -> Result<()> {
        let scope = EventScope::session(user_id, &session.id, &session.model, session.stage());
        self.events
            .emit_scoped(event_type, &scope, map_object(extra))?;
        Ok(())
    }
}

fn kind_label(kind: FeedbackKind) -> &'static str {
    match kind {
        FeedbackKind::Attractive => "attractive",
        FeedbackKind::Unattractive => "unattractive",
    }
}

fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}
