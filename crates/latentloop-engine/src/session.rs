use std::fmt;

use image::RgbImage;
use latentloop_contracts::chat::{Feedback, FeedbackError, FeedbackKind};
use latentloop_contracts::events::now_utc_iso;
use latentloop_contracts::models::ModelSpec;
use thiserror::Error;

use crate::reseed::SeedVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Rendering,
    AwaitingAttractiveFeedback,
    AwaitingUnattractiveFeedback,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    RoundStarted,
    RoundPresented,
    AttractiveScored,
    StagesExhausted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal session transition: {event:?} while {from:?}")]
pub struct TransitionError {
    pub from: SessionState,
    pub event: SessionEvent,
}

/// The complete transition table; every pair not listed is rejected.
pub fn transition(from: SessionState, event: SessionEvent) -> Result<SessionState, TransitionError> {
    use SessionEvent as E;
    use SessionState as S;

    let to = match (from, event) {
        (S::Idle, E::RoundStarted) => S::Rendering,
        (S::AwaitingUnattractiveFeedback, E::RoundStarted) => S::Rendering,
        (S::Rendering, E::RoundPresented) => S::AwaitingAttractiveFeedback,
        (S::AwaitingAttractiveFeedback, E::AttractiveScored) => S::AwaitingUnattractiveFeedback,
        (S::Idle, E::StagesExhausted) => S::Terminated,
        (S::AwaitingUnattractiveFeedback, E::StagesExhausted) => S::Terminated,
        (S::AwaitingAttractiveFeedback, E::Cancelled) => S::Idle,
        (S::AwaitingUnattractiveFeedback, E::Cancelled) => S::Idle,
        _ => return Err(TransitionError { from, event }),
    };
    Ok(to)
}

#[derive(Clone)]
pub struct Candidate {
    pub index: usize,
    pub seed: SeedVector,
    pub image: RgbImage,
    pub score: Option<u8>,
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("index", &self.index)
            .field("seed_len", &self.seed.len())
            .field("image", &self.image.dimensions())
            .field("score", &self.score)
            .finish()
    }
}

#[derive(Clone)]
pub struct FeedbackRecord {
    pub stage: u32,
    pub index: usize,
    pub seed: SeedVector,
    pub image: RgbImage,
    pub score: u8,
}

impl fmt::Debug for FeedbackRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackRecord")
            .field("stage", &self.stage)
            .field("index", &self.index)
            .field("seed_len", &self.seed.len())
            .field("image", &self.image.dimensions())
            .field("score", &self.score)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoundError {
    #[error("round has {actual} candidates, expected {expected}")]
    CandidateCount { expected: usize, actual: usize },
    #[error("candidate {index} seed has {actual} values, expected {expected}")]
    SeedDimension {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Per-user search state. Fields are public for inspection; mutation goes
/// through the methods so the transition table and history invariants hold.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub seed_dimension: usize,
    pub started_at: String,
    state: SessionState,
    stage: u32,
    candidates: Vec<Candidate>,
    attractive: Vec<FeedbackRecord>,
    unattractive: Vec<FeedbackRecord>,
}

impl Session {
    pub fn new(model: &ModelSpec) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model: model.name.clone(),
            provider: model.provider.clone(),
            seed_dimension: model.seed_dimension,
            started_at: now_utc_iso(),
            state: SessionState::Idle,
            stage: 0,
            candidates: Vec::new(),
            attractive: Vec::new(),
            unattractive: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stage(&self) -> u32 {
        self.stage
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn attractive(&self) -> &[FeedbackRecord] {
        &self.attractive
    }

    pub fn unattractive(&self) -> &[FeedbackRecord] {
        &self.unattractive
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        self.state = transition(self.state, event)?;
        Ok(self.state)
    }

    /// Which reply the session is waiting for, if any.
    pub fn feedback_kind(&self) -> Option<FeedbackKind> {
        match self.state {
            SessionState::AwaitingAttractiveFeedback => Some(FeedbackKind::Attractive),
            SessionState::AwaitingUnattractiveFeedback => Some(FeedbackKind::Unattractive),
            _ => None,
        }
    }

    pub(crate) fn advance_stage(&mut self) -> u32 {
        self.stage += 1;
        self.stage
    }

    pub(crate) fn install_round(
        &mut self,
        candidates: Vec<Candidate>,
        expected: usize,
    ) -> Result<(), RoundError> {
        if candidates.len() != expected {
            return Err(RoundError::CandidateCount {
                expected,
                actual: candidates.len(),
            });
        }
        if let Some(bad) = candidates
            .iter()
            .find(|candidate| candidate.seed.len() != self.seed_dimension)
        {
            return Err(RoundError::SeedDimension {
                index: bad.index,
                expected: self.seed_dimension,
                actual: bad.seed.len(),
            });
        }
        self.candidates = candidates;
        Ok(())
    }

    /// Scores one candidate of the current round and appends it to the
    /// history matching `kind`. A candidate is scored at most once.
    pub(crate) fn record_feedback(
        &mut self,
        kind: FeedbackKind,
        feedback: Feedback,
    ) -> Result<FeedbackRecord, FeedbackError> {
        let stage = self.stage;
        let candidates = self.candidates.len();
        let candidate = feedback
            .index
            .checked_sub(1)
            .and_then(|offset| self.candidates.get_mut(offset))
            .ok_or(FeedbackError::IndexOutOfRange { candidates })?;
        if candidate.score.is_some() {
            return Err(FeedbackError::AlreadyScored {
                index: feedback.index,
            });
        }
        candidate.score = Some(feedback.score);
        let record = FeedbackRecord {
            stage,
            index: candidate.index,
            seed: candidate.seed.clone(),
            image: candidate.image.clone(),
            score: feedback.score,
        };
        match kind {
            FeedbackKind::Attractive => self.attractive.push(record.clone()),
            FeedbackKind::Unattractive => self.unattractive.push(record.clone()),
        }
        Ok(record)
    }

    /// Favorites revealed at the end: the first, the second, and the one
    /// from round `stages_total`. Missing or repeated positions are skipped.
    pub fn reveal(&self, stages_total: u32) -> Vec<(RevealLabel, &FeedbackRecord)> {
        let positions = [
            (RevealLabel::FirstFavorite, 0usize),
            (RevealLabel::SecondFavorite, 1),
            (
                RevealLabel::FinalFavorite,
                (stages_total as usize).saturating_sub(1),
            ),
        ];
        let mut taken = Vec::new();
        let mut out = Vec::new();
        for (label, position) in positions {
            if taken.contains(&position) {
                continue;
            }
            if let Some(record) = self.attractive.get(position) {
                taken.push(position);
                out.push((label, record));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealLabel {
    FirstFavorite,
    SecondFavorite,
    FinalFavorite,
}

impl fmt::Display for RevealLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevealLabel::FirstFavorite => write!(f, "first favorite"),
            RevealLabel::SecondFavorite => write!(f, "second favorite"),
            RevealLabel::FinalFavorite => write!(f, "final favorite"),
        }
    }
}
