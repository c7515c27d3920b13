use std::fmt;

use super::command_registry::CHAT_HELP_COMMANDS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    Attractive,
    Unattractive,
}

/// Text replies produced by the session engine. Transports render them with
/// `Display`; the variants carry enough data for richer renderings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Welcome,
    Help,
    ModelMenu { models: Vec<String> },
    ModelSelected { model: String },
    UnknownModel { model: String },
    UnsupportedModel { model: String },
    RoundReady { stage: u32, stages_total: u32 },
    AskFeedback { kind: FeedbackKind, candidates: usize },
    InvalidFeedback { kind: FeedbackKind, reason: String },
    GenerationInProgress,
    Cancelled,
    Finished,
    Unrecognized,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Welcome => write!(
                f,
                "Welcome! Pick a model and rate the images until you reach the face you like."
            ),
            Notice::Help => write!(f, "Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
            Notice::ModelMenu { models } => {
                if models.is_empty() {
                    write!(f, "No models are configured.")
                } else {
                    write!(f, "Choose a model with /model <name>: {}", models.join(", "))
                }
            }
            Notice::ModelSelected { model } => write!(f, "Model {model} selected. Generating..."),
            Notice::UnknownModel { model } => write!(f, "There is no model called {model}."),
            Notice::UnsupportedModel { model } => {
                write!(f, "Model {model} is not available yet. Please choose another one.")
            }
            Notice::RoundReady {
                stage,
                stages_total,
            } => write!(f, "Round {stage} of {stages_total} is ready."),
            Notice::AskFeedback { kind, candidates } => {
                let which = match kind {
                    FeedbackKind::Attractive => "the image you like most",
                    FeedbackKind::Unattractive => "the image you like least",
                };
                write!(
                    f,
                    "Send the number of {which} (1-{candidates}) and a score from 1 to 10, e.g. \"5 8\"."
                )
            }
            Notice::InvalidFeedback { kind, reason } => {
                let which = match kind {
                    FeedbackKind::Attractive => "favorite",
                    FeedbackKind::Unattractive => "least favorite",
                };
                write!(f, "Could not read your {which}: {reason}. Try again.")
            }
            Notice::GenerationInProgress => {
                write!(f, "Images are still being generated, please wait.")
            }
            Notice::Cancelled => write!(f, "Search cancelled. Back to the main menu."),
            Notice::Finished => write!(f, "Search finished. Back to the main menu."),
            Notice::Unrecognized => write!(f, "Sorry, I did not understand that."),
        }
    }
}
