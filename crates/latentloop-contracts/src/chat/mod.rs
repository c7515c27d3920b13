mod command_registry;
mod feedback_parser;
mod inbound_parser;
mod notices;

pub use command_registry::CHAT_HELP_COMMANDS;
pub use feedback_parser::{parse_feedback, Feedback, FeedbackError, MAX_SCORE, MIN_SCORE};
pub use inbound_parser::{parse_inbound, Inbound};
pub use notices::{FeedbackKind, Notice};
