//! Interactive latent-space search: per-user sessions that render a grid of
//! candidates, take one favorite and one least-favorite per round, and
//! reseed the next round from the favorites.

pub mod engine;
pub mod grid;
pub mod providers;
pub mod render;
pub mod reseed;
pub mod session;
pub mod store;

pub use engine::{Reply, SearchEngine};
pub use grid::{compose_grid, GridError, GridLayout};
pub use providers::{
    default_provider_registry, seed_fingerprint, DryrunProvider, HttpInferenceProvider,
    InferenceProvider, InferenceProviderRegistry,
};
pub use render::{CandidateRenderer, RenderOutcome};
pub use reseed::{ReseedError, ReseedingStrategy, SeedVector};
pub use session::{
    Candidate, FeedbackRecord, RevealLabel, Session, SessionEvent, SessionState, TransitionError,
};
pub use store::{InMemorySessionStore, SessionStore};
