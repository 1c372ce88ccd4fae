//! First-run onboarding wizard.
//!
//! The wizard walks a user through a fixed sequence of steps, collecting
//! answers into a session that is persisted per user. Completing it writes
//! a FirstRunOnboarding, an AI profile, a new persona version and the
//! declared competencies to the graph.

pub mod manager;
pub mod model;
pub mod persona;
pub mod routes;
pub mod state;

pub use manager::{Completion, OnboardingManager, SessionAction, StatusView};
pub use model::{FirstRunOnboarding, OnboardingResponses, Prefill, ResponseUpdate};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use state::{OnboardingSession, OnboardingStatus, OnboardingStep};
