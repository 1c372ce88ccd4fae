//! User accounts: the model, admin operations and their routes.

pub mod model;
pub mod routes;
pub mod service;

pub use model::{OrganizationType, Role, User, normalize_email};
pub use routes::{UserRouteState, user_routes};
pub use service::{BulkResetReport, CreateUser, PasswordReset, UserService};
