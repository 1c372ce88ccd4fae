//! Authentication: password hashing, JWT issuance and the extractors that
//! guard every other router.

pub mod extract;
pub mod jwt;
pub mod password;
pub mod routes;
pub mod service;

pub use extract::{AdminUser, AuthUser};
pub use jwt::{BOOTSTRAP_USER_ID, Principal, TokenIssuer, TokenKind, TokenPair};
pub use password::PasswordHasher;
pub use routes::{AuthRouteState, auth_routes};
pub use service::{AuthService, LoginResponse, Me};
