//! Error types for EKS.

/// Top-level error type for the service and the CLI.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),

    #[error("Org chart error: {0}")]
    OrgChart(#[from] OrgChartError),

    #[error("Invalid request: {0}")]
    Validation(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors, shared by the libSQL and Neo4j backends.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Authentication and account errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("The bootstrap administrator cannot change its password")]
    BootstrapAccount,

    #[error("Password must be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("A user with email {0} already exists")]
    EmailTaken(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// CSV org-chart ingestion errors. Row-level problems are reported, not raised.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("CSV file is empty")]
    Empty,

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("CSV parse error: {0}")]
    Csv(String),

    #[error("File is larger than {limit_mb} MB")]
    TooLarge { limit_mb: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Onboarding session errors.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("Unknown onboarding step: {0}")]
    UnknownStep(String),

    #[error("Onboarding has not been started")]
    NotStarted,

    #[error("Onboarding is missing required answer: {0}")]
    MissingAnswer(&'static str),
}

/// Org-chart position errors.
#[derive(Debug, thiserror::Error)]
pub enum OrgChartError {
    #[error("No org-chart position for {0}")]
    PositionNotFound(String),

    #[error("Issue description must not be empty")]
    EmptyReport,

    #[error("{0}")]
    Backend(String),
}

/// Result type alias for EKS.
pub type Result<T> = std::result::Result<T, Error>;
