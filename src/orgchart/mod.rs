//! Org chart: manager/peer/report views and user validation of positions.

pub mod model;
pub mod routes;
pub mod validator;

pub use model::{OrgChartIssue, OrgChartView, PersonRef, Position};
pub use routes::{OrgChartRouteState, orgchart_routes};
pub use validator::{PositionBackend, PositionValidator, StorePositionBackend, ValidatorState};
