//! Company profile and organization-wide structure.

pub mod model;
pub mod routes;

pub use model::{CompanyProfile, CompanyProfileUpdate, OrganizationalStructure, ProfileData};
pub use routes::{CompanyRouteState, company_routes};
