//! Semicolon-delimited org-chart roster parsing.

use csv::{ReaderBuilder, Trim};

use crate::error::IngestError;
use crate::users::model::{Role, normalize_email};

/// Columns every roster must have. `location` and `managerEmail` are optional.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "name",
    "company",
    "jobTitle",
    "department",
    "access",
    "relationshipType",
    "accessTypes",
    "email",
    "status",
    "role",
];

/// One data row. `row` is the 1-based line number with the header as row 1.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterRow {
    pub row: usize,
    pub email: String,
    pub name: String,
    pub company: String,
    pub job_title: String,
    pub department: String,
    pub access_areas: Vec<String>,
    pub relationship_type: String,
    pub access_types: Vec<String>,
    pub location: String,
    pub status: String,
    pub role: Role,
    pub manager_email: String,
}

/// Split a multi-value cell on `;` and `,`, dropping blanks.
pub fn split_list(cell: &str) -> Vec<String> {
    cell.replace('"', "")
        .split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn header_key(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_string()
}

/// Parse decoded roster text. Rows with fewer cells than the header are
/// accepted; missing cells read as empty.
pub fn parse(text: &str) -> Result<Vec<RosterRow>, IngestError> {
    if text.trim().is_empty() {
        return Err(IngestError::Empty);
    }
    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| IngestError::Csv(e.to_string()))?
        .iter()
        .map(header_key)
        .collect();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing));
    }
    let idx = |name: &str| headers.iter().position(|h| h == name);

    let (name_i, company_i, job_i, dept_i, access_i, rel_i, types_i) = (
        idx("name"),
        idx("company"),
        idx("jobTitle"),
        idx("department"),
        idx("access"),
        idx("relationshipType"),
        idx("accessTypes"),
    );
    let (loc_i, email_i, status_i, role_i, manager_i) = (
        idx("location"),
        idx("email"),
        idx("status"),
        idx("role"),
        idx("managerEmail"),
    );

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| IngestError::Csv(e.to_string()))?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let cell = |i: Option<usize>| {
            i.and_then(|i| record.get(i))
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        rows.push(RosterRow {
            row: i + 2,
            email: normalize_email(&cell(email_i)),
            name: cell(name_i),
            company: cell(company_i),
            job_title: cell(job_i),
            department: cell(dept_i),
            access_areas: split_list(&cell(access_i)),
            relationship_type: cell(rel_i),
            access_types: split_list(&cell(types_i)),
            location: cell(loc_i),
            status: cell(status_i),
            role: if cell(role_i).eq_ignore_ascii_case("admin") {
                Role::Admin
            } else {
                Role::User
            },
            manager_email: normalize_email(&cell(manager_i)),
        });
    }
    Ok(rows)
}
