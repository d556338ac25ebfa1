/// Catalog identifiers (organizations, projects, suites, tests, schedules).
pub type DbId = i64;

/// Run identifiers are UUID v7 so they sort by creation time.
pub type RunId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
