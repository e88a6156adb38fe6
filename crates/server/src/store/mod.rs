// Persistence layer.
//
// Each store is an enum over a PostgreSQL pool and an in-memory map so
// the rest of the system (and the test suite) is independent of a live
// database. Driver errors are normalized into the domain taxonomy here:
// unique violations become DuplicateEntry, absent rows become NotFound.

mod chats;
mod projects;
mod tasks;
mod users;

pub use chats::ChatStore;
pub use projects::ProjectStore;
pub use tasks::TaskStore;
pub use users::UserStore;

use crate::error::ApiError;

pub(crate) fn map_db_error(context: &'static str, error: sqlx::Error) -> ApiError {
    match &error {
        sqlx::Error::RowNotFound => ApiError::not_found("not found"),
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
            ApiError::duplicate_entry("duplicate entry")
        }
        _ => ApiError::server(context, error),
    }
}
