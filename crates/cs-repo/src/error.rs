//! Maps storage failure classes onto the shared [`cs_core::CsError`] taxonomy
//! (§4.1, §7): unique-constraint violations become `ConflictError`, missing
//! rows become `NotFoundError`, connection/timeout classes become
//! `TransientStorageError`.

pub use cs_core::{ClientCode, CsError, Result};

#[cfg(feature = "postgres")]
pub fn from_sqlx(err: sqlx::Error) -> CsError {
    match &err {
        sqlx::Error::RowNotFound => CsError::not_found("row"),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            CsError::conflict(db_err.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            CsError::TransientStorage(err.to_string())
        }
        _ => CsError::TransientStorage(err.to_string()),
    }
}
