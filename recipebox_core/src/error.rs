use sea_orm::{DbErr, RuntimeErr, SqlErr};
use thiserror::Error;

/// Errors raised by the query layer. Constraint failures reported by the
/// database are split out so callers can react to them.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("database connection error")]
    Connection(#[source] DbErr),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("fatal database error")]
    Database(#[source] DbErr),
}

impl QueryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::NotFound(_))
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, QueryError::UniqueViolation(_))
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, QueryError::ForeignKeyViolation(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, QueryError::Timeout(_))
    }
}

impl From<DbErr> for QueryError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(msg)) => return QueryError::UniqueViolation(msg),
            Some(SqlErr::ForeignKeyConstraintViolation(msg)) => {
                return QueryError::ForeignKeyViolation(msg)
            }
            _ => {}
        }

        if let Some(msg) = restrict_violation(&err) {
            return QueryError::ForeignKeyViolation(msg);
        }

        let connection = match &err {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => true,
            DbErr::Exec(RuntimeErr::SqlxError(sqlx_err))
            | DbErr::Query(RuntimeErr::SqlxError(sqlx_err)) => is_connection_failure(sqlx_err),
            _ => false,
        };

        if matches!(err, DbErr::RecordNotFound(_) | DbErr::RecordNotUpdated) {
            QueryError::NotFound("record".to_string())
        } else if connection {
            QueryError::Connection(err)
        } else {
            QueryError::Database(err)
        }
    }
}

/// SQLite reports a delete blocked by `ON DELETE RESTRICT` as extended code
/// 1811 (`SQLITE_CONSTRAINT_TRIGGER`), which `DbErr::sql_err` does not map.
fn restrict_violation(err: &DbErr) -> Option<String> {
    let (DbErr::Exec(RuntimeErr::SqlxError(sea_orm::sqlx::Error::Database(db_err)))
    | DbErr::Query(RuntimeErr::SqlxError(sea_orm::sqlx::Error::Database(db_err)))) = err
    else {
        return None;
    };

    let message = db_err.message();
    let restrict = db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_TRIGGER)
        || message.contains("FOREIGN KEY constraint failed");
    restrict.then(|| message.to_string())
}

const SQLITE_CONSTRAINT_TRIGGER: &str = "1811";

fn is_connection_failure(err: &sea_orm::sqlx::Error) -> bool {
    use sea_orm::sqlx::Error;
    matches!(
        err,
        Error::Io(_) | Error::Tls(_) | Error::PoolTimedOut | Error::PoolClosed | Error::WorkerCrashed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_not_updated_maps_to_not_found() {
        let err: QueryError = DbErr::RecordNotUpdated.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn connection_errors_are_flagged() {
        let err: QueryError = DbErr::Conn(RuntimeErr::Internal("refused".into())).into();
        assert!(matches!(err, QueryError::Connection(_)));
    }

    #[test]
    fn other_errors_are_fatal() {
        let err: QueryError = DbErr::Custom("boom".into()).into();
        assert!(matches!(err, QueryError::Database(_)));
        assert!(!err.is_unique_violation());
        assert!(!err.is_foreign_key_violation());
    }
}
