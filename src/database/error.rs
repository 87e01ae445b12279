//! Error type shared by every store and backend

/// Unexpected failures only. Absence and contention are reported through
/// the outcome enums in [`crate::database::types`], never through this type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connectivity lost, pool exhausted or closed. Coordinators halt the cycle on this.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Coin {0} is not a supported coin")]
    UnsupportedCoin(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// SQLSTATE codes the server uses when it is going away or refusing work:
/// class 08 (connection exception), 57P01..57P03 (shutdown, cannot connect
/// now) and 53300 (too many connections).
pub fn is_outage_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03" | "53300")
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            sqlx::Error::Database(ref db) if db.code().is_some_and(|code| is_outage_sqlstate(&code)) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_errors_are_unavailable() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_unavailable());
        assert!(StoreError::from(sqlx::Error::PoolClosed).is_unavailable());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(StoreError::from(sqlx::Error::Io(io)).is_unavailable());
    }

    #[test]
    fn test_protocol_error_is_unavailable() {
        let err = StoreError::from(sqlx::Error::Protocol("unexpected EOF".to_string()));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_outage_sqlstates() {
        for code in ["08000", "08006", "08003", "57P01", "57P02", "57P03", "53300"] {
            assert!(is_outage_sqlstate(code), "{} should count as an outage", code);
        }
        // unique, foreign key and check violations are not outages
        for code in ["23505", "23503", "23514", "42P01", "57014"] {
            assert!(!is_outage_sqlstate(code), "{} should not count as an outage", code);
        }
    }

    #[test]
    fn test_other_errors_stay_database() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(_)));
        assert!(!err.is_unavailable());
    }
}
