use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use std::fmt;

#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    /// A unique index rejected the write; `constraint` names the index.
    UniqueViolation { constraint: Option<String> },
    ConnectionError { message: String },
    PoolExhausted,
    /// A stored value could not be mapped back into a domain type.
    Decode { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(&self.kind))
    }
}

impl std::error::Error for DatabaseError {}

fn describe(kind: &DatabaseErrorKind) -> String {
    match kind {
        DatabaseErrorKind::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
        DatabaseErrorKind::UniqueViolation { constraint } => format!(
            "unique constraint violated: {}",
            constraint.as_deref().unwrap_or("unknown")
        ),
        DatabaseErrorKind::ConnectionError { message } => {
            format!("database connection error: {}", message)
        }
        DatabaseErrorKind::PoolExhausted => "database pool exhausted".to_string(),
        DatabaseErrorKind::Decode { message } => format!("failed to decode row: {}", message),
        DatabaseErrorKind::Unknown { message } => format!("database error: {}", message),
    }
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Decode {
            message: message.into(),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolExhausted,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                DatabaseErrorKind::ConnectionError {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().map(str::to_string),
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::Decode {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    /// Transient failures the caller (or the provider's webhook redelivery) may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionError { .. } | DatabaseErrorKind::PoolExhausted
        )
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let is_retryable = err.is_retryable();
        let kind = match err.kind {
            DatabaseErrorKind::NotFound { entity, id } if entity == "Order" => {
                AppErrorKind::Domain(DomainError::OrderNotFound { order: id })
            }
            DatabaseErrorKind::NotFound { entity, id } if entity == "PaymentRecord" => {
                AppErrorKind::Domain(DomainError::PaymentNotFound { lookup: id })
            }
            other => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: describe(&other),
                is_retryable,
            }),
        };
        AppError::new(kind)
    }
}
