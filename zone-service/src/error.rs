use diesel::result::DatabaseErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZoneError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ZoneError>;

impl ZoneError {
    pub fn zone_not_found(id: uuid::Uuid) -> Self {
        ZoneError::NotFound(format!("zone {} not found", id))
    }
}

impl From<diesel::result::Error> for ZoneError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => ZoneError::NotFound("record not found".to_string()),
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                ZoneError::Conflict(info.message().to_string())
            }
            other => ZoneError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ZoneError {
    fn from(err: serde_json::Error) -> Self {
        ZoneError::Internal(err.to_string())
    }
}

impl From<shared::GeometryError> for ZoneError {
    fn from(err: shared::GeometryError) -> Self {
        ZoneError::InvalidArgument(format!("invalid geometry: {}", err))
    }
}
