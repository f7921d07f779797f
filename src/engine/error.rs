use crate::model::BookingId;

use super::Dimension;

#[derive(Debug)]
pub enum EngineError {
    NotFound(BookingId),
    Conflict {
        existing: BookingId,
        dimension: Dimension,
    },
    NoCapacity {
        staff_name: String,
        department: String,
    },
    InvalidSlot(String),
    InvalidField(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::Conflict { existing, dimension } => {
                write!(f, "{dimension} conflict with booking {existing}")
            }
            EngineError::NoCapacity {
                staff_name,
                department,
            } => write!(
                f,
                "no free slot left for {staff_name} in {department}"
            ),
            EngineError::InvalidSlot(label) => write!(f, "unknown day or time: {label}"),
            EngineError::InvalidField(name) => write!(f, "{name} must not be empty"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
