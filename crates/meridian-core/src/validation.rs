//! # Validation Module
//!
//! Input validation utilities for the Meridian sync engine.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (CRUD services, UI)                                   │
//! │  ├── Basic format checks before calling in                             │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Entity key shape                                                  │
//! │  └── Settings ranges                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Store/Engine                                                 │
//! │  ├── Version monotonicity                                              │
//! │  └── State machine guards                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use meridian_core::validation::{validate_entity_type, validate_entity_id};
//!
//! validate_entity_type("customer").unwrap();
//! validate_entity_id("customer-1").unwrap();
//! ```

use crate::error::ValidationError;
use crate::{MAX_BATCH_SIZE, MAX_RETENTION_DAYS, MAX_RETRY_LIMIT, MAX_SYNC_INTERVAL_MINUTES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Entity Key Validators
// =============================================================================

/// Validates an entity type ("customer", "product", ...).
///
/// ## Rules
/// - Must not be empty
/// - Must be at most 64 characters
/// - Only alphanumerics, hyphens, underscores
///
/// ## Example
/// ```rust
/// use meridian_core::validation::validate_entity_type;
///
/// assert!(validate_entity_type("customer").is_ok());
/// assert!(validate_entity_type("").is_err());
/// assert!(validate_entity_type("has space").is_err());
/// ```
pub fn validate_entity_type(entity_type: &str) -> ValidationResult<()> {
    let entity_type = entity_type.trim();

    if entity_type.is_empty() {
        return Err(ValidationError::Required {
            field: "entity_type".to_string(),
        });
    }

    if entity_type.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "entity_type".to_string(),
            max: 64,
        });
    }

    if !entity_type
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "entity_type".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates an entity id.
///
/// ## Rules
/// - Must not be empty
/// - Must be at most 128 characters
pub fn validate_entity_id(entity_id: &str) -> ValidationResult<()> {
    let entity_id = entity_id.trim();

    if entity_id.is_empty() {
        return Err(ValidationError::Required {
            field: "entity_id".to_string(),
        });
    }

    if entity_id.len() > 128 {
        return Err(ValidationError::TooLong {
            field: "entity_id".to_string(),
            max: 128,
        });
    }

    Ok(())
}

/// Validates a device display name.
pub fn validate_device_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "device_name".to_string(),
        });
    }

    if name.len() > 100 {
        return Err(ValidationError::TooLong {
            field: "device_name".to_string(),
            max: 100,
        });
    }

    Ok(())
}

// =============================================================================
// Settings Range Validators
// =============================================================================

/// Validates a cycle batch size (1 to [`MAX_BATCH_SIZE`]).
pub fn validate_batch_size(batch_size: usize) -> ValidationResult<()> {
    if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
        return Err(ValidationError::OutOfRange {
            field: "batch_size".to_string(),
            min: 1,
            max: MAX_BATCH_SIZE as i64,
        });
    }

    Ok(())
}

/// Validates an automatic sync interval in minutes (1 to 24 hours).
pub fn validate_sync_interval(minutes: u32) -> ValidationResult<()> {
    if minutes == 0 || minutes > MAX_SYNC_INTERVAL_MINUTES {
        return Err(ValidationError::OutOfRange {
            field: "sync_interval_minutes".to_string(),
            min: 1,
            max: i64::from(MAX_SYNC_INTERVAL_MINUTES),
        });
    }

    Ok(())
}

/// Validates a per-operation retry budget. Zero (no retries) is allowed.
pub fn validate_max_retries(max_retries: u32) -> ValidationResult<()> {
    if max_retries > MAX_RETRY_LIMIT {
        return Err(ValidationError::OutOfRange {
            field: "max_retries".to_string(),
            min: 0,
            max: i64::from(MAX_RETRY_LIMIT),
        });
    }

    Ok(())
}

/// Validates the base retry delay (at most one hour). Zero is allowed and
/// makes retried operations immediately eligible again.
pub fn validate_retry_delay(secs: u64) -> ValidationResult<()> {
    if secs > 3_600 {
        return Err(ValidationError::OutOfRange {
            field: "retry_delay_secs".to_string(),
            min: 0,
            max: 3_600,
        });
    }

    Ok(())
}

/// Validates a backup retention window in days.
pub fn validate_retention_days(days: u32) -> ValidationResult<()> {
    if days == 0 || days > MAX_RETENTION_DAYS {
        return Err(ValidationError::OutOfRange {
            field: "retention_period_days".to_string(),
            min: 1,
            max: i64::from(MAX_RETENTION_DAYS),
        });
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use meridian_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entity_type() {
        assert!(validate_entity_type("customer").is_ok());
        assert!(validate_entity_type("sale_item").is_ok());
        assert!(validate_entity_type("loyalty-card").is_ok());

        assert!(validate_entity_type("").is_err());
        assert!(validate_entity_type("   ").is_err());
        assert!(validate_entity_type("has space").is_err());
        assert!(validate_entity_type(&"a".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_entity_id() {
        assert!(validate_entity_id("customer-1").is_ok());
        assert!(validate_entity_id("").is_err());
        assert!(validate_entity_id(&"x".repeat(200)).is_err());
    }

    #[test]
    fn test_validate_device_name() {
        assert!(validate_device_name("Register 1").is_ok());
        assert!(validate_device_name("").is_err());
        assert!(validate_device_name(&"n".repeat(150)).is_err());
    }

    #[test]
    fn test_validate_batch_size() {
        assert!(validate_batch_size(1).is_ok());
        assert!(validate_batch_size(50).is_ok());
        assert!(validate_batch_size(500).is_ok());

        assert!(validate_batch_size(0).is_err());
        assert!(validate_batch_size(501).is_err());
    }

    #[test]
    fn test_validate_sync_interval() {
        assert!(validate_sync_interval(1).is_ok());
        assert!(validate_sync_interval(1_440).is_ok());
        assert!(validate_sync_interval(0).is_err());
        assert!(validate_sync_interval(1_441).is_err());
    }

    #[test]
    fn test_validate_max_retries() {
        assert!(validate_max_retries(0).is_ok());
        assert!(validate_max_retries(3).is_ok());
        assert!(validate_max_retries(10).is_ok());
        assert!(validate_max_retries(11).is_err());
    }

    #[test]
    fn test_validate_retention_days() {
        assert!(validate_retention_days(30).is_ok());
        assert!(validate_retention_days(0).is_err());
        assert!(validate_retention_days(5_000).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("not-a-uuid").is_err());
    }
}
