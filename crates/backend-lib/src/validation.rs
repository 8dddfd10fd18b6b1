// ============================
// crates/backend-lib/src/validation.rs
// ============================
//! Inbound payload validation.

use rideshare_common::Location;
use thiserror::Error;

const MAX_LOCATION_NAME_LENGTH: usize = 100;

/// Possible validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("longitude {0} out of range [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("latitude {0} out of range [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("coordinate is not a finite number")]
    NonFiniteCoordinate,

    #[error("location name too long ({0} chars, max {MAX_LOCATION_NAME_LENGTH})")]
    LocationNameTooLong(usize),

    #[error("pickup and destination are the same point")]
    DegenerateRoute,
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a single location payload.
pub fn validate_location(location: &Location) -> ValidationResult<()> {
    if !location.longitude.is_finite() || !location.latitude.is_finite() {
        return Err(ValidationError::NonFiniteCoordinate);
    }
    if !(-180.0..=180.0).contains(&location.longitude) {
        return Err(ValidationError::LongitudeOutOfRange(location.longitude));
    }
    if !(-90.0..=90.0).contains(&location.latitude) {
        return Err(ValidationError::LatitudeOutOfRange(location.latitude));
    }
    if let Some(name) = &location.name {
        if name.chars().count() > MAX_LOCATION_NAME_LENGTH {
            return Err(ValidationError::LocationNameTooLong(name.chars().count()));
        }
    }
    Ok(())
}

/// Validate a ride request's endpoints.
pub fn validate_ride_request(pickup: &Location, destination: &Location) -> ValidationResult<()> {
    validate_location(pickup)?;
    validate_location(destination)?;
    if pickup.longitude == destination.longitude && pickup.latitude == destination.latitude {
        return Err(ValidationError::DegenerateRoute);
    }
    Ok(())
}

impl From<ValidationError> for crate::error::AppError {
    fn from(err: ValidationError) -> Self {
        crate::error::AppError::InvalidInput(err.to_string())
    }
}
