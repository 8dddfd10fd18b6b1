// ============================
// crates/backend-lib/src/collaborators.rs
// ============================
//! Interfaces to the external collaborators this core consumes but never
//! implements: route geometry and fare estimation. Concrete implementations
//! are a deployment concern; the defaults here are inert.

use crate::error::AppError;
use async_trait::async_trait;
use rideshare_common::{Location, RideType, RouteTrace};

/// Routing collaborator: turn-by-turn path between two locations.
///
/// Called off the entity locks, after an accept; `Ok(None)` means no trace is
/// available and the forwarder has nothing to step through (genuine device
/// telemetry still flows).
#[async_trait]
pub trait RoutePlanner: Send + Sync {
    async fn plan(&self, from: &Location, to: &Location) -> Result<Option<RouteTrace>, AppError>;
}

/// Fare collaborator: purely advisory quote, never consulted by the state
/// machine.
#[async_trait]
pub trait FareEstimator: Send + Sync {
    async fn estimate(
        &self,
        pickup: &Location,
        destination: &Location,
        ride_type: RideType,
    ) -> Result<f64, AppError>;
}

/// Planner used when no routing backend is wired in.
pub struct NoRoutePlanner;

#[async_trait]
impl RoutePlanner for NoRoutePlanner {
    async fn plan(&self, _from: &Location, _to: &Location) -> Result<Option<RouteTrace>, AppError> {
        Ok(None)
    }
}

/// Estimator used when no fare backend is wired in.
pub struct NoFareEstimator;

#[async_trait]
impl FareEstimator for NoFareEstimator {
    async fn estimate(
        &self,
        _pickup: &Location,
        _destination: &Location,
        _ride_type: RideType,
    ) -> Result<f64, AppError> {
        Err(AppError::Internal(
            "no fare estimator configured".to_string(),
        ))
    }
}
