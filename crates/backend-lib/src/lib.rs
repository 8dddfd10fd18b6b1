// ==================
// crates/backend-lib/src/lib.rs
// ==================
//! Real-time ride dispatch core: availability registry, per-ride actors,
//! dispatcher, location stream forwarding, and the WebSocket event surface
//! that ties them together.

pub mod availability;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod forwarder;
pub mod metrics;
pub mod ride_actor;
pub mod validation;
pub mod websocket;
pub mod ws_router;

use crate::availability::AvailabilityRegistry;
use crate::collaborators::{FareEstimator, NoFareEstimator, NoRoutePlanner, RoutePlanner};
use crate::config::Settings;
use crate::dispatcher::Dispatcher;
use crate::ride_actor::RideHandle;
use dashmap::DashMap;
use rideshare_common::RideId;
use std::sync::Arc;

/// Shared application state, one instance per process.
pub struct AppState {
    pub registry: Arc<AvailabilityRegistry>,
    pub rides: Arc<DashMap<RideId, RideHandle>>,
    pub dispatcher: Dispatcher,
    pub settings: Arc<Settings>,
    pub planner: Arc<dyn RoutePlanner>,
    pub fares: Arc<dyn FareEstimator>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        planner: Arc<dyn RoutePlanner>,
        fares: Arc<dyn FareEstimator>,
    ) -> Self {
        let registry = Arc::new(AvailabilityRegistry::new());
        let rides: Arc<DashMap<RideId, RideHandle>> = Arc::new(DashMap::new());
        let dispatcher = Dispatcher::new(registry.clone(), rides.clone(), settings.dispatch.clone());
        Self {
            registry,
            rides,
            dispatcher,
            settings: Arc::new(settings),
            planner,
            fares,
        }
    }

    /// State with inert collaborators, for deployments without routing or
    /// fare backends wired in.
    pub fn with_defaults(settings: Settings) -> Self {
        Self::new(settings, Arc::new(NoRoutePlanner), Arc::new(NoFareEstimator))
    }
}
