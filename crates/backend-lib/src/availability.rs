// ============================
// crates/backend-lib/src/availability.rs
// ============================
//! Availability Registry: which connected drivers are dispatch candidates.
//!
//! Membership is derived, never cached: a driver is a candidate while their
//! session is connected, flagged available, and not engaged by an active ride
//! or a pending request (one pending request per driver at a time). A
//! transport-level disconnect removes the session entirely, so a crashed
//! driver can never silently remain a candidate.

use crate::error::AppError;
use dashmap::DashMap;
use metrics::counter;
use rideshare_common::{DriverId, Location, RideId, ServerEvent};
use tokio::sync::mpsc;

/// Connected driver session.
///
/// Invariant: `available == false` implies the driver is not in `members()`.
#[derive(Debug, Clone)]
pub struct DriverSession {
    pub driver_id: DriverId,
    pub available: bool,
    pub current_location: Option<Location>,
    pub active_ride: Option<RideId>,
    pub pending_request: Option<RideId>,
    tx: mpsc::Sender<ServerEvent>,
}

impl DriverSession {
    fn is_candidate(&self) -> bool {
        self.available && self.active_ride.is_none() && self.pending_request.is_none()
    }
}

/// Registry of connected driver sessions, shared across all connections.
#[derive(Default)]
pub struct AvailabilityRegistry {
    sessions: DashMap<DriverId, DriverSession>,
}

impl AvailabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly connected driver. Drivers connect unavailable and
    /// opt in with an explicit join.
    pub fn connect(&self, driver_id: DriverId, tx: mpsc::Sender<ServerEvent>) {
        self.sessions.insert(
            driver_id.clone(),
            DriverSession {
                driver_id,
                available: false,
                current_location: None,
                active_ride: None,
                pending_request: None,
                tx,
            },
        );
    }

    /// Remove the session on transport disconnect. Returns the driver's
    /// active ride, if any, so the caller can run the disconnect cascade.
    pub fn disconnect(&self, driver_id: &str) -> Option<RideId> {
        let (_, session) = self.sessions.remove(driver_id)?;
        counter!(crate::metrics::DRIVER_DISCONNECTED).increment(1);
        session.active_ride
    }

    /// Mark the driver as a dispatch candidate. Idempotent.
    pub fn join(&self, driver_id: &str) -> Result<(), AppError> {
        let mut session = self
            .sessions
            .get_mut(driver_id)
            .ok_or_else(|| AppError::DriverNotConnected(driver_id.to_string()))?;
        if !session.available {
            session.available = true;
            counter!(crate::metrics::DRIVER_JOINED).increment(1);
        }
        Ok(())
    }

    /// Withdraw the driver from dispatch. Idempotent; a no-op for unknown
    /// drivers so disconnect races stay harmless.
    pub fn leave(&self, driver_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(driver_id) {
            if session.available {
                session.available = false;
                counter!(crate::metrics::DRIVER_LEFT).increment(1);
            }
        }
    }

    /// Current candidate set. Computed at call time, never cached.
    pub fn members(&self) -> Vec<DriverId> {
        self.sessions
            .iter()
            .filter(|entry| entry.is_candidate())
            .map(|entry| entry.driver_id.clone())
            .collect()
    }

    /// Take the dispatch snapshot for a new ride: every current candidate is
    /// marked pending (claim and snapshot are one step per driver, so two
    /// concurrent dispatches cannot both claim the same driver) and returned
    /// with its outbound channel. Drivers joining afterwards are not part of
    /// this request.
    pub fn claim_candidates(&self, ride_id: RideId) -> Vec<(DriverId, mpsc::Sender<ServerEvent>)> {
        let mut claimed = Vec::new();
        for mut entry in self.sessions.iter_mut() {
            if entry.is_candidate() {
                entry.pending_request = Some(ride_id);
                claimed.push((entry.driver_id.clone(), entry.tx.clone()));
            }
        }
        claimed
    }

    /// Mark a dispatched request as pending on the driver.
    pub fn mark_pending(&self, driver_id: &str, ride_id: RideId) {
        if let Some(mut session) = self.sessions.get_mut(driver_id) {
            session.pending_request = Some(ride_id);
        }
    }

    /// Clear a pending request, but only if it still refers to `ride_id`.
    pub fn clear_pending(&self, driver_id: &str, ride_id: RideId) {
        if let Some(mut session) = self.sessions.get_mut(driver_id) {
            if session.pending_request == Some(ride_id) {
                session.pending_request = None;
            }
        }
    }

    /// Atomically engage the driver for a ride. Fails if the driver is gone
    /// or already booked, so a driver can never hold two active rides.
    pub fn assign(&self, driver_id: &str, ride_id: RideId) -> Result<(), AppError> {
        let mut session = self
            .sessions
            .get_mut(driver_id)
            .ok_or_else(|| AppError::DriverNotConnected(driver_id.to_string()))?;
        if session.active_ride.is_some() {
            return Err(AppError::DriverBusy(driver_id.to_string()));
        }
        session.active_ride = Some(ride_id);
        session.pending_request = None;
        Ok(())
    }

    /// Release the driver back to the pool after a terminal transition. The
    /// driver reappears in `members()` only while still flagged available.
    pub fn release(&self, driver_id: &str, ride_id: RideId) {
        if let Some(mut session) = self.sessions.get_mut(driver_id) {
            if session.active_ride == Some(ride_id) {
                session.active_ride = None;
            }
        }
    }

    /// Record the driver's last reported position.
    pub fn set_location(&self, driver_id: &str, location: Location) {
        if let Some(mut session) = self.sessions.get_mut(driver_id) {
            session.current_location = Some(location);
        }
    }

    /// Deliver an event to one driver's connection without waiting. A full
    /// or closed channel drops the event; callers use this for best-effort
    /// notifications only.
    pub fn try_send(&self, driver_id: &str, event: ServerEvent) {
        if let Some(session) = self.sessions.get(driver_id) {
            let _ = session.tx.try_send(event);
        }
    }

    /// Session snapshot, mostly for assertions and logging.
    pub fn session(&self, driver_id: &str) -> Option<DriverSession> {
        self.sessions.get(driver_id).map(|entry| entry.clone())
    }
}
