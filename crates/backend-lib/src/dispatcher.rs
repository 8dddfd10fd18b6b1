// ============================
// crates/backend-lib/src/dispatcher.rs
// ============================
//! Dispatcher: turns a fresh ride request into a broadcast to the current
//! availability snapshot and arms the accept-timeout policy hook.
//!
//! The candidate set is read (and claimed) at dispatch time; drivers joining
//! afterwards never receive this particular request. Race resolution between
//! the claimed candidates happens inside the ride actor.

use crate::availability::AvailabilityRegistry;
use crate::config::DispatchSettings;
use crate::error::AppError;
use crate::ride_actor::{spawn_ride_actor, RideHandle, RideMsg};
use dashmap::DashMap;
use metrics::counter;
use rideshare_common::{Ride, RideId, ServerEvent};
use std::sync::Arc;

pub struct Dispatcher {
    registry: Arc<AvailabilityRegistry>,
    rides: Arc<DashMap<RideId, RideHandle>>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AvailabilityRegistry>,
        rides: Arc<DashMap<RideId, RideHandle>>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            rides,
            settings,
        }
    }

    /// Dispatch a ride in `searching` state: claim the candidate snapshot,
    /// spawn the ride actor seeded with it, deliver `new-ride-request` to
    /// exactly those drivers, and arm the accept timeout.
    ///
    /// Returns the ride handle and the number of drivers the request reached.
    /// Zero candidates fails with `NoDriverAvailable` and creates nothing.
    pub async fn dispatch(&self, ride: Ride) -> Result<(RideHandle, usize), AppError> {
        let ride_id = ride.id;
        let candidates = self.registry.claim_candidates(ride_id);
        if candidates.is_empty() {
            counter!(crate::metrics::RIDE_UNMATCHED).increment(1);
            return Err(AppError::NoDriverAvailable { ride_id });
        }

        let request = ServerEvent::NewRideRequest {
            ride_id,
            pickup_location: ride.pickup_location.clone(),
            destination: ride.destination.clone(),
            ride_type: ride.ride_type,
        };

        let candidate_ids = candidates.iter().map(|(id, _)| id.clone()).collect();
        let handle = spawn_ride_actor(
            ride,
            candidate_ids,
            self.registry.clone(),
            self.rides.clone(),
            self.settings.clone(),
        );
        self.rides.insert(ride_id, handle.clone());

        let mut reached = 0;
        for (driver_id, tx) in candidates {
            if tx.send(request.clone()).await.is_ok() {
                reached += 1;
            } else {
                // connection dropped between claim and delivery
                self.registry.clear_pending(&driver_id, ride_id);
                let _ = handle.cmd_tx.send(RideMsg::DriverDisconnected { driver_id });
            }
        }

        counter!(crate::metrics::RIDE_REQUESTED).increment(1);
        tracing::info!(%ride_id, reached, "ride request dispatched");

        let cmd_tx = handle.cmd_tx.clone();
        let timeout = self.settings.accept_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = cmd_tx.send(RideMsg::AcceptTimeout);
        });

        Ok((handle, reached))
    }

    /// Look up a live ride by id.
    pub fn ride(&self, ride_id: RideId) -> Result<RideHandle, AppError> {
        self.rides
            .get(&ride_id)
            .map(|entry| entry.clone())
            .ok_or(AppError::RideNotFound(ride_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rideshare_common::{Location, RideType};
    use tokio::sync::mpsc;

    fn test_ride() -> Ride {
        Ride::new(
            "rider-1".to_string(),
            Location::new(38.75, 8.98),
            Location::new(38.80, 9.02),
            RideType::Private,
        )
    }

    fn settings() -> DispatchSettings {
        DispatchSettings {
            accept_timeout_secs: 5,
            cancel_unmatched: false,
            location_update_period_ms: 100,
            relay_buffer: 64,
        }
    }

    fn setup() -> (Arc<AvailabilityRegistry>, Dispatcher) {
        let registry = Arc::new(AvailabilityRegistry::new());
        let rides = Arc::new(DashMap::new());
        let dispatcher = Dispatcher::new(registry.clone(), rides, settings());
        (registry, dispatcher)
    }

    fn connect_available(
        registry: &AvailabilityRegistry,
        driver: &str,
    ) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(32);
        registry.connect(driver.to_string(), tx);
        registry.join(driver).unwrap();
        rx
    }

    #[tokio::test]
    async fn test_dispatch_with_no_candidates_fails() {
        let (_registry, dispatcher) = setup();
        let result = dispatcher.dispatch(test_ride()).await;
        assert!(matches!(
            result,
            Err(AppError::NoDriverAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_dispatch_reaches_exactly_the_snapshot() {
        let (registry, dispatcher) = setup();
        let mut d1_rx = connect_available(&registry, "d1");
        let mut d2_rx = connect_available(&registry, "d2");

        let (_handle, reached) = dispatcher.dispatch(test_ride()).await.unwrap();
        assert_eq!(reached, 2);

        assert!(matches!(
            d1_rx.recv().await,
            Some(ServerEvent::NewRideRequest { .. })
        ));
        assert!(matches!(
            d2_rx.recv().await,
            Some(ServerEvent::NewRideRequest { .. })
        ));

        // a driver joining after dispatch gets no retroactive delivery
        let mut late_rx = connect_available(&registry, "late");
        assert!(late_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unavailable_driver_receives_nothing() {
        let (registry, dispatcher) = setup();
        let mut d1_rx = connect_available(&registry, "d1");
        let (tx, mut offline_rx) = mpsc::channel(32);
        registry.connect("offline".to_string(), tx);

        dispatcher.dispatch(test_ride()).await.unwrap();

        assert!(matches!(
            d1_rx.recv().await,
            Some(ServerEvent::NewRideRequest { .. })
        ));
        assert!(offline_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pending_request_excludes_driver_from_next_dispatch() {
        let (registry, dispatcher) = setup();
        let mut d1_rx = connect_available(&registry, "d1");

        dispatcher.dispatch(test_ride()).await.unwrap();
        assert!(matches!(
            d1_rx.recv().await,
            Some(ServerEvent::NewRideRequest { .. })
        ));

        // second request finds nobody: d1 already has a pending request
        assert!(matches!(
            dispatcher.dispatch(test_ride()).await,
            Err(AppError::NoDriverAvailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_timeout_notifies_rider() {
        let (registry, dispatcher) = setup();
        let mut d1_rx = connect_available(&registry, "d1");

        let (handle, _) = dispatcher.dispatch(test_ride()).await.unwrap();
        let mut relay = handle.subscribe();
        assert!(matches!(
            d1_rx.recv().await,
            Some(ServerEvent::NewRideRequest { .. })
        ));

        // nobody accepts; paused time advances past the timeout on idle
        let event = tokio::time::timeout(std::time::Duration::from_secs(30), relay.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert!(matches!(event, ServerEvent::NoDriverAvailable { .. }));
    }

    #[tokio::test]
    async fn test_ride_lookup() {
        let (registry, dispatcher) = setup();
        let _d1_rx = connect_available(&registry, "d1");

        let (handle, _) = dispatcher.dispatch(test_ride()).await.unwrap();
        assert!(dispatcher.ride(handle.ride_id).is_ok());
        assert!(matches!(
            dispatcher.ride(uuid::Uuid::new_v4()),
            Err(AppError::RideNotFound(_))
        ));
    }
}
