// ================
// crates/common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between the rider/driver clients and the dispatch
//! server. This module defines the WebSocket protocol events and supporting
//! types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque driver identifier, supplied by the identity collaborator.
pub type DriverId = String;
/// Opaque rider identifier, supplied by the identity collaborator.
pub type RiderId = String;
/// Unique ride identifier, assigned at creation.
pub type RideId = Uuid;
/// Sequence number type for ordering location updates.
pub type Seq = u64;

/// A geographic point, optionally carrying a display name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Location {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            name: None,
        }
    }

    pub fn named(longitude: f64, latitude: f64, name: impl Into<String>) -> Self {
        Self {
            longitude,
            latitude,
            name: Some(name.into()),
        }
    }
}

/// Ordered path between two locations, produced by the routing collaborator.
pub type RouteTrace = Vec<Location>;

/// Kind of ride requested by the rider.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RideType {
    Private,
    Shared,
}

/// Lifecycle state of a ride.
///
/// Transitions are `searching -> accepted -> in-progress -> completed`, with
/// `cancelled` reachable from any non-terminal state. `completed` and
/// `cancelled` are terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RideStatus {
    Searching,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// Whether no further transition is possible out of this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Whether a location stream may run in this state.
    pub fn is_active(self) -> bool {
        matches!(self, RideStatus::Accepted | RideStatus::InProgress)
    }
}

/// Which party initiated a cancellation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CancelParty {
    Rider,
    Driver,
    System,
}

/// Snapshot of a ride record as exchanged over the wire.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub id: RideId,
    pub rider_id: RiderId,
    pub pickup_location: Location,
    pub destination: Location,
    pub ride_type: RideType,
    pub status: RideStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_driver_id: Option<DriverId>,
    pub requested_at: DateTime<Utc>,
}

impl Ride {
    /// Create a new ride in `searching` state.
    pub fn new(
        rider_id: RiderId,
        pickup_location: Location,
        destination: Location,
        ride_type: RideType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rider_id,
            pickup_location,
            destination,
            ride_type,
            status: RideStatus::Searching,
            assigned_driver_id: None,
            requested_at: Utc::now(),
        }
    }
}

/// Events sent from a rider or driver client to the server.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Driver advertises availability for dispatch.
    JoinAvailableDriversRoom,
    /// Driver withdraws from dispatch.
    LeaveAvailableDriversRoom,
    /// Rider submits a new ride request.
    #[serde(rename_all = "camelCase")]
    RequestRide {
        pickup_location: Location,
        destination: Location,
        ride_type: RideType,
    },
    /// Driver attempts to take a dispatched ride.
    #[serde(rename_all = "camelCase")]
    AcceptRide { ride_id: RideId, driver_id: DriverId },
    /// Assigned driver starts the trip at the pickup point.
    #[serde(rename_all = "camelCase")]
    StartTrip { ride_id: RideId },
    /// Assigned driver completes the trip at the destination.
    #[serde(rename_all = "camelCase")]
    EndTrip { ride_id: RideId },
    /// Either party cancels a non-terminal ride.
    #[serde(rename_all = "camelCase")]
    CancelTrip {
        ride_id: RideId,
        cancelled_by: CancelParty,
    },
    /// Driver device telemetry for an active ride.
    #[serde(rename_all = "camelCase")]
    UpdateLocation {
        driver_id: DriverId,
        ride_id: RideId,
        location: Location,
        seq: Seq,
    },
    /// Advisory fare quote; never consulted by the state machine.
    #[serde(rename_all = "camelCase")]
    EstimateFare {
        pickup_location: Location,
        destination: Location,
        ride_type: RideType,
    },
}

/// Events sent from the server to a rider or driver client.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Rider's handle on their newly created ride.
    #[serde(rename_all = "camelCase")]
    RideCreated { ride: Ride },
    /// Dispatched to every candidate in the availability snapshot.
    #[serde(rename_all = "camelCase")]
    NewRideRequest {
        ride_id: RideId,
        pickup_location: Location,
        destination: Location,
        ride_type: RideType,
    },
    /// The accept race has been resolved; `driver_id` is the winner.
    #[serde(rename_all = "camelCase")]
    RideAccepted { ride_id: RideId, driver_id: DriverId },
    #[serde(rename_all = "camelCase")]
    TripStarted { ride_id: RideId },
    #[serde(rename_all = "camelCase")]
    TripEnded { ride_id: RideId },
    #[serde(rename_all = "camelCase")]
    TripCancelled {
        ride_id: RideId,
        cancelled_by: CancelParty,
    },
    /// The assigned driver's connection was lost mid-trip.
    #[serde(rename_all = "camelCase")]
    DriverLost { ride_id: RideId },
    /// No candidate accepted within the dispatch window.
    #[serde(rename_all = "camelCase")]
    NoDriverAvailable { ride_id: RideId },
    /// Driver position relayed to the ride's rider-facing room.
    #[serde(rename_all = "camelCase")]
    UpdateLocation {
        ride_id: RideId,
        driver_id: DriverId,
        location: Location,
        seq: Seq,
    },
    /// Advisory quote from the fare collaborator.
    #[serde(rename_all = "camelCase")]
    FareEstimate { amount: f64 },
    /// Error response carrying a stable code.
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_names_are_kebab_case() {
        let ev = ClientEvent::JoinAvailableDriversRoom;
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "join-available-drivers-room");

        let ev = ClientEvent::AcceptRide {
            ride_id: Uuid::nil(),
            driver_id: "d-1".to_string(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "accept-ride");
        assert_eq!(json["data"]["driverId"], "d-1");
    }

    #[test]
    fn test_request_ride_round_trip() {
        let raw = r#"{
            "event": "request-ride",
            "data": {
                "pickupLocation": {"longitude": 38.75, "latitude": 8.98, "name": "Meskel Square"},
                "destination": {"longitude": 38.80, "latitude": 9.02},
                "rideType": "private"
            }
        }"#;

        let parsed: ClientEvent = serde_json::from_str(raw).unwrap();
        match parsed {
            ClientEvent::RequestRide {
                pickup_location,
                destination,
                ride_type,
            } => {
                assert_eq!(pickup_location.name.as_deref(), Some("Meskel Square"));
                assert_eq!(destination.longitude, 38.80);
                assert!(destination.name.is_none());
                assert_eq!(ride_type, RideType::Private);
            },
            other => panic!("Expected RequestRide, got {other:?}"),
        }
    }

    #[test]
    fn test_ride_status_serialization() {
        assert_eq!(
            serde_json::to_value(RideStatus::InProgress).unwrap(),
            "in-progress"
        );
        assert_eq!(
            serde_json::to_value(RideStatus::Searching).unwrap(),
            "searching"
        );
    }

    #[test]
    fn test_ride_snapshot_is_camel_case() {
        let ride = Ride::new(
            "rider-1".to_string(),
            Location::new(38.75, 8.98),
            Location::new(38.80, 9.02),
            RideType::Shared,
        );
        let json = serde_json::to_value(&ride).unwrap();
        assert_eq!(json["riderId"], "rider-1");
        assert_eq!(json["status"], "searching");
        assert_eq!(json["rideType"], "shared");
        assert!(json.get("assignedDriverId").is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(RideStatus::Completed.is_terminal());
        assert!(RideStatus::Cancelled.is_terminal());
        assert!(!RideStatus::Searching.is_terminal());
        assert!(RideStatus::Accepted.is_active());
        assert!(!RideStatus::Completed.is_active());
    }
}
