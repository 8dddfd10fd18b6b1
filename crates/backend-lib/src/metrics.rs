// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for Prometheus metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const DRIVER_JOINED: &str = "driver.joined";
pub const DRIVER_LEFT: &str = "driver.left";
pub const DRIVER_DISCONNECTED: &str = "driver.disconnected";
pub const RIDE_REQUESTED: &str = "ride.requested";
pub const RIDE_ACCEPTED: &str = "ride.accepted";
pub const RIDE_ACCEPT_LOST: &str = "ride.accept_lost";
pub const RIDE_COMPLETED: &str = "ride.completed";
pub const RIDE_CANCELLED: &str = "ride.cancelled";
pub const RIDE_UNMATCHED: &str = "ride.unmatched";
pub const LOCATION_FORWARDED: &str = "location.forwarded";
pub const LOCATION_STALE_DROPPED: &str = "location.stale_dropped";
