// ============================
// crates/backend-lib/src/ride_actor.rs
// ============================
//! Ride record, state machine, and per-ride actor.
//!
//! Each ride is owned by one spawned task that processes commands from an
//! mpsc queue. Serializing all mutations through the queue is what makes the
//! accept check-and-set atomic: concurrent `accept` calls from many drivers
//! are processed one at a time against the live status, so exactly one can
//! observe `searching`. Rider-facing events go out on the ride's broadcast
//! relay (the per-ride room).

use crate::availability::AvailabilityRegistry;
use crate::config::DispatchSettings;
use crate::error::AppError;
use crate::forwarder::{spawn_forwarder, ForwarderGuard};
use dashmap::DashMap;
use metrics::counter;
use rideshare_common::{
    CancelParty, DriverId, Location, Ride, RideId, RideStatus, RouteTrace, Seq, ServerEvent,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Message sent *into* the actor
#[derive(Debug)]
pub enum RideMsg {
    Accept {
        driver_id: DriverId,
        resp_tx: mpsc::UnboundedSender<Result<Ride, AppError>>,
    },
    Start {
        driver_id: DriverId,
        resp_tx: mpsc::UnboundedSender<Result<(), AppError>>,
    },
    Complete {
        driver_id: DriverId,
        resp_tx: mpsc::UnboundedSender<Result<(), AppError>>,
    },
    Cancel {
        requested_by: String,
        cancelled_by: CancelParty,
        resp_tx: mpsc::UnboundedSender<Result<(), AppError>>,
    },
    AttachRoute {
        trace: RouteTrace,
    },
    ReportLocation {
        driver_id: DriverId,
        location: Location,
        seq: Seq,
    },
    AcceptTimeout,
    DriverDisconnected {
        driver_id: DriverId,
    },
}

/// Handle that other components keep: command channel + broadcast relay.
#[derive(Clone)]
pub struct RideHandle {
    pub ride_id: RideId,
    pub cmd_tx: mpsc::UnboundedSender<RideMsg>,
    pub relay_tx: broadcast::Sender<ServerEvent>,
}

impl RideHandle {
    /// Subscribe to the ride's rider-facing room.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.relay_tx.subscribe()
    }

    pub async fn accept(&self, driver_id: DriverId) -> Result<Ride, AppError> {
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();
        self.cmd_tx
            .send(RideMsg::Accept { driver_id, resp_tx })
            .map_err(|_| AppError::RideNotFound(self.ride_id))?;
        resp_rx
            .recv()
            .await
            .ok_or_else(|| AppError::Internal("ride actor dropped response".to_string()))?
    }

    pub async fn start(&self, driver_id: DriverId) -> Result<(), AppError> {
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();
        self.cmd_tx
            .send(RideMsg::Start { driver_id, resp_tx })
            .map_err(|_| AppError::RideNotFound(self.ride_id))?;
        resp_rx
            .recv()
            .await
            .ok_or_else(|| AppError::Internal("ride actor dropped response".to_string()))?
    }

    pub async fn complete(&self, driver_id: DriverId) -> Result<(), AppError> {
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();
        self.cmd_tx
            .send(RideMsg::Complete { driver_id, resp_tx })
            .map_err(|_| AppError::RideNotFound(self.ride_id))?;
        resp_rx
            .recv()
            .await
            .ok_or_else(|| AppError::Internal("ride actor dropped response".to_string()))?
    }

    /// Cancel on behalf of `requested_by`, which must be the ride's rider or
    /// its assigned driver.
    pub async fn cancel(
        &self,
        requested_by: String,
        cancelled_by: CancelParty,
    ) -> Result<(), AppError> {
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();
        self.cmd_tx
            .send(RideMsg::Cancel {
                requested_by,
                cancelled_by,
                resp_tx,
            })
            .map_err(|_| AppError::RideNotFound(self.ride_id))?;
        resp_rx
            .recv()
            .await
            .ok_or_else(|| AppError::Internal("ride actor dropped response".to_string()))?
    }

    /// Attach a route trace produced by the routing collaborator. Fire and
    /// forget; a trace arriving after a terminal transition is discarded.
    pub fn attach_route(&self, trace: RouteTrace) {
        let _ = self.cmd_tx.send(RideMsg::AttachRoute { trace });
    }

    /// Report a driver position (device telemetry or simulated). Stale or
    /// out-of-state reports are dropped inside the actor, never surfaced.
    pub fn report_location(&self, driver_id: DriverId, location: Location, seq: Seq) {
        let _ = self.cmd_tx.send(RideMsg::ReportLocation {
            driver_id,
            location,
            seq,
        });
    }
}

pub struct RideActor {
    ride: Ride,
    registry: Arc<AvailabilityRegistry>,
    rides: Arc<DashMap<RideId, RideHandle>>,
    relay_tx: broadcast::Sender<ServerEvent>,
    cmd_tx: mpsc::UnboundedSender<RideMsg>,
    /// Candidate snapshot taken at dispatch time.
    candidates: Vec<DriverId>,
    settings: DispatchSettings,
    forwarder: Option<ForwarderGuard>,
    last_seq: Option<Seq>,
}

impl RideActor {
    fn broadcast(&self, event: ServerEvent) {
        // no subscribers is fine; the rider may already be gone
        let _ = self.relay_tx.send(event);
    }

    /// Drop the ride from the shared table after a terminal transition; the
    /// run loop exits right after, so held handles then see a missing ride.
    fn finish(&mut self) {
        self.forwarder = None;
        self.rides.remove(&self.ride.id);
    }

    fn handle_accept(&mut self, driver_id: DriverId) -> Result<Ride, AppError> {
        match self.ride.status {
            RideStatus::Searching => {},
            RideStatus::Accepted | RideStatus::InProgress => {
                counter!(crate::metrics::RIDE_ACCEPT_LOST).increment(1);
                return Err(AppError::AlreadyAccepted {
                    ride_id: self.ride.id,
                });
            },
            from => {
                return Err(AppError::InvalidTransition {
                    from,
                    action: "accept",
                })
            },
        }

        // engages the driver; fails if they raced onto another ride
        self.registry.assign(&driver_id, self.ride.id)?;

        self.ride.status = RideStatus::Accepted;
        self.ride.assigned_driver_id = Some(driver_id.clone());
        counter!(crate::metrics::RIDE_ACCEPTED).increment(1);
        tracing::info!(ride_id = %self.ride.id, driver_id, "ride accepted");

        let resolved = ServerEvent::RideAccepted {
            ride_id: self.ride.id,
            driver_id: driver_id.clone(),
        };
        self.broadcast(resolved.clone());

        // dismiss the request on every losing candidate; best-effort and
        // non-blocking, a stalled connection must not wedge this ride's queue
        for candidate in &self.candidates {
            if *candidate == driver_id {
                continue;
            }
            self.registry.clear_pending(candidate, self.ride.id);
            self.registry.try_send(candidate, resolved.clone());
        }

        Ok(self.ride.clone())
    }

    fn authorize_cancel(&self, requested_by: &str) -> Result<(), AppError> {
        if self.ride.rider_id == requested_by
            || self.ride.assigned_driver_id.as_deref() == Some(requested_by)
        {
            Ok(())
        } else {
            Err(AppError::NotAssignedDriver(requested_by.to_string()))
        }
    }

    fn require_assigned(&self, driver_id: &str) -> Result<(), AppError> {
        if self.ride.assigned_driver_id.as_deref() == Some(driver_id) {
            Ok(())
        } else {
            Err(AppError::NotAssignedDriver(driver_id.to_string()))
        }
    }

    fn handle_start(&mut self, driver_id: &str) -> Result<(), AppError> {
        if self.ride.status != RideStatus::Accepted {
            return Err(AppError::InvalidTransition {
                from: self.ride.status,
                action: "start",
            });
        }
        self.require_assigned(driver_id)?;

        self.ride.status = RideStatus::InProgress;
        tracing::info!(ride_id = %self.ride.id, "trip started");
        self.broadcast(ServerEvent::TripStarted {
            ride_id: self.ride.id,
        });
        Ok(())
    }

    fn handle_complete(&mut self, driver_id: &str) -> Result<(), AppError> {
        if self.ride.status != RideStatus::InProgress {
            return Err(AppError::InvalidTransition {
                from: self.ride.status,
                action: "complete",
            });
        }
        self.require_assigned(driver_id)?;

        self.ride.status = RideStatus::Completed;
        counter!(crate::metrics::RIDE_COMPLETED).increment(1);
        self.registry.release(driver_id, self.ride.id);
        tracing::info!(ride_id = %self.ride.id, "trip completed");
        self.broadcast(ServerEvent::TripEnded {
            ride_id: self.ride.id,
        });
        self.finish();
        Ok(())
    }

    fn handle_cancel(&mut self, cancelled_by: CancelParty) -> Result<(), AppError> {
        if self.ride.status.is_terminal() {
            return Err(AppError::InvalidTransition {
                from: self.ride.status,
                action: "cancel",
            });
        }
        let was_searching = self.ride.status == RideStatus::Searching;

        self.ride.status = RideStatus::Cancelled;
        counter!(crate::metrics::RIDE_CANCELLED).increment(1);

        if was_searching {
            for candidate in &self.candidates {
                self.registry.clear_pending(candidate, self.ride.id);
            }
        }
        if let Some(driver_id) = self.ride.assigned_driver_id.clone() {
            self.registry.release(&driver_id, self.ride.id);
        }
        tracing::info!(ride_id = %self.ride.id, ?cancelled_by, "trip cancelled");
        self.broadcast(ServerEvent::TripCancelled {
            ride_id: self.ride.id,
            cancelled_by,
        });
        self.finish();
        Ok(())
    }

    fn handle_attach_route(&mut self, trace: RouteTrace) {
        if !self.ride.status.is_active() {
            tracing::debug!(ride_id = %self.ride.id, "route trace arrived for inactive ride, discarding");
            return;
        }
        let Some(driver_id) = self.ride.assigned_driver_id.clone() else {
            return;
        };
        if trace.is_empty() {
            return;
        }

        // idempotent restart: a new stream always replaces the old one
        self.forwarder = None;
        self.last_seq = None;
        self.forwarder = Some(spawn_forwarder(
            self.ride.id,
            driver_id,
            trace,
            self.settings.location_update_period(),
            self.cmd_tx.clone(),
        ));
    }

    fn handle_report_location(&mut self, driver_id: DriverId, location: Location, seq: Seq) {
        // status re-checked on every emission; a late tick after a terminal
        // transition must produce nothing
        if !self.ride.status.is_active() {
            return;
        }
        if self.ride.assigned_driver_id.as_deref() != Some(driver_id.as_str()) {
            return;
        }
        if let Some(last) = self.last_seq {
            if seq <= last {
                counter!(crate::metrics::LOCATION_STALE_DROPPED).increment(1);
                let err = AppError::StaleUpdate { seq, last };
                tracing::debug!(ride_id = %self.ride.id, %err, "dropping location update");
                return;
            }
        }
        self.last_seq = Some(seq);
        self.registry.set_location(&driver_id, location.clone());
        counter!(crate::metrics::LOCATION_FORWARDED).increment(1);
        self.broadcast(ServerEvent::UpdateLocation {
            ride_id: self.ride.id,
            driver_id,
            location,
            seq,
        });
    }

    fn handle_accept_timeout(&mut self) {
        if self.ride.status != RideStatus::Searching {
            return;
        }
        counter!(crate::metrics::RIDE_UNMATCHED).increment(1);
        tracing::info!(ride_id = %self.ride.id, "no driver accepted within the dispatch window");
        self.broadcast(ServerEvent::NoDriverAvailable {
            ride_id: self.ride.id,
        });
        // free candidates for other requests either way
        for candidate in &self.candidates {
            self.registry.clear_pending(candidate, self.ride.id);
        }
        if self.settings.cancel_unmatched {
            let _ = self.handle_cancel(CancelParty::System);
        }
    }

    fn handle_driver_disconnected(&mut self, driver_id: &str) {
        if self.ride.status.is_active()
            && self.ride.assigned_driver_id.as_deref() == Some(driver_id)
        {
            tracing::warn!(ride_id = %self.ride.id, driver_id, "assigned driver lost mid-trip");
            self.broadcast(ServerEvent::DriverLost {
                ride_id: self.ride.id,
            });
            let _ = self.handle_cancel(CancelParty::System);
            return;
        }
        // a lost candidate just shrinks the dispatch snapshot
        self.candidates.retain(|c| c != driver_id);
    }

    fn handle(&mut self, msg: RideMsg) {
        match msg {
            RideMsg::Accept { driver_id, resp_tx } => {
                let _ = resp_tx.send(self.handle_accept(driver_id));
            },
            RideMsg::Start { driver_id, resp_tx } => {
                let _ = resp_tx.send(self.handle_start(&driver_id));
            },
            RideMsg::Complete { driver_id, resp_tx } => {
                let _ = resp_tx.send(self.handle_complete(&driver_id));
            },
            RideMsg::Cancel {
                requested_by,
                cancelled_by,
                resp_tx,
            } => {
                let result = self
                    .authorize_cancel(&requested_by)
                    .and_then(|()| self.handle_cancel(cancelled_by));
                let _ = resp_tx.send(result);
            },
            RideMsg::AttachRoute { trace } => self.handle_attach_route(trace),
            RideMsg::ReportLocation {
                driver_id,
                location,
                seq,
            } => self.handle_report_location(driver_id, location, seq),
            RideMsg::AcceptTimeout => self.handle_accept_timeout(),
            RideMsg::DriverDisconnected { driver_id } => {
                self.handle_driver_disconnected(&driver_id);
            },
        }
    }

    /// Process commands until the ride reaches a terminal status, then stop.
    /// The actor holds a clone of its own `cmd_tx` for the forwarder path, so
    /// the loop must exit on state, not on channel closure, or the task would
    /// outlive the ride.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RideMsg>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg);
            if self.ride.status.is_terminal() {
                break;
            }
        }
        // answer whatever was already queued, then let the task end; later
        // sends fail and surface as a missing ride to the caller
        rx.close();
        while let Ok(msg) = rx.try_recv() {
            self.handle(msg);
        }
    }
}

/// Spawn a new ride actor seeded with the dispatch-time candidate snapshot
/// and return its handle.
pub fn spawn_ride_actor(
    ride: Ride,
    candidates: Vec<DriverId>,
    registry: Arc<AvailabilityRegistry>,
    rides: Arc<DashMap<RideId, RideHandle>>,
    settings: DispatchSettings,
) -> RideHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (relay_tx, _) = broadcast::channel(settings.relay_buffer.max(1));

    let handle = RideHandle {
        ride_id: ride.id,
        cmd_tx: cmd_tx.clone(),
        relay_tx: relay_tx.clone(),
    };

    let actor = RideActor {
        ride,
        registry,
        rides,
        relay_tx,
        cmd_tx,
        candidates,
        settings,
        forwarder: None,
        last_seq: None,
    };
    tokio::spawn(actor.run(cmd_rx));

    handle
}
