// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! Per-connection event handler.
//!
//! One `ConnectionHandler` is instantiated per WebSocket connection and routes
//! inbound client events to the registry, the dispatcher, and the ride
//! actors. The connection's subject identifier arrives from the identity
//! collaborator before any event is processed and is the only identity the
//! handler trusts: driver events claiming another driver id are rejected.

use crate::error::AppError;
use crate::ride_actor::{RideHandle, RideMsg};
use crate::validation;
use crate::AppState;
use rideshare_common::{CancelParty, ClientEvent, ServerEvent};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Role assigned to a connection by the identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Driver,
    Rider,
}

/// WebSocket handler for processing events from one connection.
pub struct ConnectionHandler {
    state: Arc<AppState>,
    subject: String,
    role: Role,
    tx: mpsc::Sender<ServerEvent>,
    /// Forwarding tasks from ride rooms this connection subscribed to.
    relay_tasks: Vec<JoinHandle<()>>,
}

impl ConnectionHandler {
    pub fn new(state: Arc<AppState>, subject: String, role: Role, tx: mpsc::Sender<ServerEvent>) -> Self {
        if role == Role::Driver {
            state.registry.connect(subject.clone(), tx.clone());
        }
        Self {
            state,
            subject,
            role,
            tx,
            relay_tasks: Vec::new(),
        }
    }

    fn require_role(&self, role: Role, action: &'static str) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::RoleMismatch(action))
        }
    }

    /// Pipe the ride's room onto this connection's outbound channel.
    fn subscribe_ride(&mut self, handle: &RideHandle) {
        let mut relay_rx = handle.subscribe();
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            loop {
                match relay_rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "ride relay lagged, dropping stale events");
                    },
                }
            }
        });
        self.relay_tasks.push(task);
    }

    /// Fetch the route off the entity locks and hand it to the ride actor.
    fn spawn_route_fetch(&self, handle: RideHandle, ride: &rideshare_common::Ride) {
        let planner = self.state.planner.clone();
        let pickup = ride.pickup_location.clone();
        let destination = ride.destination.clone();
        tokio::spawn(async move {
            match planner.plan(&pickup, &destination).await {
                Ok(Some(trace)) => handle.attach_route(trace),
                Ok(None) => {},
                Err(err) => {
                    tracing::warn!(ride_id = %handle.ride_id, %err, "route planning failed");
                },
            }
        });
    }

    /// Process one inbound client event. The returned event, if any, is the
    /// direct reply to this connection; room traffic flows separately through
    /// the subscriptions.
    pub async fn handle_event(
        &mut self,
        event: ClientEvent,
    ) -> Result<Option<ServerEvent>, AppError> {
        match event {
            ClientEvent::JoinAvailableDriversRoom => {
                self.require_role(Role::Driver, "join-available-drivers-room")?;
                self.state.registry.join(&self.subject)?;
                Ok(None)
            },
            ClientEvent::LeaveAvailableDriversRoom => {
                self.require_role(Role::Driver, "leave-available-drivers-room")?;
                self.state.registry.leave(&self.subject);
                Ok(None)
            },
            ClientEvent::RequestRide {
                pickup_location,
                destination,
                ride_type,
            } => {
                self.require_role(Role::Rider, "request-ride")?;
                validation::validate_ride_request(&pickup_location, &destination)?;

                let ride = rideshare_common::Ride::new(
                    self.subject.clone(),
                    pickup_location,
                    destination,
                    ride_type,
                );
                let snapshot = ride.clone();
                match self.state.dispatcher.dispatch(ride).await {
                    Ok((handle, _reached)) => {
                        self.subscribe_ride(&handle);
                        Ok(Some(ServerEvent::RideCreated { ride: snapshot }))
                    },
                    Err(AppError::NoDriverAvailable { ride_id }) => {
                        Ok(Some(ServerEvent::NoDriverAvailable { ride_id }))
                    },
                    Err(err) => Err(err),
                }
            },
            ClientEvent::AcceptRide { ride_id, driver_id } => {
                self.require_role(Role::Driver, "accept-ride")?;
                if driver_id != self.subject {
                    return Err(AppError::InvalidInput(
                        "accept-ride must carry the connection's own driver id".to_string(),
                    ));
                }
                let handle = self.state.dispatcher.ride(ride_id)?;
                let ride = handle.accept(self.subject.clone()).await?;
                self.subscribe_ride(&handle);
                self.spawn_route_fetch(handle, &ride);
                Ok(Some(ServerEvent::RideAccepted {
                    ride_id,
                    driver_id: self.subject.clone(),
                }))
            },
            ClientEvent::StartTrip { ride_id } => {
                self.require_role(Role::Driver, "start-trip")?;
                let handle = self.state.dispatcher.ride(ride_id)?;
                handle.start(self.subject.clone()).await?;
                Ok(None)
            },
            ClientEvent::EndTrip { ride_id } => {
                self.require_role(Role::Driver, "end-trip")?;
                let handle = self.state.dispatcher.ride(ride_id)?;
                handle.complete(self.subject.clone()).await?;
                Ok(None)
            },
            ClientEvent::CancelTrip { ride_id, .. } => {
                // the party is derived from the trusted role, not the
                // payload; the actor verifies the subject owns the ride
                let cancelled_by = match self.role {
                    Role::Rider => CancelParty::Rider,
                    Role::Driver => CancelParty::Driver,
                };
                let handle = self.state.dispatcher.ride(ride_id)?;
                handle.cancel(self.subject.clone(), cancelled_by).await?;
                Ok(None)
            },
            ClientEvent::UpdateLocation {
                driver_id,
                ride_id,
                location,
                seq,
            } => {
                self.require_role(Role::Driver, "update-location")?;
                if driver_id != self.subject {
                    return Err(AppError::InvalidInput(
                        "update-location must carry the connection's own driver id".to_string(),
                    ));
                }
                validation::validate_location(&location)?;
                // telemetry for a ride that already ended is not an error
                if let Ok(handle) = self.state.dispatcher.ride(ride_id) {
                    handle.report_location(self.subject.clone(), location, seq);
                }
                Ok(None)
            },
            ClientEvent::EstimateFare {
                pickup_location,
                destination,
                ride_type,
            } => {
                self.require_role(Role::Rider, "estimate-fare")?;
                validation::validate_ride_request(&pickup_location, &destination)?;
                let amount = self
                    .state
                    .fares
                    .estimate(&pickup_location, &destination, ride_type)
                    .await?;
                Ok(Some(ServerEvent::FareEstimate { amount }))
            },
        }
    }

    /// Transport-level disconnect: tear down subscriptions and, for drivers,
    /// run the availability self-heal and the active-ride cascade.
    pub async fn disconnected(&mut self) {
        for task in self.relay_tasks.drain(..) {
            task.abort();
        }
        if self.role == Role::Driver {
            if let Some(active_ride) = self.state.registry.disconnect(&self.subject) {
                if let Ok(handle) = self.state.dispatcher.ride(active_ride) {
                    let _ = handle.cmd_tx.send(RideMsg::DriverDisconnected {
                        driver_id: self.subject.clone(),
                    });
                }
            }
        }
    }
}
