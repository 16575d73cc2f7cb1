use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::auth::Identity;
use crate::error::AppError;
use crate::models::trip::{Trip, TripId};
use crate::services::storage::TripStore;
use crate::services::visibility::VisibilityPolicy;

/// A mutation as reported by the façade. Removal variants carry the
/// pre-mutation document so visibility can be decided on what the viewer
/// actually had in its cache, not on the already-flagged document.
#[derive(Debug, Clone)]
pub enum Mutation {
    Created(Trip),
    Updated { before: Trip, after: Trip },
    Removed(Trip),
    Merged { sources: Vec<Trip>, merged: Trip },
    Cleared,
}

/// Wire events pushed to viewers. Event names match the original dashboard
/// protocol so existing clients keep working.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Snapshot in response to `tripsRequested`.
    TripsUpdated(Vec<Trip>),
    TripCreated(Trip),
    TripUpdated(Trip),
    /// Soft delete, or an update that moved the trip out of the viewer's
    /// visibility; the client purges by id either way.
    TripRemoved(TripId),
    /// One atomic batch per merge: removals plus the consolidated trip, so a
    /// client never applies them in separate frames.
    #[serde(rename_all = "camelCase")]
    TripsMerged {
        removed_ids: Vec<TripId>,
        merged: Option<Trip>,
    },
    TripsCleared,
    VehiclesUpdated(Vec<crate::models::vehicle::Vehicle>),
}

struct Viewer {
    identity: Identity,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

/// Registry of connected viewers and the fan-out point for mutations. One
/// instance per process, constructed with its store injected; never resolved
/// from ambient global state.
///
/// Each viewer is tagged with the identity resolved at connect time; a role
/// change mid-connection is not live-applied (known limitation, the client
/// reconnects on re-login).
pub struct SyncHub {
    store: Arc<dyn TripStore>,
    policy: VisibilityPolicy,
    viewers: RwLock<HashMap<String, Viewer>>,
}

impl SyncHub {
    pub fn new(store: Arc<dyn TripStore>, policy: VisibilityPolicy) -> Self {
        Self {
            store,
            policy,
            viewers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a viewer. Returns the receiver half the transport pumps into
    /// the socket.
    pub async fn connect(
        &self,
        conn_id: String,
        identity: Identity,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let viewer = Viewer {
            identity,
            sender: tx,
        };
        self.viewers.write().await.insert(conn_id, viewer);
        rx
    }

    pub async fn disconnect(&self, conn_id: &str) {
        self.viewers.write().await.remove(conn_id);
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.read().await.len()
    }

    /// Direct reply to one viewer (snapshot responses). Send failures are
    /// left to the disconnect path to clean up.
    pub async fn send_to(&self, conn_id: &str, event: ServerEvent) {
        let viewers = self.viewers.read().await;
        if let Some(viewer) = viewers.get(conn_id) {
            if viewer.sender.send(event).is_err() {
                debug!(conn_id = %conn_id, "viewer channel closed during direct send");
            }
        }
    }

    /// Current trip set visible to one viewer: role filter plus the listing
    /// temporal floor, computed from the identity captured at connect time.
    pub async fn snapshot(
        &self,
        conn_id: &str,
        floor: chrono::Duration,
    ) -> Result<Vec<Trip>, AppError> {
        let viewers = self.viewers.read().await;
        let viewer = viewers.get(conn_id).ok_or(AppError::NotFound)?;
        let filter = self
            .policy
            .build_filter(&viewer.identity)
            .with_floor(Utc::now() - floor);
        self.store.find_many(&filter).await
    }

    /// Fan a mutation out to every connected viewer, filtered per viewer by
    /// the visibility policy. A dead channel never blocks the others; the
    /// stale entry is pruned afterwards.
    pub async fn notify(&self, mutation: &Mutation) {
        let mut dead = Vec::new();
        {
            let viewers = self.viewers.read().await;
            for (conn_id, viewer) in viewers.iter() {
                let Some(event) = self.event_for(mutation, &viewer.identity) else {
                    continue;
                };
                if viewer.sender.send(event).is_err() {
                    debug!(conn_id = %conn_id, "viewer channel closed, scheduling cleanup");
                    dead.push(conn_id.clone());
                }
            }
        }
        if !dead.is_empty() {
            let mut viewers = self.viewers.write().await;
            for conn_id in dead {
                viewers.remove(&conn_id);
                warn!(conn_id = %conn_id, "removed unreachable viewer");
            }
        }
    }

    /// Decide what, if anything, one viewer receives for a mutation.
    fn event_for(&self, mutation: &Mutation, identity: &Identity) -> Option<ServerEvent> {
        match mutation {
            Mutation::Created(trip) => self
                .policy
                .is_visible_to(trip, identity)
                .then(|| ServerEvent::TripCreated(trip.clone())),
            Mutation::Updated { before, after } => {
                if self.policy.is_visible_to(after, identity) {
                    Some(ServerEvent::TripUpdated(after.clone()))
                } else if self.policy.is_visible_to(before, identity) {
                    // The update moved the trip out of this viewer's filter;
                    // the stale cached document must be purged.
                    Some(ServerEvent::TripRemoved(after.id))
                } else {
                    // A viewer who never saw the trip hears nothing about it.
                    None
                }
            }
            Mutation::Removed(before) => self
                .policy
                .is_visible_to(before, identity)
                .then_some(ServerEvent::TripRemoved(before.id)),
            Mutation::Merged { sources, merged } => {
                let removed_ids: Vec<TripId> = sources
                    .iter()
                    .filter(|t| self.policy.is_visible_to(t, identity))
                    .map(|t| t.id)
                    .collect();
                let merged_visible = self
                    .policy
                    .is_visible_to(merged, identity)
                    .then(|| merged.clone());
                if removed_ids.is_empty() && merged_visible.is_none() {
                    return None;
                }
                Some(ServerEvent::TripsMerged {
                    removed_ids,
                    merged: merged_visible,
                })
            }
            Mutation::Cleared => Some(ServerEvent::TripsCleared),
        }
    }
}
