//! Eventually consistent shared-scene state for SpaceBrush.
//!
//! The whole scene — users, anchors, strokes, models, and every
//! connection's pending-notification bookkeeping — lives behind one
//! mutex. The lock is held across a single update application, a single
//! outbound frame composition, a single expiry sweep, or a single query,
//! and never across a send or a channel wait. A finer locking scheme is
//! tempting, but the cross-anchor fan-out step would need ordered
//! acquisition and the scene is small; measure before changing this.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::connection::{BrushCursor, ConnectionSignals, ConnectionState};
use crate::messages::{
    AnchoredId, BrushStroke, ExternalModel, MIN_APP_VERSION, QueryUsersResponse, RpcRequest,
    RpcResponse, SERVER_VERSION, ServerInfo, ServerUpdate, SpaceInfo, UpdateRequest,
    UpdateResponse, UserQueryResult, UserState,
};

/// How often the expiry sweep runs.
pub const PERIODIC_CHECKS_INTERVAL: Duration = Duration::from_secs(1);

/// How long a user may go silent before being evicted from the scene.
pub const USER_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound between consecutive frames on an idle listen stream.
pub const PING_INTERVAL: Duration = Duration::from_secs(1);

/// The authoritative in-memory model of the shared scene.
///
/// Memory-resident only; the scene is lost on restart and clients are
/// expected to re-upload after reconnecting.
#[derive(Default)]
pub struct Scene {
    /// State modified by critical sections of the code.
    state: Mutex<SceneState>,
    /// Incremented to obtain unique connection IDs.
    count: AtomicU64,
    /// Tells the expiry loop to stop.
    expiry_stop: Notify,
    /// Posted by the expiry loop once it has stopped.
    expiry_done: Notify,
}

/// Shared state involving multiple users, protected by a lock.
#[derive(Default)]
struct SceneState {
    shutting_down: bool,
    users: HashMap<String, UserRecord>,
    anchors: HashMap<String, AnchorRecord>,
    connections: HashMap<String, ConnectionState>,
}

/// Everything the server knows about one named user.
struct UserRecord {
    last_ping: Instant,
    state: UserState,
    space_info: Option<SpaceInfo>,
}

/// Strokes and models attached to one spatial anchor, plus its claimants.
///
/// Anchors are created lazily on first claim and never deleted, even when
/// empty, so a returning user sees prior content.
#[derive(Default)]
struct AnchorRecord {
    users: HashSet<String>,
    brush_strokes: HashMap<String, BrushStroke>,
    external_models: HashMap<String, ExternalModel>,
}

/// Compares the ordered anchor-id lists of two space reports.
///
/// Poses and space metadata are ignored; a difference in length or in any
/// id at any position counts as a change.
fn anchor_ids_equal(a: Option<&SpaceInfo>, b: Option<&SpaceInfo>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.anchors.len() == b.anchors.len()
                && a.anchors.iter().zip(&b.anchors).all(|(x, y)| x.id == y.id)
        }
        _ => false,
    }
}

/// Withdraws `user_name` from every anchor named by `space_info`.
fn withdraw_anchors(
    anchors: &mut HashMap<String, AnchorRecord>,
    space_info: Option<&SpaceInfo>,
    user_name: &str,
) {
    let Some(space_info) = space_info else { return };
    for anchor in &space_info.anchors {
        if let Some(record) = anchors.get_mut(&anchor.id) {
            record.users.remove(user_name);
        }
    }
}

impl Scene {
    /// Creates an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one inbound client update atomically and fans out change
    /// notifications to every connection sharing an anchor with it.
    ///
    /// Returns a response only when the update embeds a users query; the
    /// streaming endpoint treats a response as a programmer error.
    pub async fn apply_update(&self, req: UpdateRequest) -> Option<UpdateResponse> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let user_name = req.user_state.user_name.clone();

        match state.users.entry(user_name.clone()) {
            Entry::Vacant(entry) => {
                info!(
                    "user {user_name} ({}): first state update received",
                    req.user_state.user_display_name
                );
                entry.insert(UserRecord {
                    last_ping: Instant::now(),
                    state: req.user_state.clone(),
                    space_info: None,
                });
            }
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.last_ping = Instant::now();
                if record.state.user_display_name != req.user_state.user_display_name {
                    info!(
                        "user {user_name} ({}): display name updated from {}",
                        req.user_state.user_display_name, record.state.user_display_name
                    );
                }
                record.state = req.user_state.clone();
            }
        }

        if let Some(space_info) = req.space_info {
            let previous = state.users.get(&user_name).and_then(|r| r.space_info.as_ref());
            if !anchor_ids_equal(Some(&space_info), previous) {
                state.remove_user_anchors(&user_name);
                for anchor in &space_info.anchors {
                    state
                        .anchors
                        .entry(anchor.id.clone())
                        .or_default()
                        .users
                        .insert(user_name.clone());
                }
                info!(
                    "user {user_name}: localized anchors updated: {:?} (space {}: {})",
                    space_info.anchors.iter().map(|a| &a.id).collect::<Vec<_>>(),
                    space_info.space_name,
                    space_info.space_id
                );
                if let Some(record) = state.users.get_mut(&user_name) {
                    record.space_info = Some(space_info);
                }
                state.seed_connection(&user_name);
            } else {
                debug!("user {user_name}: anchors re-reported with no id changes");
                if let Some(record) = state.users.get_mut(&user_name) {
                    record.space_info = Some(space_info);
                }
            }
        }

        state.distribute_user_changes(&user_name, req.echo);

        if let Some(mut stroke) = req.brush_stroke_add {
            // An unknown anchor id is dropped silently; the sender's next
            // space report reconciles the difference.
            if let Some(anchor) = state.anchors.get_mut(&stroke.anchor_id) {
                let anchor_id = stroke.anchor_id.clone();
                let stroke_id = stroke.id.clone();
                let new_poses = stroke.poses.len();
                let (start_index, total_poses);
                match anchor.brush_strokes.entry(stroke_id.clone()) {
                    Entry::Occupied(mut entry) => {
                        let existing = entry.get_mut();
                        if stroke.start_index < existing.poses.len() {
                            existing.poses.truncate(stroke.start_index);
                        }
                        existing.poses.append(&mut stroke.poses);
                        start_index = stroke.start_index;
                        total_poses = existing.poses.len();
                    }
                    Entry::Vacant(entry) => {
                        if stroke.start_index != 0 {
                            warn!("added brush stroke has unexpected start index, data loss likely");
                            stroke.start_index = 0;
                        }
                        start_index = 0;
                        total_poses = stroke.poses.len();
                        entry.insert(stroke);
                    }
                }
                state.distribute_brush_add(&anchor_id, &stroke_id, start_index, &user_name, req.echo);
                if start_index > 0 {
                    debug!(
                        "user {user_name}: appended to brush stroke {stroke_id} on anchor \
                         {anchor_id}, {new_poses} new poses, {total_poses} total poses"
                    );
                } else {
                    debug!(
                        "user {user_name}: started brush stroke {stroke_id} on anchor \
                         {anchor_id}, {total_poses} poses"
                    );
                }
            }
        }

        if let Some(remove) = req.brush_stroke_remove {
            if let Some(anchor) = state.anchors.get_mut(&remove.anchor_id) {
                anchor.brush_strokes.remove(&remove.id);
                state.distribute_brush_remove(&remove.anchor_id, &remove.id, &user_name, req.echo);
                debug!(
                    "user {user_name}: removed brush stroke {} from anchor {}",
                    remove.id, remove.anchor_id
                );
            }
        }

        if let Some(model) = req.external_model_add {
            if let Some(anchor) = state.anchors.get_mut(&model.anchor_id) {
                let anchor_id = model.anchor_id.clone();
                let model_id = model.id.clone();
                let file_name = model.file_name.clone();
                anchor.external_models.insert(model_id.clone(), model);
                state.distribute_model_add(&anchor_id, &model_id, &user_name, req.echo);
                debug!(
                    "user {user_name}: created or updated model {model_id} ({file_name}) \
                     on anchor {anchor_id}"
                );
            }
        }

        if let Some(remove) = req.external_model_remove {
            if let Some(anchor) = state.anchors.get_mut(&remove.anchor_id) {
                anchor.external_models.remove(&remove.id);
                state.distribute_model_remove(&remove.anchor_id, &remove.id, &user_name, req.echo);
                debug!(
                    "user {user_name}: removed model {} from anchor {}",
                    remove.id, remove.anchor_id
                );
            }
        }

        if req.query_users.is_some() {
            return Some(UpdateResponse {
                query_users_response: Some(state.query_users(&user_name)),
            });
        }
        None
    }

    /// Handles one unary rpc envelope.
    pub async fn handle_rpc(&self, req: RpcRequest) -> RpcResponse {
        let state = self.state.lock().await;
        let mut resp = RpcResponse::default();
        if req.query_users.is_some() {
            resp.query_users_response = Some(state.query_users(&req.user_name));
        }
        resp
    }

    /// Registers a listen stream for `user_name`, first draining any
    /// previous connection for the same identity.
    ///
    /// The wait for the predecessor happens outside the lock: its worker
    /// needs the lock to finalize its own state, so waiting under the lock
    /// would self-deadlock.
    pub(crate) async fn register(
        &self,
        user_name: &str,
        app_version: &str,
    ) -> (u64, Arc<ConnectionSignals>) {
        let existing = {
            let state = self.state.lock().await;
            state.connections.get(user_name).map(|conn| Arc::clone(&conn.signals))
        };
        if let Some(existing) = existing {
            info!("user {user_name}: shutting down existing listen channel...");
            existing.shutdown_request.notify_one();
            existing.shutdown_done.notified().await;
            info!("user {user_name}: existing listen channel shut down");
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let id = self.count.fetch_add(1, Ordering::Relaxed);
        let signals = Arc::new(ConnectionSignals::default());
        state.connections.insert(
            user_name.to_string(),
            ConnectionState::new(id, app_version, Arc::clone(&signals)),
        );
        info!(
            "user {user_name} (version {app_version}): starting listen channel \
             ({} users now connected)",
            state.connections.len()
        );
        state.seed_connection(user_name);
        (id, signals)
    }

    /// Removes a listen stream from the registry, unless a successor for
    /// the same user has already replaced it.
    pub(crate) async fn unregister(&self, user_name: &str, conn_id: u64) {
        let mut state = self.state.lock().await;
        if state
            .connections
            .get(user_name)
            .is_some_and(|conn| conn.id == conn_id)
        {
            state.connections.remove(user_name);
        }
        info!(
            "user {user_name}: listen channel shut down ({} users now connected)",
            state.connections.len()
        );
    }

    /// Drains the connection's dirty-sets into one outbound frame.
    ///
    /// Returns `None` once the connection has been replaced or the server
    /// is shutting down; the worker should exit its loop.
    pub(crate) async fn compose_update(
        &self,
        user_name: &str,
        conn_id: u64,
        sent_server_info: &mut bool,
    ) -> Option<ServerUpdate> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.shutting_down {
            return None;
        }
        let SceneState {
            users,
            anchors,
            connections,
            ..
        } = state;
        let conn = connections.get_mut(user_name)?;
        if conn.id != conn_id {
            return None;
        }

        let mut update = ServerUpdate::default();

        if !*sent_server_info {
            debug!("user {user_name} (app {}): sending server info", conn.app_version);
            update.server_info = Some(ServerInfo {
                server_version: SERVER_VERSION.to_string(),
                min_app_version: MIN_APP_VERSION.to_string(),
            });
            *sent_server_info = true;
        }

        for name in conn.notify_users.drain() {
            if let Some(record) = users.get(&name) {
                update.user_state.push(record.state.clone());
            }
        }

        // At most one brush stroke per frame: bounding a frame to one
        // stroke caps its size and streams a long stroke to a
        // catching-up peer over multiple ticks. Entries whose stroke is
        // already gone are consumed and skipped.
        while let Some(stroke_id) = conn.notify_brush_adds.keys().next().cloned() {
            let Some(anchor_id) = conn.notify_brush_adds.remove(&stroke_id) else {
                break;
            };
            let Some(stroke) = anchors
                .get(&anchor_id)
                .and_then(|anchor| anchor.brush_strokes.get(&stroke_id))
            else {
                continue;
            };
            let cursor = conn
                .brush_cursor
                .entry(stroke_id.clone())
                .or_insert_with(|| BrushCursor::new(anchor_id.clone()));
            if cursor.poses_sent < stroke.poses.len() {
                let send = if cursor.poses_sent == 0 {
                    stroke.clone()
                } else {
                    BrushStroke {
                        id: stroke.id.clone(),
                        anchor_id: stroke.anchor_id.clone(),
                        start_index: cursor.poses_sent,
                        poses: stroke.poses[cursor.poses_sent..].to_vec(),
                        ..Default::default()
                    }
                };
                debug!(
                    "user {user_name}: sending brush stroke {} update from {}: \
                     {} new poses, {} total poses",
                    stroke.id,
                    stroke.user_name,
                    send.poses.len(),
                    send.start_index + send.poses.len()
                );
                cursor.poses_sent = stroke.poses.len();
                update.brush_stroke_add.push(send);
            }
            break;
        }
        if !conn.notify_brush_adds.is_empty() {
            // More strokes are already pending: make the next tick fire
            // immediately instead of waiting out the ping interval.
            conn.signals.wake.notify_one();
        }

        for (id, anchor_id) in conn.notify_brush_removes.drain() {
            debug!("user {user_name}: sending brush stroke remove for {id}");
            update.brush_stroke_remove.push(AnchoredId { id, anchor_id });
        }

        for (model_id, anchor_id) in conn.notify_model_adds.drain() {
            if let Some(model) = anchors
                .get(&anchor_id)
                .and_then(|anchor| anchor.external_models.get(&model_id))
            {
                debug!(
                    "user {user_name}: sending model {} ({}) update from {}",
                    model.id, model.file_name, model.modified_by
                );
                update.external_model_add.push(model.clone());
            }
        }

        for (id, anchor_id) in conn.notify_model_removes.drain() {
            debug!("user {user_name}: sending model remove for {id}");
            update.external_model_remove.push(AnchoredId { id, anchor_id });
        }

        Some(update)
    }

    /// Evicts every user whose last update is older than [`USER_TIMEOUT`],
    /// withdrawing it from all claimed anchors.
    pub async fn sweep_expired(&self) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = Instant::now();
        let expired: Vec<String> = state
            .users
            .iter()
            .filter(|(_, record)| now > record.last_ping + USER_TIMEOUT)
            .map(|(name, _)| name.clone())
            .collect();
        for user_name in expired {
            if let Some(record) = state.users.remove(&user_name) {
                withdraw_anchors(&mut state.anchors, record.space_info.as_ref(), &user_name);
                info!("user {user_name}: expiring due to timeout");
            }
        }
    }

    /// Runs the periodic expiry sweep until [`Scene::shut_down`] is called,
    /// then acknowledges and returns.
    pub async fn run_periodic_checks(&self) {
        loop {
            tokio::select! {
                _ = self.expiry_stop.notified() => {
                    info!("periodic checks shutting down...");
                    self.expiry_done.notify_one();
                    return;
                }
                _ = time::sleep(PERIODIC_CHECKS_INTERVAL) => {}
            }
            self.sweep_expired().await;
        }
    }

    /// Begins orderly shutdown: stops the expiry loop and asks every listen
    /// worker to exit at its next wait point.
    ///
    /// Waits only for the expiry loop's acknowledgement; per-connection
    /// requests are posted without waiting, so a slow connection can
    /// outlive this call.
    pub async fn shut_down(&self) {
        {
            let mut state = self.state.lock().await;
            state.shutting_down = true;
            self.expiry_stop.notify_one();
            for conn in state.connections.values() {
                conn.signals.shutdown_request.notify_one();
            }
        }
        self.expiry_done.notified().await;
    }

    /// Current number of users, anchors, and connections.
    pub async fn counts(&self) -> (usize, usize, usize) {
        let state = self.state.lock().await;
        (
            state.users.len(),
            state.anchors.len(),
            state.connections.len(),
        )
    }
}

impl SceneState {
    /// Withdraws the user from every anchor named by its stored report.
    fn remove_user_anchors(&mut self, user_name: &str) {
        let Self { users, anchors, .. } = self;
        let space_info = users.get(user_name).and_then(|r| r.space_info.as_ref());
        withdraw_anchors(anchors, space_info, user_name);
    }

    /// Marks the sender's latest state for delivery to every user sharing
    /// at least one anchor with it.
    fn distribute_user_changes(&mut self, sender: &str, echo: bool) {
        let Self {
            users,
            anchors,
            connections,
            ..
        } = self;
        let Some(space_info) = users.get(sender).and_then(|r| r.space_info.as_ref()) else {
            return;
        };

        let mut to_notify: HashSet<&String> = HashSet::new();
        for anchor in &space_info.anchors {
            if let Some(record) = anchors.get(&anchor.id) {
                to_notify.extend(record.users.iter());
            }
        }

        for name in to_notify {
            if name == sender && !echo {
                continue;
            }
            if let Some(conn) = connections.get_mut(name) {
                conn.notify_users.insert(sender.to_string());
                conn.signals.wake.notify_one();
            }
        }
    }

    /// Marks a stroke add/continuation for delivery to the anchor's users,
    /// rewinding any cursor already past the new start index.
    fn distribute_brush_add(
        &mut self,
        anchor_id: &str,
        stroke_id: &str,
        start_index: usize,
        sender: &str,
        echo: bool,
    ) {
        let Self {
            anchors,
            connections,
            ..
        } = self;
        let Some(anchor) = anchors.get(anchor_id) else { return };
        for name in &anchor.users {
            if name == sender && !echo {
                continue;
            }
            if let Some(conn) = connections.get_mut(name) {
                if let Some(cursor) = conn.brush_cursor.get_mut(stroke_id) {
                    if start_index < cursor.poses_sent {
                        cursor.poses_sent = start_index;
                    }
                }
                conn.notify_brush_adds
                    .insert(stroke_id.to_string(), anchor_id.to_string());
                conn.signals.wake.notify_one();
            }
        }
    }

    /// Marks a stroke removal for delivery to the anchor's users.
    fn distribute_brush_remove(&mut self, anchor_id: &str, stroke_id: &str, sender: &str, echo: bool) {
        let Self {
            anchors,
            connections,
            ..
        } = self;
        let Some(anchor) = anchors.get(anchor_id) else { return };
        for name in &anchor.users {
            if name == sender && !echo {
                continue;
            }
            if let Some(conn) = connections.get_mut(name) {
                conn.notify_brush_removes
                    .insert(stroke_id.to_string(), anchor_id.to_string());
                conn.signals.wake.notify_one();
            }
        }
    }

    /// Marks a model add/update for delivery to the anchor's users.
    fn distribute_model_add(&mut self, anchor_id: &str, model_id: &str, sender: &str, echo: bool) {
        let Self {
            anchors,
            connections,
            ..
        } = self;
        let Some(anchor) = anchors.get(anchor_id) else { return };
        for name in &anchor.users {
            if name == sender && !echo {
                continue;
            }
            if let Some(conn) = connections.get_mut(name) {
                conn.notify_model_adds
                    .insert(model_id.to_string(), anchor_id.to_string());
                conn.signals.wake.notify_one();
            }
        }
    }

    /// Marks a model removal for delivery to the anchor's users.
    fn distribute_model_remove(&mut self, anchor_id: &str, model_id: &str, sender: &str, echo: bool) {
        let Self {
            anchors,
            connections,
            ..
        } = self;
        let Some(anchor) = anchors.get(anchor_id) else { return };
        for name in &anchor.users {
            if name == sender && !echo {
                continue;
            }
            if let Some(conn) = connections.get_mut(name) {
                conn.notify_model_removes
                    .insert(model_id.to_string(), anchor_id.to_string());
                conn.signals.wake.notify_one();
            }
        }
    }

    /// Seeds the user's own connection with every stroke and model on
    /// every anchor it currently claims, and drops cursors for strokes on
    /// anchors no longer in the user's set.
    ///
    /// Called on register and whenever the user's anchor-id list changes.
    fn seed_connection(&mut self, user_name: &str) {
        let Self {
            users,
            anchors,
            connections,
            ..
        } = self;
        let Some(conn) = connections.get_mut(user_name) else { return };
        let Some(space_info) = users.get(user_name).and_then(|r| r.space_info.as_ref()) else {
            return;
        };

        let mut anchor_set = HashSet::new();
        for anchor in &space_info.anchors {
            anchor_set.insert(anchor.id.as_str());
            if let Some(record) = anchors.get(&anchor.id) {
                for stroke_id in record.brush_strokes.keys() {
                    conn.notify_brush_adds.insert(stroke_id.clone(), anchor.id.clone());
                }
                for model_id in record.external_models.keys() {
                    conn.notify_model_adds.insert(model_id.clone(), anchor.id.clone());
                }
            }
        }

        conn.brush_cursor
            .retain(|_, cursor| anchor_set.contains(cursor.anchor_id.as_str()));
    }

    /// Enumerates every known user.
    fn query_users(&self, caller: &str) -> QueryUsersResponse {
        let mut results = Vec::new();
        // Historical quirk: the debug line below names the last user
        // enumerated, not the caller.
        let mut logged_name = caller;
        for (user_name, record) in &self.users {
            logged_name = user_name;
            results.push(UserQueryResult {
                user_name: user_name.clone(),
                user_display_name: record.state.user_display_name.clone(),
                device_type: record.state.device_type.clone(),
                space_info: record.space_info.clone(),
            });
        }
        debug!(
            "user {logged_name}: queried users, {} results returned",
            results.len()
        );
        QueryUsersResponse { results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Pose, SpaceAnchor};

    fn space(ids: &[&str]) -> SpaceInfo {
        SpaceInfo {
            anchors: ids
                .iter()
                .map(|id| SpaceAnchor {
                    id: (*id).to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn poses(range: std::ops::Range<usize>) -> Vec<Pose> {
        range
            .map(|i| Pose {
                position: [i as f32, 0.0, 0.0],
                ..Default::default()
            })
            .collect()
    }

    fn update_with_space(name: &str, ids: &[&str]) -> UpdateRequest {
        UpdateRequest {
            user_state: UserState {
                user_name: name.to_string(),
                ..Default::default()
            },
            space_info: Some(space(ids)),
            ..Default::default()
        }
    }

    fn stroke_update(name: &str, stroke: BrushStroke) -> UpdateRequest {
        UpdateRequest {
            user_state: UserState {
                user_name: name.to_string(),
                ..Default::default()
            },
            brush_stroke_add: Some(stroke),
            ..Default::default()
        }
    }

    #[test]
    fn anchor_id_comparison_is_ordered() {
        assert!(anchor_ids_equal(None, None));
        assert!(!anchor_ids_equal(Some(&space(&["a"])), None));
        assert!(anchor_ids_equal(Some(&space(&["a", "b"])), Some(&space(&["a", "b"]))));
        assert!(!anchor_ids_equal(Some(&space(&["a", "b"])), Some(&space(&["b", "a"]))));
        assert!(!anchor_ids_equal(Some(&space(&["a"])), Some(&space(&["a", "b"]))));
    }

    #[test]
    fn anchor_id_comparison_ignores_poses() {
        let mut moved = space(&["a"]);
        moved.anchors[0].pose.position = [1.0, 2.0, 3.0];
        assert!(anchor_ids_equal(Some(&space(&["a"])), Some(&moved)));
    }

    #[tokio::test]
    async fn truncate_then_append_with_cursor_rewind() {
        let scene = Scene::new();
        let (conn_id, _signals) = scene.register("bob", "test").await;
        let mut sent_info = false;

        scene.apply_update(update_with_space("bob", &["x"])).await;
        scene.apply_update(update_with_space("alice", &["x"])).await;
        scene
            .apply_update(stroke_update(
                "alice",
                BrushStroke {
                    id: "s".to_string(),
                    anchor_id: "x".to_string(),
                    poses: poses(0..3),
                    ..Default::default()
                },
            ))
            .await;

        let update = scene
            .compose_update("bob", conn_id, &mut sent_info)
            .await
            .unwrap();
        assert_eq!(update.brush_stroke_add.len(), 1);
        assert_eq!(update.brush_stroke_add[0].start_index, 0);
        assert_eq!(update.brush_stroke_add[0].poses, poses(0..3));

        // Replacing the tail from index 2 rewinds the cursor, so only the
        // replaced range travels on the next frame.
        scene
            .apply_update(stroke_update(
                "alice",
                BrushStroke {
                    id: "s".to_string(),
                    anchor_id: "x".to_string(),
                    start_index: 2,
                    poses: poses(12..14),
                    ..Default::default()
                },
            ))
            .await;
        let update = scene
            .compose_update("bob", conn_id, &mut sent_info)
            .await
            .unwrap();
        assert_eq!(update.brush_stroke_add.len(), 1);
        assert_eq!(update.brush_stroke_add[0].start_index, 2);
        assert_eq!(update.brush_stroke_add[0].poses, poses(12..14));

        // A caught-up connection gets nothing further.
        let update = scene
            .compose_update("bob", conn_id, &mut sent_info)
            .await
            .unwrap();
        assert!(update.brush_stroke_add.is_empty());
    }

    #[tokio::test]
    async fn new_stroke_with_nonzero_start_is_reset() {
        let scene = Scene::new();
        let (conn_id, _signals) = scene.register("bob", "test").await;
        let mut sent_info = false;

        scene.apply_update(update_with_space("bob", &["x"])).await;
        scene
            .apply_update(stroke_update(
                "alice",
                BrushStroke {
                    id: "s".to_string(),
                    anchor_id: "x".to_string(),
                    start_index: 7,
                    poses: poses(0..2),
                    ..Default::default()
                },
            ))
            .await;

        let update = scene
            .compose_update("bob", conn_id, &mut sent_info)
            .await
            .unwrap();
        assert_eq!(update.brush_stroke_add.len(), 1);
        assert_eq!(update.brush_stroke_add[0].start_index, 0);
        assert_eq!(update.brush_stroke_add[0].poses, poses(0..2));
    }
}
