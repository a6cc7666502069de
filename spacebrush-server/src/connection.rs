//! Per-connection bookkeeping for listen streams.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Notify;

/// Signals shared between a listen worker and the rest of the server.
///
/// Each is a single-slot signal: posting stores at most one permit, so
/// repeated posts between waits coalesce into one wake-up.
#[derive(Default)]
pub struct ConnectionSignals {
    /// Posted when the connection has pending notifications to drain.
    pub wake: Notify,
    /// Asks the listen worker to exit at its next wait point.
    pub shutdown_request: Notify,
    /// Posted by the worker once it has deregistered.
    pub shutdown_done: Notify,
}

/// How far into one brush stroke a connection has been caught up.
pub(crate) struct BrushCursor {
    /// The anchor the stroke lives on; used to drop cursors for anchors
    /// the user no longer claims.
    pub anchor_id: String,
    /// Number of leading poses already delivered on this connection.
    pub poses_sent: usize,
}

impl BrushCursor {
    pub fn new(anchor_id: String) -> Self {
        Self {
            anchor_id,
            poses_sent: 0,
        }
    }
}

/// Registry entry for one active listen stream.
///
/// Everything here is guarded by the scene lock; only `signals` is shared
/// with the worker task outside it. The dirty-sets are drained into one
/// outbound frame at a time by the fan-out step.
pub(crate) struct ConnectionState {
    /// Distinguishes this connection from a successor for the same user.
    pub id: u64,
    /// App version reported at register time.
    pub app_version: String,
    /// Wake and lifecycle signals for the worker task.
    pub signals: Arc<ConnectionSignals>,
    /// Stroke id → delivery progress for this connection.
    pub brush_cursor: HashMap<String, BrushCursor>,
    /// Users whose latest state should be re-sent.
    pub notify_users: HashSet<String>,
    /// Stroke id → anchor id, pending add or continuation delivery.
    pub notify_brush_adds: HashMap<String, String>,
    /// Stroke id → anchor id, pending removal delivery.
    pub notify_brush_removes: HashMap<String, String>,
    /// Model id → anchor id, pending delivery.
    pub notify_model_adds: HashMap<String, String>,
    /// Model id → anchor id, pending removal delivery.
    pub notify_model_removes: HashMap<String, String>,
}

impl ConnectionState {
    pub fn new(id: u64, app_version: &str, signals: Arc<ConnectionSignals>) -> Self {
        Self {
            id,
            app_version: app_version.to_string(),
            signals,
            brush_cursor: HashMap::new(),
            notify_users: HashSet::new(),
            notify_brush_adds: HashMap::new(),
            notify_brush_removes: HashMap::new(),
            notify_model_adds: HashMap::new(),
            notify_model_removes: HashMap::new(),
        }
    }
}
