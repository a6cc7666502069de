//! Wire message schema shared by every endpoint.
//!
//! Messages travel as JSON, framed by the transport (WebSocket frames for
//! the streaming endpoints, request/response bodies for the unary ones).
//! The scene core stores the deserialized structs by move, so nothing here
//! aliases transport buffers.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

/// Version string reported to clients in the first frame of a listen stream.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Oldest app version the server is willing to talk to.
pub const MIN_APP_VERSION: &str = "0.1.0";

/// A position and orientation, relative to the enclosing anchor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Translation, in meters.
    pub position: [f32; 3],
    /// Orientation quaternion, `[x, y, z, w]`.
    pub rotation: [f32; 4],
}

/// Presence and pose snapshot for one user, forwarded verbatim to peers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserState {
    /// Unique, client-chosen identity of the user.
    pub user_name: String,
    /// Human-readable name shown to peers.
    #[serde(default)]
    pub user_display_name: String,
    /// Kind of device the user is drawing with.
    #[serde(default)]
    pub device_type: String,
    /// Pose of the user's control, if currently tracked.
    #[serde(default)]
    pub control_pose: Option<Pose>,
    /// The anchor the user considers primary, if any.
    #[serde(default)]
    pub anchor_id: Option<String>,
}

/// One anchor inside a space report.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpaceAnchor {
    /// Stable identity of the anchor.
    pub id: String,
    /// Where the reporting device currently places the anchor.
    #[serde(default)]
    pub pose: Pose,
}

/// The ordered list of anchors a user is currently localized into.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpaceInfo {
    /// Identity of the mapped space.
    #[serde(default)]
    pub space_id: String,
    /// Human-readable name of the mapped space.
    #[serde(default)]
    pub space_name: String,
    /// Anchors localized by the reporting device, in client order.
    #[serde(default)]
    pub anchors: Vec<SpaceAnchor>,
}

/// An ordered sequence of brush poses attached to a single anchor.
///
/// `start_index` is the position within the canonical stroke at which
/// `poses[0]` belongs; continuation deltas carry only the new tail.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BrushStroke {
    /// Unique identity of the stroke.
    pub id: String,
    /// The anchor the stroke is attached to.
    pub anchor_id: String,
    /// The user who authored the stroke.
    #[serde(default)]
    pub user_name: String,
    /// Packed 8-bit RGB stroke color.
    #[serde(default)]
    pub stroke_color_rgb: u32,
    /// Offset of `poses[0]` within the canonical stroke.
    #[serde(default)]
    pub start_index: usize,
    /// The poses carried by this message.
    #[serde(default)]
    pub poses: Vec<Pose>,
}

/// An opaque reference to a 3D asset placed at an anchor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExternalModel {
    /// Unique identity of the placed model.
    pub id: String,
    /// The anchor the model is attached to.
    pub anchor_id: String,
    /// Asset file the model was loaded from.
    #[serde(default)]
    pub file_name: String,
    /// The user who last placed or moved the model.
    #[serde(default)]
    pub modified_by: String,
    /// Placement of the model relative to its anchor.
    #[serde(default)]
    pub pose: Pose,
}

/// Identifies a stroke or model pending removal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchoredId {
    /// Identity of the stroke or model.
    pub id: String,
    /// The anchor it was attached to.
    pub anchor_id: String,
}

/// First frame a client sends on the listen socket.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Identity to listen as; replaces any previous listener for the name.
    pub user_name: String,
    /// Version of the connecting app.
    #[serde(default)]
    pub app_version: String,
}

/// One inbound client update; any subset of the optional fields may be set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Presence snapshot of the sender; identifies the sender by name.
    pub user_state: UserState,
    /// New anchor localization report, if it changed.
    #[serde(default)]
    pub space_info: Option<SpaceInfo>,
    /// A new brush stroke, or a continuation of an existing one.
    #[serde(default)]
    pub brush_stroke_add: Option<BrushStroke>,
    /// A brush stroke to delete.
    #[serde(default)]
    pub brush_stroke_remove: Option<AnchoredId>,
    /// A model to place or update.
    #[serde(default)]
    pub external_model_add: Option<ExternalModel>,
    /// A model to delete.
    #[serde(default)]
    pub external_model_remove: Option<AnchoredId>,
    /// Ask for a listing of currently known users.
    #[serde(default)]
    pub query_users: Option<QueryUsersRequest>,
    /// Also send the sender's own changes back to it.
    #[serde(default)]
    pub echo: bool,
}

/// Reply to the deprecated unary update endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateResponse {
    /// Present iff the update embedded a users query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_users_response: Option<QueryUsersResponse>,
}

/// Request half of the users query.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryUsersRequest {}

/// Listing of currently known users.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryUsersResponse {
    /// One entry per user present in the scene, in no particular order.
    #[serde(default)]
    pub results: Vec<UserQueryResult>,
}

/// One entry of a [`QueryUsersResponse`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserQueryResult {
    /// Unique identity of the user.
    pub user_name: String,
    /// Human-readable name shown to peers.
    #[serde(default)]
    pub user_display_name: String,
    /// Kind of device the user is drawing with.
    #[serde(default)]
    pub device_type: String,
    /// The user's latest anchor localization report, if any.
    #[serde(default)]
    pub space_info: Option<SpaceInfo>,
}

/// Envelope for the unary rpc endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Identity of the caller.
    pub user_name: String,
    /// Ask for a listing of currently known users.
    #[serde(default)]
    pub query_users: Option<QueryUsersRequest>,
}

/// Reply envelope for the unary rpc endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Present iff the request carried a users query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_users_response: Option<QueryUsersResponse>,
}

/// Server build information, sent once per listen stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Version of the running server.
    pub server_version: String,
    /// Oldest app version the server supports.
    pub min_app_version: String,
}

/// One outbound frame on the listen stream.
///
/// An all-empty frame (serialized as `{}`) is a heartbeat; the server emits
/// one roughly every second on an otherwise idle stream.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerUpdate {
    /// Server build information; first frame of every stream only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    /// Latest presence snapshots of users of interest.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_state: Vec<UserState>,
    /// At most one brush stroke add or continuation per frame.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub brush_stroke_add: Vec<BrushStroke>,
    /// Brush strokes deleted since the previous frame.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub brush_stroke_remove: Vec<AnchoredId>,
    /// Models placed or updated since the previous frame.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_model_add: Vec<ExternalModel>,
    /// Models deleted since the previous frame.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_model_remove: Vec<AnchoredId>,
}

impl From<ServerUpdate> for Message {
    fn from(msg: ServerUpdate) -> Self {
        let serialized = serde_json::to_string(&msg).expect("failed serialize");
        Message::text(serialized)
    }
}
