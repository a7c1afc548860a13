//! URL normalization and the fixed API paths of the keyed-HTTP channel.
//!
//! All domain operations map to fixed paths under `/api`; normalizing the
//! base URL prevents double slashes when endpoints are appended.

pub const STATUS: &str = "/api/status";
pub const ROLL: &str = "/api/roll";
pub const SEARCH_ACTORS: &str = "/api/search/actors";
pub const SEARCH_ITEMS: &str = "/api/search/items";
pub const ACTORS: &str = "/api/actors";
pub const CURRENT_SCENE: &str = "/api/scenes/current";
pub const WORLD: &str = "/api/world";
pub const LOGIN: &str = "/api/auth/login";

/// Strip trailing slashes so endpoint joins stay predictable.
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a normalized base URL and an endpoint path without double slashes.
pub fn api_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        normalize_base_url(base_url),
        endpoint.trim_start_matches('/')
    )
}

/// Derive the streaming-channel URL from the http(s) base URL by swapping
/// the scheme for its WebSocket counterpart.
pub fn socket_url(base_url: &str, socket_path: &str) -> String {
    let base = normalize_base_url(base_url);
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base
    };
    format!("{}/{}", ws_base, socket_path.trim_start_matches('/'))
}
