//! The transport manager: owns configuration, selects between the keyed-HTTP
//! and streaming transports, performs authentication, and exposes the public
//! request API.
//!
//! Read paths (actor/item search, entity and world lookups) consult the
//! response cache and fall through the retry executor to the wire on a miss;
//! write and action paths go through the retry executor directly. The client
//! runs no automatic reconnect loop: a failed connect leaves the state
//! machine at `Disconnected` and reconnection is the caller's choice.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cache::{self, CacheStats, ResponseCache};
use crate::error::{LinkError, Result};
use crate::retry::{execute_with_retry, RetryPolicy};

pub mod codec;
pub mod config;
pub mod dice;
pub mod dispatch;
pub mod endpoints;
pub mod models;
mod socket;

pub use codec::ChannelMessage;
pub use config::{ClientConfig, Credentials, TransportMode};
pub use dispatch::{HandlerId, MessageHandler};
pub use models::{
    Actor, DiceRoll, Fetched, Item, RollOrigin, Scene, SearchResults, WorldInfo,
};

use dispatch::MessageRouter;
use socket::SocketChannel;

/// Fixed request header carrying the static key.
const API_KEY_HEADER: &str = "x-api-key";
/// Search result lists are volatile; cache them briefly.
const SEARCH_TTL: Duration = Duration::from_secs(60);
/// Entity, scene, and world lookups change rarely by comparison.
const ENTITY_TTL: Duration = Duration::from_secs(300);
const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// Connection lifecycle. `Connecting` only exists for the streaming path;
/// the keyed path probes and transitions straight to `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client for a remote virtual-tabletop game server.
pub struct TabletopClient {
    config: ClientConfig,
    mode: TransportMode,
    base_url: String,
    http: reqwest::Client,
    state: Arc<Mutex<ConnectionState>>,
    bearer: Arc<Mutex<Option<String>>>,
    cache: ResponseCache<Value>,
    retry: RetryPolicy,
    router: MessageRouter,
    channel: tokio::sync::Mutex<Option<SocketChannel>>,
}

impl TabletopClient {
    /// Build a client. Fails immediately on an invalid endpoint; no partial
    /// client is returned. The transport mode is fixed here from which
    /// credentials the configuration carries.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let base_url = endpoints::normalize_base_url(&config.base_url);
        let mode = TransportMode::from_config(&config);
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| LinkError::Config(format!("failed to build HTTP client: {err}")))?;
        let cache = ResponseCache::new(config.cache.clone());
        let retry = RetryPolicy {
            attempts: config.retry_attempts,
            base_delay: config.retry_base_delay,
        };

        Ok(Self {
            base_url,
            mode,
            http,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            bearer: Arc::new(Mutex::new(None)),
            cache,
            retry,
            router: MessageRouter::new(),
            channel: tokio::sync::Mutex::new(None),
            config,
        })
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    /// Establish the transport. Keyed mode probes the status endpoint and
    /// transitions straight to connected; streaming modes open the channel
    /// and resolve once the handshake completes. A failure rejects this call
    /// and leaves the state at `Disconnected`.
    pub async fn connect(&self) -> Result<()> {
        match self.mode {
            TransportMode::Keyed => {
                self.get(endpoints::STATUS).await?;
                self.set_state(ConnectionState::Connected);
                debug!(base_url = %self.base_url, "keyed transport probe succeeded");
                Ok(())
            }
            TransportMode::Hybrid => {
                self.set_state(ConnectionState::Connecting);
                if let Err(err) = self.login().await {
                    // The exchange is optional in hybrid mode; the channel is
                    // still usable and HTTP calls will surface Unauthorized.
                    warn!(error = %err, "authentication exchange failed, continuing with streaming channel only");
                }
                self.open_channel().await
            }
            TransportMode::Socket => {
                self.set_state(ConnectionState::Connecting);
                self.open_channel().await
            }
        }
    }

    /// Tear down the transport. Idempotent: closes any open streaming
    /// channel, releases all registered listeners, and sets the state to
    /// disconnected regardless of prior state.
    pub async fn disconnect(&self) {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.take() {
            channel.close().await;
        }
        drop(guard);
        self.router.clear();
        self.set_state(ConnectionState::Disconnected);
        debug!("client disconnected");
    }

    async fn open_channel(&self) -> Result<()> {
        let url = endpoints::socket_url(&self.base_url, &self.config.socket_path);
        let state = self.state.clone();
        let result = SocketChannel::connect(&url, self.router.clone(), move || {
            *state.lock().expect("state lock poisoned") = ConnectionState::Disconnected;
        })
        .await;

        match result {
            Ok(channel) => {
                *self.channel.lock().await = Some(channel);
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Exchange credentials for a bearer token used by subsequent HTTP
    /// requests.
    async fn login(&self) -> Result<()> {
        let Some(credentials) = self.config.credentials.clone() else {
            return Ok(());
        };
        let body = json!({
            "username": credentials.username,
            "password": credentials.password,
        });
        let response = execute_with_retry(&self.retry, || {
            self.request(Method::POST, endpoints::LOGIN, &[], Some(body.clone()))
        })
        .await?;
        let token = response
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| LinkError::Decode("login response carried no token".to_string()))?;
        *self.bearer.lock().expect("bearer lock poisoned") = Some(token.to_string());
        debug!("authentication exchange succeeded");
        Ok(())
    }

    // ---- HTTP plumbing -------------------------------------------------

    /// One HTTP attempt: attach the active credential, map error statuses
    /// into the taxonomy, and decode the JSON body. Any 401 clears connected
    /// state.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let url = endpoints::api_url(&self.base_url, path);
        let mut builder = self.http.request(method, &url);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(key) = &self.config.api_key {
            builder = builder.header(API_KEY_HEADER, key);
        } else if let Some(token) = self
            .bearer
            .lock()
            .expect("bearer lock poisoned")
            .clone()
        {
            builder = builder.header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| LinkError::Transport(err.to_string()))?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            self.set_state(ConnectionState::Disconnected);
            return Err(LinkError::Unauthorized(format!(
                "server rejected credentials for {path}"
            )));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(LinkError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LinkError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| LinkError::Decode(err.to_string()))
    }

    /// GET through the retry executor. Generic verbs are never cached; only
    /// the domain methods opt in, since only they know appropriate TTLs and
    /// key normalization.
    pub async fn get(&self, path: &str) -> Result<Value> {
        execute_with_retry(&self.retry, || {
            self.request(Method::GET, path, &[], None)
        })
        .await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        execute_with_retry(&self.retry, || {
            self.request(Method::POST, path, &[], Some(body.clone()))
        })
        .await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value> {
        execute_with_retry(&self.retry, || {
            self.request(Method::PUT, path, &[], Some(body.clone()))
        })
        .await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        execute_with_retry(&self.retry, || {
            self.request(Method::DELETE, path, &[], None)
        })
        .await
    }

    async fn cached_get(
        &self,
        key: &str,
        ttl: Duration,
        path: &str,
        query: Vec<(&str, String)>,
    ) -> Result<Value> {
        self.cache
            .get_or_set(key, Some(ttl), || async {
                execute_with_retry(&self.retry, || {
                    self.request(Method::GET, path, &query, None)
                })
                .await
            })
            .await
    }

    // ---- Domain operations ---------------------------------------------

    /// Roll dice. Uses the game server's dice engine over the keyed
    /// transport; without it, synthesizes a result locally with the
    /// conservative fallback parser so the operation stays usable.
    pub async fn roll_dice(&self, formula: &str, reason: Option<&str>) -> Result<DiceRoll> {
        if self.mode != TransportMode::Keyed {
            debug!(formula, "keyed transport unavailable, rolling locally");
            return dice::roll_fallback(formula, reason);
        }
        let body = json!({ "formula": formula, "reason": reason });
        let value = self.post(endpoints::ROLL, body).await?;
        serde_json::from_value(value).map_err(Into::into)
    }

    /// Search actors by name. Cached briefly, keyed by the normalized query
    /// parameters.
    pub async fn search_actors(
        &self,
        query: &str,
        kind: Option<&str>,
        limit: Option<u32>,
    ) -> Result<SearchResults<Actor>> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let limit_text = limit.to_string();
        let key = cache::compose_key(
            "actors.search",
            &[
                ("query", query),
                ("kind", kind.unwrap_or("")),
                ("limit", &limit_text),
            ],
        );
        let mut params = vec![("query", query.to_string()), ("limit", limit_text)];
        if let Some(kind) = kind {
            params.push(("type", kind.to_string()));
        }
        let value = self
            .cached_get(&key, SEARCH_TTL, endpoints::SEARCH_ACTORS, params)
            .await?;
        serde_json::from_value(value).map_err(Into::into)
    }

    pub async fn search_items(
        &self,
        query: &str,
        kind: Option<&str>,
        limit: Option<u32>,
    ) -> Result<SearchResults<Item>> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let limit_text = limit.to_string();
        let key = cache::compose_key(
            "items.search",
            &[
                ("query", query),
                ("kind", kind.unwrap_or("")),
                ("limit", &limit_text),
            ],
        );
        let mut params = vec![("query", query.to_string()), ("limit", limit_text)];
        if let Some(kind) = kind {
            params.push(("type", kind.to_string()));
        }
        let value = self
            .cached_get(&key, SEARCH_TTL, endpoints::SEARCH_ITEMS, params)
            .await?;
        serde_json::from_value(value).map_err(Into::into)
    }

    /// Fetch a single actor by id. A 404 surfaces as [`LinkError::NotFound`]
    /// so callers can tell a missing actor from an unreachable server.
    ///
    /// Entity ids are case sensitive, so the cache key keeps them verbatim
    /// instead of going through the search-parameter normalization.
    pub async fn get_actor(&self, id: &str) -> Result<Actor> {
        let path = format!("{}/{}", endpoints::ACTORS, id.trim());
        let key = format!("actors.get?id={}", id.trim());
        let value = self.cached_get(&key, ENTITY_TTL, &path, Vec::new()).await?;
        serde_json::from_value(value).map_err(Into::into)
    }

    /// Current scene, or a tagged placeholder when the keyed transport is
    /// unavailable so callers degrade gracefully instead of failing.
    pub async fn get_current_scene(&self) -> Result<Fetched<Scene>> {
        if self.mode != TransportMode::Keyed {
            return Ok(Fetched::Placeholder {
                reason: "scene data requires the keyed transport".to_string(),
                value: Scene::default(),
            });
        }
        let value = self
            .cached_get("scenes.current", ENTITY_TTL, endpoints::CURRENT_SCENE, Vec::new())
            .await?;
        Ok(Fetched::Live(serde_json::from_value(value)?))
    }

    /// World metadata, with the same placeholder behavior as
    /// [`TabletopClient::get_current_scene`].
    pub async fn get_world_info(&self) -> Result<Fetched<WorldInfo>> {
        if self.mode != TransportMode::Keyed {
            return Ok(Fetched::Placeholder {
                reason: "world data requires the keyed transport".to_string(),
                value: WorldInfo::default(),
            });
        }
        let value = self
            .cached_get("world.info", ENTITY_TTL, endpoints::WORLD, Vec::new())
            .await?;
        Ok(Fetched::Live(serde_json::from_value(value)?))
    }

    /// Fire-and-forget advisory message over the streaming channel. Logged
    /// and skipped when the channel is not open; messages are never queued.
    pub async fn send_message(&self, message: &ChannelMessage) {
        let guard = self.channel.lock().await;
        match guard.as_ref() {
            Some(channel) if channel.is_open() => {
                if let Err(err) = channel.send(&message.encode()).await {
                    warn!(error = %err, kind = %message.kind, "failed to send channel message");
                }
            }
            _ => {
                debug!(kind = %message.kind, "streaming channel not open, dropping advisory message");
            }
        }
    }

    /// Subscribe to decoded application messages of a logical type. The
    /// returned id is the disposer for [`TabletopClient::off_message`];
    /// multiple independent subscribers per type are supported.
    pub fn on_message(
        &self,
        kind: &str,
        handler: impl Fn(&ChannelMessage) + Send + Sync + 'static,
    ) -> HandlerId {
        self.router.subscribe(kind, Arc::new(handler))
    }

    pub fn off_message(&self, id: &HandlerId) -> bool {
        self.router.unsubscribe(id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    fn socket_only_client() -> TabletopClient {
        TabletopClient::new(ClientConfig::new("http://localhost:1")).unwrap()
    }

    #[test]
    fn construction_fails_on_invalid_endpoint() {
        assert!(matches!(
            TabletopClient::new(ClientConfig::new("")),
            Err(LinkError::Config(_))
        ));
        assert!(matches!(
            TabletopClient::new(ClientConfig::new("gopher://vtt")),
            Err(LinkError::Config(_))
        ));
    }

    #[test]
    fn new_client_starts_disconnected() {
        let client = socket_only_client();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert_eq!(client.mode(), TransportMode::Socket);
    }

    #[tokio::test]
    async fn roll_dice_falls_back_locally_without_keyed_transport() {
        let client = socket_only_client();
        let roll = client.roll_dice("2d6+1", Some("perception")).await.unwrap();
        assert_eq!(roll.origin, RollOrigin::Local);
        assert!((3..=13).contains(&roll.total));
    }

    #[tokio::test]
    async fn roll_dice_fallback_rejects_unsafe_formulas() {
        let client = socket_only_client();
        assert!(matches!(
            client.roll_dice("2d6; rm -rf /", None).await,
            Err(LinkError::InvalidFormula(_))
        ));
    }

    #[tokio::test]
    async fn scene_and_world_degrade_to_tagged_placeholders() {
        let client = socket_only_client();
        let scene = client.get_current_scene().await.unwrap();
        assert!(scene.is_placeholder());
        let world = client.get_world_info().await.unwrap();
        assert!(world.is_placeholder());
    }

    #[tokio::test]
    async fn send_message_without_channel_is_a_silent_skip() {
        let client = socket_only_client();
        client
            .send_message(&ChannelMessage::new("chat", None))
            .await;
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_releases_listeners() {
        let client = socket_only_client();
        let id = client.on_message("combat", |_| {});
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        // Listeners were released by disconnect, so the disposer is stale.
        assert!(!client.off_message(&id));
    }

    #[tokio::test]
    async fn cache_can_be_disabled_per_client() {
        let mut config = ClientConfig::new("http://localhost:1");
        config.cache = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let client = TabletopClient::new(config).unwrap();
        let stats = client.cache_stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
    }
}
