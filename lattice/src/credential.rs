//! Credential exchange with the out-of-process pairing agent.
//!
//! Pairing credentials come from a companion application (typically a web
//! page opened in a separate window). The exchange works like this:
//!
//! ```text
//! CredentialChannel::request()
//!   ├── register a pending exchange under a fresh correlation token
//!   ├── CredentialAgent::open({ url, message, token, inbox })
//!   └── await the one-shot reply (optionally bounded by a timeout)
//!
//! host message pump ──▶ CredentialInbox::deliver(origin, payload)
//!   ├── origin ≠ agent origin   → ignored, exchange stays pending
//!   ├── token ≠ pending token   → ignored
//!   └── parse {deviceID, password, endpoint?} → reply to the waiter
//! ```
//!
//! At most one exchange is pending per channel. The credential is moved to
//! the waiter and nothing is kept once it has been handed over.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, info};
use url::{Origin, Url};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Result, WalletError};

/// Message sent to the agent to ask for credentials.
pub const CREDENTIAL_REQUEST_MESSAGE: &str = "GET_LATTICE_CREDS";

/// Pairing credentials for one device.
///
/// Zeroized on drop and never printed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DeviceCredential {
    device_id: String,
    password: String,
    endpoint: Option<String>,
}

#[derive(Deserialize)]
struct CredentialPayload {
    #[serde(rename = "deviceID", default)]
    device_id: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
}

impl Drop for CredentialPayload {
    fn drop(&mut self) {
        self.device_id.zeroize();
        self.password.zeroize();
    }
}

impl DeviceCredential {
    /// Create a credential from its parts.
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        password: impl Into<String>,
        endpoint: Option<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            password: password.into(),
            endpoint,
        }
    }

    /// Parse the agent's JSON payload `{deviceID, password, endpoint?}`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidCredential`] if the payload is not JSON
    /// or `deviceID`/`password` is missing or empty.
    pub fn from_payload(payload: &str) -> Result<Self> {
        let mut parsed: CredentialPayload = serde_json::from_str(payload)
            .map_err(|e| WalletError::invalid_credential(format!("malformed payload: {e}")))?;

        let device_id = parsed.device_id.take().filter(|id| !id.is_empty());
        let password = parsed.password.take().filter(|pw| !pw.is_empty());
        match (device_id, password) {
            (Some(device_id), Some(password)) => Ok(Self {
                device_id,
                password,
                endpoint: parsed.endpoint.take().filter(|url| !url.is_empty()),
            }),
            (None, _) => Err(WalletError::invalid_credential("missing deviceID")),
            (_, None) => Err(WalletError::invalid_credential("missing password")),
        }
    }

    /// Device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Device password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Signing endpoint override supplied by the agent.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

impl fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredential").finish_non_exhaustive()
    }
}

/// Outcome of delivering an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The credential was handed to the waiting request.
    Accepted,
    /// The payload was malformed; the waiting request fails with
    /// [`WalletError::InvalidCredential`].
    Rejected,
    /// Wrong origin or no matching exchange; nothing changed.
    Ignored,
}

struct PendingExchange {
    token: Uuid,
    reply: oneshot::Sender<Result<DeviceCredential>>,
}

type PendingSlot = Mutex<Option<PendingExchange>>;

fn lock(slot: &PendingSlot) -> MutexGuard<'_, Option<PendingExchange>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deliver_to(
    slot: &PendingSlot,
    expected: &Origin,
    token: Uuid,
    origin: &str,
    payload: &str,
) -> Delivery {
    let from_agent = Url::parse(origin).is_ok_and(|url| url.origin() == *expected);
    if !from_agent {
        debug!(origin, "discarding credential message from unexpected origin");
        return Delivery::Ignored;
    }

    let pending = {
        let mut guard = lock(slot);
        if guard.as_ref().is_none_or(|p| p.token != token) {
            debug!(%token, "discarding credential message for unknown exchange");
            return Delivery::Ignored;
        }
        guard.take()
    };
    let Some(pending) = pending else {
        return Delivery::Ignored;
    };

    let result = DeviceCredential::from_payload(payload);
    let delivery = if result.is_ok() {
        Delivery::Accepted
    } else {
        Delivery::Rejected
    };
    if pending.reply.send(result).is_err() {
        debug!(%token, "credential exchange was abandoned before delivery");
    }
    delivery
}

/// Handle the agent uses to answer one exchange.
#[derive(Clone)]
pub struct CredentialInbox {
    slot: Weak<PendingSlot>,
    origin: Origin,
    token: Uuid,
}

impl CredentialInbox {
    /// Correlation token of the exchange this inbox answers.
    #[must_use]
    pub const fn token(&self) -> Uuid {
        self.token
    }

    /// Deliver an inbound message received from `origin`.
    pub fn deliver(&self, origin: &str, payload: &str) -> Delivery {
        self.slot.upgrade().map_or(Delivery::Ignored, |slot| {
            deliver_to(&slot, &self.origin, self.token, origin, payload)
        })
    }
}

impl fmt::Debug for CredentialInbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialInbox")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// What the agent is asked to do for one exchange.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Agent URL to open.
    pub url: Url,
    /// Fixed request message.
    pub message: String,
    /// Correlation token.
    pub token: Uuid,
    /// Where the answer must be delivered.
    pub inbox: CredentialInbox,
}

/// The out-of-process agent that owns the user-facing pairing flow.
#[async_trait]
pub trait CredentialAgent: Send + Sync {
    /// Open the agent for `request`. The answer arrives later through
    /// `request.inbox`.
    async fn open(&self, request: AgentRequest) -> Result<()>;
}

/// Agent that answers immediately with credentials known up front.
pub struct StaticCredentialAgent {
    device_id: Zeroizing<String>,
    password: Zeroizing<String>,
    endpoint: Option<String>,
}

impl StaticCredentialAgent {
    /// Create an agent for a known device.
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        password: impl Into<String>,
        endpoint: Option<String>,
    ) -> Self {
        Self {
            device_id: Zeroizing::new(device_id.into()),
            password: Zeroizing::new(password.into()),
            endpoint,
        }
    }
}

impl fmt::Debug for StaticCredentialAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentialAgent").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialAgent for StaticCredentialAgent {
    async fn open(&self, request: AgentRequest) -> Result<()> {
        let payload = Zeroizing::new(
            serde_json::json!({
                "deviceID": self.device_id.as_str(),
                "password": self.password.as_str(),
                "endpoint": self.endpoint,
            })
            .to_string(),
        );
        request
            .inbox
            .deliver(&request.url.origin().ascii_serialization(), &payload);
        Ok(())
    }
}

/// Single-exchange channel to the pairing agent.
pub struct CredentialChannel {
    agent: Arc<dyn CredentialAgent>,
    agent_url: Url,
    message: String,
    timeout: Option<Duration>,
    slot: Arc<PendingSlot>,
}

impl fmt::Debug for CredentialChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialChannel")
            .field("agent_url", &self.agent_url.as_str())
            .field("timeout", &self.timeout)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

impl CredentialChannel {
    /// Create a channel to the agent at `agent_url`.
    #[must_use]
    pub fn new(agent: Arc<dyn CredentialAgent>, agent_url: Url) -> Self {
        Self {
            agent,
            agent_url,
            message: CREDENTIAL_REQUEST_MESSAGE.to_owned(),
            timeout: None,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Bound the wait for the agent's answer.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the request message sent to the agent.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The agent URL.
    #[must_use]
    pub const fn agent_url(&self) -> &Url {
        &self.agent_url
    }

    /// Whether an exchange is waiting for the agent.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        lock(&self.slot)
            .as_ref()
            .is_some_and(|pending| !pending.reply.is_closed())
    }

    /// Token of the pending exchange, if any.
    #[must_use]
    pub fn pending_token(&self) -> Option<Uuid> {
        lock(&self.slot).as_ref().map(|pending| pending.token)
    }

    /// Deliver an inbound message for the exchange identified by `token`.
    pub fn deliver(&self, token: Uuid, origin: &str, payload: &str) -> Delivery {
        deliver_to(&self.slot, &self.agent_url.origin(), token, origin, payload)
    }

    /// Abandon the pending exchange. Its waiter fails with
    /// [`WalletError::DeviceUnavailable`].
    pub fn cancel(&self) -> bool {
        lock(&self.slot).take().is_some()
    }

    /// Run one exchange and return the credential.
    ///
    /// # Errors
    ///
    /// - [`WalletError::DeviceUnavailable`] if another exchange is in flight,
    ///   the agent cannot be opened, the exchange is cancelled, or the
    ///   timeout elapses.
    /// - [`WalletError::InvalidCredential`] if the agent's payload is
    ///   malformed.
    pub async fn request(&self) -> Result<DeviceCredential> {
        let (token, reply) = self.register()?;
        let request = AgentRequest {
            url: self.agent_url.clone(),
            message: self.message.clone(),
            token,
            inbox: CredentialInbox {
                slot: Arc::downgrade(&self.slot),
                origin: self.agent_url.origin(),
                token,
            },
        };

        info!(%token, agent = %self.agent_url, "requesting device credentials");
        if let Err(e) = self.agent.open(request).await {
            self.clear(token);
            return Err(WalletError::device_unavailable(format!(
                "failed to open credential agent: {e}"
            )));
        }

        let received = match self.timeout {
            Some(limit) => {
                if let Ok(received) = tokio::time::timeout(limit, reply).await {
                    received
                } else {
                    self.clear(token);
                    return Err(WalletError::device_unavailable(format!(
                        "no credentials received within {}s",
                        limit.as_secs_f64()
                    )));
                }
            }
            None => reply.await,
        };

        received.unwrap_or_else(|_| {
            Err(WalletError::device_unavailable(
                "credential exchange was cancelled",
            ))
        })
    }

    fn register(&self) -> Result<(Uuid, oneshot::Receiver<Result<DeviceCredential>>)> {
        let mut guard = lock(&self.slot);
        if guard.as_ref().is_some_and(|pending| !pending.reply.is_closed()) {
            return Err(WalletError::device_unavailable(
                "a credential exchange is already in progress",
            ));
        }
        let token = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        *guard = Some(PendingExchange { token, reply: tx });
        Ok((token, rx))
    }

    fn clear(&self, token: Uuid) {
        let mut guard = lock(&self.slot);
        if guard.as_ref().is_some_and(|pending| pending.token == token) {
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AGENT_URL, QueuedAgent, channel, credential_payload};

    #[test]
    fn test_payload_parsing() {
        let cred = DeviceCredential::from_payload(
            r#"{"deviceID":"abc","password":"pw","endpoint":"https://signing.example"}"#,
        )
        .unwrap();
        assert_eq!(cred.device_id(), "abc");
        assert_eq!(cred.password(), "pw");
        assert_eq!(cred.endpoint(), Some("https://signing.example"));
        assert_eq!(format!("{cred:?}"), "DeviceCredential { .. }");
    }

    #[test]
    fn test_payload_missing_fields() {
        for payload in [
            r#"{"password":"pw"}"#,
            r#"{"deviceID":"abc"}"#,
            r#"{"deviceID":"","password":"pw"}"#,
            "not json",
        ] {
            assert!(
                matches!(
                    DeviceCredential::from_payload(payload),
                    Err(WalletError::InvalidCredential(_))
                ),
                "{payload}"
            );
        }
    }

    #[tokio::test]
    async fn test_static_agent_round_trip() {
        let agent = Arc::new(StaticCredentialAgent::new("dev", "pw", None));
        let channel = channel(agent);
        let cred = channel.request().await.unwrap();
        assert_eq!(cred.device_id(), "dev");
        assert!(cred.endpoint().is_none());
        assert!(!channel.is_pending());
    }

    #[tokio::test]
    async fn test_foreign_origin_is_ignored() {
        let (agent, mut opened) = QueuedAgent::new();
        let channel = Arc::new(channel(Arc::new(agent)));

        let waiter = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.request().await }
        });
        let request = opened.recv().await.unwrap();
        assert_eq!(request.message, CREDENTIAL_REQUEST_MESSAGE);

        let payload = credential_payload("dev", "pw");
        assert_eq!(
            request.inbox.deliver("https://evil.example", &payload),
            Delivery::Ignored
        );
        assert!(channel.is_pending());

        assert_eq!(
            request.inbox.deliver(AGENT_URL, &payload),
            Delivery::Accepted
        );
        let cred = waiter.await.unwrap().unwrap();
        assert_eq!(cred.device_id(), "dev");
        assert!(channel.pending_token().is_none());
    }

    #[tokio::test]
    async fn test_stale_token_is_ignored() {
        let (agent, mut opened) = QueuedAgent::new();
        let channel = Arc::new(channel(Arc::new(agent)));
        let waiter = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.request().await }
        });
        let request = opened.recv().await.unwrap();

        let payload = credential_payload("dev", "pw");
        assert_eq!(
            channel.deliver(Uuid::new_v4(), AGENT_URL, &payload),
            Delivery::Ignored
        );
        assert_eq!(
            channel.deliver(request.token, AGENT_URL, &payload),
            Delivery::Accepted
        );
        tokio_test::assert_ok!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_payload_fails_waiter() {
        let (agent, mut opened) = QueuedAgent::new();
        let channel = Arc::new(channel(Arc::new(agent)));
        let waiter = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.request().await }
        });
        let request = opened.recv().await.unwrap();
        assert_eq!(
            request.inbox.deliver(AGENT_URL, r#"{"deviceID":"dev"}"#),
            Delivery::Rejected
        );
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, WalletError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn test_second_request_fails_fast() {
        let (agent, mut opened) = QueuedAgent::new();
        let channel = Arc::new(channel(Arc::new(agent)));
        let _waiter = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.request().await }
        });
        let _first = opened.recv().await.unwrap();

        let err = channel.request().await.unwrap_err();
        assert!(matches!(err, WalletError::DeviceUnavailable(_)));
        assert!(opened.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_timeout_clears_pending_exchange() {
        let (agent, _opened) = QueuedAgent::new();
        let channel = channel(Arc::new(agent)).with_timeout(Some(Duration::from_millis(20)));

        let err = channel.request().await.unwrap_err();
        assert!(matches!(err, WalletError::DeviceUnavailable(_)));
        assert!(channel.pending_token().is_none());
    }

    #[tokio::test]
    async fn test_cancel_fails_waiter() {
        let (agent, mut opened) = QueuedAgent::new();
        let channel = Arc::new(channel(Arc::new(agent)));
        let waiter = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.request().await }
        });
        let request = opened.recv().await.unwrap();
        assert!(channel.cancel());

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, WalletError::DeviceUnavailable(_)));
        assert_eq!(
            request
                .inbox
                .deliver(AGENT_URL, &credential_payload("dev", "pw")),
            Delivery::Ignored
        );
    }

    #[tokio::test]
    async fn test_abandoned_exchange_is_superseded() {
        let (agent, mut opened) = QueuedAgent::new();
        let channel = Arc::new(channel(Arc::new(agent)));

        let abandoned = tokio::time::timeout(Duration::from_millis(10), channel.request()).await;
        assert!(abandoned.is_err());
        let stale = opened.recv().await.unwrap();
        assert!(!channel.is_pending());

        let waiter = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.request().await }
        });
        let fresh = opened.recv().await.unwrap();
        assert_ne!(fresh.token, stale.token);

        let payload = credential_payload("dev", "pw");
        assert_eq!(stale.inbox.deliver(AGENT_URL, &payload), Delivery::Ignored);
        assert_eq!(fresh.inbox.deliver(AGENT_URL, &payload), Delivery::Accepted);
        tokio_test::assert_ok!(waiter.await.unwrap());
    }
}
