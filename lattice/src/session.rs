//! Device session lifecycle.
//!
//! ```text
//! Uninitialized ──ensure_session──▶ AwaitingCredentials
//! AwaitingCredentials ──credentials, connect ok──▶ Connected
//! AwaitingCredentials ──exchange/connect failed──▶ Faulted
//! Connected ──transport error / invalidate──▶ Faulted
//! Faulted ──ensure_session──▶ AwaitingCredentials
//! ```
//!
//! Pairing is single-flight: the in-flight pairing future is stored in the
//! session slot and every concurrent caller awaits that same future. Each
//! pairing attempt gets a generation number, so a late result can never
//! overwrite a newer state.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{Instrument, debug, info, warn};

use crate::credential::CredentialChannel;
use crate::device::{ClientConfig, DeviceClient, DeviceConnector, PairingCodeProvider, SessionKey};
use crate::error::{DeviceFault, Result, WalletError};
use crate::telemetry::{device_span, pairing_span};

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been requested yet.
    Uninitialized,
    /// A pairing attempt is waiting for credentials or the device.
    AwaitingCredentials,
    /// A live session exists.
    Connected,
    /// The last attempt or session failed; the next request re-pairs.
    Faulted(String),
}

/// A connected device session.
pub struct DeviceSession {
    client: Arc<dyn DeviceClient>,
    device_id: String,
    generation: u64,
}

impl DeviceSession {
    /// Identifier of the connected device.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Pairing generation that produced this session.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

type Pairing = Shared<BoxFuture<'static, Result<Arc<DeviceSession>>>>;

enum Slot {
    Uninitialized,
    Awaiting(Pairing),
    Connected(Arc<DeviceSession>),
    Faulted(String),
}

struct SlotState {
    slot: Slot,
    generation: u64,
}

/// Settings for establishing sessions.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Application name presented to the device.
    pub app_name: String,
    /// Signing endpoint used when the credential carries none.
    pub signing_endpoint: String,
    /// Per-request device timeout.
    pub client_timeout: Duration,
}

struct SessionCore {
    channel: CredentialChannel,
    connector: Arc<dyn DeviceConnector>,
    pairing_codes: Option<Arc<dyn PairingCodeProvider>>,
    settings: SessionSettings,
    state: Mutex<SlotState>,
}

impl SessionCore {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pair(self: Arc<Self>, generation: u64) -> Result<Arc<DeviceSession>> {
        let outcome = self
            .establish(generation)
            .instrument(pairing_span(generation))
            .await;

        let mut state = self.lock();
        if state.generation != generation {
            debug!(generation, current = state.generation, "pairing result superseded");
            return Err(WalletError::device_unavailable(
                "pairing was superseded by session invalidation",
            ));
        }
        match &outcome {
            Ok(session) => {
                info!(generation, "device session connected");
                state.slot = Slot::Connected(Arc::clone(session));
            }
            Err(e) => {
                warn!(generation, error = %e, "device pairing failed");
                state.slot = Slot::Faulted(e.to_string());
            }
        }
        outcome
    }

    async fn establish(&self, generation: u64) -> Result<Arc<DeviceSession>> {
        let credential = self.channel.request().await?;

        let config = ClientConfig {
            name: self.settings.app_name.clone(),
            base_url: credential
                .endpoint()
                .unwrap_or(self.settings.signing_endpoint.as_str())
                .to_owned(),
            private_key: SessionKey::derive(
                credential.password(),
                credential.device_id(),
                &self.settings.app_name,
            ),
            timeout: self.settings.client_timeout,
        };
        let device_id = credential.device_id().to_owned();
        drop(credential);

        let client = self
            .connector
            .client(config)
            .map_err(|fault| pairing_failure("client construction", &fault))?;

        let paired = client
            .connect(&device_id)
            .await
            .map_err(|fault| pairing_failure("connect", &fault))?;

        if !paired {
            let Some(codes) = &self.pairing_codes else {
                return Err(WalletError::device_unavailable(
                    "device is not paired with this application",
                ));
            };
            let code = codes.pairing_code().await?;
            let active = client
                .pair(&code)
                .await
                .map_err(|fault| pairing_failure("pair", &fault))?;
            if !active {
                return Err(WalletError::device_unavailable(
                    "device has no active wallet",
                ));
            }
        }

        Ok(Arc::new(DeviceSession {
            client,
            device_id,
            generation,
        }))
    }

    fn invalidate(&self, generation: Option<u64>, reason: String) {
        let previous = {
            let mut state = self.lock();
            if let Some(expected) = generation {
                let live = matches!(&state.slot, Slot::Connected(s) if s.generation == expected);
                if !live {
                    return;
                }
            }
            state.generation += 1;
            std::mem::replace(&mut state.slot, Slot::Faulted(reason))
        };
        // The abandoned attempt must release the channel for the next one.
        if matches!(previous, Slot::Awaiting(_)) {
            self.channel.cancel();
        }
    }
}

fn pairing_failure(operation: &str, fault: &DeviceFault) -> WalletError {
    WalletError::device_unavailable(format!("{operation} failed: {}", fault.message))
}

/// Owns the one device session of a provider instance.
pub struct SessionManager {
    core: Arc<SessionCore>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager in the `Uninitialized` state.
    #[must_use]
    pub fn new(
        channel: CredentialChannel,
        connector: Arc<dyn DeviceConnector>,
        pairing_codes: Option<Arc<dyn PairingCodeProvider>>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            core: Arc::new(SessionCore {
                channel,
                connector,
                pairing_codes,
                settings,
                state: Mutex::new(SlotState {
                    slot: Slot::Uninitialized,
                    generation: 0,
                }),
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match &self.core.lock().slot {
            Slot::Uninitialized => SessionState::Uninitialized,
            Slot::Awaiting(_) => SessionState::AwaitingCredentials,
            Slot::Connected(_) => SessionState::Connected,
            Slot::Faulted(reason) => SessionState::Faulted(reason.clone()),
        }
    }

    /// The credential channel, for hosts that route agent messages by token.
    #[must_use]
    pub fn channel(&self) -> &CredentialChannel {
        &self.core.channel
    }

    /// Return the live session, pairing first if needed.
    ///
    /// Concurrent callers share one pairing attempt and see the same outcome.
    ///
    /// # Errors
    ///
    /// [`WalletError::DeviceUnavailable`] if pairing cannot complete,
    /// [`WalletError::InvalidCredential`] if the agent's payload is malformed.
    pub async fn ensure_session(&self) -> Result<SessionHandle> {
        let pairing = {
            let mut guard = self.core.lock();
            let state = &mut *guard;
            match &state.slot {
                Slot::Connected(session) => {
                    return Ok(SessionHandle {
                        core: Arc::clone(&self.core),
                        session: Arc::clone(session),
                    });
                }
                Slot::Awaiting(pairing) => pairing.clone(),
                Slot::Uninitialized | Slot::Faulted(_) => {
                    state.generation += 1;
                    let pairing = Arc::clone(&self.core)
                        .pair(state.generation)
                        .boxed()
                        .shared();
                    state.slot = Slot::Awaiting(pairing.clone());
                    pairing
                }
            }
        };

        let session = pairing.await?;
        Ok(SessionHandle {
            core: Arc::clone(&self.core),
            session,
        })
    }

    /// Force the `Faulted` state so the next request re-pairs.
    pub fn invalidate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        info!(reason = %reason, "device session invalidated");
        self.core.invalidate(None, reason);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // An in-flight pairing future holds the core; release it with the manager.
        let previous = std::mem::replace(&mut self.core.lock().slot, Slot::Uninitialized);
        if matches!(previous, Slot::Awaiting(_)) {
            self.core.channel.cancel();
        }
        drop(previous);
    }
}

/// Access to a connected session.
///
/// Every device operation goes through [`SessionHandle::call`].
#[derive(Clone)]
pub struct SessionHandle {
    core: Arc<SessionCore>,
    session: Arc<DeviceSession>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session", &self.session)
            .finish()
    }
}

impl SessionHandle {
    /// The underlying session.
    #[must_use]
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Run one device operation.
    ///
    /// A [`DeviceFault`] is normalized into
    /// [`WalletError::TransportFailure`] and invalidates this session, so
    /// the next [`SessionManager::ensure_session`] pairs again.
    ///
    /// # Errors
    ///
    /// Returns the normalized transport failure.
    pub async fn call<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn DeviceClient>) -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, DeviceFault>> + Send,
    {
        let generation = self.session.generation;
        let outcome = f(Arc::clone(&self.session.client))
            .instrument(device_span(operation, generation))
            .await;

        outcome.map_err(|fault| {
            let error = WalletError::from_fault(fault);
            warn!(operation, generation, error = %error, "device call failed, invalidating session");
            self.core.invalidate(Some(generation), error.to_string());
            error
        })
    }
}
