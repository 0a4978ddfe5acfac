//! In-memory device and agent doubles shared by the unit tests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::config::SIGNING_ENDPOINT_MAINNET;
use crate::credential::{AgentRequest, CredentialAgent, CredentialChannel};
use crate::device::{
    AddressRequest, ClientConfig, DEFAULT_APP_NAME, DeviceClient, DeviceConnector,
    DeviceSignature, PairingCodeProvider, SignResponse, SigningRequest,
};
use crate::error::{DeviceFault, Result};
use crate::session::{SessionManager, SessionSettings};

pub const AGENT_URL: &str = "https://lattice.gridplus.io";

pub fn credential_payload(device_id: &str, password: &str) -> String {
    serde_json::json!({ "deviceID": device_id, "password": password }).to_string()
}

/// Agent that forwards each request to the test and never answers itself.
pub struct QueuedAgent {
    opened: mpsc::UnboundedSender<AgentRequest>,
}

impl QueuedAgent {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { opened: tx }, rx)
    }
}

#[async_trait]
impl CredentialAgent for QueuedAgent {
    async fn open(&self, request: AgentRequest) -> Result<()> {
        let _ = self.opened.send(request);
        Ok(())
    }
}

pub struct FixedPairingCode(pub String);

#[async_trait]
impl PairingCodeProvider for FixedPairingCode {
    async fn pairing_code(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

pub fn channel(agent: Arc<dyn CredentialAgent>) -> CredentialChannel {
    CredentialChannel::new(agent, Url::parse(AGENT_URL).unwrap())
}

pub fn manager_with_channel(
    channel: CredentialChannel,
    device: &MockDevice,
    pairing_codes: Option<Arc<dyn PairingCodeProvider>>,
) -> SessionManager {
    SessionManager::new(
        channel,
        Arc::new(device.clone()),
        pairing_codes,
        SessionSettings {
            app_name: DEFAULT_APP_NAME.into(),
            signing_endpoint: SIGNING_ENDPOINT_MAINNET.into(),
            client_timeout: Duration::from_secs(180),
        },
    )
}

pub fn session_manager(
    agent: Arc<dyn CredentialAgent>,
    device: &MockDevice,
    pairing_codes: Option<Arc<dyn PairingCodeProvider>>,
) -> SessionManager {
    manager_with_channel(channel(agent), device, pairing_codes)
}

struct MockState {
    clients_built: usize,
    connects: usize,
    last_config: Option<ClientConfig>,
    connect_fault: Option<DeviceFault>,
    paired: bool,
    pairing_codes: Vec<String>,
    next_call_fault: Option<DeviceFault>,
    address_requests: Vec<AddressRequest>,
    address_count: Option<usize>,
    sign_requests: Vec<SigningRequest>,
    signature: DeviceSignature,
}

/// Scriptable device. Clones share state, so a test keeps one handle while
/// the session manager owns another.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                clients_built: 0,
                connects: 0,
                last_config: None,
                connect_fault: None,
                paired: true,
                pairing_codes: Vec::new(),
                next_call_fault: None,
                address_requests: Vec::new(),
                address_count: None,
                sign_requests: Vec::new(),
                signature: DeviceSignature {
                    r: "11".repeat(32),
                    s: "22".repeat(32),
                    v: Some(0),
                },
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Address the mock derives for a change/index pair.
    pub fn address_for(change: u32, index: u32) -> String {
        format!("0x{change:08x}{index:032x}")
    }

    pub fn clients_built(&self) -> usize {
        self.lock().clients_built
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn last_config(&self) -> Option<ClientConfig> {
        self.lock().last_config.clone()
    }

    pub fn fail_connect(&self, fault: DeviceFault) {
        self.lock().connect_fault = Some(fault);
    }

    pub fn set_paired(&self, paired: bool) {
        self.lock().paired = paired;
    }

    pub fn pairing_codes(&self) -> Vec<String> {
        self.lock().pairing_codes.clone()
    }

    /// Fail the next `get_addresses` or `sign` call.
    pub fn fail_next_call(&self, fault: DeviceFault) {
        self.lock().next_call_fault = Some(fault);
    }

    /// Return this many addresses regardless of the requested count.
    pub fn set_address_count(&self, count: usize) {
        self.lock().address_count = Some(count);
    }

    pub fn set_signature(&self, signature: DeviceSignature) {
        self.lock().signature = signature;
    }

    pub fn address_requests(&self) -> Vec<AddressRequest> {
        self.lock().address_requests.clone()
    }

    pub fn sign_requests(&self) -> Vec<SigningRequest> {
        self.lock().sign_requests.clone()
    }

    /// Every device operation issued after connecting.
    pub fn device_calls(&self) -> usize {
        let state = self.lock();
        state.address_requests.len() + state.sign_requests.len()
    }
}

impl DeviceConnector for MockDevice {
    fn client(
        &self,
        config: ClientConfig,
    ) -> std::result::Result<Arc<dyn DeviceClient>, DeviceFault> {
        let mut state = self.lock();
        state.clients_built += 1;
        state.last_config = Some(config);
        Ok(Arc::new(MockClient {
            device: self.clone(),
        }))
    }
}

struct MockClient {
    device: MockDevice,
}

#[async_trait]
impl DeviceClient for MockClient {
    async fn connect(&self, _device_id: &str) -> std::result::Result<bool, DeviceFault> {
        let mut state = self.device.lock();
        state.connects += 1;
        match state.connect_fault.clone() {
            Some(fault) => Err(fault),
            None => Ok(state.paired),
        }
    }

    async fn pair(&self, pairing_code: &str) -> std::result::Result<bool, DeviceFault> {
        self.device.lock().pairing_codes.push(pairing_code.to_owned());
        Ok(true)
    }

    async fn get_addresses(
        &self,
        request: &AddressRequest,
    ) -> std::result::Result<Vec<String>, DeviceFault> {
        let mut state = self.device.lock();
        state.address_requests.push(request.clone());
        if let Some(fault) = state.next_call_fault.take() {
            return Err(fault);
        }
        let (change, index) = match request.start_path.as_slice() {
            [.., change, index] => (*change, *index),
            [index] => (0, *index),
            [] => (0, 0),
        };
        let count = state.address_count.unwrap_or(request.n as usize);
        Ok((0..count)
            .map(|i| Self::address(change, index + i as u32))
            .collect())
    }

    async fn sign(&self, request: &SigningRequest) -> std::result::Result<SignResponse, DeviceFault> {
        let mut state = self.device.lock();
        state.sign_requests.push(request.clone());
        if let Some(fault) = state.next_call_fault.take() {
            return Err(fault);
        }
        Ok(SignResponse {
            sig: state.signature.clone(),
        })
    }
}

impl MockClient {
    fn address(change: u32, index: u32) -> String {
        MockDevice::address_for(change, index)
    }
}
