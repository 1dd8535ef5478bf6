use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::device::{Device, STATE_LEASE};
use crate::logger::MessageLogger;
use crate::protocol::json_u32;
use crate::session::{SessionManager, Transport};
use crate::types::DeviceIdentity;
use crate::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://api.melview.net/api";

pub struct MelViewBuilder {
    email: String,
    password: String,
    base_url: String,
    local_control: bool,
    log_path: Option<String>,
    state_lease: Duration,
}

impl MelViewBuilder {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            local_control: false,
            log_path: None,
            state_lease: STATE_LEASE,
        }
    }

    /// Override the cloud API base URL (primarily for tests).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Relay command tokens to each unit's LAN address when the cloud
    /// response includes one.
    pub fn local_control(mut self, enabled: bool) -> Self {
        self.local_control = enabled;
        self
    }

    /// Append every cloud request/response and command token to a
    /// JSON-lines file.
    pub fn message_log(mut self, path: impl Into<String>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Override the live-state lease duration (primarily for tests).
    pub fn state_lease(mut self, lease: Duration) -> Self {
        self.state_lease = lease;
        self
    }

    pub fn build(self) -> MelView {
        let http = reqwest::Client::builder()
            .build()
            .expect("failed to build HTTP client");

        let logger = self.log_path.map(|path| {
            Arc::new(Mutex::new(
                MessageLogger::new(&path).expect("failed to open log file"),
            ))
        });

        let session = Arc::new(SessionManager::new(
            http.clone(),
            self.base_url.clone(),
            self.email,
            self.password,
        ));

        MelView {
            transport: Transport {
                http,
                base_url: self.base_url,
                session,
                logger,
            },
            local_control: self.local_control,
            state_lease: self.state_lease,
        }
    }
}

/// Entry point: authenticates an account and lists its units as
/// `Device` handles.
pub struct MelView {
    transport: Transport,
    local_control: bool,
    state_lease: Duration,
}

impl MelView {
    pub fn builder(email: impl Into<String>, password: impl Into<String>) -> MelViewBuilder {
        MelViewBuilder::new(email, password)
    }

    pub async fn login(&self) -> Result<()> {
        self.transport.session.login().await
    }

    pub async fn is_logged_in(&self) -> bool {
        self.transport.session.is_logged_in().await
    }

    /// Device count reported by the last login payload.
    pub async fn unit_count(&self) -> Option<u64> {
        self.transport.session.unit_count().await
    }

    /// List every unit in the account, one `Device` per unit with its
    /// capabilities and state already fetched. A unit whose initial
    /// refresh fails aborts the whole listing; an account without any
    /// unit is a configuration error, not a transient one.
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let data = self
            .transport
            .post_authenticated("/rooms.aspx", &json!({ "unitid": 0 }))
            .await?;

        let buildings = data
            .as_array()
            .ok_or_else(|| Error::Decode("rooms listing is not an array".into()))?;

        let mut devices = Vec::new();
        for building in buildings {
            let building_id = json_u32(building.get("buildingid"))
                .ok_or_else(|| Error::Decode("building missing a valid buildingid".into()))?;
            let units = match building.get("units") {
                Some(Value::Array(units)) => units,
                _ => continue,
            };
            for unit in units {
                let unit_id = json_u32(unit.get("unitid"))
                    .ok_or_else(|| Error::Decode("unit missing a valid unitid".into()))?;
                let friendly_name = unit
                    .get("room")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();

                let mut device = Device::new(
                    DeviceIdentity {
                        unit_id,
                        building_id,
                        friendly_name,
                    },
                    self.transport.clone(),
                    self.local_control,
                    self.state_lease,
                );
                device.refresh().await?;
                debug!(unit = unit_id, name = device.friendly_name(), "discovered unit");
                devices.push(device);
            }
        }

        if devices.is_empty() {
            return Err(Error::NoDevices);
        }
        Ok(devices)
    }
}
