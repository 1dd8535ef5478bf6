use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::protocol::{
    API_VERSION, decode_capabilities, decode_live_state, fan_command, horizontal_vane_command,
    local_command_body, lossnay_preset_code, mode_command, power_command, temperature_command,
    vertical_vane_command, zone_command,
};
use crate::session::Transport;
use crate::types::{Capabilities, DeviceIdentity, LiveState, Mode, Zone};
use crate::{Error, Result};

/// Live state is trusted for this long after a fetch.
pub const STATE_LEASE: Duration = Duration::from_secs(30);

const LOCAL_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// One MELView unit: a lease-checked cache of capabilities and live
/// state, plus the command path to the cloud (and opportunistically to
/// the unit's LAN address).
#[derive(Debug)]
pub struct Device {
    identity: DeviceIdentity,
    transport: Transport,
    local_control: bool,
    state_lease: Duration,
    capabilities: Option<Capabilities>,
    state: Option<LiveState>,
    orphaned: bool,
}

impl Device {
    pub(crate) fn new(
        identity: DeviceIdentity,
        transport: Transport,
        local_control: bool,
        state_lease: Duration,
    ) -> Self {
        Self {
            identity,
            transport,
            local_control,
            state_lease,
            capabilities: None,
            state: None,
            orphaned: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.identity.unit_id
    }

    pub fn building_id(&self) -> u32 {
        self.identity.building_id
    }

    pub fn friendly_name(&self) -> &str {
        &self.identity.friendly_name
    }

    /// Mark this device as removed from the account. Every later
    /// refresh, accessor, or command fails with `DeviceOrphaned`
    /// instead of touching the network.
    pub fn mark_orphaned(&mut self) {
        self.orphaned = true;
    }

    pub fn is_orphaned(&self) -> bool {
        self.orphaned
    }

    /// Fetch capabilities and live state. Used once at discovery;
    /// afterwards capabilities are only refreshed explicitly.
    pub async fn refresh(&mut self) -> Result<()> {
        self.refresh_capabilities().await?;
        self.refresh_state().await
    }

    pub async fn refresh_capabilities(&mut self) -> Result<()> {
        self.check_orphaned()?;
        let body = json!({ "unitid": self.identity.unit_id, "v": API_VERSION });
        let data = self
            .transport
            .post_authenticated("/unitcapabilities.aspx", &body)
            .await?;
        self.capabilities = Some(decode_capabilities(&data));
        debug!(unit = self.identity.unit_id, "capabilities refreshed");
        Ok(())
    }

    /// Fetch a fresh live-state snapshot. A `COMM` fault means the
    /// Wi-Fi adapter is unreachable and clears the cache entirely.
    pub async fn refresh_state(&mut self) -> Result<()> {
        self.check_orphaned()?;
        let body = json!({ "unitid": self.identity.unit_id, "v": API_VERSION });
        let data = self
            .transport
            .post_authenticated("/unitcommand.aspx", &body)
            .await?;
        let state = decode_live_state(&data);

        if state.fault == "COMM" {
            self.state = None;
            return Err(Error::GatewayOffline);
        }
        if !state.fault.is_empty() {
            warn!(unit = self.identity.unit_id, fault = %state.fault, "unit fault");
        }
        if state.error != "ok" {
            warn!(unit = self.identity.unit_id, error = %state.error, "unit error");
        }

        self.state = Some(state);
        Ok(())
    }

    fn check_orphaned(&self) -> Result<()> {
        if self.orphaned {
            return Err(Error::DeviceOrphaned(self.identity.unit_id));
        }
        Ok(())
    }

    async fn ensure_state(&mut self) -> Result<&LiveState> {
        self.check_orphaned()?;
        let stale = match &self.state {
            None => true,
            Some(state) => state.fetched_at.elapsed() >= self.state_lease,
        };
        if stale {
            debug!(unit = self.identity.unit_id, "live state stale, refreshing");
            self.refresh_state().await?;
        }
        self.state
            .as_ref()
            .ok_or_else(|| Error::Decode("live state unavailable".into()))
    }

    async fn ensure_capabilities(&mut self) -> Result<&Capabilities> {
        self.check_orphaned()?;
        if self.capabilities.is_none() {
            self.refresh_capabilities().await?;
        }
        self.capabilities
            .as_ref()
            .ok_or_else(|| Error::Decode("capabilities unavailable".into()))
    }

    /// Capability descriptor, fetched lazily on first use and never
    /// re-fetched automatically afterwards.
    pub async fn capabilities(&mut self) -> Result<&Capabilities> {
        self.ensure_capabilities().await
    }

    // -- Live-state accessors (each validates the lease first) --

    pub async fn is_power_on(&mut self) -> Result<bool> {
        Ok(self.ensure_state().await?.power)
    }

    pub async fn is_standby(&mut self) -> Result<bool> {
        Ok(self.ensure_state().await?.standby)
    }

    pub async fn mode(&mut self) -> Result<Mode> {
        Ok(self.ensure_state().await?.mode())
    }

    pub async fn target_temperature(&mut self) -> Result<f64> {
        self.ensure_state()
            .await?
            .set_temp
            .ok_or_else(|| Error::Decode("settemp missing from live state".into()))
    }

    pub async fn room_temperature(&mut self) -> Result<f64> {
        self.ensure_state()
            .await?
            .room_temp
            .ok_or_else(|| Error::Decode("roomtemp missing from live state".into()))
    }

    /// Outdoor temperature, `Ok(None)` when the unit has no sensor.
    pub async fn outside_temperature(&mut self) -> Result<Option<f64>> {
        if !self.ensure_capabilities().await?.has_outdoor_temp {
            return Ok(None);
        }
        Ok(self.ensure_state().await?.outdoor_temp)
    }

    /// Current fan speed label; unknown or missing codes read as "auto".
    pub async fn fan_speed(&mut self) -> Result<&'static str> {
        let code = self.ensure_state().await?.fan_code;
        let caps = self.ensure_capabilities().await?;
        match code.and_then(|c| caps.fan.label(c)) {
            Some(label) => Ok(label),
            None => {
                if let Some(code) = code {
                    warn!(code, "unrecognized fan code, reporting auto");
                }
                Ok("auto")
            }
        }
    }

    /// Current vertical vane label; `Ok(None)` when the unit has no
    /// vertical vane. Unknown codes read as "Auto".
    pub async fn vertical_vane(&mut self) -> Result<Option<&'static str>> {
        let code = self.ensure_state().await?.vertical_vane_code;
        let caps = self.ensure_capabilities().await?;
        if caps.vertical_vane.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            code.and_then(|c| caps.vertical_vane.label(c)).unwrap_or("Auto"),
        ))
    }

    pub async fn horizontal_vane(&mut self) -> Result<Option<&'static str>> {
        let code = self.ensure_state().await?.horizontal_vane_code;
        let caps = self.ensure_capabilities().await?;
        if caps.horizontal_vane.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            code.and_then(|c| caps.horizontal_vane.label(c)).unwrap_or("Auto"),
        ))
    }

    pub async fn zones(&mut self) -> Result<Vec<Zone>> {
        Ok(self.ensure_state().await?.zones.clone())
    }

    // -- Presented option lists, filtered to the declared subset --

    pub async fn fan_options(&mut self) -> Result<Vec<&'static str>> {
        Ok(self.ensure_capabilities().await?.fan.labels().collect())
    }

    pub async fn vertical_vane_options(&mut self) -> Result<Vec<&'static str>> {
        Ok(self
            .ensure_capabilities()
            .await?
            .vertical_vane
            .labels()
            .collect())
    }

    pub async fn horizontal_vane_options(&mut self) -> Result<Vec<&'static str>> {
        Ok(self
            .ensure_capabilities()
            .await?
            .horizontal_vane
            .labels()
            .collect())
    }

    // -- Commands --

    /// Send a raw command token. Live state must be determinable first;
    /// commands are never issued against an unknown device state. On
    /// success the cloud response may carry a local-command token,
    /// which is relayed to the unit's LAN address best-effort.
    pub async fn send_command(&mut self, token: &str) -> Result<()> {
        self.check_orphaned()?;
        debug!(unit = self.identity.unit_id, token, "command issued");

        if let Err(e) = self.ensure_state().await {
            error!(unit = self.identity.unit_id, token, "state unknown, command blocked");
            return Err(e);
        }

        if let Some(ref logger) = self.transport.logger
            && let Ok(mut logger) = logger.lock()
        {
            logger.log_command(self.identity.unit_id, token);
        }

        let body = json!({
            "unitid": self.identity.unit_id,
            "v": API_VERSION,
            "commands": token,
            "lc": 1,
        });
        let data = self
            .transport
            .post_authenticated("/unitcommand.aspx", &body)
            .await?;
        debug!(unit = self.identity.unit_id, "command confirmed by server");

        self.relay_local(&data).await;
        Ok(())
    }

    /// Best-effort LAN delivery of the local-command token. Failure
    /// here never fails the overall command; the cloud confirmation is
    /// authoritative.
    async fn relay_local(&self, data: &Value) {
        if !self.local_control {
            return;
        }
        let Some(local_ip) = self.capabilities.as_ref().and_then(|c| c.local_ip.as_deref())
        else {
            return;
        };
        let Some(token) = data.get("lc").and_then(|v| v.as_str()) else {
            warn!(unit = self.identity.unit_id, "command response missing local command token");
            return;
        };

        let url = format!("http://{local_ip}/smart");
        let result = self
            .transport
            .http
            .post(&url)
            .timeout(LOCAL_COMMAND_TIMEOUT)
            .body(local_command_body(token))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().as_u16() == 200 => {
                debug!(unit = self.identity.unit_id, "command sent locally");
            }
            Ok(resp) => {
                warn!(
                    unit = self.identity.unit_id,
                    status = resp.status().as_u16(),
                    "local command rejected"
                );
            }
            Err(e) => {
                warn!(unit = self.identity.unit_id, "local command delivery failed: {e}");
            }
        }
    }

    pub async fn power_on(&mut self) -> Result<()> {
        self.send_command(&power_command(true)).await
    }

    pub async fn power_off(&mut self) -> Result<()> {
        self.send_command(&power_command(false)).await
    }

    async fn ensure_power_on(&mut self) -> Result<()> {
        if !self.is_power_on().await? {
            self.power_on().await?;
        }
        Ok(())
    }

    /// Set the operating mode, powering the unit on first if needed.
    pub async fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.ensure_power_on().await?;
        self.send_command(&mode_command(mode.code())).await
    }

    /// Set the target temperature. A range declared for the active mode
    /// is enforced locally before any command is sent; with no declared
    /// range the command is sent as-is.
    pub async fn set_temperature(&mut self, temperature: f64) -> Result<()> {
        let mode = self.mode().await?;
        let range = self.ensure_capabilities().await?.temp_range(mode);
        match range {
            Some(range) => {
                if temperature < range.min || temperature > range.max {
                    error!(
                        temperature,
                        min = range.min,
                        max = range.max,
                        %mode,
                        "target temperature outside range"
                    );
                    return Err(Error::TemperatureOutOfRange {
                        requested: temperature,
                        min: range.min,
                        max: range.max,
                    });
                }
            }
            None => {
                warn!(%mode, "no temperature range for mode, sending anyway");
            }
        }
        self.send_command(&temperature_command(temperature)).await
    }

    /// Set the fan speed by stage label, powering on first if needed.
    pub async fn set_fan_speed(&mut self, label: &str) -> Result<()> {
        self.ensure_power_on().await?;
        let code = self
            .ensure_capabilities()
            .await?
            .fan
            .code(label)
            .ok_or_else(|| Error::UnsupportedFanSpeed(label.to_string()))?;
        self.send_command(&fan_command(code)).await
    }

    /// Set the fan speed by raw stage code.
    pub async fn set_fan_code(&mut self, code: u8) -> Result<()> {
        self.ensure_power_on().await?;
        if !self.ensure_capabilities().await?.fan.contains_code(code) {
            return Err(Error::UnsupportedFanSpeed(code.to_string()));
        }
        self.send_command(&fan_command(code)).await
    }

    pub async fn set_vertical_vane(&mut self, label: &str) -> Result<()> {
        self.ensure_power_on().await?;
        let code = self
            .ensure_capabilities()
            .await?
            .vertical_vane
            .code(label)
            .ok_or_else(|| Error::UnsupportedVanePosition(label.to_string()))?;
        self.send_command(&vertical_vane_command(code)).await
    }

    pub async fn set_horizontal_vane(&mut self, label: &str) -> Result<()> {
        self.ensure_power_on().await?;
        let code = self
            .ensure_capabilities()
            .await?
            .horizontal_vane
            .code(label)
            .ok_or_else(|| Error::UnsupportedVanePosition(label.to_string()))?;
        self.send_command(&horizontal_vane_command(code)).await
    }

    pub async fn enable_zone(&mut self, zone_id: u32) -> Result<()> {
        self.send_command(&zone_command(zone_id, true)).await
    }

    pub async fn disable_zone(&mut self, zone_id: u32) -> Result<()> {
        self.send_command(&zone_command(zone_id, false)).await
    }

    /// Set a Lossnay/ERV preset by label.
    pub async fn set_lossnay_preset(&mut self, label: &str) -> Result<()> {
        let code =
            lossnay_preset_code(label).ok_or_else(|| Error::UnknownPreset(label.to_string()))?;
        self.send_command(&mode_command(code)).await
    }
}
