//! Session configuration and simulation profiles, both loaded from TOML.
//!
//! ```toml
//! address = "192.168.1.10"
//! query_timeout = 5.0
//!
//! [lifecycle]
//! registration_timeout = 300
//! ```

use std::collections::HashSet;
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bts::{
    check_antennas, check_digits, check_name, check_physical_cell_id, BaseTransceiverStation,
    BtsBandwidth, BtsNumber, BtsPacketRate, BtsSchedulingMode, BtsServiceState, BtsTechnology,
    BtsTransmissionMode, SchedulingParams,
};
use crate::driver::{Md8475a, Timeouts, DEFAULT_PORT};
use crate::error::{CallboxError, Result};
use crate::lifecycle::{check_simulation_model, LifecycleConfig};
use crate::pdn::{IpAddressType, PacketDataNetwork, PdnNumber};
use crate::transport::Transport;

/// Durations as (fractional) seconds. Zero is rejected.
pub mod seconds {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        let duration = Duration::try_from_secs_f64(secs).map_err(D::Error::custom)?;
        if duration.is_zero() {
            return Err(D::Error::custom("duration must be greater than zero"));
        }
        Ok(duration)
    }
}

/// Where the instrument lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallboxConfig {
    pub address: String,
    pub port: u16,
    /// Covers the TCP connect and the `*IDN?` handshake.
    #[serde(with = "seconds")]
    pub connect_timeout: Duration,
    #[serde(with = "seconds")]
    pub query_timeout: Duration,
    #[serde(with = "seconds")]
    pub command_timeout: Duration,
    pub error_reporting: bool,
    pub lifecycle: LifecycleConfig,
}

impl Default for CallboxConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(120),
            query_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(20),
            error_reporting: true,
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl CallboxConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CallboxError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| CallboxError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: self.connect_timeout,
            query: self.query_timeout,
            command: self.command_timeout,
        }
    }

    /// `host:port`, as used in log lines and connection errors.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// A network setup to push onto the instrument in one go.
///
/// Values are kept as written in the file and checked by [`SimulationProfile::validate`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationProfile {
    /// Technologies for BTS1, BTS2, ... in order.
    #[serde(default)]
    pub model: Vec<String>,
    #[serde(default)]
    pub bts: Vec<BtsProfile>,
    #[serde(default)]
    pub pdn: Vec<PdnProfile>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BtsProfile {
    pub number: String,
    pub output_level: Option<f64>,
    pub input_level: Option<f64>,
    pub band: Option<u32>,
    pub dl_bandwidth: Option<String>,
    pub ul_bandwidth: Option<String>,
    pub transmission_mode: Option<String>,
    pub dl_antenna: Option<u8>,
    pub packet_rate: Option<String>,
    pub dl_channel: Option<u32>,
    pub mcc: Option<String>,
    pub mnc: Option<String>,
    pub lac: Option<u32>,
    pub rac: Option<u32>,
    pub tac: Option<u32>,
    pub cell_id: Option<u32>,
    pub physical_cell_id: Option<u16>,
    pub nw_fullname: Option<String>,
    pub nw_shortname: Option<String>,
    pub service_state: Option<String>,
    pub scheduling_mode: Option<String>,
    pub mcs_dl: Option<u8>,
    pub mcs_ul: Option<u8>,
    pub nrb_dl: Option<u8>,
    pub nrb_ul: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PdnProfile {
    pub number: u8,
    pub ip_type: Option<String>,
    pub ue_ipv4: Option<String>,
    pub ue_ipv6: Option<String>,
    pub primary_dns_ipv4: Option<String>,
    pub secondary_dns_ipv4: Option<String>,
    pub dns_ipv6: Option<String>,
    pub cscf_ipv4: Option<String>,
    pub cscf_ipv6: Option<String>,
}

fn field<V: FromStr>(owner: &str, name: &str, value: &Option<String>) -> Result<Option<V>> {
    value
        .as_deref()
        .map(|raw| {
            raw.parse().map_err(|_| {
                CallboxError::invalid(format!("{owner}: `{raw}` is not a valid {name}"))
            })
        })
        .transpose()
}

// Typed form of a profile. Building it is the whole validation step.
struct ProfilePlan {
    model: Option<Vec<BtsTechnology>>,
    bts: Vec<BtsPlan>,
    pdn: Vec<PdnPlan>,
}

struct BtsPlan {
    number: BtsNumber,
    output_level: Option<f64>,
    input_level: Option<f64>,
    band: Option<u32>,
    dl_bandwidth: Option<BtsBandwidth>,
    ul_bandwidth: Option<BtsBandwidth>,
    transmission_mode: Option<BtsTransmissionMode>,
    dl_antenna: Option<u8>,
    packet_rate: Option<BtsPacketRate>,
    dl_channel: Option<u32>,
    mcc: Option<String>,
    mnc: Option<String>,
    lac: Option<u32>,
    rac: Option<u32>,
    tac: Option<u32>,
    cell_id: Option<u32>,
    physical_cell_id: Option<u16>,
    nw_fullname: Option<String>,
    nw_shortname: Option<String>,
    service_state: Option<BtsServiceState>,
    scheduling: Option<(BtsSchedulingMode, SchedulingParams)>,
}

struct PdnPlan {
    number: PdnNumber,
    ip_type: Option<IpAddressType>,
    ue_ipv4: Option<Ipv4Addr>,
    ue_ipv6: Option<Ipv6Addr>,
    primary_dns_ipv4: Option<Ipv4Addr>,
    secondary_dns_ipv4: Option<Ipv4Addr>,
    dns_ipv6: Option<Ipv6Addr>,
    cscf_ipv4: Option<Ipv4Addr>,
    cscf_ipv6: Option<Ipv6Addr>,
}

impl SimulationProfile {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CallboxError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| CallboxError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks every value without talking to the instrument.
    pub fn validate(&self) -> Result<()> {
        self.plan().map(|_| ())
    }

    fn plan(&self) -> Result<ProfilePlan> {
        let model = if self.model.is_empty() {
            None
        } else {
            let model = self
                .model
                .iter()
                .map(|tech| tech.parse::<BtsTechnology>())
                .collect::<Result<Vec<_>>>()?;
            check_simulation_model(&model)?;
            Some(model)
        };

        let mut seen = HashSet::new();
        let mut bts = Vec::with_capacity(self.bts.len());
        for entry in &self.bts {
            let plan = entry.plan()?;
            if !seen.insert(plan.number) {
                return Err(CallboxError::invalid(format!(
                    "{} appears more than once",
                    plan.number
                )));
            }
            bts.push(plan);
        }

        let mut seen = HashSet::new();
        let mut pdn = Vec::with_capacity(self.pdn.len());
        for entry in &self.pdn {
            let plan = entry.plan()?;
            if !seen.insert(plan.number) {
                return Err(CallboxError::invalid(format!(
                    "{} appears more than once",
                    plan.number
                )));
            }
            pdn.push(plan);
        }

        Ok(ProfilePlan { model, bts, pdn })
    }
}

impl BtsProfile {
    fn plan(&self) -> Result<BtsPlan> {
        let number: BtsNumber = self.number.parse()?;
        let owner = number.as_wire();

        if let Some(antennas) = self.dl_antenna {
            check_antennas(antennas)?;
        }
        if let Some(id) = self.physical_cell_id {
            check_physical_cell_id(id)?;
        }
        if let Some(mcc) = &self.mcc {
            check_digits("MCC", mcc, 3..=3)?;
        }
        if let Some(mnc) = &self.mnc {
            check_digits("MNC", mnc, 2..=3)?;
        }
        for name in [&self.nw_fullname, &self.nw_shortname].into_iter().flatten() {
            check_name(name)?;
        }

        let scheduling = match field::<BtsSchedulingMode>(owner, "scheduling mode", &self.scheduling_mode)? {
            Some(mode) => {
                let params = SchedulingParams {
                    mcs_dl: self.mcs_dl,
                    mcs_ul: self.mcs_ul,
                    nrb_dl: self.nrb_dl,
                    nrb_ul: self.nrb_ul,
                };
                params.settings_for(mode)?;
                Some((mode, params))
            }
            None => None,
        };

        Ok(BtsPlan {
            number,
            output_level: self.output_level,
            input_level: self.input_level,
            band: self.band,
            dl_bandwidth: field(owner, "bandwidth", &self.dl_bandwidth)?,
            ul_bandwidth: field(owner, "bandwidth", &self.ul_bandwidth)?,
            transmission_mode: field(owner, "transmission mode", &self.transmission_mode)?,
            dl_antenna: self.dl_antenna,
            packet_rate: field(owner, "packet rate", &self.packet_rate)?,
            dl_channel: self.dl_channel,
            mcc: self.mcc.clone(),
            mnc: self.mnc.clone(),
            lac: self.lac,
            rac: self.rac,
            tac: self.tac,
            cell_id: self.cell_id,
            physical_cell_id: self.physical_cell_id,
            nw_fullname: self.nw_fullname.clone(),
            nw_shortname: self.nw_shortname.clone(),
            service_state: field(owner, "service state", &self.service_state)?,
            scheduling,
        })
    }
}

impl PdnProfile {
    fn plan(&self) -> Result<PdnPlan> {
        let number = PdnNumber::new(self.number)?;
        let owner = number.to_string();
        Ok(PdnPlan {
            number,
            ip_type: field(&owner, "IP type", &self.ip_type)?,
            ue_ipv4: field(&owner, "IPv4 address", &self.ue_ipv4)?,
            ue_ipv6: field(&owner, "IPv6 address", &self.ue_ipv6)?,
            primary_dns_ipv4: field(&owner, "IPv4 address", &self.primary_dns_ipv4)?,
            secondary_dns_ipv4: field(&owner, "IPv4 address", &self.secondary_dns_ipv4)?,
            dns_ipv6: field(&owner, "IPv6 address", &self.dns_ipv6)?,
            cscf_ipv4: field(&owner, "IPv4 address", &self.cscf_ipv4)?,
            cscf_ipv6: field(&owner, "IPv6 address", &self.cscf_ipv6)?,
        })
    }
}

impl BtsPlan {
    fn apply<T: Transport>(&self, bts: &BaseTransceiverStation<'_, T>) -> Result<()> {
        if let Some(v) = self.output_level {
            bts.set_output_level(v)?;
        }
        if let Some(v) = self.input_level {
            bts.set_input_level(v)?;
        }
        if let Some(v) = self.band {
            bts.set_band(v)?;
        }
        if let Some(v) = self.dl_bandwidth {
            bts.set_dl_bandwidth(v)?;
        }
        if let Some(v) = self.ul_bandwidth {
            bts.set_ul_bandwidth(v)?;
        }
        if let Some(v) = self.transmission_mode {
            bts.set_transmission_mode(v)?;
        }
        if let Some(v) = self.dl_antenna {
            bts.set_dl_antenna(v)?;
        }
        if let Some(v) = self.packet_rate {
            bts.set_packet_rate(v)?;
        }
        if let Some(v) = self.dl_channel {
            bts.set_dl_channel(v)?;
        }
        if let Some(v) = &self.mcc {
            bts.set_mcc(v)?;
        }
        if let Some(v) = &self.mnc {
            bts.set_mnc(v)?;
        }
        if let Some(v) = self.lac {
            bts.set_lac(v)?;
        }
        if let Some(v) = self.rac {
            bts.set_rac(v)?;
        }
        if let Some(v) = self.tac {
            bts.set_tac(v)?;
        }
        if let Some(v) = self.cell_id {
            bts.set_cell_id(v)?;
        }
        if let Some(v) = self.physical_cell_id {
            bts.set_physical_cell_id(v)?;
        }
        if let Some(v) = &self.nw_fullname {
            bts.set_nw_fullname(v)?;
        }
        if let Some(v) = &self.nw_shortname {
            bts.set_nw_shortname(v)?;
        }
        if let Some(v) = self.service_state {
            bts.set_service_state(v)?;
        }
        if let Some((mode, params)) = self.scheduling {
            bts.set_scheduling_mode(mode, params)?;
        }
        Ok(())
    }
}

impl PdnPlan {
    fn apply<T: Transport>(&self, pdn: &PacketDataNetwork<'_, T>) -> Result<()> {
        if let Some(v) = self.ip_type {
            pdn.set_ue_address_iptype(v)?;
        }
        if let Some(v) = self.ue_ipv4 {
            pdn.set_ue_address_ipv4(v)?;
        }
        if let Some(v) = self.ue_ipv6 {
            pdn.set_ue_address_ipv6(v)?;
        }
        if let Some(v) = self.primary_dns_ipv4 {
            pdn.set_primary_dns_address_ipv4(v)?;
        }
        if let Some(v) = self.secondary_dns_ipv4 {
            pdn.set_secondary_dns_address_ipv4(v)?;
        }
        if let Some(v) = self.dns_ipv6 {
            pdn.set_dns_address_ipv6(v)?;
        }
        if let Some(v) = self.cscf_ipv4 {
            pdn.set_cscf_address_ipv4(v)?;
        }
        if let Some(v) = self.cscf_ipv6 {
            pdn.set_cscf_address_ipv6(v)?;
        }
        Ok(())
    }
}

impl<T: Transport> Md8475a<T> {
    /// Validates the whole profile, then applies it: model first, then each
    /// basestation, then each PDN. Nothing is sent if any value is invalid.
    pub fn apply_profile(&self, profile: &SimulationProfile) -> Result<()> {
        let plan = profile.plan()?;
        info!(
            bts = plan.bts.len(),
            pdn = plan.pdn.len(),
            "applying simulation profile"
        );
        if let Some(model) = &plan.model {
            self.set_simulation_model(model)?;
        }
        for bts in &plan.bts {
            bts.apply(&self.bts(bts.number))?;
        }
        for pdn in &plan.pdn {
            pdn.apply(&self.pdn(pdn.number.get())?)?;
        }
        Ok(())
    }
}
