//! # MD8475A Callbox Library
//!
//! Remote control for the Anritsu MD8475A signalling tester. A [`Md8475a`]
//! session owns one NUL-framed text connection to the instrument and turns
//! typed operations into `MNEMONIC value,resource` commands and
//! `MNEMONIC? resource` queries. Resource handles ([`BaseTransceiverStation`],
//! [`PacketDataNetwork`], [`VirtualPhone`], [`TriggerMessage`],
//! [`TestCaseConfigurator`]) borrow the session and scope those calls to one
//! part of the instrument.
//!
//! The [`simulator`] module answers the same protocol in software.
//!
//! ```no_run
//! use callbox::{BtsBandwidth, BtsNumber, CallboxConfig, Md8475a};
//!
//! # fn main() -> callbox::Result<()> {
//! let anritsu = Md8475a::connect(&CallboxConfig::new("192.168.1.10"))?;
//! anritsu.launch()?;
//! anritsu.start_simulation()?;
//! anritsu.bts(BtsNumber::Bts1).set_dl_bandwidth(BtsBandwidth::Bw20Mhz)?;
//! anritsu.wait_for_ue_registration()?;
//! # Ok(())
//! # }
//! ```

pub mod bts;
pub mod config;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod pdn;
pub mod phone;
pub mod simulator;
pub mod testcase;
pub mod transport;
pub mod trigger;
pub mod wire;

pub use bts::{
    BaseTransceiverStation, BtsAccessClassBarred, BtsBandwidth, BtsCellBarred,
    BtsLteEmergencyAccessClassBarred, BtsNeighborCellMode, BtsNeighborCellType, BtsNumber,
    BtsNwNameEnable, BtsPacketRate, BtsSchedulingMode, BtsServiceState, BtsTechnology,
    BtsTransmissionMode, SchedulingParams,
};
pub use config::{BtsProfile, CallboxConfig, PdnProfile, SimulationProfile};
pub use driver::{Md8475a, Timeouts, DEFAULT_PORT};
pub use error::{CallboxError, Result};
pub use lifecycle::LifecycleConfig;
pub use pdn::{IpAddressType, PacketDataNetwork, PdnNumber};
pub use phone::{VirtualPhone, VirtualPhoneAutoAnswer, VirtualPhoneStatus};
pub use simulator::Simulator;
pub use testcase::{TestCaseConfigurator, TestMeasurement, TestPowerControl, TestProcedure};
pub use transport::{SerialTransport, StreamTransport, TcpTransport, Transport};
pub use trigger::{TriggerMessage, TriggerMessageIDs, TriggerMessageReply};
pub use wire::{CallState, CallStatus, CampingCell, SimulationAppState};
