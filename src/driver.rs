//! Command/query driver for the MD8475A.
//!
//! [`Md8475a`] owns the transport and turns logical operations into wire
//! exchanges. Queries return the raw reply. Commands, with error reporting on,
//! carry an inline `;ERROR?` and are then confirmed with `*OPC?`.
//!
//! A session is strictly one request, one reply. The driver is `!Sync`, so a
//! session cannot be shared across threads without the caller wrapping it.

use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bts::{BaseTransceiverStation, BtsNumber};
use crate::config::CallboxConfig;
use crate::error::{CallboxError, Result};
use crate::lifecycle::LifecycleConfig;
use crate::pdn::{PacketDataNetwork, PdnNumber};
use crate::phone::VirtualPhone;
use crate::testcase::TestCaseConfigurator;
use crate::transport::{check_frame, TcpTransport, Transport};
use crate::trigger::TriggerMessage;
use crate::wire::parse_reply;

/// Remote-control port of the MD8475A.
pub const DEFAULT_PORT: u16 = 28002;

/// `ERROR?` reply for an accepted command.
pub const NO_ERROR: i32 = 0;

/// `*OPC?` reply once a command has finished applying.
pub const OPERATION_COMPLETE: &str = "1";

/// Per-exchange waits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub connect: Duration,
    pub query: Duration,
    pub command: Duration,
}

/// An open session with an MD8475A signalling tester.
pub struct Md8475a<T: Transport = TcpTransport> {
    transport: RefCell<Option<T>>,
    error_reporting: Cell<bool>,
    timeouts: Timeouts,
    lifecycle: LifecycleConfig,
}

impl Md8475a<TcpTransport> {
    /// Connects over TCP and performs the identification handshake.
    pub fn connect(config: &CallboxConfig) -> Result<Self> {
        info!(address = %config.address, port = config.port, "connecting to MD8475A");
        let transport = TcpTransport::connect(&config.address, config.port, config.connect_timeout)?;
        Self::open(transport, config)
    }
}

impl<T: Transport> Md8475a<T> {
    /// Takes ownership of `transport` and confirms the peer answers `*IDN?`.
    pub fn open(transport: T, config: &CallboxConfig) -> Result<Self> {
        let anritsu = Self {
            transport: RefCell::new(Some(transport)),
            error_reporting: Cell::new(config.error_reporting),
            timeouts: config.timeouts(),
            lifecycle: config.lifecycle.clone(),
        };

        match anritsu.query_with_timeout("*IDN?", config.connect_timeout) {
            Ok(idn) => {
                info!(idn = %idn, "instrument identified");
                Ok(anritsu)
            }
            Err(e) => Err(CallboxError::Connection {
                address: config.endpoint(),
                reason: format!("identification failed: {e}"),
            }),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn lifecycle_config(&self) -> &LifecycleConfig {
        &self.lifecycle
    }

    /// Whether commands are followed by an inline error check.
    pub fn error_reporting(&self) -> bool {
        self.error_reporting.get()
    }

    pub fn set_error_reporting(&self, enabled: bool) {
        debug!(enabled, "error reporting");
        self.error_reporting.set(enabled);
    }

    pub fn is_connected(&self) -> bool {
        self.transport.borrow().is_some()
    }

    /// Closes the session. Handles created from it fail with `SessionClosed` afterwards.
    pub fn disconnect(&self) -> Result<()> {
        match self.transport.borrow_mut().take() {
            Some(mut transport) => {
                info!("disconnecting from MD8475A");
                transport.close()
            }
            None => Ok(()),
        }
    }

    fn with_transport<R>(&self, exchange: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let mut slot = self.transport.borrow_mut();
        let transport = slot.as_mut().ok_or(CallboxError::SessionClosed)?;
        exchange(transport)
    }

    /// Sends a query and returns the raw reply.
    pub fn query(&self, text: &str) -> Result<String> {
        self.query_with_timeout(text, self.timeouts.query)
    }

    pub fn query_with_timeout(&self, text: &str, timeout: Duration) -> Result<String> {
        check_frame(text)?;
        self.with_transport(|t| t.send_and_receive(text, timeout))
    }

    /// Sends a command and, with error reporting on, checks it was accepted and completed.
    pub fn command(&self, text: &str) -> Result<()> {
        self.command_with_timeout(text, self.timeouts.command)
    }

    pub fn command_with_timeout(&self, text: &str, timeout: Duration) -> Result<()> {
        check_frame(text)?;
        if !self.error_reporting.get() {
            return self.with_transport(|t| t.send(text));
        }

        let request = format!("{text};ERROR?");
        let reply = self.query_with_timeout(&request, timeout)?;
        let code: i32 = parse_reply(&request, &reply)?;
        if code != NO_ERROR {
            warn!(code, command = text, "instrument reported an error");
            return Err(CallboxError::Instrument {
                code,
                command: text.to_string(),
            });
        }

        let completion = self.query_with_timeout("*OPC?", timeout)?;
        if completion != OPERATION_COMPLETE {
            return Err(CallboxError::IncompleteOperation {
                command: text.to_string(),
                reply: completion,
            });
        }
        Ok(())
    }

    /// `<M>? <resource>`
    pub(crate) fn get_property<V: FromStr>(&self, mnemonic: &str, resource: &str) -> Result<V> {
        let request = format!("{mnemonic}? {resource}");
        let reply = self.query(&request)?;
        parse_reply(&request, &reply)
    }

    /// `<M> <value>,<resource>`
    pub(crate) fn set_property(&self, mnemonic: &str, value: impl Display, resource: &str) -> Result<()> {
        self.command(&format!("{mnemonic} {value},{resource}"))
    }

    /// `<M>?` for instrument-wide settings.
    pub(crate) fn get_setting<V: FromStr>(&self, mnemonic: &str) -> Result<V> {
        let request = format!("{mnemonic}?");
        let reply = self.query(&request)?;
        parse_reply(&request, &reply)
    }

    /// `<M> <value>` for instrument-wide settings.
    pub(crate) fn set_setting(&self, mnemonic: &str, value: impl Display) -> Result<()> {
        self.command(&format!("{mnemonic} {value}"))
    }

    /// Identification string from `*IDN?`.
    pub fn identify(&self) -> Result<String> {
        self.query("*IDN?")
    }

    /// Returns the instrument to its power-on defaults.
    pub fn reset(&self) -> Result<()> {
        info!("resetting MD8475A");
        self.command("*RST")
    }

    /// Closes the simulation application. The instrument does not answer `EXIT`,
    /// so it is sent without the error check.
    pub fn exit_smartstudio(&self) -> Result<()> {
        info!("exiting simulation application");
        let reporting = self.error_reporting.replace(false);
        let result = self.command("EXIT");
        self.error_reporting.set(reporting);
        result
    }

    pub fn load_simulation_paramfile(&self, path: &str) -> Result<()> {
        info!(path, "loading simulation parameters");
        self.command(&format!("LOADSIMPARAM {}", quoted_path(path)?))
    }

    pub fn load_cell_paramfile(&self, path: &str) -> Result<()> {
        info!(path, "loading cell parameters");
        self.command(&format!("LOADCELLPARAM {}", quoted_path(path)?))
    }

    pub fn save_sequence_log(&self, path: &str) -> Result<()> {
        self.command(&format!("SAVESEQLOG {}", quoted_path(path)?))
    }

    pub fn clear_sequence_log(&self) -> Result<()> {
        self.command("CLEARSEQLOG")
    }

    /// Starts the configured test procedure.
    pub fn start_testcase(&self) -> Result<()> {
        info!("starting test procedure");
        self.command("STARTTEST")
    }

    pub fn testcase_status(&self) -> Result<String> {
        self.query("TESTSTAT?")
    }

    pub fn bts(&self, number: BtsNumber) -> BaseTransceiverStation<'_, T> {
        BaseTransceiverStation::new(self, number)
    }

    /// A PDN handle. Numbers run from 1 to [`PdnNumber::MAX`].
    pub fn pdn(&self, number: u8) -> Result<PacketDataNetwork<'_, T>> {
        Ok(PacketDataNetwork::new(self, PdnNumber::new(number)?))
    }

    pub fn virtual_phone(&self) -> VirtualPhone<'_, T> {
        VirtualPhone::new(self)
    }

    pub fn trigger_message(&self) -> TriggerMessage<'_, T> {
        TriggerMessage::new(self)
    }

    pub fn test_case(&self) -> TestCaseConfigurator<'_, T> {
        TestCaseConfigurator::new(self)
    }
}

// Paths travel inside double quotes, so they cannot contain one.
fn quoted_path(path: &str) -> Result<String> {
    if path.is_empty() || path.contains(['"', '\0']) {
        return Err(CallboxError::invalid(format!("unusable file path {path:?}")));
    }
    Ok(format!("\"{path}\""))
}

impl<T: Transport> Drop for Md8475a<T> {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("error while closing session: {e}");
        }
    }
}
