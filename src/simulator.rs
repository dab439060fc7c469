//! # MD8475A Simulator
//!
//! A software stand-in for the instrument's remote-control endpoint. It keeps the
//! simulation application state, the call state and a store of every property a
//! client has written, and answers NUL-terminated frames the way the real
//! instrument does. Useful for exercising the driver without hardware.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::bts::{BtsNumber, BtsTechnology};
use crate::transport::TERMINATOR;
use crate::wire::{CallState, SimulationAppState};

/// Error codes reported through `ERROR?`.
pub mod codes {
    pub const NO_ERROR: i32 = 0;
    /// The mnemonic is not recognised.
    pub const UNKNOWN_COMMAND: i32 = 1;
    /// An argument is missing or outside its value set.
    pub const INVALID_PARAMETER: i32 = 2;
    /// The command is not allowed in the current simulation state.
    pub const INVALID_STATE: i32 = 3;
}

/// Why a single command inside a frame was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    Unknown(String),
    InvalidParameter(String),
    InvalidState(SimulationAppState),
    /// Failure requested through [`Simulator::fail_command`].
    Injected(i32),
}

impl CommandError {
    pub fn code(&self) -> i32 {
        match self {
            CommandError::Unknown(_) => codes::UNKNOWN_COMMAND,
            CommandError::InvalidParameter(_) => codes::INVALID_PARAMETER,
            CommandError::InvalidState(_) => codes::INVALID_STATE,
            CommandError::Injected(code) => *code,
        }
    }
}

// Commands that take no arguments and only acknowledge.
const ACTIONS: &[&str] = &["CLEARSEQLOG", "STARTTEST"];

// Settings keyed by their first argument rather than a trailing BTSn/PDNn.
const LEADING_KEY: &[&str] = &["REJECTTYPE", "REJECTCAUSE", "TESTMEASUREMENT"];

// Settings whose whole argument list is one value.
const WHOLE_VALUE: &[&str] = &["TESTBTSDIRECTION", "VPAUTOANSWER"];

fn is_resource_tag(arg: &str) -> bool {
    arg.parse::<BtsNumber>().is_ok()
        || arg
            .strip_prefix("PDN")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Splits a setter's arguments into the key a later query will use and the value.
fn split_assignment(mnemonic: &str, args: &str) -> Result<(String, String), CommandError> {
    if WHOLE_VALUE.contains(&mnemonic) {
        return Ok((String::new(), args.to_string()));
    }
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    if LEADING_KEY.contains(&mnemonic) {
        return match parts.split_first() {
            Some((key, rest)) if !rest.is_empty() => Ok((key.to_string(), rest.join(","))),
            _ => Err(CommandError::InvalidParameter(args.to_string())),
        };
    }
    match parts.as_slice() {
        [leading @ .., value, resource] if is_resource_tag(resource) => {
            let mut key = leading.to_vec();
            key.push(*resource);
            Ok((key.join(","), value.to_string()))
        }
        _ => Ok((String::new(), args.to_string())),
    }
}

/// State of the simulated instrument.
#[derive(Debug, Clone)]
pub struct Simulator {
    pub identity: String,
    pub app_state: SimulationAppState,
    pub voice: CallState,
    pub packet: CallState,
    pub model: Vec<BtsTechnology>,
    pub camping: Option<BtsNumber>,
    properties: HashMap<(String, String), String>,
    failures: HashMap<String, i32>,
    last_error: i32,
    operations_pending: bool,
    // Attach to BTS1 after this many `CALLSTAT?` polls of a started simulation.
    registration_after: Option<u32>,
    polls_since_start: u32,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            identity: "ANRITSU,MD8475A,6200000001,22.60".to_string(),
            app_state: SimulationAppState::NotExist,
            voice: CallState::PowerOff,
            packet: CallState::PowerOff,
            model: vec![BtsTechnology::Lte],
            camping: None,
            properties: HashMap::new(),
            failures: HashMap::new(),
            last_error: codes::NO_ERROR,
            operations_pending: false,
            registration_after: None,
            polls_since_start: 0,
        }
    }

    /// Makes every later `mnemonic` command fail with `code`.
    pub fn fail_command(&mut self, mnemonic: &str, code: i32) {
        self.failures.insert(mnemonic.to_string(), code);
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// While set, `*OPC?` answers `0`.
    pub fn hold_operations(&mut self, pending: bool) {
        self.operations_pending = pending;
    }

    /// Registers a device on BTS1 once a started simulation has been polled `polls` times.
    pub fn register_after(&mut self, polls: Option<u32>) {
        self.registration_after = polls;
    }

    /// The device camps on `bts` and brings up a data connection.
    pub fn attach_ue(&mut self, bts: BtsNumber) {
        info!(%bts, "UE attached");
        self.voice = CallState::Idle;
        self.packet = CallState::Communication;
        self.camping = Some(bts);
    }

    pub fn detach_ue(&mut self) {
        info!("UE detached");
        self.voice = CallState::PowerOff;
        self.packet = CallState::PowerOff;
        self.camping = None;
    }

    pub fn property(&self, mnemonic: &str, key: &str) -> Option<&str> {
        self.properties
            .get(&(mnemonic.to_string(), key.to_string()))
            .map(String::as_str)
    }

    /// Seeds a value a later query will return, e.g. `RECEIVESMS` with key `""`.
    pub fn set_property(&mut self, mnemonic: &str, key: &str, value: &str) {
        self.properties
            .insert((mnemonic.to_string(), key.to_string()), value.to_string());
    }

    /// Processes one frame of `;`-separated queries and commands.
    ///
    /// Query outputs are joined with `;`. Returns `None` when the frame holds no
    /// query, in which case nothing goes back on the wire.
    pub fn process_frame(&mut self, frame: &str) -> Option<String> {
        let mut outputs = Vec::new();
        for part in frame.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some((mnemonic, args)) = parse_query(part) {
                outputs.push(self.answer(mnemonic, args));
            } else {
                let (mnemonic, args) = part.split_once(' ').unwrap_or((part, ""));
                if let Err(e) = self.execute(mnemonic, args.trim()) {
                    debug!(command = part, code = e.code(), "command refused: {e:?}");
                    self.last_error = e.code();
                }
            }
        }
        if outputs.is_empty() {
            None
        } else {
            Some(outputs.join(";"))
        }
    }

    fn answer(&mut self, mnemonic: &str, args: &str) -> String {
        match mnemonic {
            "*IDN" => self.identity.clone(),
            "*OPC" => String::from(if self.operations_pending { "0" } else { "1" }),
            "ERROR" => std::mem::replace(&mut self.last_error, codes::NO_ERROR).to_string(),
            "STAT" => self.app_state.as_wire().to_string(),
            "CALLSTAT" => {
                self.poll_registration();
                format!("{},{}", self.voice, self.packet)
            }
            "SIMMODEL" => self
                .model
                .iter()
                .map(|t| t.as_wire())
                .collect::<Vec<_>>()
                .join(","),
            "CAMPINGCELL" => match self.camping {
                Some(bts) => {
                    let index = BtsNumber::ALL.iter().position(|b| *b == bts).unwrap_or(0);
                    let rat = self.model.get(index).copied().unwrap_or(BtsTechnology::Lte);
                    format!("{bts},{rat}")
                }
                None => "NONE".to_string(),
            },
            "VPSTAT" => self.property("VPSTAT", "").unwrap_or("0").to_string(),
            _ => {
                let value = self.property(mnemonic, args).map(str::to_string);
                value.unwrap_or_else(|| {
                    self.last_error = codes::INVALID_PARAMETER;
                    String::new()
                })
            }
        }
    }

    fn poll_registration(&mut self) {
        if self.app_state != SimulationAppState::Running || self.camping.is_some() {
            return;
        }
        if let Some(after) = self.registration_after {
            self.polls_since_start += 1;
            if self.polls_since_start >= after {
                self.attach_ue(BtsNumber::Bts1);
            }
        }
    }

    fn require_state(&self, expected: SimulationAppState) -> Result<(), CommandError> {
        if self.app_state == expected {
            Ok(())
        } else {
            Err(CommandError::InvalidState(self.app_state))
        }
    }

    fn execute(&mut self, mnemonic: &str, args: &str) -> Result<(), CommandError> {
        if let Some(&code) = self.failures.get(mnemonic) {
            return Err(CommandError::Injected(code));
        }

        match mnemonic {
            "RUN" => {
                self.require_state(SimulationAppState::NotExist)?;
                info!("simulation application started");
                self.app_state = SimulationAppState::NotRun;
            }
            "EXIT" => {
                info!("simulation application closed");
                self.app_state = SimulationAppState::NotExist;
                self.detach_ue();
            }
            "START" => {
                self.require_state(SimulationAppState::NotRun)?;
                info!("simulation started");
                self.app_state = SimulationAppState::Running;
                self.polls_since_start = 0;
                self.detach_ue();
            }
            "STOP" => {
                self.require_state(SimulationAppState::Running)?;
                info!("simulation stopped");
                self.app_state = SimulationAppState::NotRun;
                self.detach_ue();
            }
            "RESETSIMULATION" => {
                self.require_state(SimulationAppState::Running)?;
                let mut parts = args.split(',').map(str::trim);
                match (parts.next(), parts.next()) {
                    (Some("POWEROFF"), None) => self.detach_ue(),
                    (Some("IDLE"), Some(bts)) => {
                        let bts = bts
                            .parse::<BtsNumber>()
                            .map_err(|_| CommandError::InvalidParameter(args.to_string()))?;
                        self.voice = CallState::Idle;
                        self.packet = CallState::Idle;
                        self.camping = Some(bts);
                    }
                    _ => return Err(CommandError::InvalidParameter(args.to_string())),
                }
            }
            "SIMMODEL" => {
                let model = args
                    .split(',')
                    .map(|t| t.trim().parse::<BtsTechnology>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| CommandError::InvalidParameter(args.to_string()))?;
                if model.is_empty() || model.len() > BtsNumber::ALL.len() {
                    return Err(CommandError::InvalidParameter(args.to_string()));
                }
                self.model = model;
            }
            "*RST" => {
                info!("reset to defaults");
                self.properties.clear();
            }
            "OPERATEVPHONE" => {
                let status = match args {
                    "OFFHOOK" => "3",
                    "ONHOOK" => "0",
                    _ => return Err(CommandError::InvalidParameter(args.to_string())),
                };
                self.set_property("VPSTAT", "", status);
            }
            _ if ACTIONS.contains(&mnemonic) => {}
            _ if args.is_empty() => return Err(CommandError::Unknown(mnemonic.to_string())),
            _ => {
                let (key, value) = split_assignment(mnemonic, args)?;
                self.set_property(mnemonic, &key, &value);
            }
        }
        Ok(())
    }
}

/// `M?` or `M? args`.
fn parse_query(part: &str) -> Option<(&str, &str)> {
    let (head, args) = part.split_once(' ').unwrap_or((part, ""));
    head.strip_suffix('?').map(|mnemonic| (mnemonic, args.trim()))
}

fn lock(simulator: &Mutex<Simulator>) -> std::sync::MutexGuard<'_, Simulator> {
    simulator.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Answers frames from one client until it disconnects.
///
/// Read timeouts are ignored, so the stream may be a serial port polled with a
/// short timeout.
pub fn serve_stream<S: Read + Write>(stream: S, simulator: &Mutex<Simulator>) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut frame = Vec::new();
    loop {
        match reader.read_until(TERMINATOR, &mut frame) {
            Ok(0) => return Ok(()),
            Ok(_) if frame.last() != Some(&TERMINATOR) => return Ok(()),
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return Err(e),
        }
        frame.pop();
        let text = String::from_utf8_lossy(&frame).into_owned();
        frame.clear();

        debug!("-> {text}");
        let reply = lock(simulator).process_frame(&text);
        if let Some(reply) = reply {
            debug!("<- {reply}");
            let stream = reader.get_mut();
            stream.write_all(reply.as_bytes())?;
            stream.write_all(&[TERMINATOR])?;
            stream.flush()?;
        }
    }
}

/// Accepts clients one at a time, as the instrument does.
pub fn serve(listener: TcpListener, simulator: &Mutex<Simulator>) -> io::Result<()> {
    info!(address = ?listener.local_addr()?, "simulator listening");
    for stream in listener.incoming() {
        let stream = stream?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        info!(%peer, "client connected");
        if let Err(e) = serve_stream(stream, simulator) {
            warn!(%peer, "client error: {e}");
        }
        info!(%peer, "client disconnected");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> Simulator {
        let mut sim = Simulator::new();
        sim.process_frame("RUN");
        sim.process_frame("START");
        sim
    }

    // --- Framing ---

    #[test]
    fn frame_without_query_has_no_reply() {
        let mut sim = Simulator::new();
        assert_eq!(sim.process_frame("OLVL 10,BTS1"), None);
    }

    #[test]
    fn query_outputs_are_joined() {
        let mut sim = Simulator::new();
        assert_eq!(
            sim.process_frame("STAT?;*OPC?").as_deref(),
            Some("NOTEXIST;1")
        );
    }

    #[test]
    fn identification() {
        let mut sim = Simulator::new();
        let idn = sim.process_frame("*IDN?").unwrap();
        assert!(idn.starts_with("ANRITSU,MD8475A"));
    }

    // --- Errors ---

    #[test]
    fn accepted_command_reports_no_error() {
        let mut sim = Simulator::new();
        assert_eq!(sim.process_frame("OLVL 10,BTS1;ERROR?").as_deref(), Some("0"));
    }

    #[test]
    fn injected_failure_is_reported_then_cleared() {
        let mut sim = Simulator::new();
        sim.fail_command("OLVL", 131);
        assert_eq!(sim.process_frame("OLVL 10,BTS1;ERROR?").as_deref(), Some("131"));
        assert_eq!(sim.process_frame("ERROR?").as_deref(), Some("0"));
        assert_eq!(sim.property("OLVL", "BTS1"), None);

        sim.clear_failures();
        sim.process_frame("OLVL 10,BTS1");
        assert_eq!(sim.property("OLVL", "BTS1"), Some("10"));
    }

    #[test]
    fn unknown_bare_command_is_refused() {
        let mut sim = Simulator::new();
        assert_eq!(
            sim.process_frame("FROBNICATE;ERROR?").as_deref(),
            Some("1")
        );
    }

    #[test]
    fn held_operations_do_not_complete() {
        let mut sim = Simulator::new();
        sim.hold_operations(true);
        assert_eq!(sim.process_frame("*OPC?").as_deref(), Some("0"));
    }

    // --- Lifecycle ---

    #[test]
    fn application_lifecycle() {
        let mut sim = Simulator::new();
        assert_eq!(sim.process_frame("START;ERROR?").as_deref(), Some("3"));
        sim.process_frame("RUN");
        assert_eq!(sim.app_state, SimulationAppState::NotRun);
        sim.process_frame("START");
        assert_eq!(sim.process_frame("STAT?").as_deref(), Some("RUNNING"));
        assert_eq!(
            sim.process_frame("CALLSTAT?").as_deref(),
            Some("POWEROFF,POWEROFF")
        );
        sim.process_frame("STOP");
        assert_eq!(sim.app_state, SimulationAppState::NotRun);
        sim.process_frame("EXIT");
        assert_eq!(sim.app_state, SimulationAppState::NotExist);
    }

    #[test]
    fn reset_simulation_to_idle_camps_on_the_cell() {
        let mut sim = running();
        sim.process_frame("SIMMODEL LTE,WCDMA");
        sim.process_frame("RESETSIMULATION IDLE,BTS2");
        assert_eq!(sim.process_frame("CALLSTAT?").as_deref(), Some("IDLE,IDLE"));
        assert_eq!(
            sim.process_frame("CAMPINGCELL?").as_deref(),
            Some("BTS2,WCDMA")
        );
        sim.process_frame("RESETSIMULATION POWEROFF");
        assert_eq!(sim.voice, CallState::PowerOff);
    }

    #[test]
    fn registration_after_polls() {
        let mut sim = running();
        sim.register_after(Some(2));
        assert_eq!(
            sim.process_frame("CALLSTAT?").as_deref(),
            Some("POWEROFF,POWEROFF")
        );
        assert_eq!(
            sim.process_frame("CALLSTAT?").as_deref(),
            Some("IDLE,COMMUNICATION")
        );
    }

    #[test]
    fn invalid_simulation_model_is_refused() {
        let mut sim = Simulator::new();
        assert_eq!(sim.process_frame("SIMMODEL LTE,FOO;ERROR?").as_deref(), Some("2"));
        assert_eq!(sim.process_frame("SIMMODEL?").as_deref(), Some("LTE"));
    }

    // --- Property store ---

    #[test]
    fn resource_properties_round_trip() {
        let mut sim = Simulator::new();
        sim.process_frame("DLBANDWIDTH 20MHz,BTS3");
        sim.process_frame("PDNIPV4 10.0.0.2,PDN2");
        assert_eq!(sim.process_frame("DLBANDWIDTH? BTS3").as_deref(), Some("20MHz"));
        assert_eq!(sim.process_frame("PDNIPV4? PDN2").as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn neighbor_cells_keep_their_qualifiers() {
        let mut sim = Simulator::new();
        sim.process_frame("NCTYPE WCDMA,2,FREQ,BTS1");
        assert_eq!(
            sim.process_frame("NCTYPE? WCDMA,2,BTS1").as_deref(),
            Some("FREQ")
        );
    }

    #[test]
    fn leading_key_and_whole_value_settings() {
        let mut sim = Simulator::new();
        sim.process_frame("REJECTTYPE 141,REJECT");
        sim.process_frame("TESTBTSDIRECTION BTS1,BTS2");
        sim.process_frame("VPAUTOANSWER ON,5");
        assert_eq!(sim.process_frame("REJECTTYPE? 141").as_deref(), Some("REJECT"));
        assert_eq!(
            sim.process_frame("TESTBTSDIRECTION?").as_deref(),
            Some("BTS1,BTS2")
        );
        assert_eq!(sim.process_frame("VPAUTOANSWER?").as_deref(), Some("ON,5"));
    }

    #[test]
    fn unset_property_query_flags_an_error() {
        let mut sim = Simulator::new();
        assert_eq!(sim.process_frame("OLVL? BTS4;ERROR?").as_deref(), Some(";2"));
    }

    #[test]
    fn reset_clears_properties() {
        let mut sim = Simulator::new();
        sim.process_frame("OLVL 10,BTS1");
        sim.process_frame("*RST");
        assert_eq!(sim.property("OLVL", "BTS1"), None);
    }

    #[test]
    fn hook_operations_drive_phone_status() {
        let mut sim = Simulator::new();
        assert_eq!(sim.process_frame("VPSTAT?").as_deref(), Some("0"));
        sim.process_frame("OPERATEVPHONE OFFHOOK");
        assert_eq!(sim.process_frame("VPSTAT?").as_deref(), Some("3"));
    }

    // --- Stream handling ---

    #[test]
    fn serve_stream_answers_each_frame() {
        struct Loop {
            input: io::Cursor<Vec<u8>>,
            output: Vec<u8>,
        }
        impl Read for Loop {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.input.read(buf)
            }
        }
        impl Write for Loop {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.output.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let simulator = Mutex::new(Simulator::new());
        let mut stream = Loop {
            input: io::Cursor::new(b"*OPC?\0OLVL 1,BTS1\0STAT?\0".to_vec()),
            output: Vec::new(),
        };
        serve_stream(&mut stream, &simulator).unwrap();
        assert_eq!(stream.output, b"1\0NOTEXIST\0");
    }
}
