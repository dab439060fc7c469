//! Test procedure setup, run with [`Md8475a::start_testcase`].

use crate::bts::{BtsNumber, BtsTechnology};
use crate::driver::Md8475a;
use crate::error::{CallboxError, Result};
use crate::transport::{TcpTransport, Transport};
use crate::wire::{parse_reply, wire_enum};

wire_enum! {
    pub enum TestProcedure {
        Bl => "BL",
        Selection => "SELECTION",
        Reselection => "RESELECTION",
        Redirection => "REDIRECTION",
        Handover => "HO",
        HardHandover => "HHO",
        SoftHandover => "SHO",
        Measurement => "MEASUREMENT",
        CellChange => "CELLCHANGE",
        MultiCell => "MULTICELL",
    }
}

wire_enum! {
    pub enum TestPowerControl {
        Enable => "ENABLE",
        Disable => "DISABLE",
    }
}

wire_enum! {
    pub enum TestMeasurement {
        Enable => "ENABLE",
        Disable => "DISABLE",
    }
}

pub struct TestCaseConfigurator<'a, T: Transport = TcpTransport> {
    anritsu: &'a Md8475a<T>,
}

impl<'a, T: Transport> TestCaseConfigurator<'a, T> {
    pub(crate) fn new(anritsu: &'a Md8475a<T>) -> Self {
        Self { anritsu }
    }

    pub fn procedure(&self) -> Result<TestProcedure> {
        self.anritsu.get_setting("TESTPROCEDURE")
    }

    pub fn set_procedure(&self, procedure: TestProcedure) -> Result<()> {
        self.anritsu.set_setting("TESTPROCEDURE", procedure)
    }

    /// Source and target cell of a handover-style procedure.
    pub fn bts_direction(&self) -> Result<(BtsNumber, BtsNumber)> {
        let reply = self.anritsu.query("TESTBTSDIRECTION?")?;
        let (from, to) = reply
            .split_once(',')
            .ok_or_else(|| CallboxError::unexpected_reply("TESTBTSDIRECTION?", &reply))?;
        Ok((
            parse_reply("TESTBTSDIRECTION?", from)?,
            parse_reply("TESTBTSDIRECTION?", to)?,
        ))
    }

    pub fn set_bts_direction(&self, from: BtsNumber, to: BtsNumber) -> Result<()> {
        self.anritsu
            .set_setting("TESTBTSDIRECTION", format_args!("{from},{to}"))
    }

    /// Seconds the procedure waits for the device to register.
    pub fn registration_timeout(&self) -> Result<u32> {
        self.anritsu.get_setting("TESTREGISTRATIONTIMEOUT")
    }

    pub fn set_registration_timeout(&self, seconds: u32) -> Result<()> {
        self.anritsu.set_setting("TESTREGISTRATIONTIMEOUT", seconds)
    }

    pub fn power_control(&self) -> Result<TestPowerControl> {
        self.anritsu.get_setting("TESTPOWERCONTROL")
    }

    pub fn set_power_control(&self, control: TestPowerControl) -> Result<()> {
        self.anritsu.set_setting("TESTPOWERCONTROL", control)
    }

    pub fn measurement(&self, rat: BtsTechnology) -> Result<TestMeasurement> {
        self.anritsu.get_property("TESTMEASUREMENT", rat.as_wire())
    }

    pub fn set_measurement(&self, rat: BtsTechnology, state: TestMeasurement) -> Result<()> {
        self.anritsu
            .set_setting("TESTMEASUREMENT", format_args!("{rat},{state}"))
    }
}
