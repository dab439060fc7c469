//! Basestation (BTS) handle and its closed value sets.
//!
//! Every getter is a fresh `<M>? BTSn` round trip; every setter is a single
//! `<M> value,BTSn` command. Nothing is cached.

use std::fmt::Display;

use tracing::debug;

use crate::driver::Md8475a;
use crate::error::{CallboxError, Result};
use crate::transport::{TcpTransport, Transport};
use crate::wire::wire_enum;

wire_enum! {
    /// One of the four simulated basestations.
    pub enum BtsNumber {
        Bts1 => "BTS1",
        Bts2 => "BTS2",
        Bts3 => "BTS3",
        Bts4 => "BTS4",
    }
}

wire_enum! {
    /// Radio access technology of a basestation.
    pub enum BtsTechnology {
        Lte => "LTE",
        Wcdma => "WCDMA",
        TdScdma => "TDSCDMA",
        Gsm => "GSM",
        Cdma1x => "CDMA1X",
        Evdo => "EVDO",
    }
}

wire_enum! {
    /// LTE channel bandwidth.
    pub enum BtsBandwidth {
        Bw1dot4Mhz => "1.4MHz",
        Bw3Mhz => "3MHz",
        Bw5Mhz => "5MHz",
        Bw10Mhz => "10MHz",
        Bw15Mhz => "15MHz",
        Bw20Mhz => "20MHz",
    }
}

wire_enum! {
    pub enum BtsTransmissionMode {
        Tm1 => "TM1",
        Tm2 => "TM2",
        Tm3 => "TM3",
        Tm4 => "TM4",
    }
}

wire_enum! {
    /// Downlink reference measurement channel rate.
    pub enum BtsPacketRate {
        LteManual => "MANUAL",
        LteBestEffort => "BESTEFFORT",
        WcdmaDlHsAutoRel7Ul384k => "DLHSAUTO_REL7_UL384K",
        WcdmaDl18_0mUl384k => "DL18_0M_UL384K",
        WcdmaDl21_6mUl384k => "DL21_6M_UL384K",
        WcdmaDlHsAutoRel7UlHsAuto => "DLHSAUTO_REL7_ULHSAUTO",
        WcdmaDl18_0mUl1_46m => "DL18_0M_UL1_46M",
        WcdmaDl18_0mUl2_0m => "DL18_0M_UL2_0M",
        WcdmaDl18_0mUl5_76m => "DL18_0M_UL5_76M",
        WcdmaDl21_6mUl1_46m => "DL21_6M_UL1_46M",
        WcdmaDl21_6mUl2_0m => "DL21_6M_UL2_0M",
        WcdmaDl21_6mUl5_76m => "DL21_6M_UL5_76M",
        WcdmaDlHsAutoRel8Ul384k => "DLHSAUTO_REL8_UL384K",
        WcdmaDl23_4mUl384k => "DL23_4M_UL384K",
        WcdmaDl28_0mUl384k => "DL28_0M_UL384K",
        WcdmaDl36_0mUl384k => "DL36_0M_UL384K",
        WcdmaDl43_2mUl384k => "DL43_2M_UL384K",
        WcdmaDlHsAutoRel8UlHsAuto => "DLHSAUTO_REL8_ULHSAUTO",
        WcdmaDl23_4mUl1_46m => "DL23_4M_UL1_46M",
        WcdmaDl23_4mUl2_0m => "DL23_4M_UL2_0M",
        WcdmaDl23_4mUl5_76m => "DL23_4M_UL5_76M",
        WcdmaDl28_0mUl1_46m => "DL28_0M_UL1_46M",
        WcdmaDl28_0mUl2_0m => "DL28_0M_UL2_0M",
        // The instrument token really lacks the leading D.
        WcdmaDl28_0mUl5_76m => "L28_0M_UL5_76M",
        WcdmaDl36_0mUl1_46m => "DL36_0M_UL1_46M",
        WcdmaDl36_0mUl2_0m => "DL36_0M_UL2_0M",
        WcdmaDl36_0mUl5_76m => "DL36_0M_UL5_76M",
        WcdmaDl43_2mUl1_46m => "DL43_2M_UL1_46M",
        WcdmaDl43_2mUl2_0m => "DL43_2M_UL2_0M",
        WcdmaDl43_2mUl5_76m => "DL43_2M_UL5_76M",
    }
}

wire_enum! {
    pub enum BtsNwNameEnable {
        Enable => "ON",
        Disable => "OFF",
    }
}

wire_enum! {
    pub enum BtsServiceState {
        In => "IN",
        Out => "OUT",
    }
}

wire_enum! {
    pub enum BtsCellBarred {
        NotBarred => "NOTBARRED",
        Barred => "BARRED",
    }
}

wire_enum! {
    pub enum BtsAccessClassBarred {
        NotBarred => "NOTBARRED",
        Emergency => "EMERGENCY",
        Barred => "BARRED",
        UserSpecific => "USERSPECIFIC",
    }
}

wire_enum! {
    pub enum BtsLteEmergencyAccessClassBarred {
        NotBarred => "NOTBARRED",
        Barred => "BARRED",
    }
}

wire_enum! {
    pub enum BtsNeighborCellMode {
        Auto => "AUTO",
        UserData => "USERDATA",
    }
}

wire_enum! {
    pub enum BtsNeighborCellType {
        Bts => "BTS",
        Frequency => "FREQ",
    }
}

wire_enum! {
    pub enum BtsSchedulingMode {
        Dynamic => "DYNAMIC",
        Static => "STATIC",
    }
}

/// Dependent parameters for [`BtsSchedulingMode::Static`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulingParams {
    pub mcs_dl: Option<u8>,
    pub mcs_ul: Option<u8>,
    pub nrb_dl: Option<u8>,
    pub nrb_ul: Option<u8>,
}

pub const MAX_MCS: u8 = 28;
pub const MAX_NRB: u8 = 100;
pub const MAX_PHYSICAL_CELL_ID: u16 = 503;

fn require(value: Option<u8>, name: &str, min: u8, max: u8) -> Result<u8> {
    let value = value.ok_or_else(|| {
        CallboxError::invalid(format!("static scheduling requires {name}"))
    })?;
    if !(min..=max).contains(&value) {
        return Err(CallboxError::invalid(format!(
            "{name} must be within {min}..={max}, got {value}"
        )));
    }
    Ok(value)
}

impl SchedulingParams {
    /// The dependent `(mnemonic, value)` commands `mode` needs, validated.
    pub(crate) fn settings_for(
        &self,
        mode: BtsSchedulingMode,
    ) -> Result<Option<[(&'static str, u8); 4]>> {
        match mode {
            BtsSchedulingMode::Static => Ok(Some([
                ("DLIMCS", require(self.mcs_dl, "DL MCS", 0, MAX_MCS)?),
                ("ULIMCS", require(self.mcs_ul, "UL MCS", 0, MAX_MCS)?),
                ("DLNRB", require(self.nrb_dl, "DL resource blocks", 1, MAX_NRB)?),
                ("ULNRB", require(self.nrb_ul, "UL resource blocks", 1, MAX_NRB)?),
            ])),
            BtsSchedulingMode::Dynamic => {
                if *self != SchedulingParams::default() {
                    debug!("static scheduling parameters ignored in dynamic mode");
                }
                Ok(None)
            }
        }
    }
}

/// A view of one basestation on an open session.
pub struct BaseTransceiverStation<'a, T: Transport = TcpTransport> {
    anritsu: &'a Md8475a<T>,
    number: BtsNumber,
}

impl<'a, T: Transport> BaseTransceiverStation<'a, T> {
    pub(crate) fn new(anritsu: &'a Md8475a<T>, number: BtsNumber) -> Self {
        Self { anritsu, number }
    }

    pub fn number(&self) -> BtsNumber {
        self.number
    }

    fn get<V: std::str::FromStr>(&self, mnemonic: &str) -> Result<V> {
        self.anritsu.get_property(mnemonic, self.number.as_wire())
    }

    fn set(&self, mnemonic: &str, value: impl Display) -> Result<()> {
        self.anritsu.set_property(mnemonic, value, self.number.as_wire())
    }

    /// Downlink output level in dBm.
    pub fn output_level(&self) -> Result<f64> {
        self.get("OLVL")
    }

    pub fn set_output_level(&self, dbm: f64) -> Result<()> {
        self.set("OLVL", dbm)
    }

    /// Expected uplink input level in dBm.
    pub fn input_level(&self) -> Result<f64> {
        self.get("RFLVL")
    }

    pub fn set_input_level(&self, dbm: f64) -> Result<()> {
        self.set("RFLVL", dbm)
    }

    pub fn band(&self) -> Result<u32> {
        self.get("BAND")
    }

    pub fn set_band(&self, band: u32) -> Result<()> {
        self.set("BAND", band)
    }

    pub fn dl_bandwidth(&self) -> Result<BtsBandwidth> {
        self.get("DLBANDWIDTH")
    }

    pub fn set_dl_bandwidth(&self, bandwidth: BtsBandwidth) -> Result<()> {
        self.set("DLBANDWIDTH", bandwidth)
    }

    pub fn ul_bandwidth(&self) -> Result<BtsBandwidth> {
        self.get("ULBANDWIDTH")
    }

    pub fn set_ul_bandwidth(&self, bandwidth: BtsBandwidth) -> Result<()> {
        self.set("ULBANDWIDTH", bandwidth)
    }

    pub fn transmission_mode(&self) -> Result<BtsTransmissionMode> {
        self.get("TRANSMODE")
    }

    pub fn set_transmission_mode(&self, mode: BtsTransmissionMode) -> Result<()> {
        self.set("TRANSMODE", mode)
    }

    /// Number of downlink antennas: 1, 2 or 4.
    pub fn dl_antenna(&self) -> Result<u8> {
        self.get("ANTENNAS")
    }

    pub fn set_dl_antenna(&self, antennas: u8) -> Result<()> {
        check_antennas(antennas)?;
        self.set("ANTENNAS", antennas)
    }

    pub fn packet_rate(&self) -> Result<BtsPacketRate> {
        self.get("DLRMC_RATE")
    }

    pub fn set_packet_rate(&self, rate: BtsPacketRate) -> Result<()> {
        self.set("DLRMC_RATE", rate)
    }

    pub fn dl_channel(&self) -> Result<u32> {
        self.get("DLCHAN")
    }

    pub fn set_dl_channel(&self, channel: u32) -> Result<()> {
        self.set("DLCHAN", channel)
    }

    pub fn mcc(&self) -> Result<String> {
        self.get("MCC")
    }

    /// Mobile country code, exactly three digits.
    pub fn set_mcc(&self, mcc: &str) -> Result<()> {
        check_digits("MCC", mcc, 3..=3)?;
        self.set("MCC", mcc)
    }

    pub fn mnc(&self) -> Result<String> {
        self.get("MNC")
    }

    /// Mobile network code, two or three digits.
    pub fn set_mnc(&self, mnc: &str) -> Result<()> {
        check_digits("MNC", mnc, 2..=3)?;
        self.set("MNC", mnc)
    }

    pub fn lac(&self) -> Result<u32> {
        self.get("LAC")
    }

    pub fn set_lac(&self, lac: u32) -> Result<()> {
        self.set("LAC", lac)
    }

    pub fn rac(&self) -> Result<u32> {
        self.get("RAC")
    }

    pub fn set_rac(&self, rac: u32) -> Result<()> {
        self.set("RAC", rac)
    }

    pub fn tac(&self) -> Result<u32> {
        self.get("TAC")
    }

    pub fn set_tac(&self, tac: u32) -> Result<()> {
        self.set("TAC", tac)
    }

    pub fn cell_id(&self) -> Result<u32> {
        self.get("CELLID")
    }

    pub fn set_cell_id(&self, cell_id: u32) -> Result<()> {
        self.set("CELLID", cell_id)
    }

    pub fn physical_cell_id(&self) -> Result<u16> {
        self.get("PHYCELLID")
    }

    pub fn set_physical_cell_id(&self, id: u16) -> Result<()> {
        check_physical_cell_id(id)?;
        self.set("PHYCELLID", id)
    }

    pub fn mme_group_id(&self) -> Result<u32> {
        self.get("MMEGID")
    }

    pub fn set_mme_group_id(&self, id: u32) -> Result<()> {
        self.set("MMEGID", id)
    }

    pub fn mme_code(&self) -> Result<u32> {
        self.get("MMECODE")
    }

    pub fn set_mme_code(&self, code: u32) -> Result<()> {
        self.set("MMECODE", code)
    }

    pub fn nw_fullname_enable(&self) -> Result<BtsNwNameEnable> {
        self.get("NWFNAMEON")
    }

    pub fn set_nw_fullname_enable(&self, enable: BtsNwNameEnable) -> Result<()> {
        self.set("NWFNAMEON", enable)
    }

    pub fn nw_fullname(&self) -> Result<String> {
        self.get("NWFNAME")
    }

    pub fn set_nw_fullname(&self, name: &str) -> Result<()> {
        check_name(name)?;
        self.set("NWFNAME", name)
    }

    pub fn nw_shortname_enable(&self) -> Result<BtsNwNameEnable> {
        self.get("NWSNAMEON")
    }

    pub fn set_nw_shortname_enable(&self, enable: BtsNwNameEnable) -> Result<()> {
        self.set("NWSNAMEON", enable)
    }

    pub fn nw_shortname(&self) -> Result<String> {
        self.get("NWSNAME")
    }

    pub fn set_nw_shortname(&self, name: &str) -> Result<()> {
        check_name(name)?;
        self.set("NWSNAME", name)
    }

    pub fn service_state(&self) -> Result<BtsServiceState> {
        self.get("OUTOFSERVICE")
    }

    pub fn set_service_state(&self, state: BtsServiceState) -> Result<()> {
        self.set("OUTOFSERVICE", state)
    }

    pub fn cell_barred(&self) -> Result<BtsCellBarred> {
        self.get("CELLBARRED")
    }

    pub fn set_cell_barred(&self, barred: BtsCellBarred) -> Result<()> {
        self.set("CELLBARRED", barred)
    }

    pub fn access_class_barred(&self) -> Result<BtsAccessClassBarred> {
        self.get("ACBARRED")
    }

    pub fn set_access_class_barred(&self, barred: BtsAccessClassBarred) -> Result<()> {
        self.set("ACBARRED", barred)
    }

    pub fn lte_emergency_ac_barred(&self) -> Result<BtsLteEmergencyAccessClassBarred> {
        self.get("LTEEMERGENCYACBARRED")
    }

    pub fn set_lte_emergency_ac_barred(
        &self,
        barred: BtsLteEmergencyAccessClassBarred,
    ) -> Result<()> {
        self.set("LTEEMERGENCYACBARRED", barred)
    }

    pub fn neighbor_cell_mode(&self) -> Result<BtsNeighborCellMode> {
        self.get("NCLIST")
    }

    pub fn set_neighbor_cell_mode(&self, mode: BtsNeighborCellMode) -> Result<()> {
        self.set("NCLIST", mode)
    }

    pub fn neighbor_cell_type(&self, tech: BtsTechnology, index: u8) -> Result<BtsNeighborCellType> {
        self.get_neighbor("NCTYPE", tech, index)
    }

    pub fn set_neighbor_cell_type(
        &self,
        tech: BtsTechnology,
        index: u8,
        cell_type: BtsNeighborCellType,
    ) -> Result<()> {
        self.set("NCTYPE", format_args!("{tech},{index},{cell_type}"))
    }

    pub fn neighbor_cell_name(&self, tech: BtsTechnology, index: u8) -> Result<String> {
        self.get_neighbor("NCCELLNAME", tech, index)
    }

    pub fn set_neighbor_cell_name(&self, tech: BtsTechnology, index: u8, name: &str) -> Result<()> {
        check_name(name)?;
        self.set("NCCELLNAME", format_args!("{tech},{index},{name}"))
    }

    fn get_neighbor<V: std::str::FromStr>(
        &self,
        mnemonic: &str,
        tech: BtsTechnology,
        index: u8,
    ) -> Result<V> {
        self.anritsu
            .get_property(mnemonic, &format!("{tech},{index},{}", self.number))
    }

    pub fn scheduling_mode(&self) -> Result<BtsSchedulingMode> {
        self.get("SCHEDULEMODE")
    }

    /// Sets the scheduling mode and, for static scheduling, its MCS and resource
    /// block counts. Every dependent is checked before the first command goes out.
    pub fn set_scheduling_mode(
        &self,
        mode: BtsSchedulingMode,
        params: SchedulingParams,
    ) -> Result<()> {
        let statics = params.settings_for(mode)?;

        self.set("SCHEDULEMODE", mode)?;
        for (mnemonic, value) in statics.into_iter().flatten() {
            self.set(mnemonic, value)?;
        }
        Ok(())
    }
}

pub(crate) fn check_antennas(antennas: u8) -> Result<()> {
    if !matches!(antennas, 1 | 2 | 4) {
        return Err(CallboxError::invalid(format!(
            "antenna count must be 1, 2 or 4, got {antennas}"
        )));
    }
    Ok(())
}

pub(crate) fn check_physical_cell_id(id: u16) -> Result<()> {
    if id > MAX_PHYSICAL_CELL_ID {
        return Err(CallboxError::invalid(format!(
            "physical cell id must be at most {MAX_PHYSICAL_CELL_ID}, got {id}"
        )));
    }
    Ok(())
}

pub(crate) fn check_digits(name: &str, value: &str, lengths: std::ops::RangeInclusive<usize>) -> Result<()> {
    if !lengths.contains(&value.len()) || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CallboxError::invalid(format!(
            "{name} must be {}-{} digits, got `{value}`",
            lengths.start(),
            lengths.end()
        )));
    }
    Ok(())
}

// Names travel unquoted inside a comma-separated argument list.
pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains([',', ';', '\0']) {
        return Err(CallboxError::invalid(format!(
            "name `{name}` is empty or contains a separator"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{accept, open};
    use crate::transport::mock::MockTransport;

    #[test]
    fn getters_query_the_instrument_every_time() {
        let mock = MockTransport::with_replies(&[]);
        let anritsu = open(&mock);
        let bts = anritsu.bts(BtsNumber::Bts1);
        mock.push_reply("-10.0");
        mock.push_reply("-20.5");
        assert_eq!(bts.output_level().unwrap(), -10.0);
        assert_eq!(bts.output_level().unwrap(), -20.5);
        assert_eq!(mock.sent(), vec!["OLVL? BTS1", "OLVL? BTS1"]);
    }

    #[test]
    fn setters_append_the_bts_number() {
        let mock = MockTransport::default();
        let anritsu = open(&mock);
        accept(&mock);
        anritsu.bts(BtsNumber::Bts1).set_output_level(10.0).unwrap();
        assert_eq!(mock.sent(), vec!["OLVL 10,BTS1;ERROR?", "*OPC?"]);
    }

    #[test]
    fn enum_setters_send_wire_tokens() {
        let mock = MockTransport::default();
        let anritsu = open(&mock);
        let bts = anritsu.bts(BtsNumber::Bts3);
        accept(&mock);
        bts.set_dl_bandwidth(BtsBandwidth::Bw1dot4Mhz).unwrap();
        accept(&mock);
        bts.set_packet_rate(BtsPacketRate::WcdmaDl28_0mUl5_76m).unwrap();
        let sent = mock.sent();
        assert_eq!(sent[0], "DLBANDWIDTH 1.4MHz,BTS3;ERROR?");
        assert_eq!(sent[2], "DLRMC_RATE L28_0M_UL5_76M,BTS3;ERROR?");
    }

    #[test]
    fn unknown_bandwidth_is_rejected_before_wire() {
        let mock = MockTransport::default();
        let anritsu = open(&mock);
        let result = "99MHz"
            .parse::<BtsBandwidth>()
            .and_then(|bw| anritsu.bts(BtsNumber::Bts1).set_dl_bandwidth(bw));
        assert!(matches!(result, Err(CallboxError::InvalidValue(_))));
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn unparseable_enum_reply_is_unexpected() {
        let mock = MockTransport::default();
        let anritsu = open(&mock);
        mock.push_reply("7MHz");
        assert!(matches!(
            anritsu.bts(BtsNumber::Bts1).dl_bandwidth(),
            Err(CallboxError::UnexpectedReply { .. })
        ));
    }

    #[test]
    fn local_range_checks_send_nothing() {
        let mock = MockTransport::default();
        let anritsu = open(&mock);
        let bts = anritsu.bts(BtsNumber::Bts2);
        assert!(bts.set_dl_antenna(3).is_err());
        assert!(bts.set_mcc("31").is_err());
        assert!(bts.set_mnc("0a1").is_err());
        assert!(bts.set_physical_cell_id(504).is_err());
        assert!(bts.set_nw_fullname("a,b").is_err());
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn static_scheduling_requires_every_dependent() {
        let mock = MockTransport::default();
        let anritsu = open(&mock);
        let params = SchedulingParams {
            mcs_dl: Some(20),
            mcs_ul: Some(10),
            nrb_dl: Some(50),
            nrb_ul: None,
        };
        let err = anritsu
            .bts(BtsNumber::Bts1)
            .set_scheduling_mode(BtsSchedulingMode::Static, params)
            .unwrap_err();
        assert!(matches!(err, CallboxError::InvalidValue(ref m) if m.contains("UL resource blocks")));
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn static_scheduling_rejects_out_of_range_mcs() {
        let mock = MockTransport::default();
        let anritsu = open(&mock);
        let params = SchedulingParams {
            mcs_dl: Some(29),
            mcs_ul: Some(10),
            nrb_dl: Some(50),
            nrb_ul: Some(50),
        };
        assert!(anritsu
            .bts(BtsNumber::Bts1)
            .set_scheduling_mode(BtsSchedulingMode::Static, params)
            .is_err());
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn static_scheduling_sends_mode_then_dependents() {
        let mock = MockTransport::default();
        let anritsu = open(&mock);
        for _ in 0..5 {
            accept(&mock);
        }
        let params = SchedulingParams {
            mcs_dl: Some(20),
            mcs_ul: Some(10),
            nrb_dl: Some(50),
            nrb_ul: Some(25),
        };
        anritsu
            .bts(BtsNumber::Bts1)
            .set_scheduling_mode(BtsSchedulingMode::Static, params)
            .unwrap();
        let commands: Vec<String> = mock
            .sent()
            .into_iter()
            .filter(|m| m != "*OPC?")
            .collect();
        assert_eq!(
            commands,
            vec![
                "SCHEDULEMODE STATIC,BTS1;ERROR?",
                "DLIMCS 20,BTS1;ERROR?",
                "ULIMCS 10,BTS1;ERROR?",
                "DLNRB 50,BTS1;ERROR?",
                "ULNRB 25,BTS1;ERROR?",
            ]
        );
    }

    #[test]
    fn dynamic_scheduling_is_a_single_command() {
        let mock = MockTransport::default();
        let anritsu = open(&mock);
        accept(&mock);
        anritsu
            .bts(BtsNumber::Bts4)
            .set_scheduling_mode(BtsSchedulingMode::Dynamic, SchedulingParams::default())
            .unwrap();
        assert_eq!(mock.sent(), vec!["SCHEDULEMODE DYNAMIC,BTS4;ERROR?", "*OPC?"]);
    }

    #[test]
    fn neighbor_cells_carry_technology_and_index() {
        let mock = MockTransport::default();
        let anritsu = open(&mock);
        let bts = anritsu.bts(BtsNumber::Bts1);
        accept(&mock);
        bts.set_neighbor_cell_type(BtsTechnology::Wcdma, 2, BtsNeighborCellType::Bts)
            .unwrap();
        mock.push_reply("BTS");
        assert_eq!(
            bts.neighbor_cell_type(BtsTechnology::Wcdma, 2).unwrap(),
            BtsNeighborCellType::Bts
        );
        let sent = mock.sent();
        assert_eq!(sent[0], "NCTYPE WCDMA,2,BTS,BTS1;ERROR?");
        assert_eq!(sent[2], "NCTYPE? WCDMA,2,BTS1");
    }

    #[test]
    fn packet_rate_tokens_are_unique() {
        let mut tokens: Vec<&str> = BtsPacketRate::ALL.iter().map(|r| r.as_wire()).collect();
        tokens.sort_unstable();
        tokens.dedup();
        assert_eq!(tokens.len(), BtsPacketRate::ALL.len());
    }
}
