//! Virtual phone handle: the instrument-side call and SMS endpoint.

use crate::driver::Md8475a;
use crate::error::{CallboxError, Result};
use crate::transport::{TcpTransport, Transport};
use crate::wire::{parse_reply, wire_enum};

wire_enum! {
    pub enum VirtualPhoneAutoAnswer {
        On => "ON",
        Off => "OFF",
    }
}

wire_enum! {
    /// Virtual phone state, reported by `VPSTAT?` as a numeric code.
    pub enum VirtualPhoneStatus {
        Idle => "0",
        VoiceCallOrigination => "1",
        VoiceCallIncoming => "2",
        VoiceCallInProgress => "3",
        VoiceCallDisconnecting => "4",
        VoiceCallDisconnected => "5",
        VideoCallOrigination => "6",
        VideoCallIncoming => "7",
        VideoCallInProgress => "8",
        VideoCallDisconnecting => "9",
        VideoCallDisconnected => "10",
    }
}

/// Percent-encodes everything outside the unreserved URI set.
fn encode_sms_text(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

fn check_phone_number(number: &str) -> Result<()> {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CallboxError::invalid(format!(
            "phone number must be digits only, got `{number}`"
        )));
    }
    Ok(())
}

pub struct VirtualPhone<'a, T: Transport = TcpTransport> {
    anritsu: &'a Md8475a<T>,
}

impl<'a, T: Transport> VirtualPhone<'a, T> {
    pub(crate) fn new(anritsu: &'a Md8475a<T>) -> Self {
        Self { anritsu }
    }

    /// Phone number of the virtual phone.
    pub fn id(&self) -> Result<String> {
        self.anritsu.get_setting("VPID")
    }

    pub fn set_id(&self, number: &str) -> Result<()> {
        check_phone_number(number)?;
        self.anritsu.set_setting("VPID", number)
    }

    /// Phone number used on CDMA2000 networks.
    pub fn id_c2k(&self) -> Result<String> {
        self.anritsu.get_setting("VPID_C2K")
    }

    pub fn set_id_c2k(&self, number: &str) -> Result<()> {
        check_phone_number(number)?;
        self.anritsu.set_setting("VPID_C2K", number)
    }

    /// Auto-answer state and ring time in seconds.
    pub fn auto_answer(&self) -> Result<(VirtualPhoneAutoAnswer, u32)> {
        let reply = self.anritsu.query("VPAUTOANSWER?")?;
        let (state, seconds) = reply
            .split_once(',')
            .ok_or_else(|| CallboxError::unexpected_reply("VPAUTOANSWER?", &reply))?;
        Ok((
            parse_reply("VPAUTOANSWER?", state)?,
            parse_reply("VPAUTOANSWER?", seconds)?,
        ))
    }

    pub fn set_auto_answer(&self, state: VirtualPhoneAutoAnswer, seconds: u32) -> Result<()> {
        self.anritsu
            .set_setting("VPAUTOANSWER", format_args!("{state},{seconds}"))
    }

    /// Calling mode token, e.g. `VOICE` or `VIDEO`.
    pub fn calling_mode(&self) -> Result<String> {
        self.anritsu.get_setting("VPCALLINGMODE")
    }

    pub fn set_calling_mode(&self, mode: &str) -> Result<()> {
        if mode.is_empty() || !mode.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(CallboxError::invalid(format!("`{mode}` is not a calling mode token")));
        }
        self.anritsu.set_setting("VPCALLINGMODE", mode)
    }

    pub fn status(&self) -> Result<VirtualPhoneStatus> {
        self.anritsu.get_setting("VPSTAT")
    }

    /// Hangs up the virtual phone.
    pub fn set_voice_on_hook(&self) -> Result<()> {
        self.anritsu.command("OPERATEVPHONE ONHOOK")
    }

    /// Answers or originates on the virtual phone.
    pub fn set_voice_off_hook(&self) -> Result<()> {
        self.anritsu.command("OPERATEVPHONE OFFHOOK")
    }

    /// Sends an SMS from `sender` to the device.
    pub fn send_sms(&self, sender: &str, text: &str) -> Result<()> {
        check_phone_number(sender)?;
        self.anritsu.command(&format!(
            "SENDSMS /?PhoneNumber=001122334455&Sender={sender}&Text={}&DCS=00",
            encode_sms_text(text)
        ))
    }

    /// Last SMS received from the device.
    pub fn receive_sms(&self) -> Result<String> {
        self.anritsu.query("RECEIVESMS?")
    }
}
