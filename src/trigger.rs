//! Replies the instrument gives to NAS messages from the device.

use crate::driver::Md8475a;
use crate::error::Result;
use crate::transport::{TcpTransport, Transport};
use crate::wire::wire_enum;

wire_enum! {
    /// Device-originated messages whose reply can be overridden.
    pub enum TriggerMessageIDs {
        AttachReq => "141",
        PdnConnectivityReq => "208",
        ServiceReq => "77",
        MmLocUpdateReq => "20",
        GmmAttachReq => "21",
        GmmRaUpdateReq => "18",
        IdentityRequestLte => "85",
        IdentityRequestWcdma => "24",
        IdentityRequestGsm => "25",
    }
}

wire_enum! {
    pub enum TriggerMessageReply {
        Accept => "ACCEPT",
        Reject => "REJECT",
        Ignore => "IGNORE",
        None => "NOP",
        Illegal => "ILLEGAL",
    }
}

pub struct TriggerMessage<'a, T: Transport = TcpTransport> {
    anritsu: &'a Md8475a<T>,
}

impl<'a, T: Transport> TriggerMessage<'a, T> {
    pub(crate) fn new(anritsu: &'a Md8475a<T>) -> Self {
        Self { anritsu }
    }

    pub fn reply_type(&self, message: TriggerMessageIDs) -> Result<TriggerMessageReply> {
        self.anritsu.get_property("REJECTTYPE", message.as_wire())
    }

    pub fn set_reply_type(&self, message: TriggerMessageIDs, reply: TriggerMessageReply) -> Result<()> {
        self.anritsu.command(&format!("REJECTTYPE {message},{reply}"))
    }

    /// 3GPP cause value sent with a `REJECT` reply.
    pub fn reject_cause(&self, message: TriggerMessageIDs) -> Result<u8> {
        self.anritsu.get_property("REJECTCAUSE", message.as_wire())
    }

    pub fn set_reject_cause(&self, message: TriggerMessageIDs, cause: u8) -> Result<()> {
        self.anritsu.command(&format!("REJECTCAUSE {message},{cause}"))
    }
}
