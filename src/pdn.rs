//! Packet data network (PDN) handle.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::driver::Md8475a;
use crate::error::{CallboxError, Result};
use crate::transport::{TcpTransport, Transport};
use crate::wire::wire_enum;

wire_enum! {
    /// Address family offered to the device on a PDN.
    pub enum IpAddressType {
        Ipv4 => "IPV4",
        Ipv6 => "IPV6",
        Ipv4v6 => "IPV4V6",
    }
}

/// PDN index, 1 through [`PdnNumber::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PdnNumber(u8);

impl PdnNumber {
    pub const MAX: u8 = 5;

    pub fn new(number: u8) -> Result<Self> {
        if (1..=Self::MAX).contains(&number) {
            Ok(Self(number))
        } else {
            Err(CallboxError::invalid(format!(
                "PDN number must be within 1..={}, got {number}",
                Self::MAX
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PdnNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PDN{}", self.0)
    }
}

/// A view of one PDN on an open session.
pub struct PacketDataNetwork<'a, T: Transport = TcpTransport> {
    anritsu: &'a Md8475a<T>,
    number: PdnNumber,
    resource: String,
}

impl<'a, T: Transport> PacketDataNetwork<'a, T> {
    pub(crate) fn new(anritsu: &'a Md8475a<T>, number: PdnNumber) -> Self {
        Self {
            anritsu,
            number,
            resource: number.to_string(),
        }
    }

    pub fn number(&self) -> PdnNumber {
        self.number
    }

    pub fn ue_address_iptype(&self) -> Result<IpAddressType> {
        self.anritsu.get_property("PDNIPTYPE", &self.resource)
    }

    pub fn set_ue_address_iptype(&self, iptype: IpAddressType) -> Result<()> {
        self.anritsu.set_property("PDNIPTYPE", iptype, &self.resource)
    }

    pub fn ue_address_ipv4(&self) -> Result<Ipv4Addr> {
        self.anritsu.get_property("PDNIPV4", &self.resource)
    }

    pub fn set_ue_address_ipv4(&self, address: Ipv4Addr) -> Result<()> {
        self.anritsu.set_property("PDNIPV4", address, &self.resource)
    }

    pub fn ue_address_ipv6(&self) -> Result<Ipv6Addr> {
        self.anritsu.get_property("PDNIPV6", &self.resource)
    }

    pub fn set_ue_address_ipv6(&self, address: Ipv6Addr) -> Result<()> {
        self.anritsu.set_property("PDNIPV6", address, &self.resource)
    }

    pub fn primary_dns_address_ipv4(&self) -> Result<Ipv4Addr> {
        self.anritsu.get_property("PDNDNSIPV4PRI", &self.resource)
    }

    pub fn set_primary_dns_address_ipv4(&self, address: Ipv4Addr) -> Result<()> {
        self.anritsu.set_property("PDNDNSIPV4PRI", address, &self.resource)
    }

    pub fn secondary_dns_address_ipv4(&self) -> Result<Ipv4Addr> {
        self.anritsu.get_property("PDNDNSIPV4SEC", &self.resource)
    }

    pub fn set_secondary_dns_address_ipv4(&self, address: Ipv4Addr) -> Result<()> {
        self.anritsu.set_property("PDNDNSIPV4SEC", address, &self.resource)
    }

    pub fn dns_address_ipv6(&self) -> Result<Ipv6Addr> {
        self.anritsu.get_property("PDNDNSIPV6", &self.resource)
    }

    pub fn set_dns_address_ipv6(&self, address: Ipv6Addr) -> Result<()> {
        self.anritsu.set_property("PDNDNSIPV6", address, &self.resource)
    }

    pub fn cscf_address_ipv4(&self) -> Result<Ipv4Addr> {
        self.anritsu.get_property("PDNPCSCFIPV4", &self.resource)
    }

    pub fn set_cscf_address_ipv4(&self, address: Ipv4Addr) -> Result<()> {
        self.anritsu.set_property("PDNPCSCFIPV4", address, &self.resource)
    }

    pub fn cscf_address_ipv6(&self) -> Result<Ipv6Addr> {
        self.anritsu.get_property("PDNPCSCFIPV6", &self.resource)
    }

    pub fn set_cscf_address_ipv6(&self, address: Ipv6Addr) -> Result<()> {
        self.anritsu.set_property("PDNPCSCFIPV6", address, &self.resource)
    }
}
