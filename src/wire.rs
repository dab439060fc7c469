//! Closed wire enumerations and parsers for status replies.

use std::str::FromStr;

use crate::bts::{BtsNumber, BtsTechnology};
use crate::error::{CallboxError, Result};

/// Declares a closed enumeration whose variants map 1:1 to instrument tokens.
///
/// Generates `ALL`, `as_wire`, `Display` and a `FromStr` that rejects anything
/// outside the set with [`CallboxError::InvalidValue`].
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Every member, in declaration order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )+ ];

            /// The token the instrument uses for this value.
            pub fn as_wire(self) -> &'static str {
                match self {
                    $( $name::$variant => $wire, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_wire())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::CallboxError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_wire() == s)
                    .ok_or_else(|| {
                        $crate::error::CallboxError::InvalidValue(format!(
                            "`{}` is not a valid {}",
                            s,
                            stringify!($name)
                        ))
                    })
            }
        }
    };
}

pub(crate) use wire_enum;

/// Parses an instrument reply, reporting failures against the request that produced it.
pub(crate) fn parse_reply<V: FromStr>(request: &str, reply: &str) -> Result<V> {
    reply
        .trim()
        .parse()
        .map_err(|_| CallboxError::unexpected_reply(request, reply))
}

wire_enum! {
    /// Lifecycle of the simulation application, as reported by `STAT?`.
    pub enum SimulationAppState {
        NotExist => "NOTEXIST",
        NotRun => "NOTRUN",
        Running => "RUNNING",
    }
}

/// Per-subsystem call state from `CALLSTAT?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    PowerOff,
    Idle,
    Communication,
    Other(String),
}

impl CallState {
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "POWEROFF" => CallState::PowerOff,
            "IDLE" => CallState::Idle,
            "COMMUNICATION" => CallState::Communication,
            other => CallState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CallState::PowerOff => "POWEROFF",
            CallState::Idle => "IDLE",
            CallState::Communication => "COMMUNICATION",
            CallState::Other(s) => s,
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded `CALLSTAT?` reply: voice and packet states plus any trailing fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStatus {
    pub voice: CallState,
    pub packet: CallState,
    pub extra: Vec<String>,
}

impl CallStatus {
    pub fn parse(reply: &str) -> Result<Self> {
        let mut fields = reply.split(',');
        let (Some(voice), Some(packet)) = (fields.next(), fields.next()) else {
            return Err(CallboxError::unexpected_reply("CALLSTAT?", reply));
        };
        Ok(Self {
            voice: CallState::parse(voice),
            packet: CallState::parse(packet),
            extra: fields.map(|f| f.trim().to_string()).collect(),
        })
    }
}

/// The cell the device is camped on, from `CAMPINGCELL?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampingCell {
    pub bts: BtsNumber,
    pub rat: BtsTechnology,
}

impl CampingCell {
    pub fn parse(reply: &str) -> Result<Self> {
        let bad_reply = || CallboxError::unexpected_reply("CAMPINGCELL?", reply);
        let (bts, rat) = reply.split_once(',').ok_or_else(bad_reply)?;
        Ok(Self {
            bts: bts.trim().parse().map_err(|_| bad_reply())?,
            rat: rat.trim().parse().map_err(|_| bad_reply())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_enum_round_trips_its_tokens() {
        for state in SimulationAppState::ALL {
            assert_eq!(state.as_wire().parse::<SimulationAppState>().unwrap(), *state);
        }
    }

    #[test]
    fn wire_enum_rejects_unknown_tokens() {
        let err = "notrun".parse::<SimulationAppState>().unwrap_err();
        assert!(matches!(err, CallboxError::InvalidValue(ref m) if m.contains("SimulationAppState")));
    }

    #[test]
    fn parse_reply_trims_and_reports_request() {
        assert_eq!(parse_reply::<f64>("OLVL? BTS1", " -30.5 ").unwrap(), -30.5);
        let err = parse_reply::<u32>("BAND? BTS1", "ABC").unwrap_err();
        assert!(matches!(
            err,
            CallboxError::UnexpectedReply { ref request, ref reply } if request == "BAND? BTS1" && reply == "ABC"
        ));
    }

    #[test]
    fn call_status_reads_voice_and_packet() {
        let status = CallStatus::parse("IDLE,COMMUNICATION,NONE").unwrap();
        assert_eq!(status.voice, CallState::Idle);
        assert_eq!(status.packet, CallState::Communication);
        assert_eq!(status.extra, vec!["NONE".to_string()]);
    }

    #[test]
    fn call_status_keeps_unknown_states() {
        let status = CallStatus::parse("HANDOVER,POWEROFF").unwrap();
        assert_eq!(status.voice, CallState::Other("HANDOVER".into()));
        assert_eq!(status.packet, CallState::PowerOff);
    }

    #[test]
    fn call_status_needs_two_fields() {
        assert!(matches!(
            CallStatus::parse("IDLE"),
            Err(CallboxError::UnexpectedReply { .. })
        ));
    }

    #[test]
    fn camping_cell_parses_bts_and_rat() {
        let cell = CampingCell::parse("BTS2,WCDMA").unwrap();
        assert_eq!(cell.bts, BtsNumber::Bts2);
        assert_eq!(cell.rat, BtsTechnology::Wcdma);
    }

    #[test]
    fn camping_cell_rejects_garbage() {
        assert!(CampingCell::parse("NONE").is_err());
        assert!(CampingCell::parse("BTS9,LTE").is_err());
    }
}
