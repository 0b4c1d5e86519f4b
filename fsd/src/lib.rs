//! Codec for the colon-delimited FSD server-to-server protocol
//!
//! Every FSD line is a sequence of `:` separated fields. Field 0 names the
//! packet kind, fields 1-4 form the common envelope (destination, source,
//! packet id, hop count) and the remaining fields are positional and
//! kind-specific. There is no escaping, so a colon can never appear inside a
//! field.

mod records;

pub use records::{
    AddClient, AtcData, AtisData, AtisRequest, FlightPlan, FragmentKind, Notify, PilotData, Ping,
    Pong, RemoveClient, ServerSync,
};

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Client type code for pilots in ADDCLIENT packets
pub const CLIENT_TYPE_PILOT: i32 = 1;
/// Client type code for controllers in ADDCLIENT packets
pub const CLIENT_TYPE_ATC: i32 = 2;

pub type Result<T> = std::result::Result<T, FsdError>;

/// Structural decode failure. Always carries the reassembled packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsdError {
    #[error("invalid {kind} packet, expected at least {expected} fields but got {actual}: {packet}")]
    TooShort {
        kind: &'static str,
        expected: usize,
        actual: usize,
        packet: String,
    },

    #[error("failed to parse {field} of {kind} packet: {packet}")]
    InvalidField {
        kind: &'static str,
        field: &'static str,
        packet: String,
    },
}

impl FsdError {
    /// The offending packet, reassembled from its fields
    pub fn packet(&self) -> &str {
        match self {
            FsdError::TooShort { packet, .. } => packet,
            FsdError::InvalidField { packet, .. } => packet,
        }
    }
}

/// Puts the fields of a packet back together for diagnostics
pub fn reassemble(fields: &[&str]) -> String {
    fields.join(":")
}

/// Strips the line terminator and splits the line into its fields
pub fn split_fields(line: &str) -> Vec<&str> {
    line.trim_end_matches(&['\r', '\n'][..]).split(':').collect()
}

/// Packet number tag letter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketTag {
    /// `B`, numbered by the sending server
    Broadcast,
    /// `U`, reply traffic
    Reply,
}

impl PacketTag {
    pub fn as_char(self) -> char {
        match self {
            PacketTag::Broadcast => 'B',
            PacketTag::Reply => 'U',
        }
    }
}

/// The packet id field, e.g. `B42`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketId {
    pub tag: PacketTag,
    pub number: u64,
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag.as_char(), self.number)
    }
}

impl FromStr for PacketId {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut chars = s.chars();
        let tag = match chars.next() {
            Some('B') => PacketTag::Broadcast,
            Some('U') => PacketTag::Reply,
            _ => return Err(()),
        };
        let number = chars.as_str().parse::<u64>().map_err(|_| ())?;
        Ok(PacketId { tag, number })
    }
}

/// Common envelope shared by all inter-server packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base {
    pub destination: String,
    pub source: String,
    pub packet: PacketId,
    pub hop_count: u32,
}

impl Base {
    /// Envelope for an outbound packet. The packet number is assigned by the
    /// connection when the packet is actually sent.
    pub fn outbound(destination: &str, source: &str, tag: PacketTag) -> Self {
        Base {
            destination: destination.to_string(),
            source: source.to_string(),
            packet: PacketId { tag, number: 0 },
            hop_count: 1,
        }
    }

    fn decode(kind: Kind, fields: &[&str]) -> Result<Self> {
        Ok(Base {
            destination: fields[1].to_string(),
            source: fields[2].to_string(),
            packet: parse_field(kind, fields, 3, "packet number")?,
            hop_count: parse_field(kind, fields, 4, "hop count")?,
        })
    }

    fn header(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.destination, self.source, self.packet, self.hop_count
        )
    }
}

/// Packet kinds this codec understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    AddClient,
    RemoveClient,
    PilotData,
    AtcData,
    FlightPlan,
    Ping,
    Pong,
    Notify,
    Sync,
    AtisRequest,
    AtisData,
}

impl Kind {
    /// Classifies a packet from its fields. MC packets are further split on
    /// their subtype in field 5. Returns `None` for anything unmapped.
    pub fn of(fields: &[&str]) -> Option<Kind> {
        match *fields.first()? {
            "ADDCLIENT" => Some(Kind::AddClient),
            "RMCLIENT" => Some(Kind::RemoveClient),
            "PD" => Some(Kind::PilotData),
            "AD" => Some(Kind::AtcData),
            "PLAN" => Some(Kind::FlightPlan),
            "PING" => Some(Kind::Ping),
            "PONG" => Some(Kind::Pong),
            "NOTIFY" => Some(Kind::Notify),
            "SYNC" => Some(Kind::Sync),
            "MC" => match fields.get(5).copied() {
                Some("24") => Some(Kind::AtisRequest),
                Some("25") => Some(Kind::AtisData),
                _ => None,
            },
            _ => None,
        }
    }

    /// Minimum number of fields a packet of this kind must have
    pub fn min_fields(self) -> usize {
        match self {
            Kind::AddClient => 12,
            Kind::RemoveClient => 6,
            Kind::PilotData => 14,
            Kind::AtcData => 13,
            Kind::FlightPlan => 22,
            Kind::Ping | Kind::Pong => 6,
            Kind::Notify => 13,
            Kind::Sync => 5,
            Kind::AtisRequest => 8,
            Kind::AtisData => 10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::AddClient => "ADDCLIENT",
            Kind::RemoveClient => "RMCLIENT",
            Kind::PilotData => "PD",
            Kind::AtcData => "AD",
            Kind::FlightPlan => "PLAN",
            Kind::Ping => "PING",
            Kind::Pong => "PONG",
            Kind::Notify => "NOTIFY",
            Kind::Sync => "SYNC",
            Kind::AtisRequest => "MC/24",
            Kind::AtisData => "MC/25",
        }
    }
}

/// A decoded FSD packet
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    AddClient(AddClient),
    RemoveClient(RemoveClient),
    PilotData(PilotData),
    AtcData(AtcData),
    FlightPlan(FlightPlan),
    Ping(Ping),
    Pong(Pong),
    Notify(Notify),
    Sync(ServerSync),
    AtisRequest(AtisRequest),
    AtisData(AtisData),
}

impl Record {
    pub fn kind(&self) -> Kind {
        match self {
            Record::AddClient(_) => Kind::AddClient,
            Record::RemoveClient(_) => Kind::RemoveClient,
            Record::PilotData(_) => Kind::PilotData,
            Record::AtcData(_) => Kind::AtcData,
            Record::FlightPlan(_) => Kind::FlightPlan,
            Record::Ping(_) => Kind::Ping,
            Record::Pong(_) => Kind::Pong,
            Record::Notify(_) => Kind::Notify,
            Record::Sync(_) => Kind::Sync,
            Record::AtisRequest(_) => Kind::AtisRequest,
            Record::AtisData(_) => Kind::AtisData,
        }
    }

    pub fn base(&self) -> &Base {
        match self {
            Record::AddClient(r) => &r.base,
            Record::RemoveClient(r) => &r.base,
            Record::PilotData(r) => &r.base,
            Record::AtcData(r) => &r.base,
            Record::FlightPlan(r) => &r.base,
            Record::Ping(r) => &r.base,
            Record::Pong(r) => &r.base,
            Record::Notify(r) => &r.base,
            Record::Sync(r) => &r.base,
            Record::AtisRequest(r) => &r.base,
            Record::AtisData(r) => &r.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut Base {
        match self {
            Record::AddClient(r) => &mut r.base,
            Record::RemoveClient(r) => &mut r.base,
            Record::PilotData(r) => &mut r.base,
            Record::AtcData(r) => &mut r.base,
            Record::FlightPlan(r) => &mut r.base,
            Record::Ping(r) => &mut r.base,
            Record::Pong(r) => &mut r.base,
            Record::Notify(r) => &mut r.base,
            Record::Sync(r) => &mut r.base,
            Record::AtisRequest(r) => &mut r.base,
            Record::AtisData(r) => &mut r.base,
        }
    }

    /// Serializes the record into a single line without terminator
    pub fn encode(&self) -> String {
        match self {
            Record::AddClient(r) => r.encode(),
            Record::RemoveClient(r) => r.encode(),
            Record::PilotData(r) => r.encode(),
            Record::AtcData(r) => r.encode(),
            Record::FlightPlan(r) => r.encode(),
            Record::Ping(r) => r.encode(),
            Record::Pong(r) => r.encode(),
            Record::Notify(r) => r.encode(),
            Record::Sync(r) => r.encode(),
            Record::AtisRequest(r) => r.encode(),
            Record::AtisData(r) => r.encode(),
        }
    }
}

/// Decodes the fields of a packet already classified as `kind`
pub fn decode(kind: Kind, fields: &[&str]) -> Result<Record> {
    check_len(kind, fields)?;
    let record = match kind {
        Kind::AddClient => Record::AddClient(AddClient::decode(fields)?),
        Kind::RemoveClient => Record::RemoveClient(RemoveClient::decode(fields)?),
        Kind::PilotData => Record::PilotData(PilotData::decode(fields)?),
        Kind::AtcData => Record::AtcData(AtcData::decode(fields)?),
        Kind::FlightPlan => Record::FlightPlan(FlightPlan::decode(fields)?),
        Kind::Ping => Record::Ping(Ping::decode(fields)?),
        Kind::Pong => Record::Pong(Pong::decode(fields)?),
        Kind::Notify => Record::Notify(Notify::decode(fields)?),
        Kind::Sync => Record::Sync(ServerSync::decode(fields)?),
        Kind::AtisRequest => Record::AtisRequest(AtisRequest::decode(fields)?),
        Kind::AtisData => Record::AtisData(AtisData::decode(fields)?),
    };
    Ok(record)
}

/// Splits, classifies and decodes one line. Unmapped kinds yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Record>> {
    let fields = split_fields(line);
    match Kind::of(&fields) {
        Some(kind) => decode(kind, &fields).map(Some),
        None => Ok(None),
    }
}

/// Extracts the heading in whole degrees from a packed pitch/bank/heading word
pub fn heading_from_pbh(pbh: u32) -> u32 {
    let hdg_bits = (pbh >> 2) & 0x3FF;
    normalize_heading(hdg_bits as f64 / 1024.0 * 360.0)
}

fn normalize_heading(heading: f64) -> u32 {
    let heading = heading.rem_euclid(360.0);
    heading as u32 % 360
}

fn check_len(kind: Kind, fields: &[&str]) -> Result<()> {
    if fields.len() < kind.min_fields() {
        return Err(FsdError::TooShort {
            kind: kind.name(),
            expected: kind.min_fields(),
            actual: fields.len(),
            packet: reassemble(fields),
        });
    }
    Ok(())
}

fn parse_field<T: FromStr>(
    kind: Kind,
    fields: &[&str],
    index: usize,
    name: &'static str,
) -> Result<T> {
    fields
        .get(index)
        .and_then(|f| f.trim().parse::<T>().ok())
        .ok_or_else(|| FsdError::InvalidField {
            kind: kind.name(),
            field: name,
            packet: reassemble(fields),
        })
}
