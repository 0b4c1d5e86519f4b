//! Typed FSD packets with their positional field layouts

use crate::{parse_field, Base, Kind, PacketTag, Result};

/// ADDCLIENT, a pilot or controller joining the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddClient {
    pub base: Base,
    /// Member id. An empty field on the wire decodes to 0 and 0 encodes empty.
    pub cid: u32,
    pub server: String,
    pub callsign: String,
    pub client_type: i32,
    pub rating: i32,
    pub protocol_revision: i32,
    pub real_name: String,
    pub sim_type: Option<i32>,
    pub hidden: Option<i32>,
}

impl AddClient {
    pub(crate) fn decode(fields: &[&str]) -> Result<Self> {
        let kind = Kind::AddClient;
        let cid = if fields[5].is_empty() {
            0
        } else {
            parse_field(kind, fields, 5, "CID")?
        };
        let sim_type = match fields.get(12) {
            Some(_) => Some(parse_field(kind, fields, 12, "simulator type")?),
            None => None,
        };
        let hidden = match fields.get(13) {
            Some(_) => Some(parse_field(kind, fields, 13, "hidden flag")?),
            None => None,
        };

        Ok(AddClient {
            base: Base::decode(kind, fields)?,
            cid,
            server: fields[6].to_string(),
            callsign: fields[7].to_string(),
            client_type: parse_field(kind, fields, 8, "client type")?,
            rating: parse_field(kind, fields, 9, "rating")?,
            protocol_revision: parse_field(kind, fields, 10, "protocol revision")?,
            real_name: fields[11].to_string(),
            sim_type,
            hidden,
        })
    }

    pub fn encode(&self) -> String {
        let cid = if self.cid == 0 {
            String::new()
        } else {
            self.cid.to_string()
        };
        let mut line = format!(
            "ADDCLIENT:{}:{}:{}:{}:{}:{}:{}:{}",
            self.base.header(),
            cid,
            self.server,
            self.callsign,
            self.client_type,
            self.rating,
            self.protocol_revision,
            self.real_name,
        );
        if self.sim_type.is_some() || self.hidden.is_some() {
            line.push(':');
            if let Some(sim_type) = self.sim_type {
                line.push_str(&sim_type.to_string());
            }
        }
        if let Some(hidden) = self.hidden {
            line.push(':');
            line.push_str(&hidden.to_string());
        }
        line
    }
}

/// RMCLIENT, a client leaving. The originating server is the envelope source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveClient {
    pub base: Base,
    pub callsign: String,
}

impl RemoveClient {
    pub(crate) fn decode(fields: &[&str]) -> Result<Self> {
        Ok(RemoveClient {
            base: Base::decode(Kind::RemoveClient, fields)?,
            callsign: fields[5].to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!("RMCLIENT:{}:{}", self.base.header(), self.callsign)
    }
}

/// PD, pilot position update
#[derive(Debug, Clone, PartialEq)]
pub struct PilotData {
    pub base: Base,
    pub ident_flag: String,
    pub callsign: String,
    pub transponder: u32,
    pub rating: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub ground_speed: i32,
    /// packed pitch/bank/heading word
    pub pbh: u32,
}

impl PilotData {
    pub(crate) fn decode(fields: &[&str]) -> Result<Self> {
        let kind = Kind::PilotData;
        Ok(PilotData {
            base: Base::decode(kind, fields)?,
            ident_flag: fields[5].to_string(),
            callsign: fields[6].to_string(),
            transponder: parse_field(kind, fields, 7, "transponder")?,
            rating: parse_field(kind, fields, 8, "rating")?,
            latitude: parse_field(kind, fields, 9, "latitude")?,
            longitude: parse_field(kind, fields, 10, "longitude")?,
            altitude: parse_field(kind, fields, 11, "altitude")?,
            ground_speed: parse_field(kind, fields, 12, "ground speed")?,
            pbh: parse_field(kind, fields, 13, "PBH")?,
        })
    }

    pub fn heading(&self) -> u32 {
        crate::heading_from_pbh(self.pbh)
    }

    pub fn encode(&self) -> String {
        format!(
            "PD:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.base.header(),
            self.ident_flag,
            self.callsign,
            self.transponder,
            self.rating,
            self.latitude,
            self.longitude,
            self.altitude,
            self.ground_speed,
            self.pbh
        )
    }
}

/// AD, controller facility update
#[derive(Debug, Clone, PartialEq)]
pub struct AtcData {
    pub base: Base,
    pub callsign: String,
    pub frequency: i32,
    pub facility_type: i32,
    pub visual_range: i32,
    pub rating: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub transceiver_altitude: i32,
}

impl AtcData {
    pub(crate) fn decode(fields: &[&str]) -> Result<Self> {
        let kind = Kind::AtcData;
        Ok(AtcData {
            base: Base::decode(kind, fields)?,
            callsign: fields[5].to_string(),
            frequency: parse_field(kind, fields, 6, "frequency")?,
            facility_type: parse_field(kind, fields, 7, "facility type")?,
            visual_range: parse_field(kind, fields, 8, "visual range")?,
            rating: parse_field(kind, fields, 9, "rating")?,
            latitude: parse_field(kind, fields, 10, "latitude")?,
            longitude: parse_field(kind, fields, 11, "longitude")?,
            transceiver_altitude: parse_field(kind, fields, 12, "transceiver altitude")?,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "AD:{}:{}:{}:{}:{}:{}:{:.6}:{:.6}:{}",
            self.base.header(),
            self.callsign,
            self.frequency,
            self.facility_type,
            self.visual_range,
            self.rating,
            self.latitude,
            self.longitude,
            self.transceiver_altitude
        )
    }
}

/// PLAN, a filed flight plan. All fields are kept as sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightPlan {
    pub base: Base,
    pub callsign: String,
    pub revision: String,
    pub flight_rules: String,
    pub aircraft: String,
    pub cruise_speed: String,
    pub departure_airport: String,
    pub estimated_departure_time: String,
    pub actual_departure_time: String,
    pub altitude: String,
    pub destination_airport: String,
    pub hours_enroute: String,
    pub minutes_enroute: String,
    pub hours_fuel: String,
    pub minutes_fuel: String,
    pub alternate_airport: String,
    pub remarks: String,
    pub route: String,
}

impl FlightPlan {
    pub(crate) fn decode(fields: &[&str]) -> Result<Self> {
        Ok(FlightPlan {
            base: Base::decode(Kind::FlightPlan, fields)?,
            callsign: fields[5].to_string(),
            revision: fields[6].to_string(),
            flight_rules: fields[7].to_string(),
            aircraft: fields[8].to_string(),
            cruise_speed: fields[9].to_string(),
            departure_airport: fields[10].to_string(),
            estimated_departure_time: fields[11].to_string(),
            actual_departure_time: fields[12].to_string(),
            altitude: fields[13].to_string(),
            destination_airport: fields[14].to_string(),
            hours_enroute: fields[15].to_string(),
            minutes_enroute: fields[16].to_string(),
            hours_fuel: fields[17].to_string(),
            minutes_fuel: fields[18].to_string(),
            alternate_airport: fields[19].to_string(),
            remarks: fields[20].to_string(),
            route: fields[21].to_string(),
        })
    }

    pub fn encode(&self) -> String {
        let header = self.base.header();
        [
            "PLAN",
            header.as_str(),
            self.callsign.as_str(),
            self.revision.as_str(),
            self.flight_rules.as_str(),
            self.aircraft.as_str(),
            self.cruise_speed.as_str(),
            self.departure_airport.as_str(),
            self.estimated_departure_time.as_str(),
            self.actual_departure_time.as_str(),
            self.altitude.as_str(),
            self.destination_airport.as_str(),
            self.hours_enroute.as_str(),
            self.minutes_enroute.as_str(),
            self.hours_fuel.as_str(),
            self.minutes_fuel.as_str(),
            self.alternate_airport.as_str(),
            self.remarks.as_str(),
            self.route.as_str(),
        ]
        .join(":")
    }
}

/// PING, liveness check from another server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    pub base: Base,
    pub data: String,
}

impl Ping {
    pub(crate) fn decode(fields: &[&str]) -> Result<Self> {
        Ok(Ping {
            base: Base::decode(Kind::Ping, fields)?,
            data: fields[5].to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!("PING:{}:{}", self.base.header(), self.data)
    }
}

/// PONG, echoes the payload of a PING back to its sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pong {
    pub base: Base,
    pub data: String,
}

impl Pong {
    pub fn reply_to(ping: &Ping, source: &str) -> Self {
        Pong {
            base: Base::outbound(&ping.base.source, source, PacketTag::Reply),
            data: ping.data.clone(),
        }
    }

    pub(crate) fn decode(fields: &[&str]) -> Result<Self> {
        Ok(Pong {
            base: Base::decode(Kind::Pong, fields)?,
            data: fields[5].to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!("PONG:{}:{}", self.base.header(), self.data)
    }
}

/// NOTIFY, announces this process as an FSD server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notify {
    pub base: Base,
    pub feed_flag: i32,
    pub ident: String,
    pub name: String,
    pub email: String,
    pub hostname: String,
    pub version: String,
    pub flags: i32,
    pub location: String,
}

impl Notify {
    pub(crate) fn decode(fields: &[&str]) -> Result<Self> {
        let kind = Kind::Notify;
        Ok(Notify {
            base: Base::decode(kind, fields)?,
            feed_flag: parse_field(kind, fields, 5, "feed flag")?,
            ident: fields[6].to_string(),
            name: fields[7].to_string(),
            email: fields[8].to_string(),
            hostname: fields[9].to_string(),
            version: fields[10].to_string(),
            flags: parse_field(kind, fields, 11, "flags")?,
            location: fields[12].to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "NOTIFY:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.base.header(),
            self.feed_flag,
            self.ident,
            self.name,
            self.email,
            self.hostname,
            self.version,
            self.flags,
            self.location
        )
    }
}

/// SYNC, tells the hub this server is ready. The body is a single empty field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSync {
    pub base: Base,
}

impl ServerSync {
    pub(crate) fn decode(fields: &[&str]) -> Result<Self> {
        Ok(ServerSync {
            base: Base::decode(Kind::Sync, fields)?,
        })
    }

    pub fn encode(&self) -> String {
        format!("SYNC:{}:", self.base.header())
    }
}

/// MC subtype 24, asks a controller for its ATIS.
///
/// The destination travels as `%%<callsign>`; the prefix is stripped on
/// decode and added back on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtisRequest {
    pub base: Base,
    pub from: String,
}

impl AtisRequest {
    pub fn new(controller: &str, from: &str) -> Self {
        AtisRequest {
            base: Base::outbound(controller, from, PacketTag::Reply),
            from: from.to_string(),
        }
    }

    pub(crate) fn decode(fields: &[&str]) -> Result<Self> {
        let mut base = Base::decode(Kind::AtisRequest, fields)?;
        if let Some(callsign) = base.destination.strip_prefix("%%") {
            base.destination = callsign.to_string();
        }
        Ok(AtisRequest {
            base,
            from: fields[6].to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!("MC:%%{}:24:{}:ATIS", self.base.header(), self.from)
    }
}

/// Type of one ATIS response line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentKind {
    /// `T`, one line of ATIS text
    Text,
    /// `E`, end of the ATIS
    End,
    /// anything else (voice server, logoff time, ...)
    Other(String),
}

impl FragmentKind {
    fn parse(s: &str) -> Self {
        match s {
            "T" => FragmentKind::Text,
            "E" => FragmentKind::End,
            other => FragmentKind::Other(other.to_string()),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            FragmentKind::Text => "T",
            FragmentKind::End => "E",
            FragmentKind::Other(s) => s,
        }
    }
}

/// MC subtype 25, one line of an ATIS response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtisData {
    pub base: Base,
    /// controller the ATIS belongs to
    pub from: String,
    pub to: String,
    pub fragment: FragmentKind,
    pub data: String,
}

impl AtisData {
    pub(crate) fn decode(fields: &[&str]) -> Result<Self> {
        Ok(AtisData {
            base: Base::decode(Kind::AtisData, fields)?,
            from: fields[6].to_string(),
            to: fields[7].to_string(),
            fragment: FragmentKind::parse(fields[8]),
            data: fields[9].to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "MC:{}:25:{}:{}:{}:{}",
            self.base.header(),
            self.from,
            self.to,
            self.fragment.as_str(),
            self.data
        )
    }
}
