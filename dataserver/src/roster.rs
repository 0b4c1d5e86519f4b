//! Roster of pilots and controllers currently on the network
//!
//! This module holds the in-memory state the data server derives from the
//! hub's broadcast traffic:
//! - One pilot and one controller list, each keyed and ordered by callsign
//! - The ATIS accumulation state of every controller
//! - A per-server connection gauge
//!
//! [`Roster`] is the plain data structure with synchronous mutations, each
//! returning what changed. [`RosterStore`] wraps it in a reader/writer lock
//! and turns every accepted change into a published event followed by a
//! snapshot signal.

use crate::publish::{MessageType, Publisher};
use crate::snapshot::SnapshotSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fsd::{AddClient, AtcData, AtisData, FragmentKind, PilotData, RemoveClient};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Network member behind a connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberData {
    pub cid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlightPlanTime {
    pub departure: String,
    pub hours_enroute: String,
    pub minutes_enroute: String,
    pub hours_fuel: String,
    pub minutes_fuel: String,
}

/// Filed flight plan, stored as received
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlightPlan {
    pub flight_rules: String,
    pub aircraft: String,
    pub cruise_speed: String,
    pub departure: String,
    pub arrival: String,
    pub altitude: String,
    pub alternate: String,
    pub route: String,
    pub time: FlightPlanTime,
    pub remarks: String,
}

impl From<&fsd::FlightPlan> for FlightPlan {
    fn from(plan: &fsd::FlightPlan) -> Self {
        FlightPlan {
            flight_rules: plan.flight_rules.clone(),
            aircraft: plan.aircraft.clone(),
            cruise_speed: plan.cruise_speed.clone(),
            departure: plan.departure_airport.clone(),
            arrival: plan.destination_airport.clone(),
            altitude: plan.altitude.clone(),
            alternate: plan.alternate_airport.clone(),
            route: plan.route.clone(),
            time: FlightPlanTime {
                departure: plan.estimated_departure_time.clone(),
                hours_enroute: plan.hours_enroute.clone(),
                minutes_enroute: plan.minutes_enroute.clone(),
                hours_fuel: plan.hours_fuel.clone(),
                minutes_fuel: plan.minutes_fuel.clone(),
            },
            remarks: plan.remarks.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pilot {
    pub server: String,
    pub callsign: String,
    pub member: MemberData,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub speed: i32,
    pub heading: u32,
    #[serde(rename = "plan")]
    pub flight_plan: FlightPlan,
    pub last_updated: DateTime<Utc>,
}

/// Whether the next `T` fragment starts a new ATIS or continues one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AtisState {
    #[default]
    Idle,
    Accumulating,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Controller {
    pub server: String,
    pub callsign: String,
    pub member: MemberData,
    pub rating: i32,
    pub frequency: i32,
    #[serde(rename = "facility")]
    pub facility_type: i32,
    #[serde(rename = "range")]
    pub visual_range: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub atis: String,
    #[serde(skip)]
    pub atis_state: AtisState,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RosterEntry {
    Pilot(Pilot),
    Controller(Controller),
}

impl RosterEntry {
    pub fn callsign(&self) -> &str {
        match self {
            RosterEntry::Pilot(pilot) => &pilot.callsign,
            RosterEntry::Controller(controller) => &controller.callsign,
        }
    }

    /// Server the client was announced through
    pub fn server(&self) -> &str {
        match self {
            RosterEntry::Pilot(pilot) => &pilot.server,
            RosterEntry::Controller(controller) => &controller.server,
        }
    }
}

/// Full roster as written to the snapshot file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub pilots: Vec<Pilot>,
    pub controllers: Vec<Controller>,
}

fn is_older_than(last_updated: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
    // negative ages (clock stepped back) count as fresh
    now.signed_duration_since(last_updated)
        .to_std()
        .map(|age| age > max_age)
        .unwrap_or(false)
}

/// Pilot and controller lists plus the connection gauge
#[derive(Debug, Default)]
pub struct Roster {
    pilots: BTreeMap<String, Pilot>,
    controllers: BTreeMap<String, Controller>,
    connections: BTreeMap<String, i64>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entry for a newly announced client
    ///
    /// Type 1 becomes a pilot, type 2 a controller. Returns the created entry,
    /// or None when the type is unknown or the callsign is already listed.
    pub fn add_client(&mut self, add: &AddClient, now: DateTime<Utc>) -> Option<RosterEntry> {
        let member = MemberData {
            cid: add.cid,
            name: add.real_name.clone(),
        };

        let entry = match add.client_type {
            fsd::CLIENT_TYPE_PILOT => {
                if self.pilots.contains_key(&add.callsign) {
                    return None;
                }
                let pilot = Pilot {
                    server: add.server.clone(),
                    callsign: add.callsign.clone(),
                    member,
                    latitude: 0.0,
                    longitude: 0.0,
                    altitude: 0,
                    speed: 0,
                    heading: 0,
                    flight_plan: FlightPlan::default(),
                    last_updated: now,
                };
                self.pilots.insert(add.callsign.clone(), pilot.clone());
                RosterEntry::Pilot(pilot)
            }
            fsd::CLIENT_TYPE_ATC => {
                if self.controllers.contains_key(&add.callsign) {
                    return None;
                }
                let controller = Controller {
                    server: add.server.clone(),
                    callsign: add.callsign.clone(),
                    member,
                    rating: add.rating,
                    frequency: 0,
                    facility_type: 0,
                    visual_range: 0,
                    latitude: 0.0,
                    longitude: 0.0,
                    atis: String::new(),
                    atis_state: AtisState::Idle,
                    last_updated: now,
                };
                self.controllers
                    .insert(add.callsign.clone(), controller.clone());
                RosterEntry::Controller(controller)
            }
            other => {
                debug!("Ignoring ADDCLIENT {} with client type {}", add.callsign, other);
                return None;
            }
        };

        *self.connections.entry(add.server.clone()).or_insert(0) += 1;
        Some(entry)
    }

    /// Applies a pilot position report to a listed pilot
    pub fn update_position(&mut self, pd: &PilotData, now: DateTime<Utc>) -> Option<Pilot> {
        let pilot = self.pilots.get_mut(&pd.callsign)?;
        pilot.latitude = pd.latitude;
        pilot.longitude = pd.longitude;
        pilot.altitude = pd.altitude;
        pilot.speed = pd.ground_speed;
        pilot.heading = pd.heading();
        pilot.last_updated = now;
        Some(pilot.clone())
    }

    /// Applies a controller position report to a listed controller
    pub fn update_controller(&mut self, ad: &AtcData, now: DateTime<Utc>) -> Option<Controller> {
        let controller = self.controllers.get_mut(&ad.callsign)?;
        controller.frequency = ad.frequency;
        controller.facility_type = ad.facility_type;
        controller.visual_range = ad.visual_range;
        controller.rating = ad.rating;
        controller.latitude = ad.latitude;
        controller.longitude = ad.longitude;
        controller.last_updated = now;
        Some(controller.clone())
    }

    /// Replaces the flight plan of a listed pilot
    pub fn update_flight_plan(
        &mut self,
        plan: &fsd::FlightPlan,
        now: DateTime<Utc>,
    ) -> Option<Pilot> {
        let pilot = self.pilots.get_mut(&plan.callsign)?;
        pilot.flight_plan = FlightPlan::from(plan);
        pilot.last_updated = now;
        Some(pilot.clone())
    }

    /// Feeds one ATIS fragment into the sending controller's ATIS text
    ///
    /// A `T` fragment while idle starts a new text, further `T` fragments
    /// append a line, and `E` closes the message so the next `T` starts over.
    /// Other fragment types are ignored.
    pub fn apply_atis_fragment(
        &mut self,
        atis: &AtisData,
        now: DateTime<Utc>,
    ) -> Option<Controller> {
        let controller = self.controllers.get_mut(&atis.from)?;
        match (&atis.fragment, controller.atis_state) {
            (FragmentKind::Text, AtisState::Idle) => {
                controller.atis = atis.data.clone();
                controller.atis_state = AtisState::Accumulating;
            }
            (FragmentKind::Text, AtisState::Accumulating) => {
                controller.atis.push('\n');
                controller.atis.push_str(&atis.data);
            }
            (FragmentKind::End, _) => controller.atis_state = AtisState::Idle,
            (FragmentKind::Other(kind), _) => {
                debug!("Ignoring ATIS fragment {} from {}", kind, atis.from);
                return None;
            }
        }
        controller.last_updated = now;
        Some(controller.clone())
    }

    /// Removes the callsign from both lists
    pub fn remove(&mut self, callsign: &str) -> Vec<RosterEntry> {
        let mut removed = Vec::new();
        if let Some(pilot) = self.pilots.remove(callsign) {
            removed.push(RosterEntry::Pilot(pilot));
        }
        if let Some(controller) = self.controllers.remove(callsign) {
            removed.push(RosterEntry::Controller(controller));
        }
        removed
    }

    /// Handles RMCLIENT, charging the removal to the packet's source server
    pub fn remove_client(&mut self, rm: &RemoveClient) -> Vec<RosterEntry> {
        let removed = self.remove(&rm.callsign);
        if !removed.is_empty() {
            *self.connections.entry(rm.base.source.clone()).or_insert(0) -= 1;
        }
        removed
    }

    /// Evicts every entry not updated within `max_age`
    ///
    /// `on_evict` sees each entry before it is deleted. Each eviction is
    /// taken off the gauge of the server the entry was announced through.
    pub fn sweep_timed_out(
        &mut self,
        max_age: Duration,
        now: DateTime<Utc>,
        mut on_evict: impl FnMut(&RosterEntry),
    ) -> Vec<RosterEntry> {
        let stale_pilots: Vec<String> = self
            .pilots
            .values()
            .filter(|p| is_older_than(p.last_updated, now, max_age))
            .map(|p| p.callsign.clone())
            .collect();
        let stale_controllers: Vec<String> = self
            .controllers
            .values()
            .filter(|c| is_older_than(c.last_updated, now, max_age))
            .map(|c| c.callsign.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale_pilots.len() + stale_controllers.len());
        for callsign in stale_pilots {
            if let Some(pilot) = self.pilots.get(&callsign) {
                let entry = RosterEntry::Pilot(pilot.clone());
                on_evict(&entry);
                self.pilots.remove(&callsign);
                evicted.push(entry);
            }
        }
        for callsign in stale_controllers {
            if let Some(controller) = self.controllers.get(&callsign) {
                let entry = RosterEntry::Controller(controller.clone());
                on_evict(&entry);
                self.controllers.remove(&callsign);
                evicted.push(entry);
            }
        }
        for entry in &evicted {
            *self.connections.entry(entry.server().to_string()).or_insert(0) -= 1;
        }
        evicted
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pilots: self.pilots.values().cloned().collect(),
            controllers: self.controllers.values().cloned().collect(),
        }
    }

    pub fn controller_callsigns(&self) -> Vec<String> {
        self.controllers.keys().cloned().collect()
    }

    pub fn pilot(&self, callsign: &str) -> Option<&Pilot> {
        self.pilots.get(callsign)
    }

    pub fn controller(&self, callsign: &str) -> Option<&Controller> {
        self.controllers.get(callsign)
    }

    pub fn pilot_count(&self) -> usize {
        self.pilots.len()
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    /// Connection gauge per server name
    pub fn connection_counts(&self) -> &BTreeMap<String, i64> {
        &self.connections
    }
}

/// Shared roster that publishes every accepted change
///
/// Each operation holds the lock for its in-memory work only. Events go out
/// after the mutation, except for sweep evictions which are published before
/// each deletion. Every change marks the snapshot dirty; the roster itself is
/// only copied when the snapshot writer reads it.
pub struct RosterStore {
    roster: RwLock<Roster>,
    publisher: Publisher,
}

impl RosterStore {
    pub fn new(publisher: Publisher) -> Self {
        Self {
            roster: RwLock::new(Roster::new()),
            publisher,
        }
    }

    /// Returns true if a new entry was created
    pub async fn upsert_from_add(&self, add: &AddClient) -> bool {
        let mut roster = self.roster.write().await;
        let Some(entry) = roster.add_client(add, Utc::now()) else {
            return false;
        };
        info!("Client {} connected via {}", entry.callsign(), add.server);
        debug!("Connection gauge {:?}", roster.connection_counts());
        self.publisher.event(MessageType::AddClient, &entry);
        self.publisher.signal();
        true
    }

    pub async fn apply_position_update(&self, pd: &PilotData) -> bool {
        let mut roster = self.roster.write().await;
        let Some(pilot) = roster.update_position(pd, Utc::now()) else {
            return false;
        };
        self.publisher.event(MessageType::UpdatePosition, &pilot);
        self.publisher.signal();
        true
    }

    pub async fn apply_controller_update(&self, ad: &AtcData) -> bool {
        let mut roster = self.roster.write().await;
        let Some(controller) = roster.update_controller(ad, Utc::now()) else {
            return false;
        };
        self.publisher
            .event(MessageType::UpdateControllerData, &controller);
        self.publisher.signal();
        true
    }

    pub async fn apply_flight_plan(&self, plan: &fsd::FlightPlan) -> bool {
        let mut roster = self.roster.write().await;
        let Some(pilot) = roster.update_flight_plan(plan, Utc::now()) else {
            return false;
        };
        self.publisher.event(MessageType::UpdateFlightPlan, &pilot);
        self.publisher.signal();
        true
    }

    pub async fn apply_atis_fragment(&self, atis: &AtisData) -> bool {
        let mut roster = self.roster.write().await;
        let Some(controller) = roster.apply_atis_fragment(atis, Utc::now()) else {
            return false;
        };
        self.publisher
            .event(MessageType::UpdateControllerData, &controller);
        self.publisher.signal();
        true
    }

    /// Handles RMCLIENT. Returns the number of entries removed.
    pub async fn remove(&self, rm: &RemoveClient) -> usize {
        let mut roster = self.roster.write().await;
        let removed = roster.remove_client(rm);
        if removed.is_empty() {
            return 0;
        }
        info!("Client {} disconnected", rm.callsign);
        debug!("Connection gauge {:?}", roster.connection_counts());
        for entry in &removed {
            self.publisher.event(MessageType::RemoveClient, entry);
        }
        self.publisher.signal();
        removed.len()
    }

    /// Evicts stale entries. Returns the number evicted.
    pub async fn sweep_timed_out(&self, max_age: Duration) -> usize {
        let mut roster = self.roster.write().await;
        let publisher = &self.publisher;
        let evicted = roster.sweep_timed_out(max_age, Utc::now(), |entry| {
            publisher.event(MessageType::RemoveClient, entry);
        });
        if evicted.is_empty() {
            return 0;
        }
        for entry in &evicted {
            info!("Client {} timed out", entry.callsign());
        }
        debug!("Connection gauge {:?}", roster.connection_counts());
        self.publisher.signal();
        evicted.len()
    }

    pub async fn controller_callsigns(&self) -> Vec<String> {
        self.roster.read().await.controller_callsigns()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.roster.read().await.snapshot()
    }

    /// Runs `f` under the read lock
    pub async fn inspect<R>(&self, f: impl FnOnce(&Roster) -> R) -> R {
        let roster = self.roster.read().await;
        f(&roster)
    }
}

#[async_trait]
impl SnapshotSource for RosterStore {
    async fn snapshot(&self) -> Snapshot {
        RosterStore::snapshot(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{ChannelBus, Envelope};
    use crate::snapshot::{snapshot_channel, SnapshotReceiver};
    use assert_approx_eq::assert_approx_eq;
    use chrono::Duration as ChronoDuration;
    use fsd::{Base, FlightPlan as PlanRecord, PacketTag};
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn base(source: &str) -> Base {
        Base::outbound("*", source, PacketTag::Broadcast)
    }

    fn add(callsign: &str, client_type: i32) -> AddClient {
        AddClient {
            base: base("SERVER1"),
            cid: 1234567,
            server: "SERVER1".to_string(),
            callsign: callsign.to_string(),
            client_type,
            rating: 3,
            protocol_revision: 100,
            real_name: "Jane Doe".to_string(),
            sim_type: None,
            hidden: None,
        }
    }

    fn position(callsign: &str) -> PilotData {
        PilotData {
            base: base("SERVER1"),
            ident_flag: "N".to_string(),
            callsign: callsign.to_string(),
            transponder: 2000,
            rating: 1,
            latitude: 12.34,
            longitude: 56.78,
            altitude: 10000,
            ground_speed: 250,
            pbh: 1024,
        }
    }

    fn atc(callsign: &str) -> AtcData {
        AtcData {
            base: base("SERVER1"),
            callsign: callsign.to_string(),
            frequency: 18700,
            facility_type: 5,
            visual_range: 150,
            rating: 5,
            latitude: 51.47,
            longitude: -0.45,
            transceiver_altitude: 0,
        }
    }

    fn fragment(from: &str, fragment: FragmentKind, data: &str) -> AtisData {
        AtisData {
            base: base(from),
            from: from.to_string(),
            to: "DSERVERNG".to_string(),
            fragment,
            data: data.to_string(),
        }
    }

    fn removal(source: &str, callsign: &str) -> RemoveClient {
        RemoveClient {
            base: base(source),
            callsign: callsign.to_string(),
        }
    }

    fn store() -> (RosterStore, UnboundedReceiver<Envelope>, SnapshotReceiver) {
        let (bus, events) = ChannelBus::new();
        let (signal, snapshots) = snapshot_channel();
        (
            RosterStore::new(Publisher::new(Arc::new(bus), signal)),
            events,
            snapshots,
        )
    }

    #[test]
    fn test_add_client_by_type() {
        let mut roster = Roster::new();
        let now = Utc::now();

        assert!(matches!(
            roster.add_client(&add("ABC123", 1), now),
            Some(RosterEntry::Pilot(_))
        ));
        assert!(matches!(
            roster.add_client(&add("EGLL_TWR", 2), now),
            Some(RosterEntry::Controller(_))
        ));
        assert!(roster.add_client(&add("SUP1", 7), now).is_none());

        assert_eq!(roster.pilot_count(), 1);
        assert_eq!(roster.controller_count(), 1);
        let pilot = roster.pilot("ABC123").unwrap();
        assert_eq!(pilot.member.cid, 1234567);
        assert_eq!(pilot.member.name, "Jane Doe");
        assert_eq!(roster.controller("EGLL_TWR").unwrap().rating, 3);
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let mut roster = Roster::new();
        let now = Utc::now();
        roster.add_client(&add("ABC123", 1), now);
        roster.update_position(&position("ABC123"), now);

        assert!(roster.add_client(&add("ABC123", 1), now).is_none());
        assert_eq!(roster.pilot_count(), 1);
        assert_eq!(roster.pilot("ABC123").unwrap().altitude, 10000);
        assert_eq!(roster.connection_counts()["SERVER1"], 1);
    }

    #[test]
    fn test_same_callsign_in_both_lists() {
        let mut roster = Roster::new();
        let now = Utc::now();
        roster.add_client(&add("DUAL", 1), now);
        roster.add_client(&add("DUAL", 2), now);
        assert_eq!(roster.pilot_count(), 1);
        assert_eq!(roster.controller_count(), 1);

        let removed = roster.remove("DUAL");
        assert_eq!(removed.len(), 2);
        assert_eq!(roster.pilot_count(), 0);
        assert_eq!(roster.controller_count(), 0);
    }

    #[test]
    fn test_position_update() {
        let mut roster = Roster::new();
        let added = Utc::now() - ChronoDuration::seconds(10);
        roster.add_client(&add("ABC123", 1), added);

        let now = Utc::now();
        let pilot = roster.update_position(&position("ABC123"), now).unwrap();
        assert_approx_eq!(pilot.latitude, 12.34);
        assert_approx_eq!(pilot.longitude, 56.78);
        assert_eq!(pilot.altitude, 10000);
        assert_eq!(pilot.speed, 250);
        assert_eq!(pilot.heading, 90);
        assert_eq!(pilot.last_updated, now);
    }

    #[test]
    fn test_updates_for_unknown_callsign_are_dropped() {
        let mut roster = Roster::new();
        let now = Utc::now();
        assert!(roster.update_position(&position("GHOST"), now).is_none());
        assert!(roster.update_controller(&atc("GHOST"), now).is_none());
        assert!(roster
            .apply_atis_fragment(&fragment("GHOST", FragmentKind::Text, "hi"), now)
            .is_none());
        assert_eq!(roster.pilot_count(), 0);
        assert_eq!(roster.controller_count(), 0);
    }

    #[test]
    fn test_controller_update() {
        let mut roster = Roster::new();
        let now = Utc::now();
        roster.add_client(&add("EGLL_TWR", 2), now);

        let controller = roster.update_controller(&atc("EGLL_TWR"), now).unwrap();
        assert_eq!(controller.frequency, 18700);
        assert_eq!(controller.facility_type, 5);
        assert_eq!(controller.visual_range, 150);
        assert_eq!(controller.rating, 5);
        assert_approx_eq!(controller.latitude, 51.47);
    }

    #[test]
    fn test_flight_plan_stored_as_received() {
        let mut roster = Roster::new();
        let now = Utc::now();
        roster.add_client(&add("ABC123", 1), now);

        let plan = PlanRecord {
            base: base("SERVER1"),
            callsign: "ABC123".to_string(),
            revision: "0".to_string(),
            flight_rules: "I".to_string(),
            aircraft: "B738".to_string(),
            cruise_speed: "450".to_string(),
            departure_airport: "EGLL".to_string(),
            estimated_departure_time: "1200".to_string(),
            actual_departure_time: "1205".to_string(),
            altitude: "FL350".to_string(),
            destination_airport: "LFPG".to_string(),
            hours_enroute: "1".to_string(),
            minutes_enroute: "10".to_string(),
            hours_fuel: "3".to_string(),
            minutes_fuel: "0".to_string(),
            alternate_airport: "LFPO".to_string(),
            remarks: "/v/".to_string(),
            route: "DVR UL9 KONAN".to_string(),
        };

        let pilot = roster.update_flight_plan(&plan, now).unwrap();
        assert_eq!(pilot.flight_plan.departure, "EGLL");
        assert_eq!(pilot.flight_plan.arrival, "LFPG");
        assert_eq!(pilot.flight_plan.alternate, "LFPO");
        assert_eq!(pilot.flight_plan.time.departure, "1200");
        assert_eq!(pilot.flight_plan.time.hours_enroute, "1");
        assert_eq!(pilot.flight_plan.route, "DVR UL9 KONAN");
    }

    #[test]
    fn test_atis_accumulation() {
        let mut roster = Roster::new();
        let now = Utc::now();
        roster.add_client(&add("EGLL_ATIS", 2), now);

        let feed = |roster: &mut Roster, kind: FragmentKind, data: &str| {
            roster.apply_atis_fragment(&fragment("EGLL_ATIS", kind, data), now)
        };

        feed(&mut roster, FragmentKind::Text, "line1");
        feed(&mut roster, FragmentKind::Text, "line2");
        feed(&mut roster, FragmentKind::End, "");
        assert_eq!(roster.controller("EGLL_ATIS").unwrap().atis, "line1\nline2");
        assert_eq!(
            roster.controller("EGLL_ATIS").unwrap().atis_state,
            AtisState::Idle
        );

        feed(&mut roster, FragmentKind::Text, "line3");
        assert_eq!(roster.controller("EGLL_ATIS").unwrap().atis, "line3");
        assert_eq!(
            roster.controller("EGLL_ATIS").unwrap().atis_state,
            AtisState::Accumulating
        );
    }

    #[test]
    fn test_unknown_atis_fragment_ignored() {
        let mut roster = Roster::new();
        let now = Utc::now();
        roster.add_client(&add("EGLL_ATIS", 2), now);
        roster.apply_atis_fragment(&fragment("EGLL_ATIS", FragmentKind::Text, "line1"), now);

        let result = roster.apply_atis_fragment(
            &fragment("EGLL_ATIS", FragmentKind::Other("Z".to_string()), "junk"),
            now,
        );
        assert!(result.is_none());
        assert_eq!(roster.controller("EGLL_ATIS").unwrap().atis, "line1");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut roster = Roster::new();
        roster.add_client(&add("ABC123", 1), Utc::now());
        assert_eq!(roster.remove("ABC123").len(), 1);
        assert!(roster.remove("ABC123").is_empty());
    }

    #[test]
    fn test_connection_gauge_keys() {
        let mut roster = Roster::new();
        let now = Utc::now();
        roster.add_client(&add("ABC123", 1), now);
        roster.add_client(&add("DEF456", 1), now);
        assert_eq!(roster.connection_counts()["SERVER1"], 2);

        // removal is charged to the packet source, not the entry's server
        roster.remove_client(&removal("SERVER2", "ABC123"));
        assert_eq!(roster.connection_counts()["SERVER1"], 2);
        assert_eq!(roster.connection_counts()["SERVER2"], -1);

        roster.remove_client(&removal("SERVER1", "DEF456"));
        assert_eq!(roster.connection_counts()["SERVER1"], 1);
    }

    #[test]
    fn test_sweep_evicts_only_stale_entries() {
        let mut roster = Roster::new();
        let now = Utc::now();
        roster.add_client(&add("OLD", 1), now - ChronoDuration::seconds(45));
        roster.add_client(&add("OLD_TWR", 2), now - ChronoDuration::seconds(31));
        roster.add_client(&add("FRESH", 1), now - ChronoDuration::seconds(5));

        let mut seen = Vec::new();
        let evicted = roster.sweep_timed_out(Duration::from_secs(30), now, |entry| {
            seen.push(entry.callsign().to_string())
        });

        assert_eq!(evicted.len(), 2);
        assert_eq!(seen, vec!["OLD".to_string(), "OLD_TWR".to_string()]);
        assert!(roster.pilot("FRESH").is_some());
        assert!(roster.pilot("OLD").is_none());
        assert!(roster.controller("OLD_TWR").is_none());
        assert_eq!(roster.connection_counts()["SERVER1"], 1);
    }

    #[test]
    fn test_sweep_lowers_gauge_of_entry_server() {
        let mut roster = Roster::new();
        let now = Utc::now();
        let mut remote = add("REMOTE1", 1);
        remote.server = "SERVER2".to_string();
        roster.add_client(&remote, now - ChronoDuration::seconds(60));
        roster.add_client(&add("OLD", 1), now - ChronoDuration::seconds(60));
        assert_eq!(roster.connection_counts()["SERVER1"], 1);
        assert_eq!(roster.connection_counts()["SERVER2"], 1);

        roster.sweep_timed_out(Duration::from_secs(30), now, |_| {});

        assert_eq!(roster.pilot_count(), 0);
        assert_eq!(roster.connection_counts()["SERVER1"], 0);
        assert_eq!(roster.connection_counts()["SERVER2"], 0);
    }

    #[test]
    fn test_snapshot_ordered_by_callsign() {
        let mut roster = Roster::new();
        let now = Utc::now();
        for callsign in ["ZZZ1", "AAA1", "MMM1"] {
            roster.add_client(&add(callsign, 1), now);
        }
        let callsigns: Vec<_> = roster
            .snapshot()
            .pilots
            .into_iter()
            .map(|p| p.callsign)
            .collect();
        assert_eq!(callsigns, vec!["AAA1", "MMM1", "ZZZ1"]);
    }

    #[test]
    fn test_snapshot_json_names() {
        let mut roster = Roster::new();
        let now = Utc::now();
        roster.add_client(&add("ABC123", 1), now);
        roster.add_client(&add("EGLL_TWR", 2), now);
        roster.update_controller(&atc("EGLL_TWR"), now);

        let value = serde_json::to_value(roster.snapshot()).unwrap();
        let pilot = &value["pilots"][0];
        assert_eq!(pilot["callsign"], "ABC123");
        assert_eq!(pilot["member"]["cid"], 1234567);
        assert!(pilot["plan"].is_object());
        assert!(pilot["plan"]["time"].is_object());

        let controller = &value["controllers"][0];
        assert_eq!(controller["facility"], 5);
        assert_eq!(controller["range"], 150);
        assert!(controller.get("atis_state").is_none());
    }

    #[tokio::test]
    async fn test_store_publishes_then_signals() {
        let (store, mut events, mut snapshots) = store();

        assert!(store.upsert_from_add(&add("ABC123", 1)).await);
        assert!(store.apply_position_update(&position("ABC123")).await);

        let first = events.try_recv().unwrap();
        assert_eq!(first.message_type, MessageType::AddClient);
        assert_eq!(first.data["callsign"], "ABC123");
        let second = events.try_recv().unwrap();
        assert_eq!(second.message_type, MessageType::UpdatePosition);
        assert_eq!(second.data["heading"], 90);

        assert!(snapshots.has_changed().unwrap());
        let latest = SnapshotSource::snapshot(&store).await;
        assert_eq!(latest.pilots[0].altitude, 10000);
    }

    #[tokio::test]
    async fn test_every_change_marks_snapshot_dirty() {
        let (store, _events, mut snapshots) = store();
        store.upsert_from_add(&add("ABC123", 1)).await;
        let before = *snapshots.borrow_and_update();

        for _ in 0..100 {
            store.apply_position_update(&position("ABC123")).await;
        }

        assert!(snapshots.has_changed().unwrap());
        assert_eq!(*snapshots.borrow_and_update(), before + 100);
    }

    #[tokio::test]
    async fn test_store_ignores_unmatched_updates() {
        let (store, mut events, snapshots) = store();

        assert!(!store.apply_position_update(&position("GHOST")).await);
        assert!(!store.apply_controller_update(&atc("GHOST")).await);
        assert_eq!(store.remove(&removal("SERVER1", "GHOST")).await, 0);

        assert!(events.try_recv().is_err());
        assert!(!snapshots.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_store_remove_carries_entry() {
        let (store, mut events, _snapshots) = store();
        store.upsert_from_add(&add("EGLL_TWR", 2)).await;
        let _ = events.try_recv();

        assert_eq!(store.remove(&removal("SERVER1", "EGLL_TWR")).await, 1);
        let event = events.try_recv().unwrap();
        assert_eq!(event.message_type, MessageType::RemoveClient);
        assert_eq!(event.data["callsign"], "EGLL_TWR");
        assert_eq!(event.data["server"], "SERVER1");
        assert!(store.controller_callsigns().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_atis_events() {
        let (store, mut events, _snapshots) = store();
        store.upsert_from_add(&add("EGLL_ATIS", 2)).await;
        let _ = events.try_recv();

        store
            .apply_atis_fragment(&fragment("EGLL_ATIS", FragmentKind::Text, "INFO A"))
            .await;
        let event = events.try_recv().unwrap();
        assert_eq!(event.message_type, MessageType::UpdateControllerData);
        assert_eq!(event.data["atis"], "INFO A");
    }

    #[tokio::test]
    async fn test_store_sweep() {
        let (store, mut events, _snapshots) = store();
        store.upsert_from_add(&add("ABC123", 1)).await;
        let _ = events.try_recv();

        assert_eq!(store.sweep_timed_out(Duration::from_secs(30)).await, 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.sweep_timed_out(Duration::from_millis(1)).await, 1);

        let event = events.try_recv().unwrap();
        assert_eq!(event.message_type, MessageType::RemoveClient);
        assert_eq!(event.data["callsign"], "ABC123");
        assert_eq!(store.inspect(|r| r.pilot_count()).await, 0);
        assert_eq!(
            store.inspect(|r| r.connection_counts()["SERVER1"]).await,
            0
        );

        // already gone, so a second sweep publishes nothing
        assert_eq!(store.sweep_timed_out(Duration::from_millis(1)).await, 0);
        assert!(events.try_recv().is_err());
    }
}
