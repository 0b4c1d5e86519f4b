//! Periodic tasks that keep the session with the hub alive
//!
//! Four independent loops run for the lifetime of the connection:
//! - announce: NOTIFY, then SYNC shortly after, so the hub treats this
//!   process as a peer server
//! - keepalive: re-announces the synthetic controller client (ADDCLIENT + AD)
//! - ATIS solicitation: asks every known controller for its ATIS
//! - timeout sweep: evicts roster entries that stopped reporting
//!
//! A failed announce or keepalive send ends its loop with an error, which the
//! binary treats as fatal. ATIS requests are best effort.

use crate::config::ServerIdentity;
use crate::errors::Result;
use crate::network::DataServer;
use fsd::{AddClient, AtcData, AtisRequest, Base, Notify, PacketTag, Record, ServerSync};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep, Instant, Interval, MissedTickBehavior};

fn secs(seconds: u64) -> Duration {
    Duration::from_secs(seconds)
}

fn ticker(mut interval: Interval) -> Interval {
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

pub fn notify_record(identity: &ServerIdentity) -> Record {
    Record::Notify(Notify {
        base: Base::outbound("*", &identity.name, PacketTag::Broadcast),
        feed_flag: 0,
        ident: identity.name.clone(),
        name: identity.name.clone(),
        email: identity.email.clone(),
        hostname: identity.hostname.clone(),
        version: identity.version.clone(),
        flags: 0,
        location: identity.location.clone(),
    })
}

pub fn sync_record(identity: &ServerIdentity) -> Record {
    Record::Sync(ServerSync {
        base: Base::outbound("*", &identity.name, PacketTag::Broadcast),
    })
}

/// Hidden controller client named after this server
pub fn synthetic_client(identity: &ServerIdentity) -> Record {
    Record::AddClient(AddClient {
        base: Base::outbound("*", &identity.name, PacketTag::Broadcast),
        cid: 0,
        server: identity.name.clone(),
        callsign: identity.name.clone(),
        client_type: fsd::CLIENT_TYPE_ATC,
        rating: 1,
        protocol_revision: 100,
        real_name: identity.name.clone(),
        sim_type: Some(-1),
        hidden: Some(1),
    })
}

/// Position report of the synthetic client
pub fn synthetic_position(identity: &ServerIdentity) -> Record {
    Record::AtcData(AtcData {
        base: Base::outbound("*", &identity.name, PacketTag::Broadcast),
        callsign: identity.name.clone(),
        frequency: 99999,
        facility_type: 1,
        visual_range: 100,
        rating: 1,
        latitude: 0.0,
        longitude: 0.0,
        transceiver_altitude: 0,
    })
}

/// Sends NOTIFY and SYNC every announce interval
pub async fn announce(server: Arc<DataServer>) -> Result<()> {
    let timings = &server.timings;
    let mut ticker = ticker(interval(secs(timings.announce_interval)));

    loop {
        ticker.tick().await;
        server.writer.send(notify_record(&server.identity)).await?;
        sleep(secs(timings.announce_sync_delay)).await;
        server.writer.send(sync_record(&server.identity)).await?;
        info!("Announced server {} to hub", server.identity.name);
    }
}

/// Re-announces the synthetic client every keepalive interval
pub async fn keepalive(server: Arc<DataServer>) -> Result<()> {
    let mut ticker = ticker(interval(secs(server.timings.keepalive_interval)));

    loop {
        ticker.tick().await;
        server.writer.send(synthetic_client(&server.identity)).await?;
        server.writer.send(synthetic_position(&server.identity)).await?;
        debug!("Refreshed synthetic client {}", server.identity.name);
    }
}

/// Requests the ATIS of every listed controller
///
/// Callsigns are copied out of the roster before anything is sent.
pub async fn solicit_atis(server: Arc<DataServer>) -> Result<()> {
    let timings = &server.timings;
    let start = Instant::now() + secs(timings.atis_grace);
    let mut ticker = ticker(interval_at(start, secs(timings.atis_interval)));

    loop {
        ticker.tick().await;
        let callsigns = server.roster.controller_callsigns().await;
        let mut requested = 0;

        for callsign in callsigns {
            if callsign == server.identity.name {
                continue;
            }
            let request = AtisRequest::new(&callsign, &server.identity.name);
            match server.writer.send(Record::AtisRequest(request)).await {
                Ok(_) => requested += 1,
                Err(e) => warn!("Failed to request ATIS from {}: {}", callsign, e),
            }
        }
        debug!("Requested ATIS from {} controllers", requested);
    }
}

/// Evicts roster entries that have not been updated recently
pub async fn sweep(server: Arc<DataServer>) -> Result<()> {
    let timings = &server.timings;
    let start = Instant::now() + secs(timings.sweep_grace);
    let mut ticker = ticker(interval_at(start, secs(timings.sweep_interval)));
    let max_age = secs(timings.max_client_age);

    loop {
        ticker.tick().await;
        let evicted = server.roster.sweep_timed_out(max_age).await;
        if evicted > 0 {
            info!("Evicted {} timed out clients", evicted);
        }
    }
}

/// Join handles of the running session tasks
pub struct SessionTasks {
    pub announce: JoinHandle<Result<()>>,
    pub keepalive: JoinHandle<Result<()>>,
    pub atis: JoinHandle<Result<()>>,
    pub sweep: JoinHandle<Result<()>>,
}

impl SessionTasks {
    pub fn spawn(server: &Arc<DataServer>) -> Self {
        Self {
            announce: tokio::spawn(announce(Arc::clone(server))),
            keepalive: tokio::spawn(keepalive(Arc::clone(server))),
            atis: tokio::spawn(solicit_atis(Arc::clone(server))),
            sweep: tokio::spawn(sweep(Arc::clone(server))),
        }
    }

    pub fn abort(&self) {
        self.announce.abort();
        self.keepalive.abort();
        self.atis.abort();
        self.sweep.abort();
    }
}
