//! Hub read loop and packet dispatch

use crate::config::{ServerIdentity, SessionTimings};
use crate::connection::{FsdReader, FsdWriter};
use crate::errors::Result;
use crate::roster::RosterStore;
use fsd::{Ping, Pong, Record};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Core state shared by the read loop and the session actors
pub struct DataServer {
    pub roster: Arc<RosterStore>,
    pub writer: FsdWriter,
    pub identity: ServerIdentity,
    pub timings: SessionTimings,
}

impl DataServer {
    pub fn new(
        roster: Arc<RosterStore>,
        writer: FsdWriter,
        identity: ServerIdentity,
        timings: SessionTimings,
    ) -> Self {
        Self {
            roster,
            writer,
            identity,
            timings,
        }
    }

    /// Reads and dispatches lines until the connection fails
    ///
    /// Malformed packets are logged and skipped. Only a read error or the
    /// end of the stream ends the loop.
    pub async fn run(&self, mut reader: FsdReader) -> Result<()> {
        info!("Reading from FSD hub");
        loop {
            let line = reader.read_line().await.map_err(|e| {
                error!("FSD connection lost: {}", e);
                e
            })?;
            self.handle_line(&line).await;
        }
    }

    /// Decodes one line and applies it
    pub async fn handle_line(&self, line: &str) {
        match fsd::parse_line(line) {
            Ok(Some(record)) => self.handle_record(record).await,
            Ok(None) => {}
            Err(e) => warn!("Dropping malformed packet: {}", e),
        }
    }

    async fn handle_record(&self, record: Record) {
        match record {
            Record::AddClient(add) => {
                self.roster.upsert_from_add(&add).await;
            }
            Record::RemoveClient(rm) => {
                self.roster.remove(&rm).await;
            }
            Record::PilotData(pd) => {
                self.roster.apply_position_update(&pd).await;
            }
            Record::AtcData(ad) => {
                self.roster.apply_controller_update(&ad).await;
            }
            Record::FlightPlan(plan) => {
                self.roster.apply_flight_plan(&plan).await;
            }
            Record::AtisData(atis) => {
                self.roster.apply_atis_fragment(&atis).await;
            }
            Record::Ping(ping) => self.reply_to_ping(&ping).await,
            other => debug!("Ignoring {}", other.kind().name()),
        }
    }

    async fn reply_to_ping(&self, ping: &Ping) {
        let pong = Pong::reply_to(ping, &self.identity.name);
        if let Err(e) = self.writer.send(Record::Pong(pong)).await {
            error!("Failed to answer PING from {}: {}", ping.base.source, e);
        }
    }
}
