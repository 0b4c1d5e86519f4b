//! # FSD Data Server
//!
//! This library implements a passive data server for an FSD flight-simulation
//! network. It joins the network as a peer server, listens to the broadcast
//! traffic, and maintains a live roster of every pilot and controller online.
//! The roster is exposed two ways: as a stream of change events and as a
//! periodically rewritten JSON snapshot file.
//!
//! ## Core Responsibilities
//!
//! ### Session Upkeep
//! The hub only forwards traffic to servers it knows about. The data server
//! announces itself with NOTIFY and SYNC, keeps a hidden synthetic controller
//! client alive, answers PINGs, and periodically asks every controller for its
//! ATIS so that ATIS text ends up in the roster.
//!
//! ### Roster Maintenance
//! ADDCLIENT, RMCLIENT, PD, AD, PLAN and ATIS packets are applied to the
//! roster as they arrive. Updates for callsigns that were never added are
//! dropped. Entries that stop reporting are evicted by a periodic sweep.
//!
//! ### Publication
//! Each accepted roster change is published as an event and then signaled to
//! the snapshot writer, which debounces bursts of changes into one file write
//! and pushes every written file to the configured upload targets.
//!
//! ## Architecture Design
//!
//! ### One Connection, Many Tasks
//! A single TCP connection to the hub is split into a read half, owned by the
//! dispatch loop, and a shared write half that serializes all outbound
//! packets. Losing the connection is fatal; the process is expected to be
//! restarted by its supervisor.
//!
//! ### Short Critical Sections
//! The roster sits behind an async reader/writer lock that is held only for
//! in-memory work. Network sends and file writes always happen after the lock
//! is released.
//!
//! ## Module Organization
//!
//! ### Connection Module (`connection`)
//! Line framing over the hub stream and the packet-numbering writer.
//!
//! ### Network Module (`network`)
//! The [`network::DataServer`] context and the read/dispatch loop.
//!
//! ### Roster Module (`roster`)
//! Pilot and controller entries, ATIS accumulation, timeout eviction and the
//! connection gauge.
//!
//! ### Session Module (`session`)
//! Announce, keepalive, ATIS solicitation and sweep loops.
//!
//! ### Publish and Snapshot Modules (`publish`, `snapshot`)
//! Event envelopes and bus implementations; the debounced snapshot writer,
//! file store and S3 uploaders.
//!
//! ### Configuration and Errors (`config`, `errors`)
//! The RON configuration file and the crate-wide error type.

pub mod config;
pub mod connection;
pub mod errors;
pub mod network;
pub mod publish;
pub mod roster;
pub mod session;
pub mod snapshot;
