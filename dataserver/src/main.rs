use clap::Parser;
use dataserver::config::Config;
use dataserver::connection;
use dataserver::network::DataServer;
use dataserver::publish::{EventBus, LogBus, Publisher, RestProxyBus};
use dataserver::roster::RosterStore;
use dataserver::session::SessionTasks;
use dataserver::snapshot::{
    snapshot_channel, FileSnapshotStore, S3Uploader, SnapshotWriter, Uploader,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinError;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// RON configuration file
    #[arg(short, long, default_value = "configs/dataserver.ron")]
    config: PathBuf,
    /// Overrides the hub host from the configuration
    #[arg(short = 'H', long)]
    host: Option<String>,
    /// Overrides the hub port from the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

/// Turns the completion of a task that should run forever into an error
fn task_ended(
    name: &str,
    result: Result<dataserver::errors::Result<()>, JoinError>,
) -> Box<dyn std::error::Error> {
    match result {
        Ok(Ok(())) => format!("{} task stopped unexpectedly", name).into(),
        Ok(Err(e)) => format!("{} task failed: {}", name, e).into(),
        Err(e) => format!("{} task panicked: {}", name, e).into(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(host) = args.host {
        config.fsd.host = host;
    }
    if let Some(port) = args.port {
        config.fsd.port = port;
    }
    config.validate()?;

    let bus: Arc<dyn EventBus> = match &config.event_bus {
        Some(bus_config) => Arc::new(RestProxyBus::start(bus_config)?),
        None => {
            warn!("No event bus configured, roster events are only logged");
            Arc::new(LogBus)
        }
    };

    let (signal, snapshots) = snapshot_channel();
    let roster = Arc::new(RosterStore::new(Publisher::new(bus, signal)));

    let uploaders: Vec<Arc<dyn Uploader>> = config
        .upload_targets
        .iter()
        .map(|target| Arc::new(S3Uploader::new(target)) as Arc<dyn Uploader>)
        .collect();
    let writer = SnapshotWriter::new(
        roster.clone(),
        Arc::new(FileSnapshotStore::new(&config.snapshot.directory)),
        uploaders,
        config.snapshot.debounce(),
        config.snapshot.retry_delay(),
    );
    let writer_handle = tokio::spawn(writer.run(snapshots));

    let (reader, fsd_writer) = connection::connect(&config.fsd.host, config.fsd.port).await?;

    let server = Arc::new(DataServer::new(
        roster,
        fsd_writer,
        config.server.clone(),
        config.timings.clone(),
    ));

    let mut tasks = SessionTasks::spawn(&server);
    let mut read_handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run(reader).await })
    };

    info!(
        "Data server {} running against {}",
        config.server.name,
        config.hub_address()
    );

    let outcome = tokio::select! {
        result = &mut read_handle => Err(task_ended("read", result)),
        result = &mut tasks.announce => Err(task_ended("announce", result)),
        result = &mut tasks.keepalive => Err(task_ended("keepalive", result)),
        result = &mut tasks.atis => Err(task_ended("ATIS", result)),
        result = &mut tasks.sweep => Err(task_ended("sweep", result)),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    tasks.abort();
    read_handle.abort();
    writer_handle.abort();

    if let Err(e) = &outcome {
        error!("{}", e);
    }
    outcome
}
