use std::env;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use admissions::collaborators::{DocumentChecklist, SequentialIssuer, SimulatedGateway};
use admissions::csv::{read_requests, read_resources, write_utilization};
use admissions::{Allocator, Config, Ledger, Orchestrator, batch, spawn_sweeper};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [resources_path, requests_path] = args.as_slice() else {
        error!("usage: admissions <resources.csv> <requests.csv>");
        return ExitCode::from(2);
    };

    for path in [resources_path, requests_path] {
        if !path.ends_with(".csv") {
            warn!(path = %path, "input file seems to not be a csv file");
        }
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::from(2);
        }
    };

    let ledger = Arc::new(Ledger::new(config.hold_ttl));
    let resources = match read_resources(resources_path) {
        Ok(rows) => rows,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    for row in resources {
        match row {
            Ok((resource, capacity)) => {
                if let Err(e) = ledger.register(resource, capacity) {
                    warn!("{e}");
                }
            }
            Err(e) => warn!("{e}"),
        }
    }

    // owned path: the reader moves onto its own task
    let requests = match read_requests(requests_path.clone()) {
        Ok(rows) => rows,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let sweeper = spawn_sweeper(Arc::clone(&ledger), config.sweep_interval);

    let mut orchestrator = Orchestrator::new(
        Arc::new(Allocator::new(Arc::clone(&ledger))),
        Arc::new(DocumentChecklist::default()),
        Arc::new(SimulatedGateway::default()),
        Arc::new(SequentialIssuer::new()),
    );
    if let Some(timeout) = config.step_timeout {
        orchestrator = orchestrator.with_step_timeout(timeout);
    }

    let (request_sender, request_receiver) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        for result in requests {
            match result {
                Ok(request) => {
                    if request_sender.send(request).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    let summary = batch::run(
        &orchestrator,
        ReceiverStream::new(request_receiver),
        config.max_in_flight,
    )
    .await;
    sweeper.abort();
    info!(?summary, "batch finished");

    if let Err(e) = write_utilization(io::stdout().lock(), &ledger.resources()) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
