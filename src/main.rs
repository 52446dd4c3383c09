use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use escalafon::cli::{Cli, Command};
use escalafon::clock::SystemClock;
use escalafon::config::EscalafonConfig;
use escalafon::credentials::CredentialCatalog;
use escalafon::faculty::FacultyRoster;
use escalafon::ledger::{LedgerRetryQueue, MemoryLedger};
use escalafon::notify::Notifier;
use escalafon::state_machine::MemoryRequestRepository;
use escalafon::storage::{
    CREDENTIALS_FILE, FACULTY_FILE, LEDGER_FILE, LEDGER_RETRY_FILE, REQUESTS_FILE,
};
use escalafon::ui::Ui;
use escalafon::{ErrorClass, EscalafonError, PromotionService, Stores};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time(),
        )
        .init();

    let ui = Ui::new(cli.json);
    if let Err(e) = run(cli, &ui).await {
        let (class, code) = match e.downcast_ref::<EscalafonError>().map(EscalafonError::class) {
            Some(ErrorClass::Validation) => (ErrorClass::Validation.to_string(), 2),
            Some(ErrorClass::Conflict) => (ErrorClass::Conflict.to_string(), 3),
            Some(ErrorClass::Infrastructure) => (ErrorClass::Infrastructure.to_string(), 1),
            None => ("Error".to_string(), 1),
        };
        eprintln!("{}", ui.render_error(&class, &format!("{e:#}")));
        std::process::exit(code);
    }
}

async fn run(cli: Cli, ui: &Ui) -> Result<()> {
    let mut config = EscalafonConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    let service = open_service(&config)?;

    match cli.command {
        Command::Requirements { rank } => {
            let requirements = service.resolve_requirements(&rank)?;
            ui.emit(&requirements, |ui| ui.render_requirements(&requirements))?;
        }
        Command::Verify { faculty_id, rank } => {
            let rank = match rank {
                Some(rank) => rank,
                None => service.faculty_member(&faculty_id)?.current_rank.name().to_string(),
            };
            let report = service.verify_eligibility(&faculty_id, &rank)?;
            ui.emit(&report, |ui| ui.render_report(&report))?;
        }
        Command::Submit { faculty_id, metadata } => {
            let member = service.faculty_member(&faculty_id)?;
            let rank_from = member.current_rank;
            let rank_to = rank_from.next().ok_or(EscalafonError::TopOfLadder(rank_from))?;
            let request = service
                .submit_request(&faculty_id, rank_from, rank_to, Command::metadata_map(&metadata))
                .await?;
            ui.emit(&request, |ui| ui.render_request(&request))?;
        }
        Command::Decide {
            request_id,
            outcome,
            level,
            reviewer,
            reason,
        } => {
            let request = service
                .decide(&request_id, outcome.into(), level.into(), &reviewer, reason.as_deref())
                .await?;
            ui.emit(&request, |ui| ui.render_request(&request))?;
        }
        Command::Appeal {
            request_id,
            justification,
            by,
        } => {
            let by = match by {
                Some(by) => by,
                None => service.request(&request_id)?.faculty_id,
            };
            let appeal = service.appeal(&request_id, &justification, &by).await?;
            ui.emit(&appeal, |ui| ui.render_request(&appeal))?;
        }
        Command::Finalize { request_id, actor } => {
            let outcome = service.finalize(&request_id, &actor).await?;
            ui.emit(&outcome, |ui| ui.render_finalize(&outcome))?;
        }
        Command::Status { faculty_id } => {
            let requests = service.requests_for(&faculty_id)?;
            ui.emit(&requests, |ui| ui.render_requests(&faculty_id, &requests))?;
        }
        Command::RetryLedger => {
            let report = service.retry_ledger_writes().await?;
            let dead_letters = service.dead_letters()?;
            let ranks = service.retry_rank_updates()?;
            ui.emit(&(&report, &dead_letters, &ranks), |ui| {
                ui.render_drain(&report, &dead_letters, &ranks)
            })?;
        }
    }
    Ok(())
}

/// Wires the JSON-file stores under `config.data_dir` into a service.
fn open_service(config: &EscalafonConfig) -> Result<PromotionService<Notifier>> {
    let dir: &Path = &config.data_dir;
    let roster = Arc::new(FacultyRoster::open(&dir.join(FACULTY_FILE))?);
    let stores = Stores {
        faculty: roster.clone(),
        rank_start: roster.clone(),
        rank_updates: roster,
        credentials: Arc::new(CredentialCatalog::load(&dir.join(CREDENTIALS_FILE))?),
        ledger: Arc::new(MemoryLedger::open(&dir.join(LEDGER_FILE))?),
        retry_queue: Arc::new(LedgerRetryQueue::open(
            &dir.join(LEDGER_RETRY_FILE),
            config.ledger_retry.clone(),
        )?),
        requests: Arc::new(MemoryRequestRepository::open(&dir.join(REQUESTS_FILE))?),
    };
    let notifier = Notifier::from_config(config.notify_url.as_deref(), config.notify_timeout_ms)?;
    Ok(PromotionService::new(stores, notifier, Arc::new(SystemClock), config))
}
