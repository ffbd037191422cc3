use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use anyhow::{bail, Context};
use bastion_correlation::{
    Correlation, CorrelationEngine, CorrelationError, IncidentStage, Signal, SignalContract,
    ACTION_CONTRADICTION_APPLIED, ACTION_EVIDENCE_ADDED, ACTION_INCIDENT_CREATED,
    ACTION_STAGE_ADVANCED,
};
use bastion_crypto::{InMemoryKeyRegistry, KeyManager, KeyRecord};
use bastion_gate::corruption;
use bastion_gate::{Admission, EventStore, FileEventStore, GateError, IntegrityGate};
use bastion_ledger::{AccessType, CustodyLog, FileLedger, LedgerEntry, LedgerReader, LedgerWriter, NewEntry, OfflineVerifier};
use bastion_types::{Actor, Subject};
use colored::Colorize;
use serde_json::{json, Value};
use tracing::warn;

use crate::cli::*;
use crate::settings::Settings;

pub fn run_command(cli: Cli, settings: &Settings) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Keygen(args) => cmd_keygen(args, settings, format),
        Command::Ingest(args) => cmd_ingest(args, settings, format),
        Command::Verify(args) => cmd_verify(args, settings, format),
        Command::Incidents(args) => cmd_incidents(args, settings, format),
        Command::Scan(args) => cmd_scan(args, settings, format),
        Command::Export(args) => cmd_export(args, settings),
        Command::Custody(args) => cmd_custody(args, settings, format),
    }
}

fn signing_key(settings: &Settings) -> anyhow::Result<KeyRecord> {
    KeyManager::new(&settings.key_dir)
        .get_or_create_keypair()
        .with_context(|| format!("loading signing key from {}", settings.key_dir.display()))
}

fn open_ledger(settings: &Settings) -> anyhow::Result<Arc<FileLedger>> {
    let key = signing_key(settings)?;
    let ledger = FileLedger::open(&settings.ledger_path, key)
        .with_context(|| format!("opening ledger {}", settings.ledger_path.display()))?;
    Ok(Arc::new(ledger))
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// keygen
// ---------------------------------------------------------------------------

fn cmd_keygen(args: KeygenArgs, settings: &Settings, format: OutputFormat) -> anyhow::Result<()> {
    let key_dir = args.key_dir.unwrap_or_else(|| settings.key_dir.clone());
    let manager = KeyManager::new(&key_dir);
    let record = manager
        .get_or_create_keypair()
        .with_context(|| format!("preparing key in {}", key_dir.display()))?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "key_id": record.key_id.to_hex(),
            "public_key": manager.public_path().display().to_string(),
        })),
        OutputFormat::Text => {
            println!("{} Signing key ready", "✓".green().bold());
            println!("  Key id: {}", record.key_id.to_hex().cyan());
            println!("  Public key: {}", manager.public_path().display());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// ingest
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct IngestSummary {
    admitted: u64,
    rejected: BTreeMap<String, u64>,
    failed: u64,
    incidents_created: u64,
    incidents_updated: u64,
}

impl IngestSummary {
    fn to_json(&self) -> Value {
        json!({
            "admitted": self.admitted,
            "rejected": self.rejected,
            "failed": self.failed,
            "incidents_created": self.incidents_created,
            "incidents_updated": self.incidents_updated,
        })
    }
}

fn cmd_ingest(args: IngestArgs, settings: &Settings, format: OutputFormat) -> anyhow::Result<()> {
    let ledger = open_ledger(settings)?;
    let store = FileEventStore::open(&settings.event_store_path)
        .with_context(|| format!("opening event store {}", settings.event_store_path.display()))?;

    // Incidents from earlier runs, rebuilt from their ledger entries and stored events.
    let engine = CorrelationEngine::restore(
        settings.correlation.clone(),
        ledger.clone(),
        &ledger.read_all().context("reading ledger for incident recovery")?,
        |event_id| store.get(event_id).and_then(|e| Signal::from_stored(&e).ok()),
    )?;
    let gate = IntegrityGate::with_default_stages(settings.gate.clone(), Box::new(store), ledger)
        .with_payload_contract(Box::new(SignalContract));

    let input = File::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let summary = ingest_lines(&gate, &engine, BufReader::new(input))
        .with_context(|| format!("ingesting {}", args.input.display()))?;

    match format {
        OutputFormat::Json => print_json(&summary.to_json()),
        OutputFormat::Text => {
            println!("{} Ingested {}", "✓".green().bold(), args.input.display());
            println!("  Admitted: {}", summary.admitted.to_string().green());
            for (reason, count) in &summary.rejected {
                println!("  Rejected {}: {}", reason.yellow(), count);
            }
            if summary.failed > 0 {
                println!("  Failed: {}", summary.failed.to_string().red());
            }
            println!(
                "  Incidents: {} created, {} updated",
                summary.incidents_created, summary.incidents_updated
            );
            for incident in engine.incidents()? {
                println!(
                    "  {} {} {:.1} ({})",
                    incident.incident_id.to_string().dimmed(),
                    stage_colored(incident.stage),
                    incident.confidence,
                    incident.dedup_key
                );
            }
            Ok(())
        }
    }
}

fn stage_colored(stage: IncidentStage) -> colored::ColoredString {
    match stage {
        IncidentStage::Clean => stage.as_str().green(),
        IncidentStage::Suspicious => stage.as_str().yellow(),
        IncidentStage::Probable => stage.as_str().magenta(),
        IncidentStage::Confirmed => stage.as_str().red().bold(),
    }
}

/// Admit and correlate every non-blank line. Signal contract failures are
/// counted; ledger, store and lock failures stop the run.
fn ingest_lines(
    gate: &IntegrityGate,
    engine: &CorrelationEngine,
    input: impl BufRead,
) -> anyhow::Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line.context("reading input")?;
        if line.trim().is_empty() {
            continue;
        }

        let envelope: Value = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(_) => {
                if let Admission::Rejected(r) = gate.admit_line(&line)? {
                    *summary.rejected.entry(r.reason.to_string()).or_default() += 1;
                }
                continue;
            }
        };

        match gate.admit_with(&envelope, |event| engine.correlate_event(event)) {
            Ok(Admission::Accepted { output, .. }) => {
                summary.admitted += 1;
                match output {
                    Correlation::Created { .. } => summary.incidents_created += 1,
                    Correlation::Updated { .. } => summary.incidents_updated += 1,
                    Correlation::Ignored | Correlation::Duplicate { .. } => {}
                }
            }
            Ok(Admission::Rejected(r)) => {
                *summary.rejected.entry(r.reason.to_string()).or_default() += 1;
            }
            Err(GateError::Downstream(e))
                if matches!(
                    e.downcast_ref::<CorrelationError>(),
                    Some(CorrelationError::Signal { .. })
                ) =>
            {
                summary.failed += 1;
                warn!(line = index + 1, error = %e, "event not correlated; nothing stored");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("line {}", index + 1));
            }
        }
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// verify
// ---------------------------------------------------------------------------

fn cmd_verify(args: VerifyArgs, settings: &Settings, format: OutputFormat) -> anyhow::Result<()> {
    let ledger_path = args.ledger.unwrap_or_else(|| settings.ledger_path.clone());
    let key_dir = args.keys.unwrap_or_else(|| settings.key_dir.clone());

    let registry = InMemoryKeyRegistry::load_dir(&key_dir)
        .with_context(|| format!("loading public keys from {}", key_dir.display()))?;
    let reader = FileLedger::open_read_only(&ledger_path);
    let report = OfflineVerifier::new(&registry).verify(&reader)?;

    match format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => {
            let mark = |ok: bool| if ok { "valid".green() } else { "INVALID".red().bold() };
            if report.is_valid() {
                println!("{} Ledger verified", "✓".green().bold());
            } else {
                println!("{} Ledger compromised", "✗".red().bold());
            }
            println!("  Entries: {}/{}", report.verified_entries, report.total_entries);
            println!("  Hash chain: {}", mark(report.hash_chain_valid));
            println!("  Signatures: {}", mark(report.signatures_valid));
            println!("  Key continuity: {}", mark(report.key_continuity_valid));
            if let Some(failure) = &report.first_failure {
                println!(
                    "  First failure: entry {} {:?}: {}",
                    failure.index, failure.kind, failure.detail
                );
            }
            if let Some(bytes) = report.truncated_tail_bytes {
                println!("  {} truncated tail of {bytes} bytes ignored", "note:".yellow());
            }
        }
    }

    if !report.is_valid() {
        bail!("ledger {} failed verification", ledger_path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// incidents
// ---------------------------------------------------------------------------

/// Incident state as reconstructed from ledger entries.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct IncidentSummary {
    pub incident_id: String,
    pub machine_id: String,
    pub dedup_key: String,
    pub stage: IncidentStage,
    pub confidence: f64,
    pub evidence: u64,
    pub contradictions: u64,
}

impl IncidentSummary {
    fn to_json(&self) -> Value {
        json!({
            "incident_id": self.incident_id,
            "machine_id": self.machine_id,
            "dedup_key": self.dedup_key,
            "stage": self.stage,
            "confidence": self.confidence,
            "evidence": self.evidence,
            "contradictions": self.contradictions,
        })
    }
}

fn parse_stage(value: &str) -> Option<IncidentStage> {
    IncidentStage::ALL
        .into_iter()
        .find(|s| s.as_str().eq_ignore_ascii_case(value))
}

/// Fold incident ledger entries into the latest state of each incident.
pub(crate) fn summarize_incidents(entries: &[LedgerEntry]) -> Vec<IncidentSummary> {
    let mut incidents: BTreeMap<String, IncidentSummary> = BTreeMap::new();
    let text = |entry: &LedgerEntry, key: &str| {
        entry
            .payload
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let number = |entry: &LedgerEntry, key: &str| entry.payload.get(key).and_then(Value::as_f64);
    let stage = |entry: &LedgerEntry, key: &str| parse_stage(&text(entry, key));

    for entry in entries {
        let id = entry.subject.id.clone();
        if entry.action_type == ACTION_INCIDENT_CREATED {
            incidents.insert(
                id.clone(),
                IncidentSummary {
                    incident_id: id,
                    machine_id: text(entry, "machine_id"),
                    dedup_key: text(entry, "dedup_key"),
                    stage: stage(entry, "stage").unwrap_or(IncidentStage::Suspicious),
                    confidence: number(entry, "confidence").unwrap_or_default(),
                    evidence: 1,
                    contradictions: 0,
                },
            );
            continue;
        }
        let Some(incident) = incidents.get_mut(&id) else {
            continue;
        };
        match entry.action_type.as_str() {
            ACTION_EVIDENCE_ADDED => {
                incident.evidence += 1;
                if let Some(c) = number(entry, "confidence") {
                    incident.confidence = c;
                }
            }
            ACTION_STAGE_ADVANCED => {
                if let Some(s) = stage(entry, "to_stage") {
                    incident.stage = s;
                }
            }
            ACTION_CONTRADICTION_APPLIED => {
                incident.evidence += 1;
                incident.contradictions += 1;
                if let Some(c) = number(entry, "confidence_after") {
                    incident.confidence = c;
                }
            }
            _ => {}
        }
    }
    incidents.into_values().collect()
}

fn cmd_incidents(args: IncidentsArgs, settings: &Settings, format: OutputFormat) -> anyhow::Result<()> {
    let min_stage = match args.min_stage.as_deref() {
        Some(s) => Some(parse_stage(s).with_context(|| format!("unknown stage {s:?}"))?),
        None => None,
    };
    let entries = FileLedger::open_read_only(&settings.ledger_path).read_all()?;
    let incidents: Vec<IncidentSummary> = summarize_incidents(&entries)
        .into_iter()
        .filter(|i| min_stage.map_or(true, |min| i.stage >= min))
        .collect();

    match format {
        OutputFormat::Json => print_json(&Value::Array(
            incidents.iter().map(IncidentSummary::to_json).collect(),
        )),
        OutputFormat::Text => {
            if incidents.is_empty() {
                println!("No incidents.");
            }
            for i in &incidents {
                println!(
                    "{}  {}  {:>5.1}  {} ({} evidence, {} contradictions)",
                    i.incident_id.dimmed(),
                    stage_colored(i.stage),
                    i.confidence,
                    i.dedup_key.bold(),
                    i.evidence,
                    i.contradictions
                );
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

fn cmd_scan(args: ScanArgs, settings: &Settings, format: OutputFormat) -> anyhow::Result<()> {
    let store = FileEventStore::open(&settings.event_store_path)
        .with_context(|| format!("opening event store {}", settings.event_store_path.display()))?;
    let instances = match args.instance {
        Some(instance) => vec![instance],
        None => store.instances(),
    };

    let reports: Vec<_> = instances
        .iter()
        .map(|instance| corruption::scan(instance, &store.events_for(instance)))
        .collect();

    match format {
        OutputFormat::Json => print_json(&serde_json::to_value(&reports)?)?,
        OutputFormat::Text => {
            for report in &reports {
                if report.is_corrupted() {
                    println!(
                        "{} {} ({} events)",
                        "✗".red().bold(),
                        report.component_instance_id.bold(),
                        report.events_checked
                    );
                    for finding in &report.findings {
                        println!("    {:?} at sequence {}: {}", finding.kind, finding.sequence, finding.detail);
                    }
                } else {
                    println!(
                        "{} {} ({} events)",
                        "✓".green().bold(),
                        report.component_instance_id.bold(),
                        report.events_checked
                    );
                }
            }
        }
    }

    if reports.iter().any(|r| r.is_corrupted()) {
        bail!("corruption detected");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// export / custody
// ---------------------------------------------------------------------------

fn cmd_export(args: ExportArgs, settings: &Settings) -> anyhow::Result<()> {
    let ledger = open_ledger(settings)?;
    let trail: Vec<LedgerEntry> = ledger
        .read_all()?
        .into_iter()
        .filter(|e| e.subject.id == args.artifact)
        .collect();
    if trail.is_empty() {
        bail!("no ledger entries for artifact {:?}", args.artifact);
    }

    let access = ledger.append(
        NewEntry::new(
            "bastion-cli",
            "bastion-cli-0",
            "artifact_exported",
            Subject::new("artifact", args.artifact.clone()),
            Actor::new("user", args.accessed_by.clone()),
        )
        .field("entries", trail.len()),
    )?;
    CustodyLog::open(&settings.custody_path)?.record(
        args.artifact.clone(),
        args.accessed_by.clone(),
        AccessType::Export,
        access.entry_id,
    )?;

    print_json(&serde_json::to_value(&trail)?)
}

fn cmd_custody(args: CustodyArgs, settings: &Settings, format: OutputFormat) -> anyhow::Result<()> {
    let custody = CustodyLog::open(&settings.custody_path)?;
    let ledger = FileLedger::open_read_only(&settings.ledger_path);
    let records = custody.history_with_entries(&args.artifact, &ledger)?;

    match format {
        OutputFormat::Json => print_json(&Value::Array(
            records
                .iter()
                .map(|r| {
                    json!({
                        "access": r.access,
                        "ledger_entry": r.ledger_entry,
                    })
                })
                .collect(),
        )),
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No recorded access to {}.", args.artifact.bold());
            }
            for r in &records {
                let anchored = if r.ledger_entry.is_some() {
                    "anchored".green()
                } else {
                    "missing entry".red()
                };
                println!(
                    "{}  {:<7} {}  {}",
                    bastion_types::time::format_rfc3339(&r.access.accessed_at).dimmed(),
                    r.access.access_type.to_string(),
                    r.access.accessed_by.bold(),
                    anchored
                );
            }
            Ok(())
        }
    }
}
