//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use signature_warden::core::config::Config;
use signature_warden::core::errors::SwdError;
use signature_warden::logger::dual::{ActivityLoggerHandle, DualLoggerConfig, spawn_logger};
use signature_warden::remediation::engine::RemediationReport;
use signature_warden::scanner::engine::ScanReport;
use signature_warden::store::sqlite::SqliteStore;
use signature_warden::store::{Finding, FindingId, FindingStatus};
use signature_warden::warden::Warden;

/// Signature Warden: byte-signature scanner with a remediation ledger.
#[derive(Debug, Parser)]
#[command(
    name = "swd",
    author,
    version,
    about = "Signature Warden - local byte-signature scanner and remediator",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scan one or more trees and record signature matches.
    Scan(ScanArgs),
    /// Apply delete, heal and quarantine decisions from the ledger.
    Remediate(RemediateArgs),
    /// Set the status of a finding.
    Mark(MarkArgs),
    /// List recorded findings.
    List(ListArgs),
    /// Show finding counts per status.
    Stats,
    /// Manage the signature set.
    Signature(SignatureArgs),
    /// Inspect the quarantine vault.
    Quarantine(QuarantineArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Roots to scan. Defaults to the configured root paths.
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct RemediateArgs {
    /// Report what would happen without touching files or the ledger.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args)]
struct MarkArgs {
    /// Finding identifier.
    #[arg(value_name = "ID")]
    id: i64,
    /// New status: undetermined, delete, heal, quarantine, allow (or 0-4).
    #[arg(value_name = "STATUS")]
    status: FindingStatus,
}

#[derive(Debug, Clone, Args)]
struct ListArgs {
    /// Only list findings with this status.
    #[arg(long, value_name = "STATUS")]
    status: Option<FindingStatus>,
}

#[derive(Debug, Clone, Args)]
struct SignatureArgs {
    #[command(subcommand)]
    command: SignatureCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum SignatureCommand {
    /// Add a signature from hex or from a file's raw bytes.
    Add(SignatureAddArgs),
    /// List stored signatures.
    List,
}

#[derive(Debug, Clone, Args)]
#[command(group(
    ArgGroup::new("signature_source")
        .required(true)
        .args(["hex", "file"])
))]
struct SignatureAddArgs {
    /// Signature bytes as hex.
    #[arg(value_name = "HEX", conflicts_with = "file")]
    hex: Option<String>,
    /// Read signature bytes from a file.
    #[arg(long, value_name = "FILE", conflicts_with = "hex")]
    file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct QuarantineArgs {
    #[command(subcommand)]
    command: QuarantineCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum QuarantineCommand {
    /// List quarantine records.
    List,
    /// Write the de-obfuscated contents of a quarantined file.
    Reveal(RevealArgs),
}

#[derive(Debug, Clone, Args)]
struct RevealArgs {
    /// Content address of the quarantined file.
    #[arg(value_name = "ADDRESS")]
    address: String,
    /// Destination file. Must not already exist.
    #[arg(long, short, value_name = "FILE")]
    output: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Target shell.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Args)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<SwdError> for CliError {
    fn from(err: SwdError) -> Self {
        match err {
            SwdError::InvalidConfig { .. }
            | SwdError::MissingConfig { .. }
            | SwdError::ConfigParse { .. }
            | SwdError::InvalidSignature { .. }
            | SwdError::NonUtf8Path { .. }
            | SwdError::NotFound { .. }
            | SwdError::DuplicateRecord { .. } => Self::User(err.to_string()),
            SwdError::InvalidStatus { .. } | SwdError::Serialization { .. } => {
                Self::Internal(err.to_string())
            }
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Remediate(args) => run_remediate(cli, args),
        Command::Mark(args) => run_mark(cli, args),
        Command::List(args) => run_list(cli, args),
        Command::Stats => run_stats(cli),
        Command::Signature(args) => run_signature(cli, args),
        Command::Quarantine(args) => run_quarantine(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
        Command::Version(args) => emit_version(cli, args),
    }
}

// ──────────────────── session ────────────────────

/// An opened store plus the activity logger, torn down in order on drop.
struct Session {
    warden: Warden<SqliteStore>,
    logger: Option<(ActivityLoggerHandle, JoinHandle<()>)>,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self, CliError> {
        let config = Config::load(cli.config.as_deref())?;
        Self::with_config(config)
    }

    fn with_config(config: Config) -> Result<Self, CliError> {
        let store = SqliteStore::open(&config.paths.database)?;
        let logger = if config.logging.enabled {
            match spawn_logger(DualLoggerConfig::from_config(&config)) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    eprintln!("[SWD-CLI] activity logging disabled: {e}");
                    None
                }
            }
        } else {
            None
        };
        let handle = logger.as_ref().map(|(handle, _)| handle.clone());
        Ok(Self {
            warden: Warden::new(store, config, handle),
            logger,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some((handle, join)) = self.logger.take() {
            handle.shutdown();
            let _ = join.join();
        }
    }
}

// ──────────────────── scan ────────────────────

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let session = Session::open(cli)?;
    let warden = &session.warden;

    let reports = if args.paths.is_empty() {
        warden.scan_configured_roots()?
    } else {
        args.paths
            .iter()
            .map(|root| warden.scan(root))
            .collect::<Result<Vec<_>, _>>()?
    };

    match output_mode(cli) {
        OutputMode::Human => {
            for report in &reports {
                print_scan_report(report);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "reports": serde_json::to_value(&reports)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_scan_report(report: &ScanReport) {
    println!("Scan of {}", report.root.display());
    println!(
        "  Files scanned: {} against {} signature(s) in {:.1}s",
        report.files_scanned,
        report.signatures,
        report.duration.as_secs_f64()
    );
    if report.findings.is_empty() {
        println!("  No new findings.");
    } else {
        println!("  New findings: {}", report.findings.len().to_string().red());
        println!("  {:>6}  {:>12}  {:>5}  Path", "ID", "Offset", "Len");
        for finding in &report.findings {
            println!(
                "  {:>6}  {:>12}  {:>5}  {}",
                finding.id,
                finding.offset,
                finding.signature_len,
                finding.path.display()
            );
        }
    }
    if report.already_recorded > 0 {
        println!("  Already in ledger: {}", report.already_recorded);
    }
    if !report.errors.is_empty() {
        println!("  Errors: {}", report.errors.len().to_string().yellow());
        for err in &report.errors {
            println!("    [{}] {}: {}", err.error_code, err.path.display(), err.error);
        }
    }
}

// ──────────────────── remediate ────────────────────

fn run_remediate(cli: &Cli, args: &RemediateArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if args.dry_run {
        config.remediation.dry_run = true;
    }
    let session = Session::with_config(config)?;
    let report = session.warden.run_remediation()?;

    match output_mode(cli) {
        OutputMode::Human => print_remediation_report(&report),
        OutputMode::Json => {
            let payload = json!({
                "command": "remediate",
                "report": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }

    if report.failed() > 0 {
        return Err(CliError::Partial(format!(
            "{} finding(s) could not be remediated and remain in the ledger",
            report.failed()
        )));
    }
    Ok(())
}

fn print_remediation_report(report: &RemediationReport) {
    if report.dry_run {
        println!("Remediation (dry run, nothing changed)");
    } else {
        println!("Remediation");
    }
    println!("  Deleted: {}", report.deleted);
    println!("  Healed: {}", report.healed);
    println!("  Quarantined: {}", report.quarantined);
    for outcome in &report.outcomes {
        let suffix = outcome
            .content_address
            .as_deref()
            .map(|address| format!(" -> {address}"))
            .unwrap_or_default();
        println!(
            "    #{} {} {}{suffix}",
            outcome.finding_id,
            outcome.action.label().green(),
            outcome.path.display()
        );
    }
    if report.failed() > 0 {
        println!("  Failed: {}", report.failed().to_string().red());
        for err in &report.errors {
            println!(
                "    #{} {} [{}] {}: {}",
                err.finding_id,
                err.action.label(),
                err.error_code,
                err.path.display(),
                err.error
            );
        }
    }
}

// ──────────────────── ledger ────────────────────

fn run_mark(cli: &Cli, args: &MarkArgs) -> Result<(), CliError> {
    let session = Session::open(cli)?;
    let id = FindingId(args.id);
    let previous = session.warden.find_finding(id)?.status;
    session.warden.set_status(id, args.status)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Finding #{id}: {previous} -> {}", args.status);
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "mark",
                "finding_id": id,
                "from": previous.label(),
                "to": args.status.label(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_list(cli: &Cli, args: &ListArgs) -> Result<(), CliError> {
    let session = Session::open(cli)?;
    let findings = match args.status {
        Some(status) => session.warden.list_findings(status)?,
        None => session.warden.list_all_findings()?,
    };

    match output_mode(cli) {
        OutputMode::Human => {
            if findings.is_empty() {
                println!("No findings.");
                return Ok(());
            }
            println!(
                "  {:>6}  {:<12}  {:>12}  {:<24}  Path",
                "ID", "Status", "Offset", "Signature"
            );
            println!("  {}", "-".repeat(80));
            for finding in &findings {
                println!(
                    "  {:>6}  {:<12}  {:>12}  {:<24}  {}",
                    finding.id,
                    colored_status(finding.status),
                    finding.offset,
                    truncate_hex(&finding.signature, 24),
                    finding.path.display()
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "list",
                "status": args.status.map(FindingStatus::label),
                "findings": findings.iter().map(finding_json).collect::<Vec<_>>(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_stats(cli: &Cli) -> Result<(), CliError> {
    let session = Session::open(cli)?;
    let counts = session.warden.status_counts()?;
    let signatures = session.warden.list_signatures()?.len();
    let quarantined = session.warden.list_quarantine()?.len();

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Signatures: {signatures}");
            println!("Findings: {}", counts.total());
            for status in FindingStatus::ALL {
                println!("  {:<12} {}", status.label(), counts.get(status));
            }
            println!("Quarantined files: {quarantined}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "stats",
                "signatures": signatures,
                "findings": serde_json::to_value(counts)?,
                "total_findings": counts.total(),
                "quarantined": quarantined,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── signatures ────────────────────

fn run_signature(cli: &Cli, args: &SignatureArgs) -> Result<(), CliError> {
    match &args.command {
        SignatureCommand::Add(add) => {
            let bytes = signature_bytes(add)?;
            let session = Session::open(cli)?;
            let inserted = session.warden.add_signature(&bytes)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    if inserted {
                        println!("Added signature ({} bytes).", bytes.len());
                    } else {
                        println!("Signature already present.");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "signature add",
                        "inserted": inserted,
                        "len": bytes.len(),
                        "hex": hex::encode(&bytes),
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        SignatureCommand::List => {
            let session = Session::open(cli)?;
            let signatures = session.warden.list_signatures()?;

            match output_mode(cli) {
                OutputMode::Human => {
                    if signatures.is_empty() {
                        println!("No signatures.");
                    }
                    for sig in &signatures {
                        println!("  {:>6}  {:>5}  {}", sig.id, sig.len(), hex::encode(&sig.bytes));
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "signature list",
                        "signatures": signatures
                            .iter()
                            .map(|sig| json!({
                                "id": sig.id,
                                "len": sig.len(),
                                "hex": hex::encode(&sig.bytes),
                            }))
                            .collect::<Vec<_>>(),
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

fn signature_bytes(args: &SignatureAddArgs) -> Result<Vec<u8>, CliError> {
    if let Some(raw) = &args.hex {
        let cleaned: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let cleaned = cleaned
            .strip_prefix("0x")
            .or_else(|| cleaned.strip_prefix("0X"))
            .unwrap_or(&cleaned);
        return hex::decode(cleaned).map_err(|e| CliError::User(format!("invalid hex signature: {e}")));
    }
    match &args.file {
        Some(path) => std::fs::read(path)
            .map_err(|e| CliError::User(format!("cannot read {}: {e}", path.display()))),
        None => Err(CliError::User("specify HEX or --file".to_string())),
    }
}

// ──────────────────── quarantine ────────────────────

fn run_quarantine(cli: &Cli, args: &QuarantineArgs) -> Result<(), CliError> {
    let session = Session::open(cli)?;
    match &args.command {
        QuarantineCommand::List => {
            let records = session.warden.list_quarantine()?;
            match output_mode(cli) {
                OutputMode::Human => {
                    if records.is_empty() {
                        println!("Quarantine is empty.");
                    }
                    for record in &records {
                        println!("  {}  {}", record.content_address, record.original_path);
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "quarantine list",
                        "vault": session.warden.config().quarantine.dir.to_string_lossy(),
                        "records": serde_json::to_value(&records)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        QuarantineCommand::Reveal(reveal) => {
            let bytes = session.warden.reveal_quarantined(&reveal.address)?;
            write_new_file(&reveal.output, &bytes)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    println!(
                        "Wrote {} bytes to {}",
                        bytes.len(),
                        reveal.output.display()
                    );
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "quarantine reveal",
                        "address": reveal.address,
                        "output": reveal.output.to_string_lossy(),
                        "size": bytes.len(),
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

fn write_new_file(path: &Path, bytes: &[u8]) -> Result<(), CliError> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => {
                CliError::User(format!("{} already exists", path.display()))
            }
            _ => CliError::Runtime(format!("cannot create {}: {e}", path.display())),
        })?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;
            let hash = config.stable_hash()?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("# hash: {hash}");
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "hash": hash,
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

// ──────────────────── output helpers ────────────────────

fn finding_json(finding: &Finding) -> Value {
    json!({
        "id": finding.id,
        "path": finding.path.to_string_lossy(),
        "offset": finding.offset,
        "signature": hex::encode(&finding.signature),
        "status": finding.status.label(),
        "status_code": finding.status.code(),
    })
}

fn colored_status(status: FindingStatus) -> colored::ColoredString {
    let label = status.label();
    match status {
        FindingStatus::Undetermined => label.yellow(),
        FindingStatus::Delete | FindingStatus::Quarantine => label.red(),
        FindingStatus::Heal => label.cyan(),
        FindingStatus::Allow => label.green(),
    }
}

fn truncate_hex(bytes: &[u8], max_len: usize) -> String {
    let encoded = hex::encode(bytes);
    if encoded.len() <= max_len {
        encoded
    } else {
        format!("{}...", &encoded[..max_len - 3])
    }
}

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");
    let git_sha = option_env!("GIT_SHA").unwrap_or("unknown");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("swd {version}");
            if args.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
                println!("git_sha: {git_sha}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "binary": "swd",
                "version": version,
                "package": package,
                "build": {
                    "target": target,
                    "profile": profile,
                    "git_sha": git_sha,
                }
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("SWD_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
