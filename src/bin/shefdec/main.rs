//! Command-line host for the SHEF pipeline: wires byte streams, the code
//! registry, the decoder and either the emitter or a named loader together.
//!
//! Exit codes: 0 success, 1 configuration error, 2 I/O error, 3 decoding
//! stopped on the error budget, 4 internal failure.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use error_stack::ResultExt;

use shef_rs::emitter::{self, EmitFormat};
use shef_rs::loader::{drive, LoaderContext, LoaderError, LoaderRegistry, LoaderSpec};
use shef_rs::{DecodeOptions, Decoder, ParamRegistry, ShefValue, TimeMode, Tokenizer};

const DESCRIPTION: &str = "\
shefdec reads Standard Hydrometeorologic Exchange Format (SHEF 2.2) text,
expands every .A/.B/.E message into individual dated observations in UTC,
and writes them in one of two fixed-column formats or hands them to a named
loader. The reverse direction composes conforming SHEF text from decoded
values.";

fn main() -> ExitCode {
    let clargs = match Cli::try_parse() {
        Ok(clargs) => clargs,
        Err(e)
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    if clargs.description {
        println!("{DESCRIPTION}");
        return ExitCode::SUCCESS;
    }

    if let Err(e) = init_logging(&clargs) {
        eprintln!("cannot open the log sink: {e}");
        return ExitCode::from(2);
    }

    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| driver(clargs))) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(report)) => {
            log::error!("{report:?}");
            report.current_context().exit_code()
        }
        Err(_) => {
            log::error!("{}", AppError::Internal);
            AppError::Internal.exit_code()
        }
    }
}

/// Decode SHEF text into per-value records, or compose SHEF text back from them
#[derive(Debug, clap::Parser)]
#[command(version)]
struct Cli {
    /// Override the built-in code tables from a SHEFPARM file.
    #[clap(long = "shefparm", conflicts_with = "defaults")]
    shefparm: Option<PathBuf>,

    /// Force the built-in code tables, ignoring any SHEFPARM file.
    #[clap(long)]
    defaults: bool,

    /// Input file (default: standard input).
    #[clap(long = "in")]
    input: Option<PathBuf>,

    /// Output file (default: standard output).
    #[clap(long = "out")]
    out: Option<PathBuf>,

    /// Log file (default: standard error).
    #[clap(long = "log")]
    log: Option<PathBuf>,

    /// Output format: 1 (long, one generously padded line per value) or
    /// 2 (compact, whitespace-separated).
    #[clap(long = "format", default_value_t = 1)]
    format: u8,

    /// Least severe log level to report.
    #[clap(long = "loglevel", value_enum, ignore_case = true, default_value_t = LogLevel::Warning)]
    loglevel: LogLevel,

    /// Dispatch decoded values to a named loader, e.g. `text[2]`.
    #[clap(long = "loader")]
    loader: Option<String>,

    /// The input is previously decoded output (either format); re-parse and
    /// re-emit it instead of running the SHEF grammar.
    #[clap(long = "processed")]
    processed: bool,

    /// Prefix each log line with an ISO-8601 timestamp.
    #[clap(long = "timestamps")]
    timestamps: bool,

    /// Use the legacy time model: fixed zone offset tables and the uniform
    /// US daylight-saving rule of the historical decoder.
    #[clap(long = "shefit_times")]
    shefit_times: bool,

    /// Strict mode: reject every value of a message that contains any error.
    #[clap(long = "reject_problematic")]
    reject_problematic: bool,

    /// Open the output file for append instead of truncating it.
    #[clap(long = "append_out")]
    append_out: bool,

    /// Open the log file for append instead of truncating it.
    #[clap(long = "append_log")]
    append_log: bool,

    /// Ask the named loader to synthesize SHEF text from its store instead
    /// of pushing values into it.
    #[clap(long = "unload", requires = "loader")]
    unload: bool,

    /// Write the active code tables in SHEFPARM form and exit.
    #[clap(long = "make_shefparm")]
    make_shefparm: bool,

    /// Print a short program description and exit.
    #[clap(long = "description")]
    description: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        };
        write!(f, "{name}")
    }
}

impl LogLevel {
    fn filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warning => log::LevelFilter::Warn,
            // the log facade has no level above error
            LogLevel::Error | LogLevel::Critical => log::LevelFilter::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
enum AppError {
    #[error("configuration error")]
    Config,
    #[error("I/O error")]
    Io,
    #[error("decoding stopped: the error budget was exhausted")]
    Budget,
    #[error("internal failure")]
    Internal,
}

impl AppError {
    fn exit_code(&self) -> ExitCode {
        match self {
            AppError::Config => ExitCode::from(1),
            AppError::Io => ExitCode::from(2),
            AppError::Budget => ExitCode::from(3),
            AppError::Internal => ExitCode::from(4),
        }
    }
}

fn init_logging(clargs: &Cli) -> io::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(clargs.loglevel.filter());
    if clargs.timestamps {
        builder.format_timestamp_secs();
    } else {
        builder.format_timestamp(None);
    }
    if let Some(path) = &clargs.log {
        let file = open_for_write(path, clargs.append_log)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn open_for_write(path: &Path, append: bool) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
}

fn open_out(clargs: &Cli) -> error_stack::Result<Box<dyn Write>, AppError> {
    match &clargs.out {
        Some(path) => {
            let file = open_for_write(path, clargs.append_out)
                .change_context_lazy(|| AppError::Io)
                .attach_printable_lazy(|| format!("cannot open {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

fn open_in(clargs: &Cli) -> error_stack::Result<Box<dyn BufRead>, AppError> {
    match &clargs.input {
        Some(path) => {
            let file = File::open(path)
                .change_context_lazy(|| AppError::Io)
                .attach_printable_lazy(|| format!("cannot open {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn build_registry(clargs: &Cli) -> error_stack::Result<ParamRegistry, AppError> {
    let mut registry = ParamRegistry::default();
    if clargs.defaults {
        log::debug!("using the built-in code tables");
    }
    if let Some(path) = &clargs.shefparm {
        let text = std::fs::read_to_string(path)
            .change_context_lazy(|| AppError::Io)
            .attach_printable_lazy(|| format!("cannot read {}", path.display()))?;
        let diags = registry.merge_shefparm(&text);
        log::info!(
            "merged {} from {} ({} entries applied)",
            path.display(),
            diags.len(),
            diags
                .iter()
                .filter(|d| matches!(d.level, shef_rs::registry::OverrideLevel::Applied))
                .count()
        );
    }
    Ok(registry)
}

fn driver(clargs: Cli) -> error_stack::Result<(), AppError> {
    let registry = build_registry(&clargs)?;
    let format = EmitFormat::from_flag(clargs.format).ok_or_else(|| {
        error_stack::Report::new(AppError::Config)
            .attach_printable(format!("--format must be 1 or 2, not {}", clargs.format))
    })?;

    if clargs.make_shefparm {
        let mut out = open_out(&clargs)?;
        out.write_all(registry.emit_shefparm().as_bytes())
            .change_context_lazy(|| AppError::Io)?;
        out.flush().change_context_lazy(|| AppError::Io)?;
        return Ok(());
    }

    if clargs.unload {
        return run_unload(&clargs);
    }

    let options = DecodeOptions {
        strict: clargs.reject_problematic,
        time_mode: if clargs.shefit_times {
            TimeMode::Legacy
        } else {
            TimeMode::Modern
        },
        ..DecodeOptions::default()
    };

    let input = open_in(&clargs)?;
    let (values, budget_hit) = if clargs.processed {
        (reparse_processed(input, &registry)?, false)
    } else {
        decode_stream(input, &registry, options)?
    };

    // deliver what was decoded even when the run is about to stop short
    match &clargs.loader {
        Some(spec) => run_loader(&clargs, spec, values)?,
        None => {
            let mut out = open_out(&clargs)?;
            for v in &values {
                writeln!(out, "{}", emitter::emit(v, format))
                    .change_context_lazy(|| AppError::Io)?;
            }
            out.flush().change_context_lazy(|| AppError::Io)?;
        }
    }

    if budget_hit {
        return Err(AppError::Budget.into());
    }
    Ok(())
}

fn decode_stream(
    input: Box<dyn BufRead>,
    registry: &ParamRegistry,
    options: DecodeOptions,
) -> error_stack::Result<(Vec<ShefValue>, bool), AppError> {
    let mut decoder = Decoder::new(registry, options);
    let mut values = Vec::new();
    let mut budget_hit = false;

    for record in Tokenizer::new(input) {
        let record = record
            .change_context_lazy(|| AppError::Io)
            .attach_printable("failed reading the input stream")?;
        let outcome = decoder.decode_message(&record);
        values.extend(outcome.values);
        if decoder.budget_exhausted() {
            log::error!(
                "stopping after {} recoverable errors; the rest of the input is unread",
                decoder.error_count()
            );
            budget_hit = true;
            break;
        }
    }
    Ok((values, budget_hit))
}

fn reparse_processed(
    input: Box<dyn BufRead>,
    registry: &ParamRegistry,
) -> error_stack::Result<Vec<ShefValue>, AppError> {
    let mut values = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let line = line
            .change_context_lazy(|| AppError::Io)
            .attach_printable("failed reading the input stream")?;
        match emitter::parse_processed_line(&line, idx + 1, registry) {
            Ok(Some(v)) => values.push(v),
            Ok(None) => {}
            Err(e) => log::warn!("{e}"),
        }
    }
    Ok(values)
}

fn run_loader(
    clargs: &Cli,
    spec: &str,
    values: Vec<ShefValue>,
) -> error_stack::Result<(), AppError> {
    let spec: LoaderSpec = spec.parse().map_err(config_report)?;
    let registry = LoaderRegistry::default();
    let ctx = LoaderContext {
        out: open_out(clargs)?,
        append: clargs.append_out,
    };
    let mut loader = registry.create(&spec, ctx).map_err(config_report)?;
    drive(loader.as_mut(), values).map_err(loader_report)?;
    Ok(())
}

fn run_unload(clargs: &Cli) -> error_stack::Result<(), AppError> {
    let spec = clargs
        .loader
        .as_deref()
        .expect("clap enforces --loader with --unload");
    let spec: LoaderSpec = spec.parse().map_err(config_report)?;
    let registry = LoaderRegistry::default();
    let ctx = LoaderContext {
        out: open_out(clargs)?,
        append: clargs.append_out,
    };
    let mut loader = registry.create(&spec, ctx).map_err(config_report)?;
    if !loader.can_unload() {
        return Err(error_stack::Report::new(AppError::Config)
            .attach_printable(format!("loader '{}' does not support --unload", spec.name)));
    }
    loader.unload().map_err(loader_report)?;
    loader.done().map_err(loader_report)?;
    Ok(())
}

fn config_report(e: LoaderError) -> error_stack::Report<AppError> {
    error_stack::Report::new(AppError::Config).attach_printable(e.to_string())
}

fn loader_report(e: LoaderError) -> error_stack::Report<AppError> {
    let kind = match &e {
        LoaderError::Io(_) => AppError::Io,
        LoaderError::UnknownLoader(_) | LoaderError::BadOption(_) => AppError::Config,
        LoaderError::UnloadUnsupported(_) => AppError::Config,
    };
    error_stack::Report::new(kind).attach_printable(e.to_string())
}
