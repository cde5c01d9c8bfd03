mod cli;
mod printer;

use std::{
    fs,
    io::{self, Read},
    process::ExitCode,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use is_terminal::IsTerminal;
use tracing_subscriber::EnvFilter;

use linewise::{
    annotate::Alignment,
    config::{Config, EvalOptions},
    engine::{Engine, Outcome},
    program::Program,
};
use printer::{JsonReport, TextPrinter};

const EXIT_RAISED: u8 = 1;
const EXIT_FAILED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Cli::parse();

    // Logs go to stderr; stdout carries the program
    let default_filter = if args.debug { "linewise=debug" } else { "linewise=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(io::stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("linewise: {e:#}");
            ExitCode::from(EXIT_FAILED)
        }
    }
}

async fn run(args: cli::Cli) -> Result<ExitCode> {
    // Load config; flags override it
    let cfg = Config::load();
    tracing::debug!(path = %cfg.config_path.display(), "config loaded");
    let mut options = EvalOptions::from_config(&cfg);
    let mut annotate_options = cfg.annotate_options()?;

    if let Some(secs) = args.timeout {
        options.timeout = Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("invalid --timeout {secs}: {e}"))?;
    }
    if args.max_line_captures.is_some() {
        options.max_line_captures = args.max_line_captures;
    }
    options.require_files.extend(args.require.iter().cloned());
    options.load_path_dirs.extend(args.load_path.iter().cloned());
    if args.encoding.is_some() {
        options.encoding = args.encoding.clone();
    }
    if let Some(path) = &args.program_stdin {
        options.stdin = fs::read_to_string(path)
            .with_context(|| format!("reading program stdin: {}", path.display()))?;
    }
    if let Some(port) = args.port {
        options.port = port;
    }
    if let Some(interpreter) = &args.interpreter {
        options.interpreter = interpreter.clone();
    }
    options.debug |= args.debug;
    if let Some(alignment) = &args.alignment {
        annotate_options.alignment = alignment.parse::<Alignment>().map_err(|e| anyhow!(e))?;
    }
    if args.result_length.is_some() {
        annotate_options.max_result_length = args.result_length;
    }
    options.validate()?;

    // Program source: file argument, else piped stdin
    let source = match &args.file {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading program: {}", path.display()))?,
        None => {
            if io::stdin().is_terminal() {
                bail!("no program given: pass a FILE or pipe one on stdin");
            }
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let mut program = Program::new(source);
    if let Some(path) = &args.file {
        program = program.with_filename(path);
    }

    let timeout_secs = options.timeout.as_secs_f64();
    let mut engine = Engine::new(program, options, annotate_options);
    let printer = TextPrinter { color: io::stderr().is_terminal() };

    if args.clean {
        printer.print_body(&engine.cleaned_body());
        return Ok(ExitCode::SUCCESS);
    }

    engine.evaluate().await?;
    let body = engine.annotated_body()?;
    let outcome = engine.outcome()?;

    if args.json {
        JsonReport::new(outcome, &body).print()?;
    } else {
        printer.print_body(&body);
        match outcome {
            Outcome::Success(_) => {}
            Outcome::TimedOut => printer.timed_out(timeout_secs),
            Outcome::UnexpectedException(exit) => printer.unexpected(exit),
            Outcome::SyntaxError(error) => printer.syntax_error(error),
        }
    }

    Ok(match outcome {
        Outcome::Success(result) if result.has_exception() => ExitCode::from(EXIT_RAISED),
        Outcome::Success(_) => ExitCode::SUCCESS,
        _ => ExitCode::from(EXIT_FAILED),
    })
}
