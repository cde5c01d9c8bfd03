use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "linewise", about = "Annotate each line of a Ruby program with the values it produced", version)]
#[command(group(ArgGroup::new("output").args(["clean", "json"]).multiple(false)))]
pub struct Cli {
    /// Program to evaluate. Read from stdin when omitted.
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Seconds before the program is killed (0 waits forever).
    #[arg(short = 't', long, value_parser = clap::value_parser!(f64))]
    pub timeout: Option<f64>,

    /// Keep at most this many results per line.
    #[arg(short = 'n', long = "max-line-captures")]
    pub max_line_captures: Option<usize>,

    /// Library to require before the program. Can be used multiple times.
    #[arg(short = 'r', long = "require", action = clap::ArgAction::Append)]
    pub require: Vec<String>,

    /// Directory to add to the load path. Can be used multiple times.
    #[arg(short = 'I', long = "load-path", action = clap::ArgAction::Append)]
    pub load_path: Vec<PathBuf>,

    /// Source encoding passed to the interpreter (e.g. UTF-8).
    #[arg(short = 'E', long)]
    pub encoding: Option<String>,

    /// File whose contents become the program's standard input.
    #[arg(long = "program-stdin", value_name = "FILE")]
    pub program_stdin: Option<PathBuf>,

    /// Port for the event stream (0 picks a free one).
    #[arg(long)]
    pub port: Option<u16>,

    /// Interpreter executable.
    #[arg(long)]
    pub interpreter: Option<String>,

    /// Annotation alignment: line, chunk or file.
    #[arg(short = 'a', long)]
    pub alignment: Option<String>,

    /// Truncate each annotation to this many characters.
    #[arg(short = 'l', long = "result-length")]
    pub result_length: Option<usize>,

    /// Print the program with previous annotations removed and exit.
    #[arg(short = 'c', long)]
    pub clean: bool,

    /// Print the outcome as JSON instead of the annotated program.
    #[arg(long)]
    pub json: bool,

    /// Log every event to stderr.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
