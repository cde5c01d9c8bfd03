use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

use crate::annotate::{Alignment, AnnotateOptions};
use crate::error::{Error, Result};

pub const DEFAULT_FILENAME: &str = "program.rb";
pub const DEFAULT_INTERPRETER: &str = "ruby";

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        // Read linewiserc if exists
        if config_path.exists() {
            match fs::File::open(&config_path) {
                Ok(file) => map.extend(parse_rc(BufReader::new(file))),
                Err(e) => tracing::warn!(path = %config_path.display(), error = %e, "cannot read config file"),
            }
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    /// A config made only of defaults and `pairs`; the environment is ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut inner = default_map();
        inner.extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self { inner, config_path: default_config_path() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).filter(|v| !v.is_empty()).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    /// Seconds, fractional allowed.
    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        self.get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Comma separated list.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default()
    }

    pub fn annotate_options(&self) -> Result<AnnotateOptions> {
        let alignment = match self.get("LINEWISE_ALIGNMENT") {
            Some(v) => v.parse::<Alignment>().map_err(Error::InvalidOption)?,
            None => Alignment::default(),
        };
        Ok(AnnotateOptions {
            alignment,
            max_result_length: self.get_usize("LINEWISE_RESULT_LENGTH"),
            ..Default::default()
        })
    }
}

fn parse_rc(reader: impl BufRead) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in reader.lines().map_while(std::result::Result::ok) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            pairs.push((k.trim().to_string(), v.trim().to_string()));
        }
    }
    pairs
}

fn is_config_key(k: &str) -> bool {
    k.starts_with("LINEWISE_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("linewise").join("linewiserc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("LINEWISE_INTERPRETER".into(), DEFAULT_INTERPRETER.into());
    m.insert("LINEWISE_TIMEOUT".into(), "0".into());
    m.insert("LINEWISE_PORT".into(), "0".into());
    m.insert("LINEWISE_ALIGNMENT".into(), Alignment::default().to_string());
    m.insert("LINEWISE_DEBUG".into(), "false".into());
    m
}

/// How a program is run. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalOptions {
    /// Libraries required after the runtime prelude.
    pub require_files: Vec<String>,
    /// Added to the load path after the temp dir.
    pub load_path_dirs: Vec<PathBuf>,
    /// Zero waits forever.
    pub timeout: Duration,
    /// `None` keeps every capture.
    pub max_line_captures: Option<usize>,
    /// Zero lets the OS pick.
    pub port: u16,
    /// Name the program runs under; only the file name part is used.
    pub filename: PathBuf,
    pub encoding: Option<String>,
    pub stdin: String,
    pub interpreter: String,
    pub debug: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalOptions {
    pub fn new() -> Self {
        Self {
            require_files: Vec::new(),
            load_path_dirs: Vec::new(),
            timeout: Duration::ZERO,
            max_line_captures: None,
            port: 0,
            filename: PathBuf::from(DEFAULT_FILENAME),
            encoding: None,
            stdin: String::new(),
            interpreter: DEFAULT_INTERPRETER.into(),
            debug: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut opts = Self::new();
        opts.require_files = config.get_list("LINEWISE_REQUIRE");
        opts.load_path_dirs = config
            .get("LINEWISE_LOAD_PATH")
            .map(|v| env::split_paths(&v).collect())
            .unwrap_or_default();
        if let Some(timeout) = config.get_duration("LINEWISE_TIMEOUT") {
            opts.timeout = timeout;
        }
        opts.max_line_captures = config.get_usize("LINEWISE_MAX_LINE_CAPTURES");
        if let Some(port) = config.get("LINEWISE_PORT").and_then(|v| v.parse().ok()) {
            opts.port = port;
        }
        if let Some(interpreter) = config.get("LINEWISE_INTERPRETER") {
            opts.interpreter = interpreter;
        }
        opts.encoding = config.get("LINEWISE_ENCODING");
        opts.debug = config.get_bool("LINEWISE_DEBUG");
        opts
    }

    pub fn validate(&self) -> Result<()> {
        if self.interpreter.trim().is_empty() {
            return Err(Error::InvalidOption("interpreter must not be empty".into()));
        }
        if self.filename.file_name().is_none() {
            return Err(Error::InvalidOption(format!(
                "filename '{}' has no file name",
                self.filename.display()
            )));
        }
        if matches!(&self.encoding, Some(e) if e.trim().is_empty()) {
            return Err(Error::InvalidOption("encoding must not be empty".into()));
        }
        if self.require_files.iter().any(|r| r.trim().is_empty()) {
            return Err(Error::InvalidOption("require file names must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc_lines_are_key_value_pairs() {
        let rc = "# comment\n\nLINEWISE_TIMEOUT = 2.5\nbroken line\nLINEWISE_REQUIRE=set, json\n";
        let pairs = parse_rc(rc.as_bytes());
        assert_eq!(
            pairs,
            vec![
                ("LINEWISE_TIMEOUT".to_string(), "2.5".to_string()),
                ("LINEWISE_REQUIRE".to_string(), "set, json".to_string()),
            ]
        );
    }

    #[test]
    fn options_from_config() {
        let config = Config::from_pairs(parse_rc(
            "LINEWISE_TIMEOUT=2.5\nLINEWISE_REQUIRE=set, json\nLINEWISE_MAX_LINE_CAPTURES=10\nLINEWISE_DEBUG=true\n"
                .as_bytes(),
        ));
        let opts = EvalOptions::from_config(&config);
        assert_eq!(opts.timeout, Duration::from_millis(2500));
        assert_eq!(opts.require_files, vec!["set", "json"]);
        assert_eq!(opts.max_line_captures, Some(10));
        assert_eq!(opts.port, 0);
        assert_eq!(opts.interpreter, "ruby");
        assert!(opts.debug);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn defaults_are_unbounded_and_ephemeral() {
        let opts = EvalOptions::from_config(&Config::from_pairs(Vec::<(String, String)>::new()));
        assert_eq!(opts, EvalOptions::new());
        assert!(opts.timeout.is_zero());
        assert_eq!(opts.max_line_captures, None);
        assert_eq!(opts.filename, PathBuf::from("program.rb"));
    }

    #[test]
    fn validation_rejects_bad_options() {
        let opts = EvalOptions { interpreter: " ".into(), ..EvalOptions::new() };
        assert!(matches!(opts.validate(), Err(Error::InvalidOption(_))));
        let opts = EvalOptions { filename: PathBuf::from("/"), ..EvalOptions::new() };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn bad_alignment_is_an_invalid_option() {
        let config = Config::from_pairs([("LINEWISE_ALIGNMENT", "diagonal")]);
        assert!(matches!(config.annotate_options(), Err(Error::InvalidOption(_))));
        let config = Config::from_pairs([("LINEWISE_ALIGNMENT", "file"), ("LINEWISE_RESULT_LENGTH", "40")]);
        let opts = config.annotate_options().unwrap();
        assert_eq!(opts.alignment, Alignment::File);
        assert_eq!(opts.max_result_length, Some(40));
    }
}
