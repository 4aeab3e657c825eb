//! Run configuration, read from an INI file.
//!
//! All settings live in a `[GRAPH]` section:
//!
//! ```ini
//! [GRAPH]
//! SEED = 42
//! NUM_NODES = 19
//! NUM_TRANSFORMER_NODES = 14
//! EDGE_FILE = graphs/14bus.txt
//! NODE_WEIGHTS_FILE = weights/14bus.txt
//! WRITE_FILE = games/14bus.game
//! ```
//!
//! Keys are case-insensitive. Relative paths are resolved against the
//! directory containing the configuration file.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex_lite::Regex;
use rustc_hash::FxHashMap;

use crate::enumerate::Policy;
use crate::error::{Error, ParseError, ParseErrorKind, Result};
use crate::graph::Roles;

const SECTION: &str = "graph";

/// Which nodes may host a sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SensorSites {
    /// Only nodes beyond the target range.
    #[default]
    Candidates,
    /// Every node, including targets.
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub seed: u64,
    pub num_nodes: u32,
    pub num_targets: u32,
    pub edge_file: PathBuf,
    pub weights_file: PathBuf,
    pub write_file: PathBuf,
    pub policy: Policy,
    pub sites: SensorSites,
    /// Time budget for a single solver call.
    pub timeout: Option<Duration>,
    pub timeout_retries: u32,
    /// Draw fresh weights and write them to `weights_file` instead of reading it.
    pub generate_weights: bool,
    /// Subtract a random cost from the attacker's payoffs.
    pub attacker_cost: bool,
    pub threads: usize,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let base = path.parent().unwrap_or(Path::new(""));
        Self::parse(&text, base)
    }

    /// Parse configuration text, resolving relative paths against `base`.
    pub fn parse(text: &str, base: &Path) -> Result<Self> {
        let values = parse_ini(text)?;
        let section = values.get(SECTION)
            .ok_or_else(|| Error::Config("missing [GRAPH] section".to_string()))?;
        let entries = Entries { section };

        let path = |key: &str| -> Result<PathBuf> {
            let raw = PathBuf::from(entries.required::<String>(key)?);
            Ok(if raw.is_relative() { base.join(raw) } else { raw })
        };

        let num_nodes = entries.required("num_nodes")?;
        let num_targets = entries.required("num_transformer_nodes")?;
        if num_targets > num_nodes {
            return Err(Error::Config(format!(
                "NUM_TRANSFORMER_NODES ({num_targets}) exceeds NUM_NODES ({num_nodes})")));
        }

        let policy = match entries.optional::<String>("policy")?.as_deref() {
            None | Some("disjoint") => Policy::DisjointAlternate,
            Some("pure") => Policy::PureAlternate,
            Some("simultaneous") => Policy::SimultaneousK {
                max_replicas: entries.optional("max_replicas")?,
            },
            Some(other) => return Err(Error::Config(format!("unknown POLICY `{other}`"))),
        };
        let sites = match entries.optional::<String>("sites")?.as_deref() {
            None | Some("candidates") => SensorSites::Candidates,
            Some("all") => SensorSites::All,
            Some(other) => return Err(Error::Config(format!("unknown SITES `{other}`"))),
        };

        Ok(Config {
            seed: entries.optional("seed")?.unwrap_or(0),
            num_nodes,
            num_targets,
            edge_file: path("edge_file")?,
            weights_file: path("node_weights_file")?,
            write_file: path("write_file")?,
            policy,
            sites,
            timeout: entries.optional("timeout_secs")?
                .map(|secs: f64| if secs.is_finite() && secs >= 0.0 {
                    Ok(Duration::from_secs_f64(secs))
                } else {
                    Err(Error::Config(format!("invalid TIMEOUT_SECS {secs}")))
                })
                .transpose()?,
            timeout_retries: entries.optional("timeout_retries")?.unwrap_or(0),
            generate_weights: entries.optional_bool("generate_weights")?.unwrap_or(true),
            attacker_cost: entries.optional_bool("attacker_cost")?.unwrap_or(false),
            threads: entries.optional("threads")?.unwrap_or(1).max(1),
        })
    }

    /// Node roles following the numbering convention and the `SITES` setting.
    pub fn roles(&self) -> Roles {
        let roles = Roles::by_convention(self.num_nodes, self.num_targets);
        match self.sites {
            SensorSites::Candidates => roles,
            SensorSites::All => roles.all_placeable(),
        }
    }
}

struct Entries<'a> {
    section: &'a FxHashMap<String, String>,
}

impl Entries<'_> {
    fn optional<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        self.section.get(key)
            .map(|raw| raw.parse().map_err(|_| Error::Config(
                format!("invalid value `{raw}` for {}", key.to_uppercase()))))
            .transpose()
    }

    fn required<T: FromStr>(&self, key: &str) -> Result<T> {
        self.optional(key)?
            .ok_or_else(|| Error::Config(format!("missing key {}", key.to_uppercase())))
    }

    fn optional_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.optional::<String>(key)?.map(|v| v.to_lowercase()).as_deref() {
            None => Ok(None),
            Some("1" | "true" | "yes" | "on") => Ok(Some(true)),
            Some("0" | "false" | "no" | "off") => Ok(Some(false)),
            Some(other) => Err(Error::Config(
                format!("invalid boolean `{other}` for {}", key.to_uppercase()))),
        }
    }
}

// Section name => key => value, with section names and keys lowercased.
fn parse_ini(text: &str) -> std::result::Result<FxHashMap<String, FxHashMap<String, String>>, ParseError> {
    let (section_re, entry_re) = {
        static ONCE: OnceLock<(Regex, Regex)> = OnceLock::new();
        ONCE.get_or_init(|| (
            Regex::new(r"^\[\s*(?P<name>[^\]]+?)\s*\]$").expect("Static regex"),
            Regex::new(r"^(?P<key>[A-Za-z_][A-Za-z0-9_.]*)\s*[=:]\s*(?P<value>.*?)$")
                .expect("Static regex"),
        ))
    };

    let mut sections: FxHashMap<String, FxHashMap<String, String>> = FxHashMap::default();
    let mut current: Option<String> = None;
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(caps) = section_re.captures(line) {
            let name = caps["name"].to_lowercase();
            sections.entry(name.clone()).or_default();
            current = Some(name);
        } else if let Some(caps) = entry_re.captures(line) {
            let section = current.as_ref().ok_or_else(|| ParseError::new(i + 1,
                ParseErrorKind::Syntax("key outside of any section".to_string())))?;
            sections.entry(section.clone())
                .or_default()
                .insert(caps["key"].to_lowercase(), caps["value"].to_string());
        } else {
            return Err(ParseError::new(i + 1,
                ParseErrorKind::Syntax(format!("can not parse `{line}`"))));
        }
    }
    Ok(sections)
}
