//! John the Ripper dictionary attacks.
//!
//! Progress comes from the status line John prints with `--progress-every`
//! (jumbo builds). Cracked passwords are read from the job's own pot file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde_json::json;
use uuid::Uuid;

use crate::config::{JohnConfig, ToolsConfig};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::tasker::throughput::{SpeedUnit, Throughput};
use crate::tasker::{ProcessTasker, Tasker, ToolProcess, Tooler};
use crate::tool::{Tool, REQUIREMENT_CPU};

pub const KIND: &str = "johndict";

const HASHES_FILE: &str = "hashes.txt";
const CUSTOM_DICT_FILE: &str = "custom-dict.txt";
const PROGRESS_EVERY_SECS: u32 = 10;

/// `2g 0:00:01:12 45.12% (ETA: 12:30:05) 0.02g/s 1530p/s 1530c/s 4590C/s abc..xyz`
///
/// Percentage and ETA are missing while John cannot estimate them.
static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+)g \d+:\d+:\d+:\d+\s+(?:(\d+(?:\.\d+)?)%\s+(?:\(ETA: ([^)]+)\)\s+)?)?[\d.]+g/s\s+[\d.]+[KMG]?p/s\s+[\d.]+[KMG]?c/s\s+([\d.]+)([KMG]?)C/s",
    )
    .expect("valid regex")
});

pub struct JohnTooler {
    tool: Tool,
    config: JohnConfig,
    work_dir: PathBuf,
    stop_grace: Duration,
}

impl JohnTooler {
    pub fn new(config: JohnConfig, work_dir: PathBuf, stop_grace: Duration) -> Self {
        let parameters = json!({
            "schema": {
                "type": "object",
                "title": "John the Ripper Dictionary Attack",
                "properties": {
                    "algorithm": { "type": "string", "enum": config.formats },
                    "dictionaries": { "type": "string", "enum": config.dictionaries.keys().collect::<Vec<_>>() },
                    "rules": { "type": "string", "enum": config.rules },
                    "customdictadd": { "type": "string" },
                    "hashes": { "type": "string" }
                },
                "required": ["algorithm", "dictionaries", "hashes"]
            },
            "form": ["algorithm", "dictionaries", "rules",
                     { "key": "customdictadd", "type": "textarea" },
                     { "key": "hashes", "type": "textarea", "placeholder": "One hash per line, or user:hash" }]
        });
        let version = if config.version.is_empty() {
            "unknown".to_string()
        } else {
            config.version.clone()
        };
        Self {
            tool: Tool {
                id: Uuid::new_v4(),
                name: "John the Ripper".to_string(),
                kind: "Dictionary".to_string(),
                version,
                requirement: REQUIREMENT_CPU.to_string(),
                parameters: parameters.to_string(),
            },
            config,
            work_dir,
            stop_grace,
        }
    }

    pub fn factory(config: &ToolsConfig) -> Result<Option<Arc<dyn Tooler>>> {
        let Some(john) = config.john.clone() else {
            return Ok(None);
        };
        if !john.binary.exists() {
            return Err(Error::Config(format!(
                "john binary not found: {}",
                john.binary.display()
            )));
        }
        Ok(Some(Arc::new(JohnTooler::new(
            john,
            config.work_dir.clone(),
            config.stop_grace(),
        ))))
    }
}

impl Tooler for JohnTooler {
    fn tool(&self) -> &Tool {
        &self.tool
    }

    fn new_task(&self, mut job: Job) -> Result<Box<dyn Tasker>> {
        let format = job
            .parameter("algorithm")
            .ok_or_else(|| Error::InvalidParameter("algorithm is required".into()))?;
        if !self.config.formats.is_empty() && !self.config.formats.iter().any(|f| f == format) {
            return Err(Error::InvalidParameter(format!(
                "unknown hash format '{}'",
                format
            )));
        }

        let dict_name = job
            .parameter("dictionaries")
            .ok_or_else(|| Error::InvalidParameter("dictionaries is required".into()))?;
        let dictionary = self
            .config
            .dictionaries
            .get(dict_name)
            .ok_or_else(|| {
                Error::InvalidParameter(format!("unknown dictionary '{}'", dict_name))
            })?
            .clone();

        let rules = job.parameter("rules");
        if let Some(rules) = rules {
            if !self.config.rules.iter().any(|r| r == rules) {
                return Err(Error::InvalidParameter(format!(
                    "unknown rule section '{}'",
                    rules
                )));
            }
        }

        let hashes: Vec<&str> = job
            .parameter("hashes")
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if hashes.is_empty() {
            return Err(Error::InvalidParameter("hashes is required".into()));
        }
        let total = hashes.len() as i64;

        let wd = self.work_dir.join(job.id.to_string());
        std::fs::create_dir_all(&wd)?;
        std::fs::write(wd.join(HASHES_FILE), hashes.join("\n") + "\n")?;

        // John reads a single wordlist, so custom words go in front of a copy.
        let wordlist = match job.parameter("customdictadd") {
            Some(custom) => {
                let mut words = custom.trim_end().to_string();
                words.push('\n');
                words.push_str(&std::fs::read_to_string(&dictionary)?);
                std::fs::write(wd.join(CUSTOM_DICT_FILE), words)?;
                wd.join(CUSTOM_DICT_FILE)
            }
            None => dictionary,
        };

        let mut args = vec![
            format!("--format={}", format),
            format!("--wordlist={}", wordlist.display()),
            format!("--progress-every={}", PROGRESS_EVERY_SECS),
        ];
        if let Some(rules) = rules {
            args.push(format!("--rules={}", rules));
        }
        args.extend(self.config.extra_args.iter().cloned());
        args.push(wd.join(HASHES_FILE).display().to_string());

        job.total_hashes = total;
        job.output_titles = vec!["Hash".to_string(), "Plaintext".to_string()];

        let process = JohnProcess {
            binary: self.config.binary.clone(),
            session: job.id.to_string(),
            wd,
            args,
            throughput: Throughput::new(),
        };
        Ok(Box::new(ProcessTasker::new(job, process, self.stop_grace)))
    }
}

pub struct JohnProcess {
    binary: PathBuf,
    session: String,
    wd: PathBuf,
    args: Vec<String>,
    throughput: Throughput,
}

impl JohnProcess {
    fn session_path(&self) -> PathBuf {
        self.wd.join(&self.session)
    }

    fn pot_file(&self) -> PathBuf {
        self.wd.join(format!("{}.pot", self.session))
    }
}

impl ToolProcess for JohnProcess {
    fn program(&self) -> &Path {
        &self.binary
    }

    fn working_dir(&self) -> &Path {
        &self.wd
    }

    fn start_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--session={}", self.session_path().display()),
            format!("--pot={}", self.pot_file().display()),
        ];
        args.extend(self.args.iter().cloned());
        args
    }

    /// The pot file is not part of the saved session, so it is named again.
    fn resume_args(&self) -> Option<Vec<String>> {
        let session = self.session_path();
        if !session.with_extension("rec").exists() {
            return None;
        }
        Some(vec![
            format!("--restore={}", session.display()),
            format!("--pot={}", self.pot_file().display()),
        ])
    }

    fn parse_output(&mut self, job: &mut Job, stdout: &str, stderr: &str) {
        // John writes its status lines to stderr in some builds.
        let status = parse_status(stdout).or_else(|| parse_status(stderr));
        match status {
            Some(status) => {
                job.cracked_hashes = job.cracked_hashes.max(status.guesses);
                if let Some(progress) = status.progress {
                    job.progress = progress;
                }
                if let Some(eta) = status.eta {
                    job.etc = eta;
                }
                self.throughput.record(job, status.speed, status.unit);
            }
            None if !stdout.trim().is_empty() => {
                tracing::debug!(job_id = %job.id, "No john status line in output");
            }
            None => {}
        }

        let errors: Vec<&str> = stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !STATUS_LINE.is_match(line))
            .collect();
        if !errors.is_empty() {
            job.error = Some(errors.join("\n"));
        }
    }

    fn collect_results(&mut self, job: &mut Job) {
        let Ok(pot) = std::fs::read_to_string(self.pot_file()) else {
            return;
        };
        let Ok(hashes) = std::fs::read_to_string(self.wd.join(HASHES_FILE)) else {
            return;
        };
        job.output = match_pot(&hashes, &pot);
        job.cracked_hashes = job.cracked_hashes.max(job.output.len() as i64);
    }
}

/// Values from the last status line in a stretch of output.
#[derive(Debug, PartialEq)]
pub struct StatusLine {
    pub guesses: i64,
    pub progress: Option<f64>,
    pub eta: Option<String>,
    pub speed: f64,
    pub unit: SpeedUnit,
}

pub fn parse_status(output: &str) -> Option<StatusLine> {
    let caps = STATUS_LINE.captures_iter(output).last()?;
    // John's candidate rate (C/s) is recorded on the H/s scale.
    let unit = match &caps[5] {
        "K" => SpeedUnit::KHs,
        "M" => SpeedUnit::MHs,
        "G" => SpeedUnit::GHs,
        _ => SpeedUnit::Hs,
    };
    Some(StatusLine {
        guesses: caps[1].parse().ok()?,
        progress: caps.get(2).and_then(|m| m.as_str().parse().ok()),
        eta: caps.get(3).map(|m| m.as_str().to_string()),
        speed: caps[4].parse().ok()?,
        unit,
    })
}

/// Rows of `[hash, plaintext]` for every submitted hash found in the pot.
///
/// Submitted lines may be `user:hash`; pot entries may carry a `$format$`
/// prefix. Hashes compare case-insensitively.
pub fn match_pot(hashes: &str, pot: &str) -> Vec<Vec<String>> {
    let pot: Vec<(&str, String)> = pot
        .lines()
        .map(|entry| (entry, entry.to_ascii_lowercase()))
        .collect();
    let mut rows = Vec::new();
    for line in hashes.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let hash = match line.split(':').nth(1) {
            Some(field) if !field.is_empty() => field,
            _ => line,
        };
        let needle = format!("{}:", hash.to_ascii_lowercase());
        for (entry, lowered) in &pot {
            let Some(at) = lowered.find(&needle) else {
                continue;
            };
            if at > 0 && !lowered[..at].ends_with('$') {
                continue;
            }
            // ASCII lowercasing keeps byte offsets, so the plaintext keeps its case.
            let plain = entry.get(at + needle.len()..).unwrap_or_default();
            rows.push(vec![hash.to_string(), plain.to_string()]);
            break;
        }
    }
    rows
}
