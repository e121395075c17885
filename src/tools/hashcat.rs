//! Hashcat dictionary attacks.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde_json::json;
use uuid::Uuid;

use crate::config::{HashcatConfig, ToolsConfig};
use crate::error::{Error, Result};
use crate::job::{Job, JobStatus};
use crate::tasker::throughput::{SpeedUnit, Throughput};
use crate::tasker::{ProcessTasker, Tasker, ToolProcess, Tooler};
use crate::tool::{Tool, REQUIREMENT_GPU};

pub const KIND: &str = "hashcat";

const HASHES_FILE: &str = "hashes.txt";
const OUTPUT_FILE: &str = "hashes-output.txt";
const CUSTOM_DICT_FILE: &str = "custom-dict.txt";

static PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Progress\.+: (\d*)/(\d*) \((\d{1,3}\.\d{2})%\)").expect("valid regex")
});
static ESTIMATED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Time\.Estimated\.+: .*\((.*?)\)").expect("valid regex"));
/// Per-device speed. Matches `Speed.#1` (hashcat 4 and later) as well as
/// the older `Speed.GPU.#1` and `Speed.Dev.#1` forms.
static SPEED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Speed\.(?:GPU\.|Dev\.)?#(\d+|\*)\.+:\s+(\d+(?:\.\d+)?)\s+(\w?H/s)")
        .expect("valid regex")
});
static RECOVERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Recovered\.+:\s+(\d+)/(\d+)").expect("valid regex"));
static STATUS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Session\.+:").expect("valid regex"));

pub struct HashcatTooler {
    tool: Tool,
    config: HashcatConfig,
    work_dir: PathBuf,
    stop_grace: Duration,
}

impl HashcatTooler {
    pub fn new(config: HashcatConfig, work_dir: PathBuf, stop_grace: Duration) -> Self {
        let mut dictionaries: Vec<&String> = config.dictionaries.keys().collect();
        dictionaries.sort();
        let parameters = json!({
            "schema": {
                "type": "object",
                "title": "Hashcat Dictionary Attack",
                "properties": {
                    "algorithm": { "type": "string", "enum": config.hash_modes.keys().collect::<Vec<_>>() },
                    "dictionaries": { "type": "string", "enum": dictionaries },
                    "rules": { "type": "string", "enum": config.rules.keys().collect::<Vec<_>>() },
                    "customdictadd": { "type": "string" },
                    "hashes": { "type": "string" }
                },
                "required": ["algorithm", "dictionaries", "hashes"]
            },
            "form": ["algorithm", "dictionaries", "rules",
                     { "key": "customdictadd", "type": "textarea" },
                     { "key": "hashes", "type": "textarea" }]
        });
        let version = if config.version.is_empty() {
            "unknown".to_string()
        } else {
            config.version.clone()
        };
        Self {
            tool: Tool {
                id: Uuid::new_v4(),
                name: "Hashcat".to_string(),
                kind: "Dictionary".to_string(),
                version,
                requirement: REQUIREMENT_GPU.to_string(),
                parameters: parameters.to_string(),
            },
            config,
            work_dir,
            stop_grace,
        }
    }

    pub fn factory(config: &ToolsConfig) -> Result<Option<Arc<dyn Tooler>>> {
        let Some(hashcat) = config.hashcat.clone() else {
            return Ok(None);
        };
        if !hashcat.binary.exists() {
            return Err(Error::Config(format!(
                "hashcat binary not found: {}",
                hashcat.binary.display()
            )));
        }
        Ok(Some(Arc::new(HashcatTooler::new(
            hashcat,
            config.work_dir.clone(),
            config.stop_grace(),
        ))))
    }

    fn hash_mode(&self, algorithm: &str) -> Result<String> {
        if let Some(mode) = self.config.hash_modes.get(algorithm) {
            return Ok(mode.clone());
        }
        if self.config.hash_modes.values().any(|m| m == algorithm) {
            return Ok(algorithm.to_string());
        }
        Err(Error::InvalidParameter(format!(
            "unknown hash algorithm '{}'",
            algorithm
        )))
    }
}

impl Tooler for HashcatTooler {
    fn tool(&self) -> &Tool {
        &self.tool
    }

    fn new_task(&self, mut job: Job) -> Result<Box<dyn Tasker>> {
        let algorithm = job
            .parameter("algorithm")
            .ok_or_else(|| Error::InvalidParameter("algorithm is required".into()))?;
        let mode = self.hash_mode(algorithm)?;

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

        let rules = match job.parameter("rules") {
            Some(name) => Some(
                self.config
                    .rules
                    .get(name)
                    .ok_or_else(|| Error::InvalidParameter(format!("unknown rule file '{}'", name)))?
                    .clone(),
            ),
            None => None,
        };

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

        let mut args = vec!["-m".to_string(), mode];
        if let Some(rules) = rules {
            args.push("-r".to_string());
            args.push(rules.display().to_string());
        }
        args.extend(
            [
                "--status",
                "--status-timer=10",
                "--potfile-disable",
                "--force",
            ]
            .map(String::from),
        );
        args.push("-o".to_string());
        args.push(wd.join(OUTPUT_FILE).display().to_string());
        args.extend(self.config.extra_args.iter().cloned());
        args.push(wd.join(HASHES_FILE).display().to_string());

        if let Some(custom) = job.parameter("customdictadd") {
            std::fs::write(wd.join(CUSTOM_DICT_FILE), custom)?;
            args.push(wd.join(CUSTOM_DICT_FILE).display().to_string());
        }
        args.push(dictionary.display().to_string());

        job.total_hashes = total;
        job.output_titles = vec!["Hash".to_string(), "Plaintext".to_string()];

        let process = HashcatProcess {
            binary: self.config.binary.clone(),
            session: job.id.to_string(),
            wd,
            args,
            throughput: Throughput::new(),
        };
        Ok(Box::new(ProcessTasker::new(job, process, self.stop_grace)))
    }
}

pub struct HashcatProcess {
    binary: PathBuf,
    session: String,
    wd: PathBuf,
    args: Vec<String>,
    throughput: Throughput,
}

impl HashcatProcess {
    fn restore_file(&self) -> PathBuf {
        self.wd.join(format!("{}.restore", self.session))
    }

    fn session_args(&self) -> Vec<String> {
        vec![
            format!("--session={}", self.session),
            format!("--restore-file-path={}", self.restore_file().display()),
        ]
    }
}

impl ToolProcess for HashcatProcess {
    fn program(&self) -> &Path {
        &self.binary
    }

    fn working_dir(&self) -> &Path {
        &self.wd
    }

    fn start_args(&self) -> Vec<String> {
        let mut args = self.session_args();
        args.extend(self.args.iter().cloned());
        args
    }

    fn resume_args(&self) -> Option<Vec<String>> {
        if !self.restore_file().exists() {
            return None;
        }
        let mut args = self.session_args();
        args.push("--restore".to_string());
        Some(args)
    }

    fn parse_output(&mut self, job: &mut Job, stdout: &str, stderr: &str) {
        if let Some(status) = parse_status(stdout) {
            if let Some(progress) = status.progress {
                job.progress = progress;
            }
            if let Some(etc) = status.estimated {
                job.etc = etc;
            }
            if let Some((recovered, total)) = status.recovered {
                job.cracked_hashes = job.cracked_hashes.max(recovered);
                job.total_hashes = total;
            }
            if let Some((speed, unit)) = status.speed {
                self.throughput.record(job, speed, unit);
            }
        } else if !stdout.trim().is_empty() {
            tracing::debug!(job_id = %job.id, "No hashcat status block in output");
        }

        let stderr = stderr.trim();
        if !stderr.is_empty() {
            job.error = Some(stderr.to_string());
        }
    }

    fn exit_status(&self, status: ExitStatus) -> JobStatus {
        // 0: all hashes cracked, 1: keyspace exhausted.
        match status.code() {
            Some(0) | Some(1) => JobStatus::Done,
            _ => JobStatus::Failed,
        }
    }

    fn collect_results(&mut self, job: &mut Job) {
        let Ok(text) = std::fs::read_to_string(self.wd.join(OUTPUT_FILE)) else {
            return;
        };
        job.output = parse_cracked(&text);
        job.cracked_hashes = job.cracked_hashes.max(job.output.len() as i64);
    }
}

/// Values pulled from the last status block in a stretch of output.
#[derive(Debug, Default, PartialEq)]
pub struct StatusBlock {
    pub progress: Option<f64>,
    pub estimated: Option<String>,
    pub recovered: Option<(i64, i64)>,
    /// Summed device speed in the unit of the first device.
    pub speed: Option<(f64, SpeedUnit)>,
}

pub fn parse_status(output: &str) -> Option<StatusBlock> {
    let start = STATUS_BLOCK.find_iter(output).last()?.start();
    let block = &output[start..];

    let mut status = StatusBlock::default();
    if let Some(caps) = PROGRESS.captures(block) {
        status.progress = caps[3].parse().ok();
    }
    if let Some(caps) = ESTIMATED.captures(block) {
        status.estimated = Some(caps[1].to_string());
    }
    if let Some(caps) = RECOVERED.captures(block) {
        if let (Ok(done), Ok(total)) = (caps[1].parse(), caps[2].parse()) {
            status.recovered = Some((done, total));
        }
    }
    for caps in SPEED.captures_iter(block) {
        // `#*` is hashcat's own total of the device lines.
        if &caps[1] == "*" {
            continue;
        }
        let (Ok(value), Some(unit)) = (caps[2].parse::<f64>(), SpeedUnit::parse(&caps[3])) else {
            continue;
        };
        status.speed = Some(match status.speed {
            None => (value, unit),
            Some((sum, first)) => (sum + SpeedUnit::convert(value, unit, first), first),
        });
    }
    Some(status)
}

/// Rows of `hash:plaintext`, split at the last colon since salted hashes
/// contain colons themselves.
pub fn parse_cracked(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .filter_map(|line| {
            let (hash, plain) = line.rsplit_once(':')?;
            Some(vec![hash.to_string(), plain.to_string()])
        })
        .collect()
}
