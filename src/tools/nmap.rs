//! Nmap network scans. Results come from the XML report written at exit.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::{NmapConfig, ToolsConfig};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::tasker::{ProcessTasker, Tasker, ToolProcess, Tooler};
use crate::tool::{Tool, REQUIREMENT_NET};

pub const KIND: &str = "nmap";

const TARGETS_FILE: &str = "input.txt";
const GREPPABLE_FILE: &str = "greppable-output.txt";
const XML_FILE: &str = "xml-output.xml";
const CUSTOM_PORTS: &str = "Custom";

const SCAN_TYPES: &[(&str, &str)] = &[
    ("ICMP (sP)", "-sP"),
    ("TCP SYN (sS)", "-sS"),
    ("TCP Connect (sT)", "-sT"),
    ("TCP ACK (sA)", "-sA"),
    ("TCP Window (sW)", "-sW"),
    ("TCP Maimon (sM)", "-sM"),
    ("UDP (sU)", "-sU"),
    ("TCP Null (sN)", "-sN"),
    ("TCP FIN (sF)", "-sF"),
    ("TCP Xmas (sX)", "-sX"),
    ("SCTP INIT (sY)", "-sY"),
    ("SCTP COOKIE-ECHO (sZ)", "-sZ"),
];

const TIMINGS: &[(&str, &str)] = &[
    ("Paranoid (0)", "-T0"),
    ("Sneaky (1)", "-T1"),
    ("Polite (2)", "-T2"),
    ("Normal (3)", "-T3"),
    ("Aggressive (4)", "-T4"),
    ("Insane (5)", "-T5"),
];

static PERCENT_DONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"About (\d{1,3}\.\d\d)% done;.*\((.*)\)").expect("valid regex")
});
static HOSTS_COMPLETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) hosts completed").expect("valid regex"));

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(name, _)| *name == key).map(|(_, flag)| *flag)
}

pub struct NmapTooler {
    tool: Tool,
    config: NmapConfig,
    work_dir: PathBuf,
    stop_grace: Duration,
}

impl NmapTooler {
    pub fn new(config: NmapConfig, work_dir: PathBuf, stop_grace: Duration) -> Self {
        let mut ports: Vec<&str> = config.port_rules.keys().map(String::as_str).collect();
        ports.push(CUSTOM_PORTS);
        let parameters = json!({
            "schema": {
                "type": "object",
                "properties": {
                    "scantype": {
                        "title": "Scan type",
                        "type": "string",
                        "enum": SCAN_TYPES.iter().map(|(name, _)| *name).collect::<Vec<_>>()
                    },
                    "timing": {
                        "title": "Scan timing and performance",
                        "type": "string",
                        "enum": TIMINGS.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
                        "default": "Normal (3)"
                    },
                    "serviceversion": {
                        "title": "Enable service versioning?",
                        "type": "string",
                        "default": "false"
                    },
                    "skiphostdiscovery": {
                        "title": "Skip discovering hosts?",
                        "type": "string",
                        "default": "true"
                    },
                    "ports": { "title": "Ports", "type": "string", "enum": ports },
                    "portscustom": { "title": "Custom ports", "type": "string" },
                    "targets": { "title": "Targets", "type": "string" }
                },
                "required": ["scantype", "timing", "targets"]
            },
            "form": ["scantype", "timing", "serviceversion", "skiphostdiscovery", "ports",
                     { "key": "portscustom", "condition": "model.ports == 'Custom'" },
                     { "key": "targets", "type": "textarea" }]
        });
        let version = if config.version.is_empty() {
            "unknown".to_string()
        } else {
            config.version.clone()
        };
        Self {
            tool: Tool {
                id: Uuid::new_v4(),
                name: "NMap (Network Mapper) Scan".to_string(),
                kind: "Network Scan".to_string(),
                version,
                requirement: REQUIREMENT_NET.to_string(),
                parameters: parameters.to_string(),
            },
            config,
            work_dir,
            stop_grace,
        }
    }

    pub fn factory(config: &ToolsConfig) -> Result<Option<Arc<dyn Tooler>>> {
        let Some(nmap) = config.nmap.clone() else {
            return Ok(None);
        };
        if !nmap.binary.exists() {
            return Err(Error::Config(format!(
                "nmap binary not found: {}",
                nmap.binary.display()
            )));
        }
        Ok(Some(Arc::new(NmapTooler::new(
            nmap,
            config.work_dir.clone(),
            config.stop_grace(),
        ))))
    }

    fn ports(&self, job: &Job) -> Result<Option<String>> {
        match job.parameter("ports") {
            None => Ok(None),
            Some(CUSTOM_PORTS) => job
                .parameter("portscustom")
                .map(|p| Some(p.to_string()))
                .ok_or_else(|| Error::InvalidParameter("portscustom is required".into())),
            Some(rule) => self
                .config
                .port_rules
                .get(rule)
                .map(|p| Some(p.clone()))
                .ok_or_else(|| Error::InvalidParameter(format!("unknown port rule '{}'", rule))),
        }
    }
}

impl Tooler for NmapTooler {
    fn tool(&self) -> &Tool {
        &self.tool
    }

    fn new_task(&self, mut job: Job) -> Result<Box<dyn Tasker>> {
        let scantype = job
            .parameter("scantype")
            .ok_or_else(|| Error::InvalidParameter("scantype is required".into()))?;
        let scan_flag = lookup(SCAN_TYPES, scantype).ok_or_else(|| {
            Error::InvalidParameter(format!("unknown scan type '{}'", scantype))
        })?;
        let timing = job.parameter("timing").unwrap_or("Normal (3)");
        let timing_flag = lookup(TIMINGS, timing)
            .ok_or_else(|| Error::InvalidParameter(format!("unknown timing '{}'", timing)))?;
        let ports = self.ports(&job)?;

        let targets: Vec<&str> = job
            .parameter("targets")
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if targets.is_empty() {
            return Err(Error::InvalidParameter("targets is required".into()));
        }
        let total = targets.len() as i64;

        let wd = self.work_dir.join(job.id.to_string());
        std::fs::create_dir_all(&wd)?;
        std::fs::write(wd.join(TARGETS_FILE), targets.join("\n") + "\n")?;

        let mut args: Vec<String> = vec![
            "--stats-every".into(),
            "30s".into(),
            scan_flag.into(),
            timing_flag.into(),
        ];
        if job.parameter("serviceversion") == Some("true") {
            args.push("-sV".into());
        }
        if job.parameter("skiphostdiscovery") == Some("true") {
            args.push("-Pn".into());
        }
        if let Some(ports) = ports {
            args.push("-p".into());
            args.push(ports);
        }
        args.push("-oG".into());
        args.push(wd.join(GREPPABLE_FILE).display().to_string());
        args.push("-oX".into());
        args.push(wd.join(XML_FILE).display().to_string());
        args.extend(self.config.extra_args.iter().cloned());
        args.push("-iL".into());
        args.push(wd.join(TARGETS_FILE).display().to_string());

        job.total_hashes = total;
        job.performance_title = "Hosts completed".to_string();
        job.output_titles = ["IP Address", "Hostname", "Protocol", "Port", "State", "Service"]
            .map(String::from)
            .to_vec();

        let process = NmapProcess {
            binary: self.config.binary.clone(),
            wd,
            args,
        };
        Ok(Box::new(ProcessTasker::new(job, process, self.stop_grace)))
    }
}

pub struct NmapProcess {
    binary: PathBuf,
    wd: PathBuf,
    args: Vec<String>,
}

impl ToolProcess for NmapProcess {
    fn program(&self) -> &Path {
        &self.binary
    }

    fn working_dir(&self) -> &Path {
        &self.wd
    }

    fn start_args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn resume_args(&self) -> Option<Vec<String>> {
        let greppable = self.wd.join(GREPPABLE_FILE);
        greppable
            .exists()
            .then(|| vec!["--resume".to_string(), greppable.display().to_string()])
    }

    fn parse_output(&mut self, job: &mut Job, stdout: &str, stderr: &str) {
        if let Some(caps) = PERCENT_DONE.captures_iter(stdout).last() {
            if let Ok(progress) = caps[1].parse() {
                job.progress = progress;
            }
            job.etc = caps[2].to_string();
        }
        if let Some(caps) = HOSTS_COMPLETED.captures_iter(stdout).last() {
            if let Ok(done) = caps[1].parse::<i64>() {
                job.cracked_hashes = done;
                job.record_performance(done as f64);
            }
        }
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            tracing::warn!(job_id = %job.id, stderr, "nmap reported errors");
            job.error = Some(stderr.to_string());
        }
    }

    fn collect_results(&mut self, job: &mut Job) {
        let Ok(text) = std::fs::read_to_string(self.wd.join(XML_FILE)) else {
            return;
        };
        match parse_report(&text) {
            Ok(rows) => job.output = rows,
            Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Unreadable nmap XML report"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<Host>,
}

#[derive(Debug, Deserialize)]
struct Host {
    #[serde(rename = "address", default)]
    addresses: Vec<Address>,
    #[serde(default)]
    hostnames: Option<Hostnames>,
    #[serde(default)]
    ports: Option<Ports>,
}

#[derive(Debug, Deserialize)]
struct Address {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype")]
    addrtype: String,
}

#[derive(Debug, Deserialize)]
struct Hostnames {
    #[serde(rename = "hostname", default)]
    entries: Vec<Hostname>,
}

#[derive(Debug, Deserialize)]
struct Hostname {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Ports {
    #[serde(rename = "port", default)]
    entries: Vec<Port>,
}

#[derive(Debug, Deserialize)]
struct Port {
    #[serde(rename = "@protocol")]
    protocol: String,
    #[serde(rename = "@portid")]
    portid: String,
    state: Option<PortState>,
    service: Option<Service>,
}

#[derive(Debug, Deserialize)]
struct PortState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct Service {
    #[serde(rename = "@name", default)]
    name: String,
}

/// One row per scanned port: address, PTR name, protocol, port, state,
/// service.
pub fn parse_report(xml: &str) -> std::result::Result<Vec<Vec<String>>, quick_xml::DeError> {
    let run: NmapRun = quick_xml::de::from_str(xml)?;
    let mut rows = Vec::new();
    for host in run.hosts {
        let ip = host
            .addresses
            .iter()
            .find(|a| a.addrtype == "ipv4" || a.addrtype == "ipv6")
            .map(|a| a.addr.clone())
            .unwrap_or_default();
        let ptr = host
            .hostnames
            .iter()
            .flat_map(|h| h.entries.iter())
            .find(|h| h.kind == "PTR")
            .map(|h| h.name.clone())
            .unwrap_or_default();
        for port in host.ports.into_iter().flat_map(|p| p.entries) {
            rows.push(vec![
                ip.clone(),
                ptr.clone(),
                port.protocol,
                port.portid,
                port.state.map(|s| s.state).unwrap_or_default(),
                port.service.map(|s| s.name).unwrap_or_default(),
            ]);
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sS 10.0.0.0/30" version="7.94">
<scaninfo type="syn" protocol="tcp" numservices="1000" services="1-1000"/>
<verbose level="0"/>
<host starttime="1" endtime="2"><status state="up" reason="arp-response"/>
<address addr="10.0.0.1" addrtype="ipv4"/>
<address addr="00:11:22:33:44:55" addrtype="mac"/>
<hostnames><hostname name="gw.lan" type="user"/><hostname name="router.lan" type="PTR"/></hostnames>
<ports><extraports state="closed" count="998"/>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack"/><service name="ssh" method="table" conf="3"/></port>
<port protocol="tcp" portid="80"><state state="open" reason="syn-ack"/><service name="http" method="table" conf="3"/></port>
</ports>
</host>
<taskprogress task="SYN Stealth Scan" percent="50.00"/>
<host><status state="up" reason="echo-reply"/>
<address addr="10.0.0.2" addrtype="ipv4"/>
<hostnames/>
<ports><port protocol="udp" portid="53"><state state="open|filtered" reason="no-response"/></port></ports>
</host>
<runstats><finished time="3"/><hosts up="2" down="0" total="2"/></runstats>
</nmaprun>
"#;

    fn tooler(dir: &Path) -> NmapTooler {
        let mut port_rules = std::collections::BTreeMap::new();
        port_rules.insert("Web".to_string(), "80,443".to_string());
        NmapTooler::new(
            NmapConfig {
                binary: PathBuf::from("/usr/bin/nmap"),
                version: "7.94".to_string(),
                port_rules,
                extra_args: Vec::new(),
            },
            dir.to_path_buf(),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn report_rows() {
        let rows = parse_report(REPORT).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], ["10.0.0.1", "router.lan", "tcp", "22", "open", "ssh"]);
        assert_eq!(rows[1][3], "80");
        assert_eq!(rows[2], ["10.0.0.2", "", "udp", "53", "open|filtered", ""]);
    }

    #[test]
    fn stats_lines_update_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = NmapProcess {
            binary: PathBuf::from("nmap"),
            wd: dir.path().to_path_buf(),
            args: Vec::new(),
        };
        let mut job = Job::new(Uuid::new_v4(), "scan", "bob");
        process.parse_output(
            &mut job,
            "Stats: 0:00:30 elapsed; 1 hosts completed (4 up), 4 undergoing SYN Stealth Scan\n\
             SYN Stealth Scan Timing: About 12.50% done; ETC: 10:02 (0:03:30 remaining)\n\
             Stats: 0:01:00 elapsed; 2 hosts completed (4 up), 2 undergoing SYN Stealth Scan\n\
             SYN Stealth Scan Timing: About 55.10% done; ETC: 10:02 (0:00:49 remaining)\n",
            "",
        );
        assert_eq!(job.progress, 55.10);
        assert_eq!(job.etc, "0:00:49 remaining");
        assert_eq!(job.cracked_hashes, 2);
        assert!(job.error.is_none());
    }

    #[test]
    fn resume_uses_greppable_output() {
        let dir = tempfile::tempdir().unwrap();
        let process = NmapProcess {
            binary: PathBuf::from("nmap"),
            wd: dir.path().to_path_buf(),
            args: vec!["-sS".to_string()],
        };
        assert!(process.resume_args().is_none());
        std::fs::write(dir.path().join(GREPPABLE_FILE), "# Nmap\n").unwrap();
        assert_eq!(process.resume_args().unwrap()[0], "--resume");
    }

    #[tokio::test]
    async fn new_task_builds_scan() {
        let dir = tempfile::tempdir().unwrap();
        let tooler = tooler(dir.path());
        let job = Job::new(tooler.tool().id, "scan", "bob")
            .with_parameter("scantype", "TCP SYN (sS)")
            .with_parameter("timing", "Aggressive (4)")
            .with_parameter("ports", "Web")
            .with_parameter("targets", "10.0.0.1\n10.0.0.2\n");
        let id = job.id;

        let task = tooler.new_task(job).unwrap();
        let snapshot = task.status().await;
        assert_eq!(snapshot.status, JobStatus::Created);
        assert_eq!(snapshot.total_hashes, 2);
        assert_eq!(snapshot.output_titles.len(), 6);
        assert!(dir.path().join(id.to_string()).join(TARGETS_FILE).exists());
    }

    #[test]
    fn new_task_rejects_unknown_choices() {
        let dir = tempfile::tempdir().unwrap();
        let tooler = tooler(dir.path());
        let base = Job::new(tooler.tool().id, "scan", "bob").with_parameter("targets", "10.0.0.1");

        let err = tooler
            .new_task(base.clone().with_parameter("scantype", "Ping of death"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidParameter(_)));

        let err = tooler
            .new_task(
                base.clone()
                    .with_parameter("scantype", "UDP (sU)")
                    .with_parameter("ports", "Custom"),
            )
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidParameter(msg) if msg.contains("portscustom")));
    }
}
