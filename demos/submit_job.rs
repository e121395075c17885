use std::collections::HashMap;

use clap::Parser;
use serde_json::{json, Value};
use uuid::Uuid;

use hashfleet::api::TOKEN_HEADER;
use hashfleet::job::Job;
use hashfleet::tool::Tool;

#[derive(Parser, Debug)]
#[command(name = "submit-job")]
#[command(about = "CLI client for the hashfleet queue API")]
struct Args {
    /// Queue API address
    #[arg(long, default_value = "http://127.0.0.1:9443")]
    addr: String,

    #[arg(short, long)]
    user: String,

    #[arg(short, long)]
    password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Submit a new job
    Submit {
        /// Tool name or id, as listed by `tools`
        #[arg(short, long)]
        tool: String,
        #[arg(short, long)]
        name: String,
        /// Tool parameter as key=value. May be repeated.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Get status of a job
    Status {
        #[arg(short, long)]
        job_id: Uuid,
    },
    /// List all jobs
    List,
    /// List the tools on offer
    Tools,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

struct Client {
    http: reqwest::Client,
    addr: String,
    token: String,
}

impl Client {
    async fn login(
        addr: String,
        user: &str,
        password: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let http = reqwest::Client::new();
        let response: Value = http
            .post(format!("{}/api/login", addr))
            .json(&json!({ "username": user, "password": password }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let token = response["token"]
            .as_str()
            .ok_or("login response carries no token")?
            .to_string();
        Ok(Self { http, addr, token })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, reqwest::Error> {
        self.http
            .get(format!("{}{}", self.addr, path))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    async fn tools(&self) -> Result<HashMap<Uuid, Tool>, reqwest::Error> {
        self.get("/api/tools").await
    }

    async fn logout(&self) -> Result<(), reqwest::Error> {
        self.http
            .get(format!("{}/api/logout", self.addr))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn print_job(job: &Job) {
    println!("Job ID: {}", job.id);
    println!("Name: {}", job.name);
    println!("Status: {}", job.status);
    println!("Progress: {:.2}%", job.progress);
    if !job.etc.is_empty() {
        println!("ETC: {}", job.etc);
    }
    println!("Cracked: {}/{}", job.cracked_hashes, job.total_hashes);
    if let Some(resource) = job.resource_id {
        println!("Resource: {}", resource);
    }
    if let Some(error) = &job.error {
        println!("Error: {}", error);
    }
    if !job.output.is_empty() {
        println!("{}", job.output_titles.join("\t"));
        for row in &job.output {
            println!("{}", row.join("\t"));
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let client = Client::login(args.addr.clone(), &args.user, &args.password).await?;

    match args.command {
        Commands::Submit { tool, name, params } => {
            let tools = client.tools().await?;
            let tool_id = tools
                .values()
                .find(|t| t.name == tool || t.id.to_string() == tool)
                .map(|t| t.id)
                .ok_or_else(|| format!("no tool named '{}'", tool))?;

            let params: HashMap<String, String> = params.into_iter().collect();
            let response: Value = client
                .http
                .post(format!("{}/api/jobs", client.addr))
                .header(TOKEN_HEADER, &client.token)
                .json(&json!({ "toolid": tool_id, "name": name, "params": params }))
                .send()
                .await?
                .json()
                .await?;

            match response.get("jobid").and_then(Value::as_str) {
                Some(job_id) => {
                    println!("Job submitted successfully!");
                    println!("Job ID: {}", job_id);
                }
                None => println!("Job submission failed: {}", response["message"]),
            }
        }
        Commands::Status { job_id } => {
            let job: Job = client.get(&format!("/api/jobs/{}", job_id)).await?;
            print_job(&job);
        }
        Commands::List => {
            let jobs: Vec<Job> = client.get("/api/jobs").await?;

            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<38} {:<10} {:<9} {:<12} {}",
                    "JOB ID", "STATUS", "PROGRESS", "OWNER", "NAME"
                );
                println!("{}", "-".repeat(90));
                for job in jobs {
                    println!(
                        "{:<38} {:<10} {:<9} {:<12} {}",
                        job.id,
                        job.status,
                        format!("{:.1}%", job.progress),
                        job.owner,
                        job.name
                    );
                }
            }
        }
        Commands::Tools => {
            let mut tools: Vec<Tool> = client.tools().await?.into_values().collect();
            tools.sort_by(|a, b| a.name.cmp(&b.name));
            println!("{:<38} {:<20} {:<10} {}", "TOOL ID", "NAME", "VERSION", "HARDWARE");
            println!("{}", "-".repeat(80));
            for tool in tools {
                println!(
                    "{:<38} {:<20} {:<10} {}",
                    tool.id, tool.name, tool.version, tool.requirement
                );
            }
        }
    }

    client.logout().await?;
    Ok(())
}
