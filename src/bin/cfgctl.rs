use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use cfgstore::rpc::{Command, WireValue};

#[derive(Parser)]
#[command(name = "cfgctl")]
#[command(about = "Operator CLI for the configuration store", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "CFGSTORE_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store status
    Status,
    /// Change a variable immediately
    Set {
        /// `group` or `group.id`
        group: String,
        var: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    /// Stage a change in the admin transaction
    SetDelayed {
        group: String,
        var: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    /// Revert a group instance variable to the default
    Del { group: String, var: String },
    /// Stage a revert in the admin transaction
    DelDelayed { group: String, var: String },
    /// Read a variable, or the whole group
    Get { group: String, var: Option<String> },
    /// Apply every staged change
    Commit,
    /// Drop every staged change
    Rollback,
    /// Show staged changes
    Diff,
    /// Create a group instance
    AddGroupInstance { group: String, instance: u32 },
    /// Delete a group instance
    DelGroupInstance { group: String, instance: u32 },
    /// List groups and variables
    List { group: Option<String> },
    /// Describe a variable
    Help { group: String, var: String },
    /// Send one line in the FIFO text form
    Raw {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        line: Vec<String>,
    },
}

fn split_address(text: &str) -> Result<(String, Option<u32>), Box<dyn std::error::Error>> {
    match text.split_once('.') {
        Some((group, id)) => Ok((group.to_string(), Some(id.parse()?))),
        None => Ok((text.to_string(), None)),
    }
}

fn require_instance(text: &str) -> Result<(String, u32), Box<dyn std::error::Error>> {
    match split_address(text)? {
        (group, Some(id)) => Ok((group, id)),
        (group, None) => Err(format!("'{group}' needs a group instance id (group.id)").into()),
    }
}

fn wire_value(text: String) -> WireValue {
    match text.parse::<i64>() {
        Ok(n) => WireValue::Int(n),
        Err(_) => WireValue::Text(text),
    }
}

fn to_command(command: Commands) -> Result<Command, Box<dyn std::error::Error>> {
    Ok(match command {
        Commands::Set { group, var, value } => {
            let (group, instance) = split_address(&group)?;
            Command::Set {
                group,
                instance,
                var,
                value: wire_value(value),
            }
        }
        Commands::SetDelayed { group, var, value } => {
            let (group, instance) = split_address(&group)?;
            Command::SetDelayed {
                group,
                instance,
                var,
                value: wire_value(value),
            }
        }
        Commands::Del { group, var } => {
            let (group, instance) = require_instance(&group)?;
            Command::Del { group, instance, var }
        }
        Commands::DelDelayed { group, var } => {
            let (group, instance) = require_instance(&group)?;
            Command::DelDelayed { group, instance, var }
        }
        Commands::Get { group, var } => {
            let (group, instance) = split_address(&group)?;
            Command::Get { group, instance, var }
        }
        Commands::Commit => Command::Commit,
        Commands::Rollback => Command::Rollback,
        Commands::Diff => Command::Diff,
        Commands::AddGroupInstance { group, instance } => Command::AddGroupInstance { group, instance },
        Commands::DelGroupInstance { group, instance } => Command::DelGroupInstance { group, instance },
        Commands::List { group } => Command::List { group },
        Commands::Help { group, var } => Command::Help { group, var },
        Commands::Status | Commands::Raw { .. } => return Err("not a store command".into()),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = match cli.command {
        Commands::Status => {
            client
                .get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Raw { line } => {
            client
                .post(format!("{}/admin/rpc/line", cli.url))
                .headers(headers)
                .body(line.join(" "))
                .send()
                .await?
        }
        other => {
            client
                .post(format!("{}/admin/rpc", cli.url))
                .headers(headers)
                .json(&to_command(other)?)
                .send()
                .await?
        }
    };
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
