//! Compendium command-line client.
//!
//! ```text
//! compendium configure -f .compendium-config.yml   # upsert node types
//! compendium put -f .compendium.yml                # submit nodes, prints the run id
//! compendium run <runId> --wait                    # follow a run
//! compendium dependants <id>
//! ```

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value as Json;

use compendium::model::{NodeInput, NodeType};
use compendium::protocol::{decode_response, encode, read_frame, write_frame, Request, RequestEnvelope};

#[derive(Parser, Debug)]
#[command(name = "compendium", version, about = "Client for compendium-server")]
struct Cli {
    /// Server socket
    #[arg(long, env = "COMPENDIUM_SOCKET", default_value = "/tmp/compendium.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit the nodes of a multi-document YAML file
    Put {
        #[arg(short = 'f', long = "filename", default_value = ".compendium.yml")]
        filename: PathBuf,
    },
    /// Upsert node types from a YAML config file
    Configure {
        #[arg(short = 'f', long = "filename", default_value = ".compendium-config.yml")]
        filename: PathBuf,
    },
    Node {
        id: String,
    },
    Recent {
        #[arg(long)]
        limit: Option<usize>,
    },
    ByType {
        type_id: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    Dependencies {
        id: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    Dependants {
        id: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    Types,
    /// Show a run; with --wait, block until it finishes
    Run {
        run_id: String,
        #[arg(long)]
        wait: bool,
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
    /// Re-submit the failed nodes of a run
    Retry {
        run_id: String,
    },
    Ping,
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeConfig {
    #[serde(default)]
    node_types: Vec<NodeType>,
}

/// One node per YAML document. Empty documents are skipped; absent or null
/// `metadata` becomes `{}` and absent `dependencies` becomes `[]`.
fn parse_node_documents(text: &str) -> anyhow::Result<Vec<NodeInput>> {
    let mut nodes = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("document {}", index + 1))?;
        if value.is_null() {
            continue;
        }
        let mut node: NodeInput = serde_yaml::from_value(value)
            .with_context(|| format!("document {}", index + 1))?;
        if node.metadata.is_null() {
            node.metadata = Json::Object(serde_json::Map::new());
        }
        nodes.push(node);
    }
    Ok(nodes)
}

fn parse_type_config(text: &str) -> anyhow::Result<Vec<NodeType>> {
    let config: TypeConfig = serde_yaml::from_str(text)?;
    Ok(config.node_types)
}

struct Client {
    stream: UnixStream,
    next_request_id: u64,
}

impl Client {
    fn connect(socket: &Path) -> anyhow::Result<Self> {
        let stream = UnixStream::connect(socket)
            .with_context(|| format!("connecting to {}", socket.display()))?;
        Ok(Self {
            stream,
            next_request_id: 1,
        })
    }

    /// Send one request and return the response body, failing on an error
    /// response.
    fn call(&mut self, request: Request) -> anyhow::Result<Json> {
        let request_id = self.next_request_id.to_string();
        self.next_request_id += 1;
        let envelope = RequestEnvelope {
            request_id: Some(request_id),
            request,
        };
        write_frame(&mut self.stream, &encode(&envelope)?)?;
        let Some(frame) = read_frame(&mut self.stream)? else {
            bail!("server closed the connection");
        };
        let mut response = decode_response(&frame)?;
        if let Json::Object(map) = &mut response {
            map.remove("requestId");
            if let Some(error) = map.get("error") {
                let code = map.get("code").and_then(Json::as_str).unwrap_or("ERROR");
                bail!("{code}: {}", error.as_str().unwrap_or_default());
            }
        }
        Ok(response)
    }
}

fn print_json(value: &Json) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Parse input files before connecting so syntax errors surface first.
    let request = match cli.command {
        Command::Put { filename } => {
            let text = std::fs::read_to_string(&filename)
                .with_context(|| format!("reading {}", filename.display()))?;
            let nodes = parse_node_documents(&text)?;
            eprintln!("putting {} nodes from {}", nodes.len(), filename.display());
            Request::PutNodes { nodes }
        }
        Command::Configure { filename } => {
            let text = std::fs::read_to_string(&filename)
                .with_context(|| format!("reading {}", filename.display()))?;
            let types = parse_type_config(&text)?;
            eprintln!("configuring {} node types from {}", types.len(), filename.display());
            let mut client = Client::connect(&cli.socket)?;
            for node_type in types {
                let reply = client.call(Request::PutType {
                    id: node_type.id,
                    name: node_type.name,
                })?;
                print_json(&reply)?;
            }
            return Ok(());
        }
        Command::Node { id } => Request::GetNode { id },
        Command::Recent { limit } => Request::ListRecentNodes { limit },
        Command::ByType { type_id, limit } => Request::ListNodesByType { type_id, limit },
        Command::Dependencies { id, limit } => Request::GetDependencies { id, limit },
        Command::Dependants { id, limit } => Request::GetDependants { id, limit },
        Command::Types => Request::ListTypes,
        Command::Run {
            run_id,
            wait,
            timeout_secs,
        } => Request::GetRun {
            run_id,
            wait_ms: wait.then(|| Duration::from_secs(timeout_secs).as_millis() as u64),
        },
        Command::Retry { run_id } => Request::RetryRun { run_id },
        Command::Ping => Request::Ping,
        Command::Shutdown => Request::Shutdown,
    };

    let mut client = Client::connect(&cli.socket)?;
    let reply = client.call(request)?;
    print_json(&reply)
}
