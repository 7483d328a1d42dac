//! Purpose: `svclient` CLI entry point: resolve service names and send requests.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Each command emits one JSON value per line on stdout.
//! Invariants: Errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Notes: Requests go through the in-process `MemoryMiddleware`; no replies are delivered.
#![allow(clippy::result_large_err)]
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use svclient::api::{
    Client, ClientOptions, Error, ErrorKind, MemoryMiddleware, Middleware, Node, NodeOptions,
    QosProfile, Reliability, RemapRule, ServiceTypeSupport, to_exit_code,
};

#[derive(Parser, Debug)]
#[command(name = "svclient", version, about = "Service-client handles over an in-process transport")]
struct Cli {
    #[command(flatten)]
    node: NodeArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct NodeArgs {
    /// Node name used for name expansion.
    #[arg(long, global = true, default_value = "svclient")]
    node: String,
    /// Node namespace; empty means `/`.
    #[arg(long, global = true, default_value = "")]
    namespace: String,
    /// Remap rule `from:=to`; repeatable, first match wins.
    #[arg(long = "remap", global = true, value_name = "FROM:=TO")]
    remaps: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the fully-qualified service name a client would use.
    Resolve {
        service: String,
    },
    /// Init a client, send requests, and print what the transport recorded.
    Call {
        service: String,
        /// Service type as `pkg/Service` or `pkg/srv/Service`.
        #[arg(long = "type", value_name = "TYPE")]
        service_type: String,
        /// Request body as JSON.
        #[arg(long = "data-json", default_value = "{}")]
        data_json: String,
        /// Number of requests to send.
        #[arg(long, default_value_t = 1)]
        count: u64,
        #[arg(long = "qos-depth")]
        qos_depth: Option<usize>,
        #[arg(long = "best-effort")]
        best_effort: bool,
    },
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                let message = err.to_string();
                let summary = message.lines().next().unwrap_or("invalid arguments");
                return Err(Error::new(ErrorKind::InvalidArgument).with_message(summary));
            }
        },
    };

    let middleware = Arc::new(MemoryMiddleware::new());
    let node = build_node(&cli.node, middleware.clone())?;

    match cli.command {
        Command::Resolve { service } => {
            let resolved = middleware.resolve_name(&node, &service)?;
            emit_json(&json!({
                "node": node.fully_qualified_name(),
                "service": service,
                "resolved": resolved,
            }));
        }
        Command::Call {
            service,
            service_type,
            data_json,
            count,
            qos_depth,
            best_effort,
        } => {
            let type_support = ServiceTypeSupport::parse(&service_type)?;
            let request: Value = serde_json::from_str(&data_json).map_err(|err| {
                Error::new(ErrorKind::InvalidArgument)
                    .with_message("--data-json is not valid json")
                    .with_source(err)
            })?;
            let mut qos = QosProfile::services_default();
            if let Some(depth) = qos_depth {
                qos = qos.with_depth(depth);
            }
            if best_effort {
                qos = qos.with_reliability(Reliability::BestEffort);
            }
            let options = ClientOptions::default().with_qos(qos);
            call(&middleware, &node, &type_support, &service, &request, count, &options)?;
        }
    }
    Ok(0)
}

fn build_node(args: &NodeArgs, middleware: Arc<MemoryMiddleware>) -> Result<Node, Error> {
    let mut options = NodeOptions::new();
    for raw in &args.remaps {
        options = options.with_remap(RemapRule::parse(raw)?);
    }
    Node::new(middleware, &args.node, &args.namespace, options)
}

fn call(
    middleware: &MemoryMiddleware,
    node: &Node,
    type_support: &ServiceTypeSupport,
    service: &str,
    request: &Value,
    count: u64,
    options: &ClientOptions,
) -> Result<(), Error> {
    let mut client = Client::zeroed();
    client.init(node, type_support, service, options)?;
    let sent = send_all(&mut client, request, count);
    let resolved = client.service_name().unwrap_or_default().to_string();
    let records = middleware.take_requests(&resolved);
    client.fini(node)?;
    sent?;
    for record in records? {
        let data: Value = serde_json::from_slice(&record.payload).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("recorded payload is not json")
                .with_source(err)
        })?;
        emit_json(&json!({
            "seq": record.sequence_number,
            "service": record.service,
            "type": record.type_name,
            "data": data,
        }));
    }
    Ok(())
}

fn send_all(client: &mut Client, request: &Value, count: u64) -> Result<(), Error> {
    for _ in 0..count {
        client.send_request(request)?;
    }
    Ok(())
}

fn emit_json(value: &Value) {
    println!("{value}");
}

fn emit_error(err: &Error) {
    let mut inner = serde_json::Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    if let Some(message) = err.message() {
        inner.insert("message".to_string(), json!(message));
    }
    if let Some(service) = err.service() {
        inner.insert("service".to_string(), json!(service));
    }
    if let Some(seq) = err.seq() {
        inner.insert("seq".to_string(), json!(seq));
    }
    eprintln!("{}", json!({ "error": Value::Object(inner) }));
}
