//! Request dispatch and the Unix-socket accept loop.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

use crate::error::CompendiumError;
use crate::model::{IngestBatch, NodeType};
use crate::protocol::{
    decode_request, encode, read_frame_async, write_frame_async, Request, Response,
    ResponseEnvelope,
};
use crate::service::Compendium;
use crate::workflow::RunId;

/// Longest a single `getRun` may block.
pub const MAX_RUN_WAIT: Duration = Duration::from_secs(300);

/// Requests slower than this are logged at warn level.
const SLOW_REQUEST_MS: u64 = 100;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

fn error_response(e: CompendiumError) -> Response {
    Response::ErrorWithCode {
        code: e.code().to_string(),
        error: e.to_string(),
    }
}

/// Execute one request against the service. Blocking.
pub fn handle_request(service: &Compendium, request: Request) -> Response {
    let result = match request {
        Request::Ping => Ok(Response::Pong {
            pong: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),

        Request::PutNodes { nodes } => service
            .submit(IngestBatch::new(nodes))
            .map(|run_id| Response::RunAccepted {
                run_id: run_id.to_string(),
            }),

        Request::GetRun { run_id, wait_ms } => {
            let run_id = RunId::from(run_id);
            let report = match wait_ms {
                Some(ms) => {
                    service.wait_for_run(&run_id, Duration::from_millis(ms).min(MAX_RUN_WAIT))
                }
                None => service.run_report(&run_id),
            };
            report.map(|run| Response::Run { run })
        }

        Request::RetryRun { run_id } => service
            .retry_failed(&RunId::from(run_id))
            .map(|run_id| Response::RunAccepted {
                run_id: run_id.to_string(),
            }),

        Request::GetNode { id } => service
            .get_node_with_type(&id)
            .map(|node| Response::Node { node }),

        Request::ListRecentNodes { limit } => service
            .list_recent_nodes(limit)
            .map(|nodes| Response::Nodes { nodes }),

        Request::ListNodesByType { type_id, limit } => service
            .list_nodes_by_type(&type_id, limit)
            .map(|nodes| Response::Nodes { nodes }),

        Request::GetDependencies { id, limit } => service
            .get_dependencies(&id, limit)
            .map(|edges| Response::Edges { edges }),

        Request::GetDependants { id, limit } => service
            .get_dependants(&id, limit)
            .map(|edges| Response::Edges { edges }),

        Request::PutType { id, name } => {
            let node_type = NodeType::new(id, name);
            service
                .put_type(node_type.clone())
                .map(|()| Response::Type { node_type })
        }

        Request::DeleteType { id } => service
            .delete_type(&id)
            .map(|deleted| Response::Deleted { deleted }),

        Request::ListTypes => service.list_types().map(|types| Response::Types { types }),

        Request::Shutdown => service.flush().map(|()| Response::Ok { ok: true }),
    };
    result.unwrap_or_else(error_response)
}

async fn write_response(
    stream: &mut UnixStream,
    request_id: Option<String>,
    response: Response,
) -> io::Result<()> {
    let bytes = encode(&ResponseEnvelope {
        request_id,
        response,
    })?;
    write_frame_async(stream, &bytes).await
}

async fn handle_client(
    mut stream: UnixStream,
    service: Arc<Compendium>,
    shutdown: Arc<Notify>,
    client_id: usize,
) {
    tracing::debug!(client_id, "client connected");
    loop {
        let msg = match read_frame_async(&mut stream).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::debug!(client_id, "client disconnected");
                break;
            }
            Err(e) => {
                tracing::warn!(client_id, error = %e, "read error");
                break;
            }
        };

        let (request_id, request) = match decode_request(&msg) {
            Ok(env) => (env.request_id, env.request),
            Err(e) => {
                let response = Response::ErrorWithCode {
                    error: format!("Invalid request: {e}"),
                    code: "INVALID_REQUEST".to_string(),
                };
                if let Err(e) = write_response(&mut stream, None, response).await {
                    tracing::warn!(client_id, error = %e, "write error");
                    break;
                }
                continue;
            }
        };

        let op = request.name();
        let is_shutdown = matches!(request, Request::Shutdown);
        let started = Instant::now();

        let svc = Arc::clone(&service);
        let response = match tokio::task::spawn_blocking(move || handle_request(&svc, request)).await {
            Ok(response) => response,
            Err(e) => Response::ErrorWithCode {
                error: format!("request handler failed: {e}"),
                code: "INTERNAL_ERROR".to_string(),
            },
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms >= SLOW_REQUEST_MS && op != "getRun" {
            tracing::warn!(client_id, op, elapsed_ms, "slow request");
        } else {
            tracing::debug!(client_id, op, elapsed_ms, "request handled");
        }

        if let Err(e) = write_response(&mut stream, request_id, response).await {
            tracing::warn!(client_id, error = %e, "write error");
            break;
        }

        if is_shutdown {
            tracing::info!(client_id, "shutdown requested");
            shutdown.notify_one();
            break;
        }
    }
}

/// Accept clients until `shutdown` is notified.
pub async fn serve(listener: UnixListener, service: Arc<Compendium>, shutdown: Arc<Notify>) -> io::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                tracing::info!("server stopping");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_client(
                    stream,
                    Arc::clone(&service),
                    Arc::clone(&shutdown),
                    client_id,
                ));
            }
        }
    }
}
