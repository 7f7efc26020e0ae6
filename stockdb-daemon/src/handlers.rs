//! Request handlers for the control socket.

use std::collections::HashMap;

use stockdb_protocol::protocol::{Request, Response};
use stockdb_protocol::resource::Resource;
use tracing::{debug, info, warn};

use crate::manager::JobManager;

pub async fn handle_request(request: Request, manager: &JobManager) -> Response {
    match request {
        Request::Apply {
            resource,
            parameters,
        } => on_apply(resource, &parameters, manager).await,
        Request::Unknown { parameters } => on_unknown(&parameters),
    }
}

/// Answer with the job id on success, or the reason the resource was refused
pub async fn on_apply(
    resource: Resource,
    parameters: &HashMap<String, String>,
    manager: &JobManager,
) -> Response {
    let name = resource.name().to_string();
    info!(
        name,
        kind = %resource.kind(),
        file = parameters.get("file").map(String::as_str).unwrap_or("-"),
        "Apply requested"
    );
    debug!("{}", resource);

    match manager.save_resource(resource).await {
        Ok(job_id) => Response::success(job_id),
        Err(e) => {
            warn!(name, "Apply failed: {}", e);
            Response::error(e.to_string())
        }
    }
}

pub fn on_unknown(parameters: &HashMap<String, String>) -> Response {
    debug!(?parameters, "Unknown command");
    Response::unknown("unknown command")
}
