//! Cluster controller log vocabulary
//!
//! Both the Pacemaker 1 (`crmd`) and Pacemaker 2 (`pacemaker-controld`)
//! spellings are accepted.

use super::Pattern;
use crate::common::Result;

const CONTROLLER: &str = r"(crmd|pacemaker-controld)";

/// Result of a resource operation as logged by the controller
///
/// A `probe` shows up as a `monitor` operation in the second log format.
pub fn rsc_remote_op(operation: &str, resource: &str, node: &str, status: &str) -> Result<Pattern> {
    let logged_op = if operation == "probe" { "monitor" } else { operation };
    let regex = format!(
        r"{CONTROLLER}.*:\s*(Result\sof\s{operation}\soperation\sfor\s{resource}\son\s{node}.*\({status}\)|Operation {resource}_{logged_op}.*:\s*{status} \(node={node},.*,\s*confirmed=true\))"
    );
    Ok(Pattern::new(&regex)?.described(format!(
        "{} of {} on {} ({})",
        operation, resource, node, status
    )))
}

/// The controller initiating an operation on a node
pub fn init_remote_op(operation: &str, resource: &str, node: &str) -> Result<Pattern> {
    let regex = format!(
        r"{CONTROLLER}.*:\s*.*(Initiating {operation} operation {resource}_{operation}_0 locally on {node}|Initiating action.*:.*{operation}.*{resource}_{operation}.*{node})"
    );
    Ok(Pattern::new(&regex)?.described(format!(
        "{} of {} initiated on {}",
        operation, resource, node
    )))
}

/// The cluster settled in the idle state
pub fn cluster_idle() -> Result<Pattern> {
    Ok(Pattern::new(&format!(
        r"{CONTROLLER}.*:\s*notice:\sState\stransition\s.*->\sS_IDLE(\s.*origin=notify_crmd)?"
    ))?
    .described("cluster idle"))
}

/// The controller started
pub fn cluster_starting() -> Result<Pattern> {
    Ok(Pattern::new(&format!(
        r"{CONTROLLER}.*:\s*notice:\sState\stransition\sS_STARTING(\s->.*origin=do_started)?"
    ))?
    .described("cluster starting"))
}

/// The controller finished re-probing a node
pub fn probe_complete(node: &str) -> Result<Pattern> {
    Ok(Pattern::new(&format!(
        r"{CONTROLLER}.*:\s*Initiating action.*: probe_complete probe_complete-{node} on {node}"
    ))?
    .described(format!("probe complete on {}", node)))
}
