//! Per-device queries run through the shell executor.

use tracing::debug;

use dbridge_core::Result;
use dbridge_core::constants::MODEL_QUERY;

use crate::registry::parse_socket_table;
use crate::shell::ShellExecutor;

/// Shell command listing Unix socket table lines that contain `marker`.
pub fn socket_query(marker: &str) -> String {
    format!("cat /proc/net/unix|grep '{}'", marker)
}

/// Query the model name of `serial`. An empty answer yields `None`.
pub async fn query_model(shell: &ShellExecutor, serial: &str) -> Result<Option<String>> {
    let output = shell.run(serial, MODEL_QUERY).await?;
    let model = output.trim();
    debug!(device = %serial, model, "model query");
    Ok((!model.is_empty()).then(|| model.to_string()))
}

/// List the debugger sockets exposed on `serial`.
pub async fn discover_sockets(
    shell: &ShellExecutor,
    serial: &str,
    marker: &str,
) -> Result<Vec<String>> {
    let output = shell.run(serial, &socket_query(marker)).await?;
    let sockets = parse_socket_table(&output, marker);
    debug!(device = %serial, count = sockets.len(), "socket discovery");
    Ok(sockets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_query_quotes_marker() {
        assert_eq!(
            socket_query("debugger-socket"),
            "cat /proc/net/unix|grep 'debugger-socket'"
        );
    }
}
