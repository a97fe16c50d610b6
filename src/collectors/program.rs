use crate::error::FetchError;
use log::{debug, warn};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

/// Runs a datasource program through the shell and returns its stdout.
///
/// The program runs in its own process group. When `deadline` passes the
/// whole group is terminated and `FetchError::Timeout` returned.
pub async fn fetch_program(
    commandline: &str,
    deadline: Option<tokio::time::Instant>,
) -> Result<Vec<u8>, FetchError> {
    let start = Instant::now();
    // Options may contain secrets, only the executable goes into messages.
    let exepath = commandline.split_whitespace().next().unwrap_or(commandline);
    debug!("Calling external program {}", commandline);

    let child = Command::new("sh")
        .arg("-c")
        .arg(commandline)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| FetchError::Agent(format!("Could not execute '{}': {}", exepath, e)))?;
    let pid = child.id();

    let waited = match deadline {
        Some(deadline) => {
            match tokio::time::timeout_at(deadline, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    if let Some(pid) = pid {
                        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                            warn!("Cannot terminate process group of '{}': {}", exepath, e);
                        }
                    }
                    return Err(FetchError::Timeout);
                }
            }
        }
        None => child.wait_with_output().await,
    };
    let output =
        waited.map_err(|e| FetchError::Agent(format!("Could not execute '{}': {}", exepath, e)))?;
    debug!("fetch_program took: {} ms", start.elapsed().as_millis());

    if !output.status.success() {
        return Err(match output.status.code() {
            Some(127) => {
                FetchError::Agent(format!("Program '{}' not found (exit code 127)", exepath))
            }
            code => FetchError::Agent(format!(
                "Agent exited with code {}: {}",
                code.unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr)
            )),
        });
    }
    Ok(output.stdout)
}
