//! Service starter protocol
//!
//! A process launched by a one-shot remote command loses its pid once the channel
//! closes. Instead we feed `bash -s` a small script that re-parents the service with
//! `setsid nohup` and echoes `$!` before exiting. The two parameters (service path,
//! program arguments) travel positionally in front of the script body.

use tracing::{debug, warn};

use crate::error::{Result, WardenError};
use crate::execution::{normalize_output, CommandChannel, ShellRequest};
use crate::models::{Pid, Service, NO_PID};

pub const SERVICE_STARTER_SCRIPT: &str = include_str!("../scripts/service-starter.sh");

/// `rm -f <nohup-output-path>`
pub fn remove_nohup_out_command(service: &Service) -> String {
    format!("rm -f {}", shell_words::quote(&service.nohup_out_path()))
}

/// Script text written to the channel's input stream
pub fn render_starter(service: &Service) -> String {
    format!(
        "set -- {} {}\n{}",
        shell_words::quote(&service.path),
        shell_words::quote(&service.configuration.program_arguments),
        SERVICE_STARTER_SCRIPT
    )
}

/// Empty output means the service did not start (`NO_PID`), anything else must be a pid
pub fn parse_pid(stdout: &str) -> Result<Pid> {
    let token = normalize_output(stdout);
    if token.is_empty() {
        return Ok(NO_PID);
    }
    match token.parse::<Pid>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(WardenError::Protocol(token)),
    }
}

/// Launches `service` through `channel` and recovers its pid
pub async fn start_service(channel: &mut dyn CommandChannel, service: &Service) -> Result<Pid> {
    if service.configuration.purge_nohup_out_after_reboot {
        // a missing file is fine, anything else is only worth a warning
        if let Err(e) = channel.execute(&remove_nohup_out_command(service)).await {
            warn!("could not purge {}: {}", service.nohup_out_path(), e);
        }
    }

    let output = channel.run(ShellRequest::Script(render_starter(service))).await?;
    if !output.stderr.is_empty() {
        debug!("starter stderr for {}: {}", service.name, output.stderr.trim());
    }
    let pid = parse_pid(&output.stdout)?;
    debug!("starter for {} answered pid {}", service.name, pid);
    Ok(pid)
}
