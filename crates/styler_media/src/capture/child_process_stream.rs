use std::fmt;
use std::process::Stdio;
use tokio::process::{ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct ChildProcessError {
    message: String,
}

impl ChildProcessError {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for ChildProcessError {
    fn from(value: std::io::Error) -> Self {
        Self {
            message: value.to_string(),
        }
    }
}

impl fmt::Display for ChildProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

///Spawns the capture process with a piped stdout and hands the stream back
///to the caller. A supervision task kills the child when the token is
///cancelled; an unsupervised exit is logged and leaves the stream at EOF.
pub fn start_child_process(
    cmd: &str,
    args: &[String],
    cancel: CancellationToken,
) -> Result<ChildStdout, ChildProcessError> {
    info!("spawning capture process ... [{} {}]", cmd, args.join(" "));
    let mut child = Command::new(cmd)
        .args(args)
        .stderr(Stdio::inherit())
        .stdout(Stdio::piped())
        .spawn()?;

    let child_out = child.stdout.take().ok_or(ChildProcessError::new(
        "unable to open stdout stream from capture process",
    ))?;

    tokio::spawn(async move {
        tokio::select! {
            child_res = child.wait() => {
                error!("capture process exited unexpectedly! {:?}", child_res);
            },
            _ = cancel.cancelled() => {
                debug!("killing capture process ...");
                if let Err(err) = child.kill().await {
                    warn!("error killing capture process: {}", err);
                }
            },
        }
    });

    Ok(child_out)
}
