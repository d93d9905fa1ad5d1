use crate::error::{ConfigError, OracleError};
use crate::oracle::{DerivationOracle, DerivedIdentifier};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How the base secret and variant reach the oracle program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDelivery {
    StdIn,
    /// Written to a temporary file whose path replaces `{}` in the template,
    /// which is then appended to the command line.
    File(String),
}

#[derive(Debug, Clone)]
pub struct CommandOracleConfig {
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

/// A [`DerivationOracle`] backed by an external program, run once per variant.
///
/// The program receives two lines, the base secret and then the variant, and
/// prints one identifier per stdout line, either `context<TAB>identifier` or a
/// bare `identifier`. Anything other than a clean exit within the timeout is
/// an [`OracleError`].
pub struct CommandOracle {
    config: CommandOracleConfig,
    base_secret: String,
}

impl CommandOracle {
    pub fn new(config: CommandOracleConfig, base_secret: String) -> Result<Self, ConfigError> {
        if config.command.is_empty() {
            return Err(ConfigError::MissingOracleCommand);
        }
        Ok(Self {
            config,
            base_secret,
        })
    }

    fn payload(&self, variant: &str) -> String {
        format!("{}\n{}\n", self.base_secret, variant)
    }

    fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus, OracleError> {
        let start_time = Instant::now();
        let mut poll_interval = INITIAL_POLL_INTERVAL;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start_time.elapsed() > timeout {
                        if let Err(e) = child.kill() {
                            return Err(OracleError::Failed(format!(
                                "Failed to kill timed-out process: {e}",
                            )));
                        }
                        let _ = child.wait();
                        return Err(OracleError::Timeout);
                    }
                    std::thread::sleep(poll_interval);
                    poll_interval = (poll_interval * 2).min(MAX_POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(OracleError::Failed(format!("Error waiting for child: {e}")));
                }
            }
        }
    }
}

impl DerivationOracle for CommandOracle {
    fn derive(&self, variant: &str) -> Result<Vec<DerivedIdentifier>, OracleError> {
        let mut cmd = Command::new(&self.config.command[0]);
        cmd.args(&self.config.command[1..]);

        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }

        let payload = self.payload(variant);
        let mut temp_file_handle: Option<tempfile::NamedTempFile> = None;

        match &self.config.input_delivery {
            InputDelivery::StdIn => {
                cmd.stdin(Stdio::piped());
            }
            InputDelivery::File(arg_template) => {
                let mut named_temp_file = tempfile::NamedTempFile::new()
                    .map_err(|e| OracleError::Failed(format!("Failed to create temp file: {e}")))?;
                named_temp_file
                    .write_all(payload.as_bytes())
                    .and_then(|_| named_temp_file.flush())
                    .map_err(|e| {
                        OracleError::Failed(format!("Failed to write to temp file: {e}"))
                    })?;

                let path_str = named_temp_file.path().to_str().ok_or_else(|| {
                    OracleError::Failed("Temp file path is not valid UTF-8".to_string())
                })?;
                for part in arg_template.replace("{}", path_str).split_whitespace() {
                    cmd.arg(part);
                }
                cmd.stdin(Stdio::null());
                temp_file_handle = Some(named_temp_file);
            }
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        let mut child_process = cmd.spawn().map_err(|e| {
            OracleError::Spawn(format!("{:?}: {}", self.config.command, e))
        })?;

        if self.config.input_delivery == InputDelivery::StdIn {
            if let Some(mut child_stdin) = child_process.stdin.take() {
                // A target that exits without reading its input is judged by its exit status.
                if let Err(e) = child_stdin
                    .write_all(payload.as_bytes())
                    .or_else(|e| match e.kind() {
                        std::io::ErrorKind::BrokenPipe => Ok(()),
                        _ => Err(e),
                    })
                {
                    let _ = child_process.kill();
                    let _ = child_process.wait();
                    return Err(OracleError::Failed(format!("Failed to write to stdin: {e}")));
                }
            }
        }

        // Drain stdout on a separate thread so a chatty target cannot fill the
        // pipe while we poll for its exit. The reader is never joined, since
        // descendants of the child can hold the pipe open after it exits.
        let mut child_stdout = child_process.stdout.take().ok_or_else(|| {
            OracleError::Failed("Child stdout was not available after piping.".to_string())
        })?;
        let (output_tx, output_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut captured = Vec::new();
            let result = child_stdout.read_to_end(&mut captured).map(|_| captured);
            let _ = output_tx.send(result);
        });

        let started = Instant::now();
        let status = Self::wait_with_timeout(&mut child_process, self.config.timeout)?;
        if !status.success() {
            return Err(OracleError::Failed(describe_exit(status)));
        }

        let remaining = self
            .config
            .timeout
            .saturating_sub(started.elapsed())
            .max(MAX_POLL_INTERVAL);
        let captured = match output_rx.recv_timeout(remaining) {
            Ok(captured) => captured,
            Err(RecvTimeoutError::Timeout) => return Err(OracleError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(OracleError::Failed("stdout reader panicked".to_string()));
            }
        };
        drop(temp_file_handle);

        let stdout = captured
            .map_err(|e| OracleError::Failed(format!("Failed to read oracle output: {e}")))?;
        parse_output(&stdout)
    }
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Terminated by signal {signal}");
        }
    }
    "Exited abnormally".to_string()
}

/// Parses oracle program output: one identifier per non-blank line, optionally
/// prefixed by a context label and a tab.
pub fn parse_output(stdout: &[u8]) -> Result<Vec<DerivedIdentifier>, OracleError> {
    let text = std::str::from_utf8(stdout)
        .map_err(|e| OracleError::MalformedOutput(format!("Output is not UTF-8: {e}")))?;

    let mut identifiers = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let derived = match line.split_once('\t') {
            Some((context, identifier)) => {
                DerivedIdentifier::new(context.trim(), identifier.trim())
            }
            None => DerivedIdentifier::unlabelled(line.trim()),
        };
        if derived.identifier.is_empty() {
            return Err(OracleError::MalformedOutput(format!(
                "Missing identifier in line {line:?}"
            )));
        }
        identifiers.push(derived);
    }
    Ok(identifiers)
}
