//! External command execution.
//!
//! Every actuator and most sensors are driven through shell commands. A
//! [`Command`] runs its command line through `/bin/sh -c` after `$NAME`
//! expansion, optionally feeds it stdin, optionally bounds it with a
//! timeout, and optionally narrows the output down to the first capture
//! group of a regular expression.

use std::{fmt, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, error, trace};
use regex::Regex;
use tokio::{io::AsyncWriteExt, process::Command as ShellCommand};

use crate::{
    error::{Error, Result},
    simulation::SimulatedCommand,
};

/// Maps a variable name found in a command line to its replacement.
pub type Expander<'a> = dyn Fn(&str) -> String + Send + Sync + 'a;

/// Anything able to run a configured command line.
///
/// Implemented by [`Command`] for real hardware and by
/// [`SimulatedCommand`](crate::simulation::SimulatedCommand) in simulation
/// mode.
#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Runs the command and returns its (possibly regex-narrowed) output.
    async fn run(&self, stdin: Option<&str>, expand: Option<&Expander<'_>>) -> Result<String>;

    /// The unexpanded command line.
    fn command_line(&self) -> &str;
}

/// Shell command with optional output pattern and timeout.
#[derive(Debug, Clone)]
pub struct Command {
    command_line: String,
    output_pattern: Option<Regex>,
    timeout: Option<Duration>,
}

impl Command {
    /// Creates a command. An empty `output_regexp` disables output filtering.
    pub fn new(
        command_line: impl Into<String>,
        output_regexp: &str,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let output_pattern = if output_regexp.is_empty() {
            None
        } else {
            Some(Regex::new(output_regexp).map_err(|e| {
                Error::config(format!("invalid output pattern {output_regexp:?}: {e}"))
            })?)
        };
        Ok(Self {
            command_line: command_line.into(),
            output_pattern,
            timeout: timeout.filter(|t| !t.is_zero()),
        })
    }

    async fn run_shell(&self, command: &str, stdin: Option<&str>) -> Result<String> {
        let mut child = ShellCommand::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let input = child.stdin.take();
        let feed = async move {
            if let (Some(mut pipe), Some(data)) = (input, stdin) {
                // the child may exit without reading everything
                let _ = pipe.write_all(data.as_bytes()).await;
            }
        };
        let wait = async {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| Error::Timeout {
                    command: command.to_string(),
                    timeout,
                })??,
            None => wait.await?,
        };

        if !output.status.success() {
            return Err(Error::Command {
                command: command.to_string(),
                reason: output.status.to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn extract(&self, output: String) -> String {
        let Some(pattern) = &self.output_pattern else {
            return output;
        };
        pattern
            .captures(&output)
            .and_then(|captures| captures.get(1))
            .map(|group| group.as_str().to_string())
            .unwrap_or(output)
    }
}

#[async_trait]
impl CommandRunner for Command {
    async fn run(&self, stdin: Option<&str>, expand: Option<&Expander<'_>>) -> Result<String> {
        let command = match expand {
            Some(mapping) => expand_vars(&self.command_line, mapping),
            None => self.command_line.clone(),
        };
        debug!("command: {command}");
        let output = self.run_shell(&command, stdin).await.inspect_err(|e| {
            error!("error running command `{command}`: {e}");
        })?;
        let output = self.extract(output);
        trace!("{output}");
        Ok(output)
    }

    fn command_line(&self) -> &str {
        &self.command_line
    }
}

/// Replaces `$NAME` and `${NAME}` in `input` using `mapping`.
///
/// A `$` that does not start a variable name is kept as is.
pub fn expand_vars(input: &str, mapping: &Expander<'_>) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        output.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                let name = &braced[..end];
                if !name.is_empty() {
                    output.push_str(&mapping(name));
                }
                rest = &braced[end + 1..];
            } else {
                output.push('$');
                rest = after;
            }
            continue;
        }

        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if len == 0 {
            output.push('$');
        } else {
            output.push_str(&mapping(&after[..len]));
        }
        rest = &after[len..];
    }
    output.push_str(rest);
    output
}

/// Expander that leaves every variable untouched.
pub fn passthrough(name: &str) -> String {
    format!("${name}")
}

/// Builds the runner for a configured command line: a real shell command,
/// or a synthetic one in simulation mode.
pub fn build(
    command_line: &str,
    output_regexp: &str,
    timeout: Option<Duration>,
    simulate: bool,
) -> Result<Arc<dyn CommandRunner>> {
    if simulate {
        Ok(Arc::new(SimulatedCommand::new(command_line)))
    } else {
        Ok(Arc::new(Command::new(command_line, output_regexp, timeout)?))
    }
}

/// Like [`build`], `None` for an empty command line.
pub fn build_optional(
    command_line: &str,
    timeout: Option<Duration>,
    simulate: bool,
) -> Result<Option<Arc<dyn CommandRunner>>> {
    if command_line.trim().is_empty() {
        return Ok(None);
    }
    build(command_line, "", timeout, simulate).map(Some)
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn toto(name: &str) -> String {
        if name == "TOTO" {
            "Found!".to_string()
        } else {
            "NOT Found!".to_string()
        }
    }

    #[tokio::test]
    async fn simple_echo() {
        let command = Command::new("echo simple", "", None).unwrap();
        assert_eq!(command.run(None, None).await.unwrap(), "simple\n");
    }

    #[tokio::test]
    async fn timeout_cancels_command() {
        let command = Command::new("sleep 5", "", Some(Duration::from_millis(50))).unwrap();
        let err = command.run(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let command = Command::new("exit 3", "", None).unwrap();
        let err = command.run(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Command { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn expands_braced_variables() {
        let command = Command::new("echo ${TOTO}", "", None).unwrap();
        let output = command.run(None, Some(&toto)).await.unwrap();
        assert_eq!(output, "Found!\n");

        let command = Command::new("echo ${OTHER}", "", None).unwrap();
        let output = command.run(None, Some(&toto)).await.unwrap();
        assert_eq!(output, "NOT Found!\n");
    }

    #[tokio::test]
    async fn pattern_not_found_returns_full_output() {
        let command = Command::new(
            "echo no temperature here",
            r"Current Temperature:\s+(\d+) Celsius",
            None,
        )
        .unwrap();
        assert_eq!(
            command.run(None, None).await.unwrap(),
            "no temperature here\n"
        );
    }

    #[tokio::test]
    async fn pattern_found_returns_capture_group() {
        let command = Command::new(
            "echo Current Temperature:                    26 Celsius",
            r"Current Temperature:\s+(\d+) Celsius",
            None,
        )
        .unwrap();
        assert_eq!(command.run(None, None).await.unwrap(), "26");
    }

    #[tokio::test]
    async fn pattern_applies_to_stdin_fed_output() {
        let stdin = "=== START OF READ SMART DATA SECTION ===\n\
                     Device State:                        Active (0)\n\
                     Current Temperature:                    27 Celsius\n\
                     Power Cycle Min/Max Temperature:     22/40 Celsius\n";
        let command =
            Command::new("cat", r"Current Temperature:\s+(\d+) Celsius", None).unwrap();
        assert_eq!(command.run(Some(stdin), None).await.unwrap(), "27");
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = Command::new("true", "(unclosed", None).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn expand_vars_handles_both_forms() {
        let mapping = |name: &str| match name {
            "DEVICE" => "/dev/sda".to_string(),
            other => format!("${other}"),
        };
        assert_eq!(
            expand_vars("hdparm -C $DEVICE", &mapping),
            "hdparm -C /dev/sda"
        );
        assert_eq!(
            expand_vars("smartctl ${DEVICE} -x", &mapping),
            "smartctl /dev/sda -x"
        );
        assert_eq!(expand_vars("echo $HOME", &mapping), "echo $HOME");
        assert_eq!(expand_vars("cost: 5$", &mapping), "cost: 5$");
        assert_eq!(expand_vars("${unterminated", &mapping), "${unterminated");
    }

    #[test]
    fn passthrough_keeps_names() {
        assert_eq!(expand_vars("ipmitool $FAN_SPEED", &passthrough), "ipmitool $FAN_SPEED");
    }
}
