//! Command templates and bounded child-process execution
//!
//! Templates are split into shell words first and placeholders are filled in
//! per word. A placeholder that is a whole word becomes exactly one argv
//! element. A placeholder embedded in a longer word (usually a script handed
//! to `sh -c`) is shell-quoted, so the nested shell still sees one word.

use std::io::Read;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use regex::Regex;

use crate::clock::StopFlag;
use crate::error::LifecycleError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Only the tail of a failing command's stderr is kept for the error
const STDERR_TAIL: usize = 4096;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"))
}

/// Names of all `{placeholder}`s in `template`, in order of appearance
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Fail on the first placeholder not listed in `allowed`
pub fn check_placeholders(template: &str, allowed: &[&str]) -> Result<(), LifecycleError> {
    match placeholders(template)
        .into_iter()
        .find(|name| !allowed.contains(&name.as_str()))
    {
        Some(placeholder) => Err(LifecycleError::UnknownPlaceholder {
            template: template.to_string(),
            placeholder,
        }),
        None => Ok(()),
    }
}

/// A program plus its explicit argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Split `template` into words and substitute `values` inside each word
    pub fn from_template(template: &str, values: &[(&str, &str)]) -> Result<Self, LifecycleError> {
        let mut argv = render_words(template, values)?.into_iter();
        let program = argv
            .next()
            .ok_or_else(|| LifecycleError::BadTemplate(template.to_string()))?;
        Ok(Self {
            program,
            args: argv.collect(),
        })
    }

    /// Human-readable form for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|word| shlex::try_quote(word).map(|q| q.into_owned()).unwrap_or_else(|_| word.to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Split `template` into shell words and fill placeholders in each word
pub fn render_words(template: &str, values: &[(&str, &str)]) -> Result<Vec<String>, LifecycleError> {
    let words = shlex::split(template)
        .filter(|w| !w.is_empty())
        .ok_or_else(|| LifecycleError::BadTemplate(template.to_string()))?;

    words
        .iter()
        .map(|word| {
            let whole_word = placeholder_regex()
                .find(word)
                .is_some_and(|m| m.start() == 0 && m.end() == word.len());
            if whole_word {
                substitute(template, word, values)
            } else {
                substitute_with(template, word, values, true)
            }
        })
        .collect()
}

/// Fill placeholders in `text` as plain string replacement
pub fn substitute(template: &str, text: &str, values: &[(&str, &str)]) -> Result<String, LifecycleError> {
    substitute_with(template, text, values, false)
}

fn substitute_with(
    template: &str,
    text: &str,
    values: &[(&str, &str)],
    quote: bool,
) -> Result<String, LifecycleError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in placeholder_regex().captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str();
        let value = values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| LifecycleError::UnknownPlaceholder {
                template: template.to_string(),
                placeholder: name.to_string(),
            })?;
        out.push_str(&text[last..whole.start()]);
        if quote {
            let quoted = shlex::try_quote(value).map_err(|_| LifecycleError::Quote(value.to_string()))?;
            out.push_str(&quoted);
        } else {
            out.push_str(value);
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Why a bounded wait ended without an exit status
#[derive(Debug)]
pub enum WaitError {
    Timeout(Duration),
    Interrupted,
    Io(std::io::Error),
}

/// Poll `child` until it exits, the timeout passes or `stop` is triggered.
///
/// On timeout or interrupt the child is killed and reaped.
pub fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
    stop: &StopFlag,
) -> Result<ExitStatus, WaitError> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                let expired = timeout.map(|t| start.elapsed() >= t).unwrap_or(false);
                if expired || stop.is_triggered() {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(match timeout {
                        Some(t) if expired => WaitError::Timeout(t),
                        _ => WaitError::Interrupted,
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(WaitError::Io(e)),
        }
    }
}

/// Read `pipe` to the end on its own thread so a chatty child never blocks
/// on a full pipe
fn drain(pipe: Option<ChildStderr>) -> Option<JoinHandle<Vec<u8>>> {
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    }))
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

/// Run `spec` to completion with a timeout; non-zero exit is an error
pub fn run_checked(spec: &CommandSpec, timeout: Duration, stop: &StopFlag) -> Result<(), LifecycleError> {
    let mut child = spec
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| LifecycleError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
    let stderr = drain(child.stderr.take());

    let status = match wait_with_timeout(&mut child, Some(timeout), stop) {
        Ok(status) => status,
        Err(WaitError::Timeout(t)) => return Err(LifecycleError::Timeout(t)),
        Err(WaitError::Interrupted) => return Err(LifecycleError::Interrupted),
        Err(WaitError::Io(source)) => {
            return Err(LifecycleError::Spawn {
                program: spec.program.clone(),
                source,
            })
        }
    };

    if status.success() {
        return Ok(());
    }

    let stderr = stderr
        .and_then(|handle| handle.join().ok())
        .map(|bytes| tail(&bytes))
        .unwrap_or_default();
    Err(LifecycleError::NonZeroExit {
        code: status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string()),
        stderr,
    })
}
