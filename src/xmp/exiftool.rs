//! Long-lived exiftool process in `-stay_open` mode.
//!
//! Starting exiftool costs a Perl interpreter boot per call; over a batch of
//! tens of thousands of assets that dominates the run. One process is started
//! at batch start and fed argument files over stdin:
//!
//! ```text
//! stdin:   -xmp\n-b\n/path/IMG_0001.CR2\n-api\nLargeFileSupport=1\n-execute\n
//! stdout:  <x:xmpmeta …>…</x:xmpmeta>{ready}\n
//! ```
//!
//! Workers share the handle; the pipes sit behind a `Mutex`, so requests are
//! serialized. Dropping the handle sends `-stay_open False` and reaps the
//! child.

use super::extractor::{ExtractError, RawExtractor};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, warn};

const READY_MARKER: &[u8] = b"{ready}";

struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Shared handle to a running exiftool process.
pub struct ExifTool {
    session: Mutex<Session>,
}

impl ExifTool {
    /// Spawn `program -stay_open True -@ -`.
    pub fn start(program: &Path) -> Result<Self, ExtractError> {
        let mut child = Command::new(program)
            .args(["-stay_open", "True", "-@", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    ExtractError::Tool(format!("{} not found", program.display()))
                } else {
                    ExtractError::Io(err)
                }
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractError::Tool("exiftool stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Tool("exiftool stdout unavailable".into()))?;
        debug!(program = %program.display(), pid = child.id(), "started exiftool");

        Ok(Self {
            session: Mutex::new(Session {
                child,
                stdin,
                stdout: BufReader::new(stdout),
            }),
        })
    }

    /// Run one command and return its raw stdout (without the ready marker).
    pub fn execute(&self, args: &[&str]) -> Result<Vec<u8>, ExtractError> {
        if args.iter().any(|a| a.contains('\n')) {
            return Err(ExtractError::Tool(
                "exiftool arguments cannot contain newlines".into(),
            ));
        }
        let mut session = self
            .session
            .lock()
            .map_err(|_| ExtractError::Tool("exiftool session poisoned".into()))?;

        let mut request = String::new();
        for arg in args {
            request.push_str(arg);
            request.push('\n');
        }
        request.push_str("-execute\n");
        session.stdin.write_all(request.as_bytes())?;
        session.stdin.flush()?;

        let mut output = Vec::new();
        loop {
            let n = session.stdout.read_until(b'\n', &mut output)?;
            if n == 0 {
                return Err(ExtractError::Tool("exiftool exited unexpectedly".into()));
            }
            if let Some(end) = strip_ready(&output) {
                output.truncate(end);
                return Ok(output);
            }
        }
    }
}

/// Length of `output` before a trailing `{ready}` line, if present.
fn strip_ready(output: &[u8]) -> Option<usize> {
    let trimmed = output.strip_suffix(b"\n")?;
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    let body = trimmed.strip_suffix(READY_MARKER)?;
    Some(body.len())
}

impl RawExtractor for ExifTool {
    fn extract_raw(&self, path: &Path) -> Result<Option<String>, ExtractError> {
        let path_arg = path.to_string_lossy();
        let out = self.execute(&["-xmp", "-b", &*path_arg, "-api", "LargeFileSupport=1"])?;
        Ok(Some(String::from_utf8_lossy(&out).into_owned()))
    }
}

impl Drop for ExifTool {
    fn drop(&mut self) {
        let session = match self.session.get_mut() {
            Ok(session) => session,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = session
            .stdin
            .write_all(b"-stay_open\nFalse\n")
            .and_then(|()| session.stdin.flush())
        {
            warn!(error = %err, "failed to ask exiftool to exit");
            let _ = session.child.kill();
        }
        match session.child.wait() {
            Ok(status) => debug!(%status, "exiftool exited"),
            Err(err) => warn!(error = %err, "failed to reap exiftool"),
        }
    }
}
