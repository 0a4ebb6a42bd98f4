//! Fixer backed by an external executable.
//!
//! Each request spawns the program once, writes one JSON document to its
//! stdin and reads one JSON document from its stdout. Request:
//!
//! ```json
//! {"kind": "reference_origins", "block_type": "resource", "block_name": "widget",
//!  "version": 1, "raw_contents": ["widget.x.id"]}
//! {"kind": "definition", "block_type": "datasource", "block_name": "widget",
//!  "version": 0, "raw_content": "data \"widget\" \"d\" {}", "raw_state": {...}}
//! ```
//!
//! Response: `{"raw_contents": [...]}` or `{"raw_content": "..."}`, or
//! `{"error": "message"}` to report a failure. A non-zero exit status is a
//! failure too, with stderr as the message. The child is killed when the
//! cancel token fires.

use crate::cancel::CancelToken;
use crate::fixer::{
    check_arity, FixDefinitionRequest, FixDefinitionResponse, FixReferenceOriginsRequest,
    FixReferenceOriginsResponse, Fixer, FixerError,
};
use crate::schema::BlockType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::debug;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireRequest<'a> {
    ReferenceOrigins {
        block_type: BlockType,
        block_name: &'a str,
        version: i64,
        raw_contents: Vec<String>,
    },
    Definition {
        block_type: BlockType,
        block_name: &'a str,
        version: i64,
        raw_content: String,
        raw_state: Option<serde_json::Value>,
    },
}

#[derive(Deserialize)]
struct OriginsReply {
    #[serde(default)]
    raw_contents: Option<Vec<String>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct DefinitionReply {
    #[serde(default)]
    raw_content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandFixer {
    program: PathBuf,
    args: Vec<String>,
    poll_interval: Duration,
}

impl CommandFixer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn call<T: DeserializeOwned>(
        &self,
        cancel: &CancelToken,
        request: &WireRequest<'_>,
    ) -> Result<T, FixerError> {
        if cancel.is_cancelled() {
            return Err(FixerError::Cancelled);
        }
        let input = serde_json::to_vec(request)
            .map_err(|e| FixerError::Protocol(format!("encoding request: {e}")))?;

        debug!(program = %self.program.display(), bytes = input.len(), "invoking fixer command");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FixerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let writer = thread::spawn(move || -> io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input)?;
            }
            Ok(())
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if cancel.is_cancelled() {
                debug!(program = %self.program.display(), "killing fixer command");
                // The child may already have exited on its own.
                let _ = child.kill();
                let _ = child.wait();
                return Err(FixerError::Cancelled);
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => thread::sleep(self.poll_interval),
            }
        };

        match join(writer)? {
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e.into()),
            _ => {}
        }
        let stdout = join(stdout)??;
        let stderr = join(stderr)??;

        if !status.success() {
            return Err(FixerError::Exit {
                program: self.program.clone(),
                status,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        serde_json::from_slice(&stdout)
            .map_err(|e| FixerError::Protocol(format!("decoding response: {e}")))
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join<T>(handle: thread::JoinHandle<T>) -> Result<T, FixerError> {
    handle
        .join()
        .map_err(|_| FixerError::Protocol("fixer I/O thread panicked".to_string()))
}

/// Request text as a JSON string; bytes that are not UTF-8 fail the call
/// instead of being replaced.
fn utf8(bytes: &[u8], what: &str) -> Result<String, FixerError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| {
        FixerError::Protocol(format!(
            "{what} is not valid UTF-8 at byte {}",
            e.utf8_error().valid_up_to()
        ))
    })
}

impl Fixer for CommandFixer {
    fn fix_reference_origins(
        &self,
        cancel: &CancelToken,
        req: &FixReferenceOriginsRequest,
    ) -> Result<FixReferenceOriginsResponse, FixerError> {
        let raw_contents = req
            .raw_contents
            .iter()
            .map(|c| utf8(c, "reference origin"))
            .collect::<Result<Vec<_>, _>>()?;
        let reply: OriginsReply = self.call(
            cancel,
            &WireRequest::ReferenceOrigins {
                block_type: req.block_type,
                block_name: &req.block_name,
                version: req.version,
                raw_contents,
            },
        )?;
        if let Some(message) = reply.error {
            return Err(FixerError::Failed(message));
        }
        let contents = reply
            .raw_contents
            .ok_or_else(|| FixerError::Protocol("the fixer returned a null result".to_string()))?;

        let resp = FixReferenceOriginsResponse {
            raw_contents: contents.into_iter().map(String::into_bytes).collect(),
        };
        check_arity(req, &resp)?;
        Ok(resp)
    }

    fn fix_definition(
        &self,
        cancel: &CancelToken,
        req: &FixDefinitionRequest,
    ) -> Result<FixDefinitionResponse, FixerError> {
        let raw_state: Option<serde_json::Value> = req
            .raw_state
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()
            .map_err(|e| FixerError::Protocol(format!("prior state is not JSON: {e}")))?;

        let reply: DefinitionReply = self.call(
            cancel,
            &WireRequest::Definition {
                block_type: req.block_type,
                block_name: &req.block_name,
                version: req.version,
                raw_content: utf8(&req.raw_content, "definition")?,
                raw_state,
            },
        )?;
        if let Some(message) = reply.error {
            return Err(FixerError::Failed(message));
        }
        let content = reply
            .raw_content
            .ok_or_else(|| FixerError::Protocol("the fixer returned a null result".to_string()))?;
        Ok(FixDefinitionResponse {
            raw_content: content.into_bytes(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn shell(script: &str) -> CommandFixer {
        CommandFixer::new("sh").with_args(["-c", script])
    }

    fn origins(n: usize) -> FixReferenceOriginsRequest {
        FixReferenceOriginsRequest {
            block_type: BlockType::Resource,
            block_name: "widget".to_string(),
            version: 1,
            raw_contents: vec![b"widget.x.id".to_vec(); n],
        }
    }

    #[test]
    fn test_reference_origins_round_trip() {
        let fixer = shell(r#"cat >/dev/null; echo '{"raw_contents":["a","b"]}'"#);
        let resp = fixer
            .fix_reference_origins(&CancelToken::new(), &origins(2))
            .unwrap();
        assert_eq!(resp.raw_contents, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_request_is_sent_on_stdin() {
        let dir = tempfile::TempDir::new().unwrap();
        let captured = dir.path().join("request.json");
        let script = format!(
            r#"cat > '{}'; echo '{{"raw_content":"data {{}}"}}'"#,
            captured.display()
        );
        let req = FixDefinitionRequest {
            block_type: BlockType::DataSource,
            block_name: "widget".to_string(),
            version: 3,
            raw_content: b"data {}".to_vec(),
            raw_state: Some(br#"{"id":"1"}"#.to_vec()),
        };
        let resp = shell(&script).fix_definition(&CancelToken::new(), &req).unwrap();
        assert_eq!(resp.raw_content, b"data {}".to_vec());

        let sent: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&captured).unwrap()).unwrap();
        assert_eq!(sent["kind"], "definition");
        assert_eq!(sent["block_type"], "datasource");
        assert_eq!(sent["block_name"], "widget");
        assert_eq!(sent["version"], 3);
        assert_eq!(sent["raw_content"], "data {}");
        assert_eq!(sent["raw_state"]["id"], "1");
    }

    #[test]
    fn test_arity_mismatch() {
        let fixer = shell(r#"cat >/dev/null; echo '{"raw_contents":["only"]}'"#);
        let err = fixer
            .fix_reference_origins(&CancelToken::new(), &origins(2))
            .unwrap_err();
        assert!(matches!(err, FixerError::ArityMismatch { expected: 2, got: 1 }));
    }

    #[test]
    fn test_non_utf8_request_is_not_sent() {
        let marker = tempfile::NamedTempFile::new().unwrap();
        let fixer = shell(&format!(
            "echo called > '{}'; echo '{{\"raw_contents\":[\"a\"]}}'",
            marker.path().display()
        ));
        let mut req = origins(1);
        req.raw_contents = vec![b"widget.x.\xffid".to_vec()];

        let err = fixer
            .fix_reference_origins(&CancelToken::new(), &req)
            .unwrap_err();
        assert!(matches!(err, FixerError::Protocol(ref m) if m.contains("byte 9")));
        assert!(std::fs::read(marker.path()).unwrap().is_empty());

        let def = FixDefinitionRequest {
            block_type: BlockType::Resource,
            block_name: "widget".to_string(),
            version: 1,
            raw_content: b"resource \"widget\" \"\xfe\" {}".to_vec(),
            raw_state: None,
        };
        let err = fixer.fix_definition(&CancelToken::new(), &def).unwrap_err();
        assert!(matches!(err, FixerError::Protocol(ref m) if m.starts_with("definition")));
    }

    #[test]
    fn test_reported_error() {
        let fixer = shell(r#"cat >/dev/null; echo '{"error":"unsupported version"}'"#);
        let err = fixer
            .fix_reference_origins(&CancelToken::new(), &origins(1))
            .unwrap_err();
        assert!(matches!(err, FixerError::Failed(ref m) if m == "unsupported version"));
    }

    #[test]
    fn test_null_result() {
        let fixer = shell(r#"cat >/dev/null; echo '{}'"#);
        let err = fixer
            .fix_reference_origins(&CancelToken::new(), &origins(1))
            .unwrap_err();
        assert!(matches!(err, FixerError::Protocol(_)));
    }

    #[test]
    fn test_non_zero_exit() {
        let fixer = shell("cat >/dev/null; echo boom >&2; exit 3");
        let err = fixer
            .fix_reference_origins(&CancelToken::new(), &origins(1))
            .unwrap_err();
        match err {
            FixerError::Exit { stderr, status, .. } => {
                assert_eq!(stderr, "boom");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program() {
        let fixer = CommandFixer::new("/nonexistent/terraform-provider-widget");
        let err = fixer
            .fix_reference_origins(&CancelToken::new(), &origins(1))
            .unwrap_err();
        assert!(matches!(err, FixerError::Spawn { .. }));
    }

    #[test]
    fn test_cancel_kills_child() {
        let fixer = shell("sleep 5");
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.cancel();
        });

        let started = Instant::now();
        let err = fixer.fix_reference_origins(&cancel, &origins(1)).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, FixerError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
