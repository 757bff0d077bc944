//! Robot SDK reached through a helper process speaking JSON lines.
//!
//! One helper per robot serial: `<bridge cmd...> <serial>`. Each request is a
//! single JSON object on the helper's stdin, answered by one line on stdout
//! of the form `{"ok":true, ...payload}` or `{"ok":false,"error":"..."}`.
//!
//! Replies are read on a dedicated thread and awaited with a deadline, so a
//! stalled helper turns into a `Robot` error instead of hanging the caller.
//! After a missed deadline the helper is killed and the link stays down.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Mode, Primitive, RobotClient};
use crate::error::{CalibError, Result};
use crate::types::RobotStates;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    States,
    Mode,
    SwitchMode { mode: &'a str },
    ExecutePrimitive { name: &'a str, params: Value },
    Stop,
}

#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

fn primitive_params(primitive: &Primitive) -> Value {
    match primitive {
        Primitive::MoveJ {
            target_deg,
            jnt_vel_scale,
        } => serde_json::json!({
            "target": target_deg,
            "jntVelScale": jnt_vel_scale,
        }),
    }
}

pub struct BridgeRobot {
    serial: String,
    child: Child,
    stdin: ChildStdin,
    replies: Receiver<io::Result<String>>,
    timeout: Duration,
    stalled: bool,
}

impl BridgeRobot {
    /// Spawn the helper `command` (program plus arguments) for `serial`.
    /// Every request fails once `timeout` passes without a reply.
    pub fn connect(command: &[String], serial: &str, timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CalibError::Config("empty robot bridge command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .arg(serial)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| CalibError::Robot(format!("{serial}: cannot start bridge {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CalibError::Robot(format!("{serial}: bridge stdin unavailable")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CalibError::Robot(format!("{serial}: bridge stdout unavailable")))?;

        let (tx, replies) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("bridge-{serial}"))
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CalibError::Robot(format!("{serial}: cannot start reply reader: {e}")));
        }

        log::info!("[bridge {}] connected via {}", serial, program);
        Ok(Self {
            serial: serial.to_string(),
            child,
            stdin,
            replies,
            timeout,
            stalled: false,
        })
    }

    fn request(&mut self, request: &Request<'_>) -> Result<Map<String, Value>> {
        if self.stalled {
            return Err(CalibError::Robot(format!("{}: bridge stalled earlier", self.serial)));
        }
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|_| self.stdin.flush())
            .map_err(|e| self.link_error(e))?;

        let reply = match self.replies.recv_timeout(self.timeout) {
            Ok(line) => line.map_err(|e| self.link_error(e))?,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CalibError::Robot(format!("{}: bridge closed", self.serial)));
            }
            Err(RecvTimeoutError::Timeout) => {
                // A late reply would be taken as the answer to the next request
                self.stalled = true;
                let _ = self.child.kill();
                log::error!("[bridge {}] no reply within {:?}, helper killed", self.serial, self.timeout);
                return Err(CalibError::Robot(format!(
                    "{}: no reply within {:.1}s",
                    self.serial,
                    self.timeout.as_secs_f64()
                )));
            }
        };

        let reply: Reply = serde_json::from_str(reply.trim())
            .map_err(|e| CalibError::Robot(format!("{}: malformed reply: {}", self.serial, e)))?;
        if !reply.ok {
            let message = reply.error.unwrap_or_else(|| "unspecified error".to_string());
            return Err(CalibError::Robot(format!("{}: {}", self.serial, message)));
        }
        Ok(reply.payload)
    }

    fn link_error(&self, e: io::Error) -> CalibError {
        CalibError::Robot(format!("{}: bridge I/O: {}", self.serial, e))
    }
}

impl RobotClient for BridgeRobot {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn states(&mut self) -> Result<RobotStates> {
        let payload = self.request(&Request::States)?;
        serde_json::from_value(Value::Object(payload))
            .map_err(|e| CalibError::Robot(format!("{}: bad states payload: {}", self.serial, e)))
    }

    fn mode(&mut self) -> Result<Mode> {
        let payload = self.request(&Request::Mode)?;
        match payload.get("mode").and_then(Value::as_str) {
            Some(mode) => Ok(Mode(mode.to_string())),
            None => Err(CalibError::Robot(format!("{}: reply has no mode", self.serial))),
        }
    }

    fn switch_mode(&mut self, mode: &Mode) -> Result<()> {
        self.request(&Request::SwitchMode { mode: &mode.0 }).map(|_| ())
    }

    fn execute_primitive(&mut self, primitive: &Primitive) -> Result<()> {
        log::debug!("[bridge {}] {} {:?}", self.serial, primitive.name(), primitive);
        self.request(&Request::ExecutePrimitive {
            name: primitive.name(),
            params: primitive_params(primitive),
        })
        .map(|_| ())
    }

    fn stop(&mut self) -> Result<()> {
        self.request(&Request::Stop).map(|_| ())
    }
}

impl Drop for BridgeRobot {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
