//! Interactive attendance shell.
//!
//! One command per line on stdin. Every failure becomes a notice; nothing
//! a student or instructor types can end the process except `quit`.

use crate::engine::{EngineError, FaceEngine, SharedClassroom};
use chrono::{Local, Utc};
use rollcall_core::{Accepted, AttendanceError};
use std::fmt::Write as _;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
commands:
  start                         start a session
  restart                       replace the live session with a new one
  stop                          stop the session
  status                        session, PIN and counts
  qr                            QR payload and image URL for the session
  dashboard                     per-student records, sorted by name
  roster                        list students
  checkin <id> <pin> <payload>  QR + PIN check-in (payload is the QR JSON)
  enroll <id>                   store a face template from the camera
  recognize <id>                liveness + face match check-in
  cancel <id>                   abort a running recognition
  export [dir]                  write <session>.csv
  copy                          print tab-separated rows for a spreadsheet
  help
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Restart,
    Stop,
    Status,
    Qr,
    Dashboard,
    Roster,
    CheckIn {
        student: String,
        pin: String,
        payload: String,
    },
    Enroll(String),
    Recognize(String),
    Cancel(String),
    Export(Option<PathBuf>),
    Copy,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let student = |cmd: fn(String) -> Command| {
        if rest.is_empty() || rest.contains(char::is_whitespace) {
            Err(format!("usage: {word} <student-id>"))
        } else {
            Ok(cmd(rest.to_string()))
        }
    };

    let command = match word {
        "start" => Command::Start,
        "restart" => Command::Restart,
        "stop" => Command::Stop,
        "status" => Command::Status,
        "qr" => Command::Qr,
        "dashboard" | "ls" => Command::Dashboard,
        "roster" => Command::Roster,
        "checkin" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(student), Some(pin), Some(payload)) if !student.is_empty() => {
                    Command::CheckIn {
                        student: student.to_string(),
                        pin: pin.to_string(),
                        payload: payload.trim().to_string(),
                    }
                }
                _ => return Err("usage: checkin <student-id> <pin> <qr-payload>".into()),
            }
        }
        "enroll" => student(Command::Enroll)?,
        "recognize" => student(Command::Recognize)?,
        "cancel" => student(Command::Cancel)?,
        "export" => Command::Export((!rest.is_empty()).then(|| PathBuf::from(rest))),
        "copy" => Command::Copy,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {other} (try `help`)")),
    };
    Ok(Some(command))
}

/// What the shell prints after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub ok: bool,
    pub text: String,
}

impl Reply {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            text: text.into(),
        }
    }

    fn notice(text: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: text.into(),
        }
    }

    fn render(&self) -> String {
        let tag = if self.ok { "Success" } else { "Notice" };
        format!("[{tag}] {}", self.text)
    }
}

/// User-facing wording for engine and attendance failures.
pub fn notice_for(err: &EngineError) -> String {
    match err {
        EngineError::Attendance(e) => attendance_notice(e),
        EngineError::CameraUnavailable(_) => "Camera access denied or unavailable.".into(),
        EngineError::NoTemplateEnrolled(_) => "No face enrolled. Please enroll first.".into(),
        EngineError::LivenessFailed { .. } => {
            "Liveness check failed. Blink or turn your head and try again.".into()
        }
        EngineError::FaceMismatch { .. } => {
            "Face mismatch. Ensure good lighting and frame your face.".into()
        }
        EngineError::CheckInInProgress(_) => "Already checking, please wait.".into(),
        EngineError::Cancelled => "Check-in cancelled.".into(),
        other => format!("Recognition failed: {other}"),
    }
}

fn attendance_notice(err: &AttendanceError) -> String {
    match err {
        AttendanceError::NoActiveSession => "No active session.".into(),
        AttendanceError::SessionAlreadyActive => {
            "A session is already live. Use `restart` to replace it.".into()
        }
        AttendanceError::UnknownStudent(_) => "Student not found.".into(),
        AttendanceError::CredentialMismatch => "QR or PIN mismatch.".into(),
        AttendanceError::MalformedCredential(_) => {
            "Invalid QR data. Paste QR content from the session code.".into()
        }
    }
}

fn accepted_text(accepted: &Accepted) -> String {
    if accepted.duplicate {
        format!("Duplicate check-in ({}).", accepted.status)
    } else {
        format!("Checked in ({}).", accepted.status)
    }
}

pub struct Shell {
    classroom: SharedClassroom,
    engine: FaceEngine,
    export_dir: PathBuf,
}

impl Shell {
    pub fn new(classroom: SharedClassroom, engine: FaceEngine, export_dir: PathBuf) -> Self {
        Self {
            classroom,
            engine,
            export_dir,
        }
    }

    /// Read commands from stdin until `quit` or end of input.
    pub async fn run(&self) -> anyhow::Result<()> {
        println!("rollcall: type `help` for commands");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let command = match parse_command(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(usage) => {
                    println!("{}", Reply::notice(usage).render());
                    continue;
                }
            };
            if command == Command::Quit {
                break;
            }
            if let Command::Recognize(student) = command {
                self.spawn_recognition(student);
                continue;
            }
            println!("{}", self.handle(command).await.render());
        }
        Ok(())
    }

    /// Run a recognition in the background so `cancel` stays usable.
    fn spawn_recognition(&self, student: String) {
        if self.engine.is_busy(&student) {
            println!(
                "{}",
                Reply::notice(notice_for(&EngineError::CheckInInProgress(student))).render()
            );
            return;
        }
        println!("Checking {student}… blink or turn your head slightly.");
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let reply = match engine.recognize(&student).await {
                Ok(accepted) => Reply::ok(format!("{student}: {}", accepted_text(&accepted))),
                Err(e) => {
                    tracing::debug!(student = %student, error = %e, "recognition failed");
                    Reply::notice(format!("{student}: {}", notice_for(&e)))
                }
            };
            println!("{}", reply.render());
        });
    }

    pub async fn handle(&self, command: Command) -> Reply {
        match command {
            Command::Start => {
                let mut room = self.classroom.lock().await;
                match room.start(Utc::now()) {
                    Ok(session) => Reply::ok(session_line(session)),
                    Err(e) => Reply::notice(attendance_notice(&e)),
                }
            }
            Command::Restart => {
                let mut room = self.classroom.lock().await;
                Reply::ok(session_line(room.restart(Utc::now())))
            }
            Command::Stop => {
                let mut room = self.classroom.lock().await;
                let session = room.stop();
                Reply::ok(format!(
                    "Session {} stopped.",
                    session.id().unwrap_or("—")
                ))
            }
            Command::Status => Reply::ok(self.status().await),
            Command::Qr => {
                let room = self.classroom.lock().await;
                match room.qr_payload() {
                    Some(payload) => Reply::ok(format!(
                        "PIN: {}\npayload: {}\nimage: {}",
                        payload.pin,
                        payload.to_json(),
                        payload.image_url()
                    )),
                    None => Reply::notice("Start a session to generate QR and PIN."),
                }
            }
            Command::Dashboard => Reply::ok(self.dashboard().await),
            Command::Roster => {
                let room = self.classroom.lock().await;
                let mut out = String::new();
                for student in room.roster() {
                    let enrolled = match self.engine.has_template(&student.id) {
                        Ok(true) => "face enrolled",
                        Ok(false) => "enrollment needed",
                        Err(_) => "template store unavailable",
                    };
                    let _ = writeln!(out, "{:<8} {:<24} {enrolled}", student.id, student.name);
                }
                Reply::ok(out.trim_end().to_string())
            }
            Command::CheckIn {
                student,
                pin,
                payload,
            } => {
                let mut room = self.classroom.lock().await;
                match room.check_in_qr(&student, &payload, &pin, Utc::now()) {
                    Ok(accepted) => Reply::ok(accepted_text(&accepted)),
                    Err(e) => Reply::notice(attendance_notice(&e)),
                }
            }
            Command::Enroll(student) => match self.engine.enroll(&student).await {
                Ok(()) => Reply::ok("Face enrolled for this device."),
                Err(e) => Reply::notice(notice_for(&e)),
            },
            Command::Recognize(student) => match self.engine.recognize(&student).await {
                Ok(accepted) => Reply::ok(accepted_text(&accepted)),
                Err(e) => Reply::notice(notice_for(&e)),
            },
            Command::Cancel(student) => {
                if self.engine.cancel(&student) {
                    Reply::ok(format!("Cancelled check-in for {student}."))
                } else {
                    Reply::notice(format!("No check-in running for {student}."))
                }
            }
            Command::Export(dir) => self.export(dir).await,
            Command::Copy => Reply::ok(self.classroom.lock().await.export_tsv()),
            Command::Help => Reply::ok(HELP),
            Command::Quit => Reply::ok("bye"),
        }
    }

    async fn status(&self) -> String {
        let room = self.classroom.lock().await;
        let session = room.session();
        let stats = room.stats();
        format!(
            "session: {} ({})\nPIN: {}\npresent: {}  late: {}  absent: {}  attendance: {}%",
            session.id().unwrap_or("—"),
            if session.is_active() { "live" } else { "idle" },
            session.pin().unwrap_or("—"),
            stats.present,
            stats.late,
            stats.absent,
            room.attendance_pct()
        )
    }

    async fn dashboard(&self) -> String {
        let room = self.classroom.lock().await;
        let mut out = format!(
            "{:<2}{:<24} {:<8} {:<8} {:<6} {}\n",
            "", "Name", "ID", "Status", "Method", "Check-In Time"
        );
        for record in room.ledger().sorted_by_name() {
            let _ = writeln!(
                out,
                "{:<2}{:<24} {:<8} {:<8} {:<6} {}",
                if record.duplicate { "!" } else { "" },
                record.name,
                record.id,
                record.status,
                record.method.map(|m| m.as_str()).unwrap_or("—"),
                record
                    .check_in_time
                    .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "—".into())
            );
        }
        let _ = write!(out, "attendance: {}%", room.attendance_pct());
        out
    }

    async fn export(&self, dir: Option<PathBuf>) -> Reply {
        let (name, csv) = {
            let room = self.classroom.lock().await;
            (room.export_file_name(), room.export_csv())
        };
        let path = dir.unwrap_or_else(|| self.export_dir.clone()).join(name);
        match tokio::fs::write(&path, csv).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "attendance exported");
                Reply::ok(format!("Wrote {}", path.display()))
            }
            Err(e) => Reply::notice(format!("Export failed: {e}")),
        }
    }
}

fn session_line(session: &rollcall_core::Session) -> String {
    format!(
        "Session {} started. PIN {}.",
        session.id().unwrap_or("—"),
        session.pin().unwrap_or("—")
    )
}
