//! One dispatcher process on one host
//!
//! A [`Session`] creates a private working directory on the host, uploads
//! the agent binary into it, launches the dispatcher and then exchanges
//! framed commands with it one at a time. Stopping sends `BYE`, waits for
//! the acknowledgement and removes the working directory; dropping a
//! session that was not stopped tears it down best-effort.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::Child;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use declarative::CommandChannel;
use protocol::{Command, Frame, Response, STOP_SENTINEL, read_ack, read_frame, write_frame};
use rand::Rng;
use thiserror::Error;

use crate::transport::{RemoteProcess, Transport, shell_quote};

/// Name of the uploaded agent inside the working directory
pub const AGENT_NAME: &str = "stagehand-agent";

const WORKDIR_PREFIX: &str = "stagehand_";
const WORKDIR_SUFFIX_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The host rejected the credentials; retry with a new one.
    #[error("authentication to {0} failed")]
    Auth(String),

    #[error("{0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] protocol::Error),

    #[error("dispatcher terminated unexpectedly: {diagnostic}")]
    DispatcherCrashed { diagnostic: String },

    #[error("no response from dispatcher within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Config(String),
}

/// Settings for starting a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Parent of the working directory on the host
    pub remote_tmp: String,
    /// Local agent binary to upload
    pub agent_binary: PathBuf,
    pub response_timeout: Duration,
}

/// What the reader thread should read next
enum Expect {
    Ack,
    Frame,
}

enum Reply {
    Ack(protocol::Result<()>),
    Frame(protocol::Result<Frame>),
}

/// Reads from the dispatcher's stdout on behalf of the session, so waits
/// can time out.
fn spawn_reader(mut stdout: Box<dyn Read + Send>) -> (Sender<Expect>, Receiver<Reply>) {
    let (request_tx, request_rx) = mpsc::channel::<Expect>();
    let (reply_tx, reply_rx) = mpsc::channel();

    thread::spawn(move || {
        for expect in request_rx {
            let reply = match expect {
                Expect::Ack => Reply::Ack(read_ack(&mut stdout)),
                Expect::Frame => Reply::Frame(read_frame(&mut stdout)),
            };
            if reply_tx.send(reply).is_err() {
                break;
            }
        }
    });

    (request_tx, reply_rx)
}

/// `<remote_tmp>/stagehand_<10 random [0-9a-z]>`
fn working_directory(remote_tmp: &str) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..WORKDIR_SUFFIX_LEN)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect();
    format!("{}/{WORKDIR_PREFIX}{suffix}", remote_tmp.trim_end_matches('/'))
}

pub struct Session<T: Transport> {
    transport: T,
    workdir: String,
    stdin: Option<Box<dyn Write + Send>>,
    child: Option<Child>,
    requests: Sender<Expect>,
    replies: Receiver<Reply>,
    timeout: Duration,
    staged: usize,
    /// The exchange can no longer be trusted; skip the goodbye.
    broken: bool,
    stopped: bool,
}

impl<T: Transport> Session<T> {
    /// Prepare the working directory, launch the dispatcher and wait for
    /// its readiness ack.
    pub fn start(mut transport: T, options: &SessionOptions) -> Result<Self, SessionError> {
        let agent = std::fs::read(&options.agent_binary).map_err(|e| {
            SessionError::Config(format!(
                "could not read agent binary {}: {e}",
                options.agent_binary.display()
            ))
        })?;

        let workdir = working_directory(&options.remote_tmp);
        let quoted = shell_quote(&workdir);
        let created = transport.exec(&format!("mkdir -p -m 700 {quoted}"))?;
        if !created.success() {
            return Err(SessionError::Transport(format!(
                "could not create working directory '{workdir}': {}",
                created.stderr
            )));
        }
        log::info!("working directory '{workdir}'");

        let agent_path = format!("{workdir}/{AGENT_NAME}");
        let launched = transport
            .upload(&agent, &agent_path)
            .and_then(|()| transport.exec(&format!("chmod 700 {}", shell_quote(&agent_path))))
            .and_then(|_| {
                transport.spawn(&format!(
                    "cd {quoted} && ./{AGENT_NAME} agent 2>>agent.log"
                ))
            });
        let process = match launched {
            Ok(process) => process,
            Err(e) => {
                remove_directory(&mut transport, &workdir);
                return Err(e);
            }
        };

        let RemoteProcess {
            stdin,
            stdout,
            child,
        } = process;
        let (requests, replies) = spawn_reader(stdout);

        let mut session = Self {
            transport,
            workdir,
            stdin: Some(stdin),
            child,
            requests,
            replies,
            timeout: options.response_timeout,
            staged: 0,
            broken: false,
            stopped: false,
        };

        match session.receive(Expect::Ack)? {
            Reply::Ack(Ok(())) => {
                log::debug!("dispatcher ready");
                Ok(session)
            }
            Reply::Ack(Err(e)) => Err(session.stream_failed(e)),
            Reply::Frame(_) => Err(SessionError::Transport(
                "reader answered out of turn".to_string(),
            )),
        }
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    /// Send one command and wait for its response.
    pub fn execute(&mut self, command: &Command) -> Result<Response, SessionError> {
        let json = command.to_json()?;
        log::debug!("==>> {}: {}", command.name(), json);
        self.send(json.as_bytes())?;

        let payload = match self.receive(Expect::Frame)? {
            Reply::Frame(Ok(Frame::Message(payload))) => payload,
            Reply::Frame(Ok(Frame::End)) => return Err(self.crashed()),
            Reply::Frame(Err(e)) => return Err(self.stream_failed(e)),
            Reply::Ack(_) => {
                self.broken = true;
                return Err(SessionError::Transport(
                    "reader answered out of turn".to_string(),
                ));
            }
        };

        let response = Response::from_json(&payload).inspect_err(|_| self.broken = true)?;
        log::debug!(
            "<<== {}: {}",
            response.name(),
            String::from_utf8_lossy(&payload)
        );
        Ok(response)
    }

    /// Upload raw content, outside the framed exchange.
    pub fn put_data(&mut self, data: &[u8], remote_path: &str) -> Result<(), SessionError> {
        self.transport.upload(data, remote_path)
    }

    /// A fresh path for staged content inside the working directory.
    pub fn staging_path(&mut self) -> String {
        self.staged += 1;
        format!("{}/staged-{}", self.workdir, self.staged)
    }

    /// Stop the dispatcher and remove the working directory.
    pub fn stop(mut self) -> Result<(), SessionError> {
        self.shutdown()
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(SessionError::Transport("session already stopped".to_string()));
        };
        match write_frame(stdin, payload) {
            Ok(()) => Ok(()),
            Err(protocol::Error::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                Err(self.crashed())
            }
            Err(e) => {
                self.broken = true;
                Err(e.into())
            }
        }
    }

    fn receive(&mut self, expect: Expect) -> Result<Reply, SessionError> {
        if self.requests.send(expect).is_err() {
            return Err(self.crashed());
        }
        match self.replies.recv_timeout(self.timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => {
                self.broken = true;
                Err(SessionError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.crashed()),
        }
    }

    /// A read failed: premature close means the dispatcher died.
    fn stream_failed(&mut self, error: protocol::Error) -> SessionError {
        match error {
            protocol::Error::Closed | protocol::Error::Truncated { .. } => self.crashed(),
            other => {
                self.broken = true;
                other.into()
            }
        }
    }

    /// Collect the dispatcher's diagnostic file.
    fn crashed(&mut self) -> SessionError {
        self.broken = true;
        let path = shell_quote(&format!("{}/{}", self.workdir, agent::ERROR_LOG));
        let diagnostic = match self.transport.exec(&format!("cat {path}")) {
            Ok(output) if output.success() && !output.stdout_text().is_empty() => {
                output.stdout_text()
            }
            Ok(_) => "connection closed, no diagnostic recorded".to_string(),
            Err(e) => format!("connection closed, diagnostic unavailable: {e}"),
        };
        SessionError::DispatcherCrashed { diagnostic }
    }

    fn say_goodbye(&mut self) -> Result<(), SessionError> {
        self.send(STOP_SENTINEL)?;
        match self.receive(Expect::Ack)? {
            Reply::Ack(Ok(())) => Ok(()),
            Reply::Ack(Err(e)) => Err(self.stream_failed(e)),
            Reply::Frame(_) => Err(SessionError::Transport(
                "reader answered out of turn".to_string(),
            )),
        }
    }

    fn shutdown(&mut self) -> Result<(), SessionError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let result = if self.broken {
            Ok(())
        } else {
            self.say_goodbye()
        };

        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            if self.broken || result.is_err() {
                let _ = child.kill();
            }
            let _ = child.wait();
        }

        remove_directory(&mut self.transport, &self.workdir);
        log::debug!("session in '{}' stopped", self.workdir);
        result
    }
}

fn remove_directory<T: Transport>(transport: &mut T, workdir: &str) {
    match transport.exec(&format!("rm -rf {}", shell_quote(workdir))) {
        Ok(output) if output.success() => {}
        Ok(output) => log::warn!("could not remove '{}': {}", workdir, output.stderr),
        Err(e) => log::warn!("could not remove '{}': {}", workdir, e),
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("session teardown: {e}");
        }
    }
}

impl<T: Transport> CommandChannel for Session<T> {
    fn execute(&mut self, command: &Command) -> anyhow::Result<Response> {
        Ok(Session::execute(self, command)?)
    }

    fn put_data(&mut self, data: &[u8], remote_path: &str) -> anyhow::Result<()> {
        Ok(Session::put_data(self, data, remote_path)?)
    }

    fn staging_path(&mut self) -> String {
        Session::staging_path(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::CommandOutput;
    use agent::DispatcherState;
    use agent::mock::MockHost;
    use declarative::{ExecutionPlan, Scenario, execute_simple};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;

    /// How the in-process dispatcher behaves
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Agent {
        Serve,
        /// Ack, then exit after writing a diagnostic
        Crash,
        /// Ack, then never answer
        Stall,
    }

    /// Transport that runs the dispatcher in a thread over OS pipes and
    /// keeps uploads on a [`MockHost`].
    #[derive(Clone)]
    pub(crate) struct Loopback {
        pub host: MockHost,
        pub agent: Agent,
        pub execs: Arc<Mutex<Vec<String>>>,
        pub uploads: Arc<Mutex<Vec<(String, usize)>>>,
        diagnostics: Arc<Mutex<Option<String>>>,
    }

    impl Loopback {
        pub(crate) fn new(host: MockHost, agent: Agent) -> Self {
            Self {
                host,
                agent,
                execs: Arc::default(),
                uploads: Arc::default(),
                diagnostics: Arc::default(),
            }
        }

        pub(crate) fn execs(&self) -> Vec<String> {
            self.execs.lock().unwrap().clone()
        }
    }

    impl Transport for Loopback {
        fn spawn(&mut self, command: &str) -> Result<RemoteProcess, SessionError> {
            self.execs.lock().unwrap().push(command.to_string());
            let (mut agent_in, session_out) = io::pipe().unwrap();
            let (session_in, mut agent_out) = io::pipe().unwrap();
            let host = self.host.clone();
            let agent = self.agent;
            let diagnostics = Arc::clone(&self.diagnostics);

            thread::spawn(move || match agent {
                Agent::Serve => {
                    let backends = host.backends();
                    let mut state = DispatcherState::new();
                    let _ = agent::dispatcher::run(
                        &mut agent_in,
                        &mut agent_out,
                        &backends,
                        &mut state,
                    );
                }
                Agent::Crash => {
                    protocol::write_ack(&mut agent_out).unwrap();
                    let _ = read_frame(&mut agent_in);
                    *diagnostics.lock().unwrap() = Some("unknown variant `frobnicate`".into());
                }
                Agent::Stall => {
                    protocol::write_ack(&mut agent_out).unwrap();
                    let mut sink = Vec::new();
                    let _ = agent_in.read_to_end(&mut sink);
                }
            });

            Ok(RemoteProcess {
                stdin: Box::new(session_out),
                stdout: Box::new(session_in),
                child: None,
            })
        }

        fn exec(&mut self, command: &str) -> Result<CommandOutput, SessionError> {
            self.execs.lock().unwrap().push(command.to_string());
            let mut output = CommandOutput {
                status: Some(0),
                ..CommandOutput::default()
            };
            if command.starts_with("cat ") {
                match self.diagnostics.lock().unwrap().clone() {
                    Some(text) => output.stdout = text.into_bytes(),
                    None => output.status = Some(1),
                }
            }
            Ok(output)
        }

        fn upload(&mut self, data: &[u8], remote_path: &str) -> Result<(), SessionError> {
            self.uploads
                .lock()
                .unwrap()
                .push((remote_path.to_string(), data.len()));
            self.host.add_file(remote_path, data, 0, 0, 0o600);
            Ok(())
        }
    }

    pub(crate) fn options(agent_binary: &Path) -> SessionOptions {
        SessionOptions {
            remote_tmp: "/tmp/".to_string(),
            agent_binary: agent_binary.to_path_buf(),
            response_timeout: Duration::from_secs(5),
        }
    }

    pub(crate) fn agent_binary() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"\x7fELF not really").unwrap();
        file
    }

    fn web_host() -> MockHost {
        let host = MockHost::new();
        host.add_user("root", 0);
        host.add_group("root", 0);
        host.add_user("www-data", 33);
        host.add_group("www-data", 33);
        host.add_package("nginx", false);
        host.add_package("telnet", true);
        host.add_file("/etc/obsolete.conf", b"old", 0, 0, 0o644);
        host
    }

    const WEB: &str = r"
packages:
  - name: nginx
    action: install
    restarts: [nginx]
  - name: telnet
    action: remove
files:
  - path: /var/www/index.html
    action: copy
    user: www-data
    group: www-data
    mode: '644'
    content: hello
    restarts: [nginx]
  - path: /etc/obsolete.conf
    action: delete
";

    #[test]
    fn test_working_directory_shape() {
        let dir = working_directory("/var/tmp/");
        let suffix = dir.strip_prefix("/var/tmp/stagehand_").unwrap();
        assert_eq!(suffix.len(), 10);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
        );
        assert_ne!(working_directory("/tmp"), working_directory("/tmp"));
    }

    #[test]
    fn test_start_prepares_directory_and_launches_agent() {
        let binary = agent_binary();
        let transport = Loopback::new(web_host(), Agent::Serve);
        let session = Session::start(transport.clone(), &options(binary.path())).unwrap();
        let workdir = session.workdir().to_string();
        assert!(workdir.starts_with("/tmp/stagehand_"));

        session.stop().unwrap();

        let execs = transport.execs();
        assert_eq!(execs[0], format!("mkdir -p -m 700 '{workdir}'"));
        assert_eq!(execs[1], format!("chmod 700 '{workdir}/stagehand-agent'"));
        assert_eq!(
            execs[2],
            format!("cd '{workdir}' && ./stagehand-agent agent 2>>agent.log")
        );
        assert_eq!(execs.last().unwrap(), &format!("rm -rf '{workdir}'"));

        let uploads = transport.uploads.lock().unwrap().clone();
        assert_eq!(
            uploads,
            [(format!("{workdir}/stagehand-agent"), 15)]
        );
    }

    #[test]
    fn test_full_convergence_over_pipes() {
        let binary = agent_binary();
        let host = web_host();
        let scenario = Scenario::parse(WEB, Path::new(".")).unwrap();
        let plan = ExecutionPlan::from_scenario(&scenario, false);

        let transport = Loopback::new(host.clone(), Agent::Serve);
        let mut session = Session::start(transport, &options(binary.path())).unwrap();
        let summary = execute_simple(&plan, &mut session).unwrap();
        session.stop().unwrap();

        assert_eq!(summary.errors(), 0);
        assert_eq!(summary.changed, 5);
        assert_eq!(summary.restarted, ["nginx"]);
        assert!(host.is_installed("nginx"));
        assert!(!host.is_installed("telnet"));
        assert!(host.file("/etc/obsolete.conf").is_none());
        let index = host.file("/var/www/index.html").unwrap();
        assert_eq!(index.content, b"hello");
        assert_eq!((index.uid, index.gid, index.mode & 0o7777), (33, 33, 0o644));
        assert_eq!(host.restarts(), ["nginx"]);

        // second run over a fresh session changes nothing
        let transport = Loopback::new(host.clone(), Agent::Serve);
        let mut session = Session::start(transport, &options(binary.path())).unwrap();
        let summary = execute_simple(&plan, &mut session).unwrap();
        session.stop().unwrap();
        assert_eq!(summary.changed, 0);
        assert_eq!(summary.no_change, 4);
        assert!(summary.restarted.is_empty());
    }

    #[test]
    fn test_staging_paths_are_unique() {
        let binary = agent_binary();
        let transport = Loopback::new(web_host(), Agent::Serve);
        let mut session = Session::start(transport, &options(binary.path())).unwrap();
        let first = session.staging_path();
        let second = session.staging_path();
        assert_ne!(first, second);
        assert!(first.starts_with(session.workdir()));
        session.stop().unwrap();
    }

    #[test]
    fn test_crash_reports_diagnostic() {
        let binary = agent_binary();
        let transport = Loopback::new(web_host(), Agent::Crash);
        let mut session = Session::start(transport.clone(), &options(binary.path())).unwrap();

        let err = session
            .execute(&Command::PackageInstall {
                package: "nginx".into(),
            })
            .unwrap_err();
        match err {
            SessionError::DispatcherCrashed { diagnostic } => {
                assert!(diagnostic.contains("frobnicate"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // teardown skips the goodbye but still removes the directory
        let workdir = session.workdir().to_string();
        drop(session);
        assert_eq!(
            transport.execs().last().unwrap(),
            &format!("rm -rf '{workdir}'")
        );
    }

    #[test]
    fn test_stalled_dispatcher_times_out() {
        let binary = agent_binary();
        let transport = Loopback::new(web_host(), Agent::Stall);
        let mut opts = options(binary.path());
        opts.response_timeout = Duration::from_millis(100);
        let mut session = Session::start(transport.clone(), &opts).unwrap();

        let err = session
            .execute(&Command::ServiceRestart {
                service: "nginx".into(),
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout(d) if d == Duration::from_millis(100)));
        assert_eq!(
            err.to_string(),
            "no response from dispatcher within 100ms"
        );

        drop(session);
        assert!(transport.execs().last().unwrap().starts_with("rm -rf "));
    }

    #[test]
    fn test_missing_agent_binary_is_config_error() {
        let transport = Loopback::new(web_host(), Agent::Serve);
        let err = Session::start(transport.clone(), &options(Path::new("/nonexistent/agent")))
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Config(_)));
        assert!(transport.execs().is_empty());
    }
}
