//! Client-side orchestration of one remote build: introduce, announce the
//! folder set, stream the files across as the server acknowledges, then run
//! the command and relay its output. Everything here executes inside observer
//! callbacks on the host's main thread.

use crate::files::{gather_active_file, gather_project, FolderEntry, GlobalExcludes};
use crate::net::{Connection, ConnectionManager, NetResult, Notification, Observer};
use crate::proto::{
    Acknowledge, ExecuteBuild, FileContent, Introduction, Message, SetBuild,
};
use plumb::logging;
use plumb::settings::BuildHost;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Project information supplied by the editor host.
pub trait Workspace: Send + Sync {
    /// Folder entries taking part in the build.
    fn folders(&self) -> Vec<FolderEntry>;

    /// Directory the project file lives in; anchors relative folder paths.
    fn anchor(&self) -> Option<PathBuf>;

    /// The file currently in front of the user, for the no-folder fallback.
    fn active_file(&self) -> Option<PathBuf>;

    /// Host-wide exclude patterns merged into every folder entry.
    fn global_excludes(&self) -> GlobalExcludes;
}

/// Where build progress and remote output end up. Rendering (panels, colors,
/// scrolling) is entirely the host's concern.
pub trait BuildConsole: Send + Sync {
    /// A progress or diagnostic line from the client itself.
    fn line(&self, text: &str);

    /// A chunk of remote build output, tagged with the stream it came from.
    fn output(&self, stdout: bool, text: &str);

    /// The build finished with this exit code.
    fn complete(&self, exit_code: u16);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Phase {
    Idle,
    Introducing,
    Syncing,
    Building,
}

struct State {
    phase: Phase,
    connection: Option<Arc<Connection>>,
    // Files still waiting to go out, popped from the back.
    queue: Vec<(PathBuf, String)>,
}

/// One build run against one host. Construct, call `start`, and let the
/// notification stream drive the rest.
pub struct BuildSession {
    host: BuildHost,
    shell_command: String,
    workspace: Arc<dyn Workspace>,
    console: Arc<dyn BuildConsole>,
    hostname: String,
    platform: String,
    state: Mutex<State>,
    log: logging::Logger,
}

impl BuildSession {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        host: BuildHost,
        shell_command: String,
        workspace: Arc<dyn Workspace>,
        console: Arc<dyn BuildConsole>,
        hostname: String,
        platform: String,
        log: L,
    ) -> Arc<BuildSession> {
        let log = match log.into() {
            Some(log) => log.new(logging::o!("build_host" => host.name.clone())),
            None => logging::discard(),
        };

        Arc::new(BuildSession {
            host,
            shell_command,
            workspace,
            console,
            hostname,
            platform,
            state: Mutex::new(State {
                phase: Phase::Idle,
                connection: None,
                queue: Vec::new(),
            }),
            log,
        })
    }

    /// Connects to the build host and sends the introduction. Everything
    /// after that happens in response to notifications.
    pub fn start(self: &Arc<Self>, manager: &ConnectionManager) -> NetResult<Arc<Connection>> {
        let session = Arc::clone(self);
        let observer: Observer =
            Box::new(move |connection, event| session.on_notification(connection, event));

        let connection = manager.connect(&self.host.host, self.host.port, observer)?;

        let introduction = Introduction::new(
            &self.host.username,
            self.host.password.as_deref().unwrap_or(""),
            &self.hostname,
            &self.platform,
        );
        connection.send(&Message::Introduction(introduction))?;

        let mut state = self.state();
        state.phase = Phase::Introducing;
        state.connection = Some(connection.clone());

        Ok(connection)
    }

    /// The observer callback. Runs on the host's main thread.
    pub fn on_notification(self: &Arc<Self>, connection: &Arc<Connection>, event: Notification) {
        match event {
            Notification::Connecting => {
                self.console.line(&format!(
                    "Connecting to {}:{}",
                    connection.host(),
                    connection.port()
                ));
            }
            Notification::Connected => self.console.line("Connected"),
            Notification::ConnectionFailed => {
                self.console.line("Connection failed");
            }
            Notification::SendError => self.console.line("Network send error"),
            Notification::RecvError => self.console.line("Network receive error"),
            Notification::Closed => {
                let mut state = self.state();
                state.connection = None;
                state.phase = Phase::Idle;
                state.queue.clear();
                self.console.line("Connection closed");
            }
            Notification::Message => {
                if let Some(message) = connection.receive() {
                    self.handle_message(connection, message);
                }
            }
        }
    }

    fn handle_message(self: &Arc<Self>, connection: &Arc<Connection>, message: Message) {
        match message {
            Message::Notice(notice) => {
                self.console.line(&format!("Message: {}", notice.text));
            }
            Message::Error(report) => {
                self.console
                    .line(&format!("Error: [{}] => {}", report.code, report.text));
            }
            Message::Acknowledge(ack) => self.acknowledge(connection, ack),
            Message::BuildOutput(output) => {
                self.console.output(output.stdout, &output.text);
            }
            Message::BuildComplete(done) => {
                self.state().phase = Phase::Idle;
                self.console.complete(done.exit_code);
            }
            other => {
                logging::warn!(self.log, "unhandled message"; "kind" => other.kind());
                self.console
                    .line(&format!("Unhandled message (kind {})", other.kind()));
            }
        }
    }

    fn acknowledge(self: &Arc<Self>, connection: &Arc<Connection>, ack: Acknowledge) {
        if !ack.positive {
            logging::warn!(self.log, "request refused"; "kind" => ack.message_id);
            self.console
                .line(&format!("Build host refused request (kind {})", ack.message_id));
            self.state().phase = Phase::Idle;
            return;
        }

        match ack.message_id {
            Introduction::KIND => self.start_build(connection),
            SetBuild::KIND | FileContent::KIND => self.send_next_file(connection),
            _ => (),
        }
    }

    /// Credentials went through: capture the project, announce the build.
    fn start_build(self: &Arc<Self>, connection: &Arc<Connection>) {
        let entries = self.workspace.folders();

        let snapshot = if entries.is_empty() {
            match self.workspace.active_file() {
                Some(file) => gather_active_file(&file, true),
                None => {
                    self.console.line("Nothing to build: no folders, no open file");
                    return;
                }
            }
        } else {
            let anchor = self.workspace.anchor();
            match gather_project(
                &entries,
                anchor.as_deref(),
                &self.workspace.global_excludes(),
                true,
            ) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    logging::warn!(self.log, "gather failed"; "error" => ?err);
                    self.console
                        .line(&format!("Cannot gather project files: {:?}", err));
                    return;
                }
            }
        };

        let roots = snapshot.sorted_roots();
        let root_names: Vec<String> = roots
            .iter()
            .map(|root| root.to_string_lossy().into_owned())
            .collect();
        let build_id = SetBuild::make_build_id(&root_names);

        let mut queue = Vec::new();
        for root in &roots {
            let mut names: Vec<String> =
                snapshot.folders[root].files.keys().cloned().collect();
            names.sort();
            for name in names {
                queue.push((root.clone(), name));
            }
        }
        // Popped from the back; reverse so files leave in sorted order.
        queue.reverse();

        logging::info!(self.log, "build announced";
                       "build_id" => build_id.clone(),
                       "folders" => roots.len(),
                       "files" => queue.len());
        self.console
            .line(&format!("Synchronising {} files", queue.len()));

        {
            let mut state = self.state();
            state.phase = Phase::Syncing;
            state.queue = queue;
        }

        self.send_checked(
            connection,
            &Message::SetBuild(SetBuild::new(build_id, root_names)),
        );
    }

    /// The server is ready for the next file; when the queue runs dry the
    /// build itself is kicked off.
    fn send_next_file(self: &Arc<Self>, connection: &Arc<Connection>) {
        loop {
            let next = {
                let mut state = self.state();
                if state.phase != Phase::Syncing {
                    return;
                }
                state.queue.pop()
            };

            match next {
                Some((root, name)) => match FileContent::from_disk(&root, &name) {
                    Ok(content) => {
                        logging::debug!(self.log, "file sent";
                                        "name" => name.clone(),
                                        "bytes" => content.content.len());
                        self.send_checked(connection, &Message::FileContent(content));
                        return;
                    }
                    Err(err) => {
                        // The file may have vanished since the gather; skip
                        // it and keep the transfer moving.
                        logging::warn!(self.log, "file unreadable, skipped";
                                       "name" => name.clone(),
                                       "error" => ?err);
                        self.console
                            .line(&format!("Skipping unreadable file {}: {}", name, err));
                    }
                },
                None => {
                    self.state().phase = Phase::Building;
                    self.console.line("All files transmitted, starting build");
                    self.send_checked(
                        connection,
                        &Message::ExecuteBuild(ExecuteBuild::new(self.shell_command.clone())),
                    );
                    return;
                }
            }
        }
    }

    fn send_checked(self: &Arc<Self>, connection: &Arc<Connection>, message: &Message) {
        if let Err(err) = connection.send(message) {
            logging::warn!(self.log, "encode failed"; "error" => ?err);
            self.console
                .line(&format!("Cannot encode message: {:?}", err));
            self.state().phase = Phase::Idle;
        }
    }

    #[inline]
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("Build session lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::frame;
    use crate::proto::{decode, encode, BuildComplete, BuildOutput, Notice};
    use plumb::dispatch::TaskQueue;
    use std::fs;
    use std::io::{Read, Write};
    use std::net as stdnet;
    use std::thread;
    use std::time::{Duration, Instant};

    struct FixedWorkspace {
        root: PathBuf,
    }

    impl Workspace for FixedWorkspace {
        fn folders(&self) -> Vec<FolderEntry> {
            vec![FolderEntry::new(&self.root)]
        }

        fn anchor(&self) -> Option<PathBuf> {
            None
        }

        fn active_file(&self) -> Option<PathBuf> {
            None
        }

        fn global_excludes(&self) -> GlobalExcludes {
            GlobalExcludes::default()
        }
    }

    #[derive(Default)]
    struct RecordingConsole {
        lines: Mutex<Vec<String>>,
        output: Mutex<Vec<(bool, String)>>,
        exit_code: Mutex<Option<u16>>,
    }

    impl BuildConsole for RecordingConsole {
        fn line(&self, text: &str) {
            self.lines.lock().unwrap().push(text.to_string());
        }

        fn output(&self, stdout: bool, text: &str) {
            self.output.lock().unwrap().push((stdout, text.to_string()));
        }

        fn complete(&self, exit_code: u16) {
            *self.exit_code.lock().unwrap() = Some(exit_code);
        }
    }

    fn scratch(tag: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("girder-build-{}-{}", std::process::id(), tag));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn read_frame(stream: &mut stdnet::TcpStream) -> Option<Message> {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).ok()?;

        let mut payload = vec![0u8; u32::from_be_bytes(header) as usize];
        stream.read_exact(&mut payload).ok()?;
        decode(&payload).ok()
    }

    fn send(stream: &mut stdnet::TcpStream, message: &Message) {
        stream
            .write_all(&frame(&encode(message).unwrap()))
            .unwrap();
    }

    /// A scripted build host: acks the whole conversation, records the files
    /// it was given, then plays back some output and an exit code.
    fn scripted_server(
        listener: stdnet::TcpListener,
    ) -> thread::JoinHandle<(Vec<String>, Option<String>)> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();

            let mut received_files = Vec::new();
            let mut shell_command = None;

            match read_frame(&mut stream).expect("introduction expected") {
                Message::Introduction(msg) => assert_eq!(msg.user, "alice"),
                other => panic!("Unexpected message {:?}", other),
            }
            send(
                &mut stream,
                &Message::Acknowledge(Acknowledge::new(Introduction::KIND, true)),
            );

            match read_frame(&mut stream).expect("set build expected") {
                Message::SetBuild(msg) => {
                    assert_eq!(msg.roots.len(), 1);
                    assert_eq!(msg.build_id, SetBuild::make_build_id(&msg.roots));
                }
                other => panic!("Unexpected message {:?}", other),
            }
            send(
                &mut stream,
                &Message::Acknowledge(Acknowledge::new(SetBuild::KIND, true)),
            );

            loop {
                match read_frame(&mut stream).expect("file or execute expected") {
                    Message::FileContent(msg) => {
                        received_files.push(msg.name.clone());
                        send(
                            &mut stream,
                            &Message::Acknowledge(Acknowledge::new(FileContent::KIND, true)),
                        );
                    }
                    Message::ExecuteBuild(msg) => {
                        shell_command = Some(msg.shell_command);
                        break;
                    }
                    other => panic!("Unexpected message {:?}", other),
                }
            }

            send(&mut stream, &Message::Notice(Notice::new("build started")));
            send(&mut stream, &Message::BuildOutput(BuildOutput::new(true, "cc main.c")));
            send(
                &mut stream,
                &Message::BuildOutput(BuildOutput::new(false, "main.c:3: warning: unused")),
            );
            send(&mut stream, &Message::BuildComplete(BuildComplete::new(0)));

            // Hold the socket open until the client hangs up.
            let mut sink = [0u8; 64];
            while stream.read(&mut sink).map_or(false, |count| count > 0) {}

            (received_files, shell_command)
        })
    }

    #[test]
    fn test_full_build_conversation() {
        let root = scratch("conversation");
        fs::write(root.join("main.c"), "int main() { return 0; }").unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/util.c"), "void util() {}").unwrap();

        let listener = stdnet::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = scripted_server(listener);

        let dispatch = Arc::new(TaskQueue::new());
        let manager = ConnectionManager::new(dispatch.clone(), None).unwrap();
        manager.startup();

        let console = Arc::new(RecordingConsole::default());
        let session = BuildSession::new(
            BuildHost {
                name: "lab".into(),
                host: "127.0.0.1".into(),
                port,
                username: "alice".into(),
                password: Some("s3cret".into()),
            },
            "make all".into(),
            Arc::new(FixedWorkspace { root: root.clone() }),
            console.clone(),
            "wkstn".into(),
            "linux".into(),
            None,
        );

        let connection = session.start(&manager).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while console.exit_code.lock().unwrap().is_none() {
            assert!(Instant::now() < deadline, "build never completed");
            dispatch.wait_pending(Duration::from_millis(25));
            dispatch.run_pending();
        }

        connection.close();
        dispatch.run_pending();

        let (received_files, shell_command) = server.join().unwrap();
        assert_eq!(
            received_files,
            vec!["main.c".to_string(), "src/util.c".to_string()]
        );
        assert_eq!(shell_command.as_deref(), Some("make all"));

        assert_eq!(*console.exit_code.lock().unwrap(), Some(0));
        assert_eq!(
            *console.output.lock().unwrap(),
            vec![
                (true, "cc main.c".to_string()),
                (false, "main.c:3: warning: unused".to_string())
            ]
        );

        let lines = console.lines.lock().unwrap();
        assert!(lines.iter().any(|line| line == "Connected"));
        assert!(lines.iter().any(|line| line == "Synchronising 2 files"));
        assert!(lines
            .iter()
            .any(|line| line == "All files transmitted, starting build"));

        manager.shutdown();
    }

    #[test]
    fn test_negative_ack_stops_the_session() {
        let listener = stdnet::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();

            match read_frame(&mut stream).expect("introduction expected") {
                Message::Introduction(_) => (),
                other => panic!("Unexpected message {:?}", other),
            }
            send(
                &mut stream,
                &Message::Acknowledge(Acknowledge::new(Introduction::KIND, false)),
            );

            let mut sink = [0u8; 64];
            while stream.read(&mut sink).map_or(false, |count| count > 0) {}
        });

        let dispatch = Arc::new(TaskQueue::new());
        let manager = ConnectionManager::new(dispatch.clone(), None).unwrap();
        manager.startup();

        let console = Arc::new(RecordingConsole::default());
        let session = BuildSession::new(
            BuildHost {
                name: "lab".into(),
                host: "127.0.0.1".into(),
                port,
                username: "mallory".into(),
                password: None,
            },
            "make".into(),
            Arc::new(FixedWorkspace {
                root: scratch("refused"),
            }),
            console.clone(),
            "wkstn".into(),
            "linux".into(),
            None,
        );

        let connection = session.start(&manager).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            dispatch.run_pending();
            if console
                .lines
                .lock()
                .unwrap()
                .iter()
                .any(|line| line.starts_with("Build host refused"))
            {
                break;
            }
            assert!(Instant::now() < deadline, "refusal never surfaced");
            dispatch.wait_pending(Duration::from_millis(25));
        }

        connection.close();
        dispatch.run_pending();
        server.join().unwrap();
        manager.shutdown();
    }
}
