//! A small loopback build server for exercising the client end to end: it
//! speaks the real protocol, mirrors transmitted files into a sandbox
//! directory and actually runs the requested shell command there. One client
//! at a time; this is a test fixture, not a production server.

use byteorder::{BigEndian, ReadBytesExt};
use clap::{App, Arg};
use girder::net::frame::frame;
use girder::proto::{
    decode, encode, Acknowledge, BuildComplete, BuildOutput, ErrorReport, ExecuteBuild,
    FileContent, Introduction, Message, SetBuild,
};
use plumb::logging;
use sloggers::types::Severity;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;

fn main() {
    let matches = App::new("Build Server")
        .version("0.1")
        .about("Loopback build host for client testing.")
        .arg(
            Arg::with_name("SANDBOX")
                .help("Directory transmitted files are mirrored into")
                .required(true),
        )
        .arg(
            Arg::with_name("BIND")
                .help("Address to listen on")
                .required(false),
        )
        .get_matches();

    let sandbox = PathBuf::from(matches.value_of("SANDBOX").unwrap());
    let bind = matches.value_of("BIND").unwrap_or("127.0.0.1:4567");

    let log = logging::term(Severity::Debug);

    fs::create_dir_all(&sandbox).expect("Cannot create the sandbox directory");
    let listener = TcpListener::bind(bind).expect("Cannot bind the listen address");

    logging::info!(log, "listening"; "bind" => bind, "sandbox" => %sandbox.display());

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(err) = serve(stream, &sandbox, &log) {
                    logging::warn!(log, "client session ended with error"; "error" => ?err);
                }
            }
            Err(err) => logging::warn!(log, "accept failed"; "error" => ?err),
        }
    }
}

struct Session {
    // Client root path -> sandbox directory the files land in.
    roots: Vec<(String, PathBuf)>,
}

fn serve(mut stream: TcpStream, sandbox: &Path, log: &logging::Logger) -> std::io::Result<()> {
    let peer = stream.peer_addr()?;
    logging::info!(log, "client connected"; "peer" => %peer);

    let mut session = Session { roots: Vec::new() };

    loop {
        let payload = match read_frame(&mut stream)? {
            Some(payload) => payload,
            None => break,
        };

        let message = match decode(&payload) {
            Ok(message) => message,
            Err(err) => {
                logging::warn!(log, "undecodable payload"; "error" => ?err);
                send(&mut stream, &Message::Error(ErrorReport::new(1, "cannot decode message")))?;
                break;
            }
        };

        match message {
            Message::Introduction(msg) => {
                logging::info!(log, "introduction";
                               "user" => msg.user.clone(),
                               "hostname" => msg.hostname.clone(),
                               "platform" => msg.platform.clone(),
                               "version" => msg.version);
                send(
                    &mut stream,
                    &Message::Acknowledge(Acknowledge::new(Introduction::KIND, true)),
                )?;
            }
            Message::SetBuild(msg) => {
                logging::info!(log, "build set";
                               "build_id" => msg.build_id.clone(),
                               "folders" => msg.roots.len());

                session.roots.clear();
                for (index, root) in msg.roots.iter().enumerate() {
                    let basename = Path::new(root)
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "root".to_string());

                    let target = sandbox
                        .join(&msg.build_id)
                        .join(format!("{}-{}", index, basename));
                    fs::create_dir_all(&target)?;
                    session.roots.push((root.clone(), target));
                }

                send(
                    &mut stream,
                    &Message::Acknowledge(Acknowledge::new(SetBuild::KIND, true)),
                )?;
            }
            Message::FileContent(msg) => {
                match session.target_for(&msg) {
                    Some(path) => {
                        if let Some(parent) = path.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        fs::write(&path, &msg.content)?;
                        logging::debug!(log, "file stored";
                                        "name" => msg.name.clone(),
                                        "bytes" => msg.content.len());
                        send(
                            &mut stream,
                            &Message::Acknowledge(Acknowledge::new(FileContent::KIND, true)),
                        )?;
                    }
                    None => {
                        logging::warn!(log, "file for unannounced root"; "root" => msg.root.clone());
                        send(
                            &mut stream,
                            &Message::Acknowledge(Acknowledge::new(FileContent::KIND, false)),
                        )?;
                    }
                }
            }
            Message::ExecuteBuild(msg) => {
                run_build(&mut stream, &session, &msg, log)?;
            }
            other => {
                logging::warn!(log, "unexpected message"; "kind" => other.kind());
                send(
                    &mut stream,
                    &Message::Error(ErrorReport::new(2, "unexpected message")),
                )?;
            }
        }
    }

    logging::info!(log, "client disconnected"; "peer" => %peer);
    Ok(())
}

impl Session {
    fn target_for(&self, msg: &FileContent) -> Option<PathBuf> {
        self.roots
            .iter()
            .find(|(root, _)| *root == msg.root)
            .map(|(_, target)| target.join(&msg.name))
    }
}

/// Runs the shell command in the first announced root, streaming its output
/// back as it appears, then reports the exit code.
fn run_build(
    stream: &mut TcpStream,
    session: &Session,
    msg: &ExecuteBuild,
    log: &logging::Logger,
) -> std::io::Result<()> {
    let workdir = match session.roots.first() {
        Some((_, target)) => target.clone(),
        None => {
            send(stream, &Message::Error(ErrorReport::new(3, "no build set")))?;
            return Ok(());
        }
    };

    logging::info!(log, "build starting";
                   "command" => msg.shell_command.clone(),
                   "workdir" => %workdir.display());
    send(
        stream,
        &Message::Notice(girder::proto::Notice::new(format!(
            "running: {}",
            msg.shell_command
        ))),
    )?;

    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(&msg.shell_command)
        .current_dir(&workdir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            send(
                stream,
                &Message::Error(ErrorReport::new(4, format!("cannot spawn: {}", err))),
            )?;
            send(stream, &Message::BuildComplete(BuildComplete::new(1)))?;
            return Ok(());
        }
    };

    let (line_tx, line_rx) = mpsc::channel();

    let stdout = child.stdout.take().expect("stdout must be piped");
    let stderr = child.stderr.take().expect("stderr must be piped");

    let readers = vec![
        spawn_reader(stdout, true, line_tx.clone()),
        spawn_reader(stderr, false, line_tx),
    ];

    for (is_stdout, line) in line_rx {
        send(stream, &Message::BuildOutput(BuildOutput::new(is_stdout, line)))?;
    }

    for reader in readers {
        let _ = reader.join();
    }

    let status = child.wait()?;
    let exit_code = match status.code() {
        Some(code) => code as u16,
        None => 1,
    };

    logging::info!(log, "build finished"; "exit_code" => exit_code);
    send(stream, &Message::BuildComplete(BuildComplete::new(exit_code)))?;

    Ok(())
}

fn spawn_reader<R: Read + Send + 'static>(
    source: R,
    is_stdout: bool,
    sink: mpsc::Sender<(bool, String)>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(source).lines() {
            match line {
                Ok(line) => {
                    if sink.send((is_stdout, line)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    let length = match stream.read_u32::<BigEndian>() {
        Ok(length) => length as usize,
        Err(ref err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload)?;
    Ok(Some(payload))
}

fn send(stream: &mut TcpStream, message: &Message) -> std::io::Result<()> {
    let payload = encode(message).expect("server messages always encode");
    stream.write_all(&frame(&payload))
}
