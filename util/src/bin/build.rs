//! Command line front end for the build client: picks a host out of a
//! settings file, ships a folder across and runs the build, playing the part
//! the editor host plays in production.

use clap::{App, Arg};
use girder::build::{BuildConsole, BuildSession, Workspace};
use girder::files::{FolderEntry, GlobalExcludes};
use girder::net::ConnectionManager;
use plumb::dispatch::TaskQueue;
use plumb::logging;
use plumb::settings::Settings;
use sloggers::types::Severity;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct CliWorkspace {
    folder: PathBuf,
    excludes: GlobalExcludes,
}

impl Workspace for CliWorkspace {
    fn folders(&self) -> Vec<FolderEntry> {
        vec![FolderEntry::new(&self.folder)]
    }

    fn anchor(&self) -> Option<PathBuf> {
        None
    }

    fn active_file(&self) -> Option<PathBuf> {
        None
    }

    fn global_excludes(&self) -> GlobalExcludes {
        self.excludes.clone()
    }
}

#[derive(Default)]
struct TermConsole {
    exit_code: Mutex<Option<u16>>,
}

impl BuildConsole for TermConsole {
    fn line(&self, text: &str) {
        println!("=> {}", text);
    }

    fn output(&self, stdout: bool, text: &str) {
        if stdout {
            println!("{}", text);
        } else {
            eprintln!("{}", text);
        }
    }

    fn complete(&self, exit_code: u16) {
        println!("=> Build finished with exit code {}", exit_code);
        *self.exit_code.lock().unwrap() = Some(exit_code);
    }
}

fn main() {
    let matches = App::new("Remote Build")
        .version("0.1")
        .about("Runs a build of a local folder on a remote build host.")
        .arg(
            Arg::with_name("SETTINGS")
                .help("Path to the settings file (build_hosts et al)")
                .required(true),
        )
        .arg(
            Arg::with_name("HOST")
                .help("Name of the build host entry to use")
                .required(true),
        )
        .arg(
            Arg::with_name("FOLDER")
                .help("Folder taking part in the build")
                .required(true),
        )
        .arg(
            Arg::with_name("COMMAND")
                .help("Shell command the host should run")
                .required(true),
        )
        .get_matches();

    let raw = fs::read_to_string(matches.value_of("SETTINGS").unwrap())
        .expect("Cannot read the settings file");
    let settings = Settings::from_str(&raw).expect("Settings file is not valid JSON");

    let host_name = matches.value_of("HOST").unwrap();
    let host = settings
        .build_hosts()
        .into_iter()
        .find(|host| host.name == host_name)
        .expect("No build host with that name in the settings");

    let folder = PathBuf::from(matches.value_of("FOLDER").unwrap());
    let command = matches.value_of("COMMAND").unwrap().to_string();

    let log = logging::term(Severity::Info);
    let dispatch = Arc::new(TaskQueue::new());

    let manager =
        ConnectionManager::new(dispatch.clone(), &log).expect("Cannot set up the connection manager");
    manager.startup();

    let workspace = Arc::new(CliWorkspace {
        folder,
        excludes: GlobalExcludes {
            files: settings.file_exclude_patterns(),
            folders: settings.folder_exclude_patterns(),
        },
    });
    let console = Arc::new(TermConsole::default());

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "workstation".to_string());
    let platform = std::env::consts::OS.to_string();

    let session = BuildSession::new(
        host,
        command,
        workspace,
        console.clone(),
        hostname,
        platform,
        &log,
    );

    let connection = session
        .start(&manager)
        .expect("Cannot open a connection to the build host");

    // Pump notifications until the build reports in or the connection dies.
    let exit_code = loop {
        dispatch.wait_pending(Duration::from_millis(100));
        dispatch.run_pending();

        if let Some(code) = *console.exit_code.lock().unwrap() {
            break code as i32;
        }

        if connection.is_closed() {
            dispatch.run_pending();
            break 1;
        }
    };

    connection.close();
    dispatch.run_pending();
    manager.shutdown();

    std::process::exit(exit_code);
}
