//! The protocol message set. Each message knows its numeric kind and how to
//! encode and decode its own body; the kind tag itself is written and
//! dispatched by the registry.

use crate::digest;
use crate::proto::wire;
use crate::proto::{ProtoResult, PROTOCOL_VERSION};
use std::ffi::OsString;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

const NAME_WIDTH: usize = 64;
const PLATFORM_WIDTH: usize = 8;
const PATH_WIDTH: usize = 256;

/// A decoded protocol message of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Introduction(Introduction),
    Notice(Notice),
    Error(ErrorReport),
    SetBuild(SetBuild),
    Acknowledge(Acknowledge),
    FileContent(FileContent),
    ExecuteBuild(ExecuteBuild),
    BuildOutput(BuildOutput),
    BuildComplete(BuildComplete),
}

impl Message {
    /// The numeric kind tag this message travels under.
    #[inline]
    pub fn kind(&self) -> u16 {
        match self {
            Message::Introduction(_) => Introduction::KIND,
            Message::Notice(_) => Notice::KIND,
            Message::Error(_) => ErrorReport::KIND,
            Message::SetBuild(_) => SetBuild::KIND,
            Message::Acknowledge(_) => Acknowledge::KIND,
            Message::FileContent(_) => FileContent::KIND,
            Message::ExecuteBuild(_) => ExecuteBuild::KIND,
            Message::BuildOutput(_) => BuildOutput::KIND,
            Message::BuildComplete(_) => BuildComplete::KIND,
        }
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) -> ProtoResult<()> {
        match self {
            Message::Introduction(msg) => msg.encode_body(buf),
            Message::Notice(msg) => msg.encode_body(buf),
            Message::Error(msg) => msg.encode_body(buf),
            Message::SetBuild(msg) => msg.encode_body(buf),
            Message::Acknowledge(msg) => msg.encode_body(buf),
            Message::FileContent(msg) => msg.encode_body(buf),
            Message::ExecuteBuild(msg) => msg.encode_body(buf),
            Message::BuildOutput(msg) => msg.encode_body(buf),
            Message::BuildComplete(msg) => msg.encode_body(buf),
        }
    }
}

/// Introduces the client to the build host: protocol revision, credentials
/// and enough about the workstation for the server's bookkeeping. The string
/// fields live in fixed-width NUL-padded slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Introduction {
    pub version: u8,
    pub user: String,
    pub password: String,
    pub hostname: String,
    pub platform: String,
}

impl Introduction {
    pub const KIND: u16 = 0;

    pub fn new(user: &str, password: &str, hostname: &str, platform: &str) -> Introduction {
        Introduction {
            version: PROTOCOL_VERSION,
            user: user.into(),
            password: password.into(),
            hostname: hostname.into(),
            platform: platform.into(),
        }
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> ProtoResult<()> {
        wire::put_u8(buf, self.version);
        wire::put_fixed_str(buf, "user", &self.user, NAME_WIDTH)?;
        wire::put_fixed_str(buf, "password", &self.password, NAME_WIDTH)?;
        wire::put_fixed_str(buf, "hostname", &self.hostname, NAME_WIDTH)?;
        wire::put_fixed_str(buf, "platform", &self.platform, PLATFORM_WIDTH)
    }

    pub(crate) fn decode_body(cursor: &mut Cursor<&[u8]>) -> ProtoResult<Message> {
        Ok(Message::Introduction(Introduction {
            version: wire::get_u8(cursor)?,
            user: wire::get_fixed_str(cursor, NAME_WIDTH)?,
            password: wire::get_fixed_str(cursor, NAME_WIDTH)?,
            hostname: wire::get_fixed_str(cursor, NAME_WIDTH)?,
            platform: wire::get_fixed_str(cursor, PLATFORM_WIDTH)?,
        }))
    }
}

/// Free-form informational text from the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub text: String,
}

impl Notice {
    pub const KIND: u16 = 1;

    pub fn new<S: Into<String>>(text: S) -> Notice {
        Notice { text: text.into() }
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> ProtoResult<()> {
        wire::put_str(buf, "text", &self.text)
    }

    pub(crate) fn decode_body(cursor: &mut Cursor<&[u8]>) -> ProtoResult<Message> {
        Ok(Message::Notice(Notice {
            text: wire::get_str(cursor)?,
        }))
    }
}

/// An error reported by the peer. The engine carries these through without
/// interpreting the code.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub code: u32,
    pub text: String,
}

impl ErrorReport {
    pub const KIND: u16 = 2;

    pub fn new<S: Into<String>>(code: u32, text: S) -> ErrorReport {
        ErrorReport {
            code,
            text: text.into(),
        }
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> ProtoResult<()> {
        wire::put_u32(buf, self.code);
        wire::put_str(buf, "text", &self.text)
    }

    pub(crate) fn decode_body(cursor: &mut Cursor<&[u8]>) -> ProtoResult<Message> {
        Ok(Message::Error(ErrorReport {
            code: wire::get_u32(cursor)?,
            text: wire::get_str(cursor)?,
        }))
    }
}

/// Announces the folders taking part in a build along with the build id the
/// server keys its session state on. The body is a single NUL-joined string
/// list: the build id first, then the root paths in caller order.
#[derive(Debug, Clone, PartialEq)]
pub struct SetBuild {
    pub build_id: String,
    pub roots: Vec<String>,
}

impl SetBuild {
    pub const KIND: u16 = 3;

    pub fn new(build_id: String, roots: Vec<String>) -> SetBuild {
        SetBuild { build_id, roots }
    }

    /// Derives the build id for a folder list: the SHA-1 of the roots
    /// concatenated in sorted (parent, basename) order. Insensitive to the
    /// order the caller holds the folders in.
    pub fn make_build_id(roots: &[String]) -> String {
        let mut sorted: Vec<&String> = roots.iter().collect();
        sorted.sort_by(|a, b| path_order(Path::new(a)).cmp(&path_order(Path::new(b))));

        digest::concat(sorted.iter().map(|root| root.as_str()))
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> ProtoResult<()> {
        let mut parts = Vec::with_capacity(self.roots.len() + 1);
        parts.push(self.build_id.as_str());
        parts.extend(self.roots.iter().map(|root| root.as_str()));

        wire::put_str(buf, "folders", &parts.join("\u{0}"))
    }

    pub(crate) fn decode_body(cursor: &mut Cursor<&[u8]>) -> ProtoResult<Message> {
        let data = wire::get_str(cursor)?;
        let mut parts = data.split('\u{0}').map(str::to_string);

        let build_id = parts.next().unwrap_or_default();

        Ok(Message::SetBuild(SetBuild {
            build_id,
            roots: parts.collect(),
        }))
    }
}

/// Acknowledges (or refuses) a previously transmitted message, referenced by
/// its kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Acknowledge {
    pub message_id: u16,
    pub positive: bool,
}

impl Acknowledge {
    pub const KIND: u16 = 4;

    pub fn new(message_id: u16, positive: bool) -> Acknowledge {
        Acknowledge {
            message_id,
            positive,
        }
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> ProtoResult<()> {
        wire::put_u16(buf, self.message_id);
        wire::put_bool(buf, self.positive);
        Ok(())
    }

    pub(crate) fn decode_body(cursor: &mut Cursor<&[u8]>) -> ProtoResult<Message> {
        Ok(Message::Acknowledge(Acknowledge {
            message_id: wire::get_u16(cursor)?,
            positive: wire::get_bool(cursor)?,
        }))
    }
}

/// Carries one whole file. Content is opaque bytes; the build host writes it
/// back out verbatim under the named root.
#[derive(Debug, Clone, PartialEq)]
pub struct FileContent {
    pub root: String,
    pub name: String,
    pub content: Vec<u8>,
}

impl FileContent {
    pub const KIND: u16 = 5;

    pub fn new(root: String, name: String, content: Vec<u8>) -> FileContent {
        FileContent {
            root,
            name,
            content,
        }
    }

    /// Reads the file `name` under `root` off disk.
    pub fn from_disk(root: &Path, name: &str) -> std::io::Result<FileContent> {
        let content = fs::read(root.join(name))?;

        Ok(FileContent {
            root: root.to_string_lossy().into_owned(),
            name: name.to_string(),
            content,
        })
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> ProtoResult<()> {
        wire::put_fixed_str(buf, "root", &self.root, PATH_WIDTH)?;
        wire::put_fixed_str(buf, "name", &self.name, PATH_WIDTH)?;
        wire::put_blob(buf, "content", &self.content)
    }

    pub(crate) fn decode_body(cursor: &mut Cursor<&[u8]>) -> ProtoResult<Message> {
        Ok(Message::FileContent(FileContent {
            root: wire::get_fixed_str(cursor, PATH_WIDTH)?,
            name: wire::get_fixed_str(cursor, PATH_WIDTH)?,
            content: wire::get_blob(cursor)?,
        }))
    }
}

/// Asks the build host to run the build command in the first announced root.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteBuild {
    pub shell_command: String,
}

impl ExecuteBuild {
    pub const KIND: u16 = 6;

    pub fn new<S: Into<String>>(shell_command: S) -> ExecuteBuild {
        ExecuteBuild {
            shell_command: shell_command.into(),
        }
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> ProtoResult<()> {
        wire::put_str(buf, "shell_command", &self.shell_command)
    }

    pub(crate) fn decode_body(cursor: &mut Cursor<&[u8]>) -> ProtoResult<Message> {
        Ok(Message::ExecuteBuild(ExecuteBuild {
            shell_command: wire::get_str(cursor)?,
        }))
    }
}

/// A chunk of build output streamed back by the server, tagged with the
/// stream it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    pub stdout: bool,
    pub text: String,
}

impl BuildOutput {
    pub const KIND: u16 = 7;

    pub fn new<S: Into<String>>(stdout: bool, text: S) -> BuildOutput {
        BuildOutput {
            stdout,
            text: text.into(),
        }
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> ProtoResult<()> {
        wire::put_bool(buf, self.stdout);
        wire::put_str(buf, "text", &self.text)
    }

    pub(crate) fn decode_body(cursor: &mut Cursor<&[u8]>) -> ProtoResult<Message> {
        Ok(Message::BuildOutput(BuildOutput {
            stdout: wire::get_bool(cursor)?,
            text: wire::get_str(cursor)?,
        }))
    }
}

/// Marks the end of a build run and carries the process exit code.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildComplete {
    pub exit_code: u16,
}

impl BuildComplete {
    pub const KIND: u16 = 8;

    pub fn new(exit_code: u16) -> BuildComplete {
        BuildComplete { exit_code }
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> ProtoResult<()> {
        wire::put_u16(buf, self.exit_code);
        Ok(())
    }

    pub(crate) fn decode_body(cursor: &mut Cursor<&[u8]>) -> ProtoResult<Message> {
        Ok(Message::BuildComplete(BuildComplete {
            exit_code: wire::get_u16(cursor)?,
        }))
    }
}

/// Orders paths by (parent, basename), the ordering used wherever folder
/// lists need to be deterministic.
fn path_order(path: &Path) -> (PathBuf, OsString) {
    (
        path.parent().map(Path::to_path_buf).unwrap_or_default(),
        path.file_name().map(OsString::from).unwrap_or_default(),
    )
}
