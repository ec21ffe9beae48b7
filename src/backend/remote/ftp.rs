//! Minimal blocking FTP client
//!
//! Covers the RFC 959 subset the remote backend needs plus `MLSD`, `SIZE`,
//! `MDTM` (RFC 3659) and `MFMT`. Every command uses absolute server paths,
//! so the session's working directory never matters.

use super::listing::{self, ListEntry};
use super::RemoteEndpoint;
use std::fmt;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, trace};

/// A complete (possibly multi-line) server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

/// Negative or unexpected reply, carried inside an [`io::Error`]
#[derive(Debug, thiserror::Error)]
#[error("{command} failed: {code} {text}")]
pub struct ReplyError {
    pub command: String,
    pub code: u16,
    pub text: String,
}

/// Build the I/O error for an unexpected reply.
///
/// 530/532 and 55x replies mentioning permissions map to `PermissionDenied`,
/// other 550s to `NotFound`, 421/425/426 to `ConnectionAborted` and command
/// rejections (500-504) to `Unsupported`.
pub fn reply_error(command: &str, reply: Reply) -> io::Error {
    let lower = reply.text.to_ascii_lowercase();
    let denied = lower.contains("denied") || lower.contains("permission");
    let kind = match reply.code {
        530 | 532 => ErrorKind::PermissionDenied,
        550..=553 if denied => ErrorKind::PermissionDenied,
        550 => ErrorKind::NotFound,
        421 | 425 | 426 => ErrorKind::ConnectionAborted,
        500..=504 => ErrorKind::Unsupported,
        _ => ErrorKind::Other,
    };
    let verb = command.split_whitespace().next().unwrap_or(command);
    io::Error::new(
        kind,
        ReplyError {
            command: verb.to_string(),
            code: reply.code,
            text: reply.text,
        },
    )
}

/// Whether the error came from a well-formed server reply (the control
/// connection is still usable)
pub fn is_reply_error(error: &io::Error) -> bool {
    error
        .get_ref()
        .is_some_and(|inner| inner.is::<ReplyError>())
        && error.kind() != ErrorKind::ConnectionAborted
}

/// Read one reply from the control stream
pub fn read_reply<R: BufRead>(reader: &mut R) -> io::Result<Reply> {
    let first = read_line(reader)?;
    let code = parse_code(&first)?;
    let mut text = first.get(4..).unwrap_or("").to_string();

    if first.as_bytes().get(3) == Some(&b'-') {
        let terminator = format!("{code} ");
        loop {
            let line = read_line(reader)?;
            if line.starts_with(&terminator) {
                text.push('\n');
                text.push_str(line.get(4..).unwrap_or(""));
                break;
            }
            text.push('\n');
            text.push_str(&line);
        }
    }
    Ok(Reply { code, text })
}

fn read_line<R: BufRead>(reader: &mut R) -> io::Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            ErrorKind::ConnectionAborted,
            "server closed the control connection",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_code(line: &str) -> io::Result<u16> {
    line.get(..3)
        .and_then(|code| code.parse().ok())
        .filter(|code| (100..600).contains(code))
        .ok_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidData,
                format!("malformed FTP reply: {line:?}"),
            )
        })
}

/// Port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply
pub fn parse_pasv_port(text: &str) -> Option<u16> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let numbers: Vec<u16> = text[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse().ok())
        .collect::<Option<_>>()?;
    match numbers.as_slice() {
        [_, _, _, _, high, low] if *high < 256 && *low < 256 => Some(high * 256 + low),
        _ => None,
    }
}

enum DataChannel {
    Passive(TcpStream),
    Active(TcpListener),
}

/// An authenticated control connection
pub struct FtpSession {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    passive: bool,
    io_timeout: Duration,
    mlsd_supported: Option<bool>,
}

impl fmt::Debug for FtpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpSession")
            .field("peer", &self.writer.peer_addr().ok())
            .field("passive", &self.passive)
            .finish_non_exhaustive()
    }
}

impl FtpSession {
    /// Connect, log in and switch to binary mode
    pub fn open(endpoint: &RemoteEndpoint) -> io::Result<Self> {
        let stream = connect(endpoint)?;
        configure_stream(&stream, endpoint.io_timeout)?;
        let reader = BufReader::new(stream.try_clone()?);

        let mut session = Self {
            reader,
            writer: stream,
            passive: endpoint.passive,
            io_timeout: endpoint.io_timeout,
            mlsd_supported: None,
        };

        let mut greeting = session.reply()?;
        while greeting.code == 120 {
            greeting = session.reply()?;
        }
        if greeting.code != 220 {
            return Err(reply_error("connect", greeting));
        }

        session.login(&endpoint.user, &endpoint.password)?;
        session.expect("TYPE I", &[200])?;
        debug!(host = %endpoint.host, port = endpoint.port, "FTP session ready");
        Ok(session)
    }

    fn login(&mut self, user: &str, password: &str) -> io::Result<()> {
        let reply = self.command(&format!("USER {user}"))?;
        match reply.code {
            230 => Ok(()),
            331 | 332 => {
                let reply = self.command(&format!("PASS {password}"))?;
                match reply.code {
                    230 | 202 => Ok(()),
                    _ => Err(reply_error("PASS", reply)),
                }
            }
            _ => Err(reply_error("USER", reply)),
        }
    }

    fn reply(&mut self) -> io::Result<Reply> {
        let reply = read_reply(&mut self.reader)?;
        trace!(code = reply.code, text = %reply.text, "ftp <");
        Ok(reply)
    }

    /// Send a command and read its reply
    pub fn command(&mut self, command: &str) -> io::Result<Reply> {
        if command.starts_with("PASS ") {
            trace!("ftp > PASS ****");
        } else {
            trace!("ftp > {command}");
        }
        self.writer.write_all(command.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()?;
        self.reply()
    }

    /// Send a command and require one of `codes` in reply
    pub fn expect(&mut self, command: &str, codes: &[u16]) -> io::Result<Reply> {
        let reply = self.command(command)?;
        if codes.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(reply_error(command, reply))
        }
    }

    fn open_data(&mut self) -> io::Result<DataChannel> {
        if self.passive {
            let reply = self.expect("PASV", &[227])?;
            let port = parse_pasv_port(&reply.text).ok_or_else(|| {
                io::Error::new(ErrorKind::InvalidData, format!("bad PASV reply: {}", reply.text))
            })?;
            // The advertised address is unreliable behind NAT; use the peer's.
            let addr = SocketAddr::new(self.writer.peer_addr()?.ip(), port);
            let stream = TcpStream::connect_timeout(&addr, self.io_timeout)?;
            configure_stream(&stream, self.io_timeout)?;
            Ok(DataChannel::Passive(stream))
        } else {
            let local = self.writer.local_addr()?;
            let IpAddr::V4(ip) = local.ip() else {
                return Err(io::Error::new(
                    ErrorKind::Unsupported,
                    "active mode requires IPv4",
                ));
            };
            let listener = TcpListener::bind((ip, 0))?;
            let port = listener.local_addr()?.port();
            let [a, b, c, d] = ip.octets();
            self.expect(
                &format!("PORT {a},{b},{c},{d},{},{}", port >> 8, port & 0xff),
                &[200],
            )?;
            Ok(DataChannel::Active(listener))
        }
    }

    fn accept_data(&self, channel: DataChannel) -> io::Result<TcpStream> {
        match channel {
            DataChannel::Passive(stream) => Ok(stream),
            DataChannel::Active(listener) => {
                listener.set_nonblocking(true)?;
                let deadline = Instant::now() + self.io_timeout;
                loop {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            stream.set_nonblocking(false)?;
                            configure_stream(&stream, self.io_timeout)?;
                            return Ok(stream);
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            if Instant::now() >= deadline {
                                return Err(io::Error::new(
                                    ErrorKind::TimedOut,
                                    "server did not open the data connection",
                                ));
                            }
                            thread::sleep(Duration::from_millis(20));
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Issue a transfer command and return its data connection
    fn start_transfer(&mut self, command: &str) -> io::Result<TcpStream> {
        let channel = self.open_data()?;
        let reply = self.command(command)?;
        if !matches!(reply.code, 125 | 150) {
            return Err(reply_error(command, reply));
        }
        self.accept_data(channel)
    }

    /// Read the reply that closes a transfer
    fn finish_transfer(&mut self, command: &str) -> io::Result<()> {
        let reply = self.reply()?;
        if matches!(reply.code, 226 | 250) {
            Ok(())
        } else {
            Err(reply_error(command, reply))
        }
    }

    /// Entries of a directory; `MLSD` first, `LIST` once MLSD was rejected
    pub fn list(&mut self, path: &str) -> io::Result<Vec<ListEntry>> {
        if self.mlsd_supported != Some(false) {
            match self.read_listing(&format!("MLSD {path}")) {
                Ok(text) => {
                    self.mlsd_supported = Some(true);
                    return Ok(text.lines().filter_map(listing::parse_mlsd_line).collect());
                }
                Err(e) if e.kind() == ErrorKind::Unsupported => {
                    debug!("server rejected MLSD, falling back to LIST");
                    self.mlsd_supported = Some(false);
                }
                Err(e) => return Err(e),
            }
        }

        let text = self.read_listing(&format!("LIST {path}"))?;
        let now = chrono::Utc::now();
        let mut entries: Vec<ListEntry> = text
            .lines()
            .filter_map(|line| listing::parse_list_line(line, now))
            .collect();
        for entry in entries.iter_mut().filter(|entry| !entry.is_dir) {
            let file = crate::backend::path::join_slashed(path, &entry.name);
            if let Some(modified) = self.exact_modified(&file)? {
                entry.modified = Some(modified);
            }
        }
        Ok(entries)
    }

    /// `MDTM` time of a file; LIST dates are only accurate to the minute
    fn exact_modified(&mut self, path: &str) -> io::Result<Option<SystemTime>> {
        match self.expect(&format!("MDTM {path}"), &[213]) {
            Ok(reply) => Ok(listing::parse_timestamp(&reply.text)),
            Err(e) if is_reply_error(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn read_listing(&mut self, command: &str) -> io::Result<String> {
        let mut data = self.start_transfer(command)?;
        let mut raw = Vec::new();
        data.read_to_end(&mut raw)?;
        drop(data);
        self.finish_transfer(command)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Whether `path` is a directory
    pub fn is_dir(&mut self, path: &str) -> io::Result<bool> {
        match self.expect(&format!("CWD {path}"), &[250]) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Size and modification time of a file, `None` if there is no such file
    pub fn stat_file(&mut self, path: &str) -> io::Result<Option<(u64, Option<SystemTime>)>> {
        let size = match self.expect(&format!("SIZE {path}"), &[213]) {
            Ok(reply) => reply.text.trim().parse::<u64>().ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == ErrorKind::Unsupported => return self.stat_from_listing(path),
            Err(e) => return Err(e),
        };
        let Some(size) = size else {
            return self.stat_from_listing(path);
        };

        let modified = self.exact_modified(path)?;
        Ok(Some((size, modified)))
    }

    fn stat_from_listing(&mut self, path: &str) -> io::Result<Option<(u64, Option<SystemTime>)>> {
        let (parent, name) = crate::backend::path::split_slashed(path);
        let Some(parent) = parent else {
            return Ok(None);
        };
        let entries = match self.list(&parent) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(entries
            .into_iter()
            .find(|entry| !entry.is_dir && entry.name == name)
            .map(|entry| (entry.size, entry.modified)))
    }

    pub fn make_dir(&mut self, path: &str) -> io::Result<()> {
        self.expect(&format!("MKD {path}"), &[257, 250]).map(drop)
    }

    pub fn delete_file(&mut self, path: &str) -> io::Result<()> {
        self.expect(&format!("DELE {path}"), &[250, 200]).map(drop)
    }

    pub fn remove_dir(&mut self, path: &str) -> io::Result<()> {
        self.expect(&format!("RMD {path}"), &[250, 200]).map(drop)
    }

    /// Delete a directory and everything below it
    pub fn remove_tree(&mut self, path: &str) -> io::Result<()> {
        for entry in self.list(path)? {
            let child = crate::backend::path::join_slashed(path, &entry.name);
            if entry.is_dir {
                self.remove_tree(&child)?;
            } else {
                self.delete_file(&child)?;
            }
        }
        self.remove_dir(path)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        self.expect(&format!("RNFR {from}"), &[350])?;
        self.expect(&format!("RNTO {to}"), &[250, 200]).map(drop)
    }

    /// Set a file's modification time
    pub fn set_modified(&mut self, path: &str, time: SystemTime) -> io::Result<()> {
        let stamp = listing::format_timestamp(time);
        self.expect(&format!("MFMT {stamp} {path}"), &[213, 200, 250])
            .map(drop)
    }

    /// Start an upload; the returned writer must be finished explicitly
    pub fn store(&mut self, path: &str) -> io::Result<Upload<'_>> {
        let command = format!("STOR {path}");
        let data = self.start_transfer(&command)?;
        Ok(Upload {
            session: self,
            data: Some(data),
            command,
        })
    }

    /// Start a download that owns this session until it is dropped
    pub fn retrieve(mut self, path: &str) -> io::Result<Download> {
        let command = format!("RETR {path}");
        let data = self.start_transfer(&command)?;
        Ok(Download {
            session: self,
            data: Some(data),
            command,
        })
    }

    /// Say goodbye; errors are irrelevant at this point
    pub fn quit(mut self) {
        let _ = self.command("QUIT");
    }
}

fn connect(endpoint: &RemoteEndpoint) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in (endpoint.host.as_str(), endpoint.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, endpoint.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            ErrorKind::NotFound,
            format!("no address found for {}", endpoint.host),
        )
    }))
}

fn configure_stream(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))
}

/// Writer over an open `STOR` data connection
pub struct Upload<'a> {
    session: &'a mut FtpSession,
    data: Option<TcpStream>,
    command: String,
}

impl Upload<'_> {
    /// Close the data connection and wait for the server to confirm
    pub fn finish(mut self) -> io::Result<()> {
        if let Some(mut data) = self.data.take() {
            data.flush()?;
        }
        self.session.finish_transfer(&self.command)
    }
}

impl Write for Upload<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.data.as_mut() {
            Some(data) => data.write(buf),
            None => Err(io::Error::new(ErrorKind::NotConnected, "upload finished")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.data.as_mut() {
            Some(data) => data.flush(),
            None => Ok(()),
        }
    }
}

/// Reader over a `RETR` data connection; closes its own session on drop
pub struct Download {
    session: FtpSession,
    data: Option<TcpStream>,
    command: String,
}

impl Read for Download {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.as_mut() {
            Some(data) => data.read(buf),
            None => Ok(0),
        }
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        if self.data.take().is_some() {
            // An early close makes the server answer 426; either reply is fine.
            let _ = self.session.finish_transfer(&self.command);
        }
        let _ = self.session.command("QUIT");
    }
}
