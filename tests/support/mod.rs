//! In-process FTP server for exercising the remote backend
//!
//! Serves an in-memory tree over real sockets. Anything below `/readonly`
//! answers mutating commands with `550 Permission denied`.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use treesync::backend::remote::listing::{format_timestamp, parse_timestamp};
use treesync::backend::RemoteEndpoint;

pub const USER: &str = "tester";
pub const PASSWORD: &str = "secret";
const READONLY: &str = "/readonly";

#[derive(Debug)]
struct Tree {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, (Vec<u8>, SystemTime)>,
    mlsd: bool,
    mfmt: bool,
}

/// Handle to a running fake server; the server lives until the process exits
#[derive(Clone)]
pub struct FakeFtpServer {
    port: u16,
    tree: Arc<Mutex<Tree>>,
}

impl FakeFtpServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake ftp server");
        let port = listener.local_addr().expect("local addr").port();
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        dirs.insert(READONLY.to_string());
        let tree = Arc::new(Mutex::new(Tree {
            dirs,
            files: BTreeMap::new(),
            mlsd: true,
            mfmt: true,
        }));

        let shared = Arc::clone(&tree);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let tree = Arc::clone(&shared);
                thread::spawn(move || {
                    let _ = Session::new(stream, tree).serve();
                });
            }
        });

        Self { port, tree }
    }

    /// Answer `MLSD` with 500 so clients fall back to `LIST`
    pub fn disable_mlsd(&self) {
        self.tree.lock().expect("tree lock").mlsd = false;
    }

    pub fn disable_mfmt(&self) {
        self.tree.lock().expect("tree lock").mfmt = false;
    }

    pub fn endpoint(&self) -> RemoteEndpoint {
        RemoteEndpoint::new("127.0.0.1", self.port)
            .with_credentials(USER, PASSWORD)
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(5))
    }

    pub fn add_dir(&self, path: &str) {
        let mut tree = self.tree.lock().expect("tree lock");
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = format!("{current}/{part}");
            tree.dirs.insert(current.clone());
        }
    }

    pub fn add_file(&self, path: &str, content: &[u8], modified: SystemTime) {
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.add_dir(parent);
        }
        self.tree
            .lock()
            .expect("tree lock")
            .files
            .insert(path.to_string(), (content.to_vec(), modified));
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.tree
            .lock()
            .expect("tree lock")
            .files
            .get(path)
            .map(|(content, _)| content.clone())
    }

    pub fn modified(&self, path: &str) -> Option<SystemTime> {
        self.tree
            .lock()
            .expect("tree lock")
            .files
            .get(path)
            .map(|(_, modified)| *modified)
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.tree.lock().expect("tree lock").dirs.contains(path)
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.tree
            .lock()
            .expect("tree lock")
            .files
            .keys()
            .cloned()
            .collect()
    }
}

enum Pending {
    None,
    Passive(TcpListener),
    Active(SocketAddr),
}

struct Session {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    tree: Arc<Mutex<Tree>>,
    pending: Pending,
    user: Option<String>,
    logged_in: bool,
    rename_from: Option<String>,
}

fn is_readonly(path: &str) -> bool {
    path == READONLY || path.starts_with("/readonly/")
}

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl Session {
    fn new(stream: TcpStream, tree: Arc<Mutex<Tree>>) -> Self {
        let reader = BufReader::new(stream.try_clone().expect("clone control stream"));
        Self {
            reader,
            writer: stream,
            tree,
            pending: Pending::None,
            user: None,
            logged_in: false,
            rename_from: None,
        }
    }

    fn send(&mut self, code: u16, text: &str) -> std::io::Result<()> {
        write!(self.writer, "{code} {text}\r\n")?;
        self.writer.flush()
    }

    fn serve(mut self) -> std::io::Result<()> {
        self.send(220, "fake ftp ready")?;
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            let line = line.trim_end_matches(['\r', '\n']);
            let (verb, arg) = line.split_once(' ').unwrap_or((line, ""));
            let verb = verb.to_ascii_uppercase();

            if !self.logged_in && !matches!(verb.as_str(), "USER" | "PASS" | "QUIT") {
                self.send(530, "Please login with USER and PASS")?;
                continue;
            }

            match verb.as_str() {
                "USER" => {
                    self.user = Some(arg.to_string());
                    self.send(331, "Password required")?;
                }
                "PASS" => {
                    if self.user.as_deref() == Some(USER) && arg == PASSWORD {
                        self.logged_in = true;
                        self.send(230, "Logged in")?;
                    } else {
                        self.send(530, "Login incorrect")?;
                    }
                }
                "TYPE" => self.send(200, "Type set")?,
                "PASV" => {
                    let listener = TcpListener::bind("127.0.0.1:0")?;
                    let port = listener.local_addr()?.port();
                    self.pending = Pending::Passive(listener);
                    self.send(
                        227,
                        &format!("Entering Passive Mode (127,0,0,1,{},{})", port >> 8, port & 0xff),
                    )?;
                }
                "PORT" => {
                    let numbers: Vec<u16> = arg.split(',').filter_map(|n| n.parse().ok()).collect();
                    if let [a, b, c, d, high, low] = numbers[..] {
                        let ip = Ipv4Addr::new(a as u8, b as u8, c as u8, d as u8);
                        let addr = SocketAddrV4::new(ip, high * 256 + low);
                        self.pending = Pending::Active(SocketAddr::V4(addr));
                        self.send(200, "PORT command successful")?;
                    } else {
                        self.send(501, "Bad PORT argument")?;
                    }
                }
                "CWD" => {
                    let exists = self.tree.lock().expect("tree lock").dirs.contains(arg);
                    if exists {
                        self.send(250, "Directory changed")?;
                    } else {
                        self.send(550, "No such directory")?;
                    }
                }
                "SIZE" => {
                    let size = self
                        .tree
                        .lock()
                        .expect("tree lock")
                        .files
                        .get(arg)
                        .map(|(content, _)| content.len());
                    match size {
                        Some(size) => self.send(213, &size.to_string())?,
                        None => self.send(550, "No such file")?,
                    }
                }
                "MDTM" => {
                    let modified = self
                        .tree
                        .lock()
                        .expect("tree lock")
                        .files
                        .get(arg)
                        .map(|(_, modified)| *modified);
                    match modified {
                        Some(time) => self.send(213, &format_timestamp(time))?,
                        None => self.send(550, "No such file")?,
                    }
                }
                "MFMT" => self.set_modified(arg)?,
                "MLSD" => {
                    let mlsd = self.tree.lock().expect("tree lock").mlsd;
                    if mlsd {
                        self.listing(arg, true)?;
                    } else {
                        self.send(500, "Unknown command")?;
                    }
                }
                "LIST" => self.listing(arg, false)?,
                "MKD" => self.make_dir(arg)?,
                "DELE" => {
                    if is_readonly(arg) {
                        self.send(550, "Permission denied")?;
                    } else if self.tree.lock().expect("tree lock").files.remove(arg).is_some() {
                        self.send(250, "File deleted")?;
                    } else {
                        self.send(550, "No such file")?;
                    }
                }
                "RMD" => self.remove_dir(arg)?,
                "RNFR" => {
                    let exists = self.tree.lock().expect("tree lock").files.contains_key(arg);
                    if exists {
                        self.rename_from = Some(arg.to_string());
                        self.send(350, "Ready for RNTO")?;
                    } else {
                        self.send(550, "No such file")?;
                    }
                }
                "RNTO" => self.rename_to(arg)?,
                "STOR" => self.store(arg)?,
                "RETR" => self.retrieve(arg)?,
                "QUIT" => {
                    self.send(221, "Bye")?;
                    return Ok(());
                }
                _ => self.send(502, "Command not implemented")?,
            }
        }
    }

    fn data_connection(&mut self) -> std::io::Result<TcpStream> {
        let stream = match std::mem::replace(&mut self.pending, Pending::None) {
            Pending::Passive(listener) => listener.accept()?.0,
            Pending::Active(addr) => TcpStream::connect_timeout(&addr, Duration::from_secs(2))?,
            Pending::None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "no data connection prepared",
                ))
            }
        };
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        Ok(stream)
    }

    fn listing(&mut self, dir: &str, machine: bool) -> std::io::Result<()> {
        let lines = {
            let tree = self.tree.lock().expect("tree lock");
            if !tree.dirs.contains(dir) {
                None
            } else {
                let mut lines = Vec::new();
                for sub in tree.dirs.iter().filter(|d| *d != "/" && parent_of(d) == dir) {
                    lines.push(if machine {
                        format!("type=dir;modify=20240101000000; {}", name_of(sub))
                    } else {
                        format!("drwxr-xr-x 2 owner group 4096 Jan 01 2024 {}", name_of(sub))
                    });
                }
                let files = tree.files.iter().filter(|(p, _)| parent_of(p) == dir);
                for (path, (content, modified)) in files {
                    lines.push(if machine {
                        format!(
                            "type=file;size={};modify={}; {}",
                            content.len(),
                            format_timestamp(*modified),
                            name_of(path)
                        )
                    } else {
                        let date: chrono::DateTime<chrono::Utc> = (*modified).into();
                        format!(
                            "-rw-r--r-- 1 owner group {} {} {}",
                            content.len(),
                            date.format("%b %d %Y"),
                            name_of(path)
                        )
                    });
                }
                Some(lines)
            }
        };

        let Some(lines) = lines else {
            return self.send(550, "No such directory");
        };
        self.send(150, "Opening data connection")?;
        let mut data = self.data_connection()?;
        for line in lines {
            write!(data, "{line}\r\n")?;
        }
        drop(data);
        self.send(226, "Transfer complete")
    }

    fn make_dir(&mut self, path: &str) -> std::io::Result<()> {
        if is_readonly(path) {
            return self.send(550, "Permission denied");
        }
        let mut tree = self.tree.lock().expect("tree lock");
        if !tree.dirs.contains(&parent_of(path)) {
            drop(tree);
            return self.send(550, "No such directory");
        }
        tree.dirs.insert(path.to_string());
        drop(tree);
        self.send(257, &format!("\"{path}\" created"))
    }

    fn remove_dir(&mut self, path: &str) -> std::io::Result<()> {
        if is_readonly(path) {
            return self.send(550, "Permission denied");
        }
        let mut tree = self.tree.lock().expect("tree lock");
        let has_children = tree.dirs.iter().any(|d| d != "/" && parent_of(d) == path)
            || tree.files.keys().any(|f| parent_of(f) == path);
        let removed = !has_children && tree.dirs.remove(path);
        drop(tree);
        if removed {
            self.send(250, "Directory removed")
        } else {
            self.send(550, "Directory not empty or missing")
        }
    }

    fn rename_to(&mut self, to: &str) -> std::io::Result<()> {
        let Some(from) = self.rename_from.take() else {
            return self.send(503, "RNFR required first");
        };
        if is_readonly(to) {
            return self.send(550, "Permission denied");
        }
        let mut tree = self.tree.lock().expect("tree lock");
        if let Some(entry) = tree.files.remove(&from) {
            tree.files.insert(to.to_string(), entry);
            drop(tree);
            self.send(250, "Rename successful")
        } else {
            drop(tree);
            self.send(550, "No such file")
        }
    }

    fn set_modified(&mut self, arg: &str) -> std::io::Result<()> {
        let (stamp, path) = arg.split_once(' ').unwrap_or((arg, ""));
        let mut tree = self.tree.lock().expect("tree lock");
        if !tree.mfmt {
            drop(tree);
            return self.send(502, "Command not implemented");
        }
        let time = parse_timestamp(stamp);
        match (tree.files.get_mut(path), time) {
            (Some(entry), Some(time)) => {
                entry.1 = time;
                drop(tree);
                self.send(213, &format!("Modify={stamp}; {path}"))
            }
            _ => {
                drop(tree);
                self.send(550, "No such file")
            }
        }
    }

    fn store(&mut self, path: &str) -> std::io::Result<()> {
        if is_readonly(path) {
            self.pending = Pending::None;
            return self.send(550, "Permission denied");
        }
        let parent_exists = self.tree.lock().expect("tree lock").dirs.contains(&parent_of(path));
        if !parent_exists {
            self.pending = Pending::None;
            return self.send(550, "No such directory");
        }

        self.send(150, "Ok to send data")?;
        let mut data = self.data_connection()?;
        let mut content = Vec::new();
        data.read_to_end(&mut content)?;
        self.tree
            .lock()
            .expect("tree lock")
            .files
            .insert(path.to_string(), (content, SystemTime::now()));
        self.send(226, "Transfer complete")
    }

    fn retrieve(&mut self, path: &str) -> std::io::Result<()> {
        let content = self
            .tree
            .lock()
            .expect("tree lock")
            .files
            .get(path)
            .map(|(content, _)| content.clone());
        let Some(content) = content else {
            self.pending = Pending::None;
            return self.send(550, "No such file");
        };

        self.send(150, "Opening data connection")?;
        let mut data = self.data_connection()?;
        let sent = data.write_all(&content).and_then(|()| data.flush());
        drop(data);
        match sent {
            Ok(()) => self.send(226, "Transfer complete"),
            Err(_) => self.send(426, "Connection closed; transfer aborted"),
        }
    }
}

/// Whole-second time, as FTP servers report it
pub fn seconds(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}
