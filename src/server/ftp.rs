//! FTP服务器（被动模式）
//!
//! 每个控制连接一个任务、一个 [`FtpDriver`]；数据连接只支持 PASV/EPSV。

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

use super::config::FtpConfig;
use crate::vfs::{DirEntry, DriverFactory, FtpDriver, UploadSource};

/// 被动端口分配（在配置范围内轮转）
struct PassivePorts {
    start: u16,
    end: u16,
    next: Mutex<u16>,
}

impl PassivePorts {
    fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            next: Mutex::new(start),
        }
    }

    fn next_port(&self) -> u16 {
        let mut next = self.next.lock();
        let port = *next;
        *next = if port >= self.end { self.start } else { port + 1 };
        port
    }

    async fn bind(&self, ip: IpAddr) -> io::Result<TcpListener> {
        if self.start == 0 || self.end < self.start {
            return TcpListener::bind((ip, 0)).await;
        }

        for _ in self.start..=self.end {
            let port = self.next_port();
            match TcpListener::bind((ip, port)).await {
                Ok(listener) => return Ok(listener),
                Err(e) => tracing::debug!("Passive port {} unavailable: {}", port, e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            "no free port in the passive range",
        ))
    }
}

struct ServerContext {
    config: FtpConfig,
    factory: Arc<dyn DriverFactory>,
    ports: PassivePorts,
}

/// FTP服务器
pub struct FtpServer {
    ctx: Arc<ServerContext>,
}

impl FtpServer {
    pub fn new(config: FtpConfig, factory: Arc<dyn DriverFactory>) -> Self {
        let ports = PassivePorts::new(config.passive_ports_start, config.passive_ports_end);
        Self {
            ctx: Arc::new(ServerContext {
                config,
                factory,
                ports,
            }),
        }
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = self.ctx.config.listen.parse()?;
        Ok(TcpListener::bind(addr).await?)
    }

    /// 启动FTP服务器
    pub async fn start(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// 接受连接，每个连接一个任务
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("FTP服务器启动于 {}", listener.local_addr()?);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let ctx = self.ctx.clone();

            tokio::spawn(async move {
                tracing::debug!("FTP connection from {}", remote_addr);
                if let Err(err) = handle_connection(stream, ctx).await {
                    tracing::error!("FTP connection error {}: {:?}", remote_addr, err);
                }
                tracing::debug!("FTP connection closed {}", remote_addr);
            });
        }
    }
}

/// 创建FTP服务器实例
pub fn create_ftp_server(config: FtpConfig, factory: Arc<dyn DriverFactory>) -> FtpServer {
    FtpServer::new(config, factory)
}

async fn handle_connection(stream: TcpStream, ctx: Arc<ServerContext>) -> Result<()> {
    let local_ip = stream.local_addr()?.ip();
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut session = FtpSession {
        driver: ctx.factory.new_driver(),
        ctx: ctx.clone(),
        writer,
        local_ip,
        user: None,
        logged_in: false,
        passive: None,
        rename_from: None,
    };
    session.reply(220, &ctx.config.greeting).await?;

    let idle = Duration::from_secs(ctx.config.idle_timeout.max(1));
    loop {
        let line = match tokio::time::timeout(idle, read_control_line(&mut reader)).await {
            Ok(Ok(ControlLine::Line(line))) => line,
            Ok(Ok(ControlLine::TooLong)) => {
                session.reply(500, "Command line too long").await?;
                continue;
            }
            Ok(Ok(ControlLine::Closed)) => break,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                session.reply(421, "Idle timeout, closing control connection").await?;
                break;
            }
        };

        let (command, arg) = parse_command(&line);
        if command.is_empty() {
            continue;
        }
        if command == "PASS" {
            tracing::debug!("FTP <- PASS ****");
        } else {
            tracing::debug!("FTP <- {}", line.trim_end());
        }

        if let Flow::Quit = session.dispatch(&command, arg).await? {
            break;
        }
    }
    Ok(())
}

/// 控制连接单行最大字节数（含换行）
const MAX_LINE: u64 = 4096;

#[derive(Debug, PartialEq)]
enum ControlLine {
    Line(String),
    /// 超长行已被丢弃
    TooLong,
    Closed,
}

/// 读取一行控制命令，单次缓冲不超过 [`MAX_LINE`]
async fn read_control_line<R>(reader: &mut R) -> io::Result<ControlLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader).take(MAX_LINE).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(ControlLine::Closed);
    }

    if !buf.ends_with(b"\n") && n as u64 >= MAX_LINE {
        // 丢弃到下一个换行为止
        loop {
            buf.clear();
            let n = (&mut *reader).take(MAX_LINE).read_until(b'\n', &mut buf).await?;
            if n == 0 || buf.ends_with(b"\n") {
                break;
            }
        }
        return Ok(ControlLine::TooLong);
    }

    let line = String::from_utf8_lossy(&buf);
    Ok(ControlLine::Line(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// 拆分命令与参数，命令统一大写
fn parse_command(line: &str) -> (String, &str) {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.split_once(' ') {
        Some((command, arg)) => (command.to_ascii_uppercase(), arg.trim()),
        None => (line.trim().to_ascii_uppercase(), ""),
    }
}

/// 登录前允许的命令
const PRE_LOGIN: &[&str] = &["USER", "PASS", "QUIT", "SYST", "FEAT", "NOOP"];

const KNOWN: &[&str] = &[
    "USER", "PASS", "QUIT", "SYST", "FEAT", "NOOP", "TYPE", "MODE", "STRU", "PWD", "XPWD", "CWD",
    "XCWD", "CDUP", "XCUP", "PASV", "EPSV", "LIST", "NLST", "RETR", "STOR", "DELE", "MKD", "XMKD",
    "RMD", "XRMD", "RNFR", "RNTO", "SIZE", "MDTM", "ALLO",
];

enum Flow {
    Continue,
    Quit,
}

struct FtpSession {
    ctx: Arc<ServerContext>,
    driver: Box<dyn FtpDriver>,
    writer: OwnedWriteHalf,
    local_ip: IpAddr,
    user: Option<String>,
    logged_in: bool,
    passive: Option<TcpListener>,
    rename_from: Option<String>,
}

impl FtpSession {
    async fn reply(&mut self, code: u16, message: &str) -> io::Result<()> {
        tracing::debug!("FTP -> {} {}", code, message);
        self.writer
            .write_all(format!("{} {}\r\n", code, message).as_bytes())
            .await
    }

    async fn dispatch(&mut self, command: &str, arg: &str) -> Result<Flow> {
        if !KNOWN.contains(&command) {
            self.reply(502, "Command not implemented").await?;
            return Ok(Flow::Continue);
        }
        if !self.logged_in && !PRE_LOGIN.contains(&command) {
            self.reply(530, "Please login with USER and PASS").await?;
            return Ok(Flow::Continue);
        }
        if command != "RNTO" {
            // RNFR只对紧接着的RNTO有效
            self.rename_from = self.rename_from.take().filter(|_| command == "RNFR");
        }

        match command {
            "USER" => {
                self.user = Some(arg.to_string());
                self.logged_in = false;
                self.reply(331, "User name okay, need password").await?;
            }
            "PASS" => self.pass(arg).await?,
            "QUIT" => {
                self.reply(221, "Goodbye").await?;
                return Ok(Flow::Quit);
            }
            "SYST" => self.reply(215, "UNIX Type: L8").await?,
            "FEAT" => {
                self.writer
                    .write_all(b"211-Features:\r\n SIZE\r\n MDTM\r\n PASV\r\n EPSV\r\n211 End\r\n")
                    .await?;
            }
            "NOOP" => self.reply(200, "OK").await?,
            "TYPE" => match arg.to_ascii_uppercase().as_str() {
                "A" | "A N" | "I" | "L 8" => self.reply(200, "Type set").await?,
                _ => self.reply(504, "Type not supported").await?,
            },
            "MODE" => match arg.to_ascii_uppercase().as_str() {
                "S" => self.reply(200, "Mode set to S").await?,
                _ => self.reply(504, "Only stream mode is supported").await?,
            },
            "STRU" => match arg.to_ascii_uppercase().as_str() {
                "F" => self.reply(200, "Structure set to F").await?,
                _ => self.reply(504, "Only file structure is supported").await?,
            },
            "ALLO" => self.reply(202, "No storage allocation necessary").await?,
            "PWD" | "XPWD" => {
                let wd = self.driver.working_dir().replace('"', "\"\"");
                self.reply(257, &format!("\"{}\" is the current directory", wd))
                    .await?;
            }
            "CWD" | "XCWD" => self.change_dir(arg).await?,
            "CDUP" | "XCUP" => self.change_dir("..").await?,
            "PASV" => self.pasv().await?,
            "EPSV" => self.epsv().await?,
            "LIST" => self.list(arg, false).await?,
            "NLST" => self.list(arg, true).await?,
            "RETR" => self.retr(arg).await?,
            "STOR" => self.stor(arg).await?,
            "DELE" => {
                if self.driver.delete_file(arg).await {
                    self.reply(250, "File deleted").await?;
                } else {
                    self.reply(550, "Delete failed").await?;
                }
            }
            "MKD" | "XMKD" => {
                if self.driver.make_dir(arg).await {
                    self.reply(257, &format!("\"{}\" created", arg)).await?;
                } else {
                    self.reply(550, "Create directory operation failed").await?;
                }
            }
            "RMD" | "XRMD" => {
                if self.driver.delete_dir(arg).await {
                    self.reply(250, "Directory removed").await?;
                } else {
                    self.reply(550, "Remove directory operation failed").await?;
                }
            }
            "RNFR" => {
                self.rename_from = Some(arg.to_string());
                self.reply(350, "Ready for RNTO").await?;
            }
            "RNTO" => match self.rename_from.take() {
                Some(from) => {
                    if self.driver.rename(&from, arg).await {
                        self.reply(250, "Rename successful").await?;
                    } else {
                        self.reply(550, "Rename failed").await?;
                    }
                }
                None => self.reply(503, "RNFR required first").await?,
            },
            "SIZE" => {
                let size = self.driver.stat_size(arg).await;
                if size < 0 {
                    self.reply(550, "Could not get file size").await?;
                } else {
                    self.reply(213, &size.to_string()).await?;
                }
            }
            "MDTM" => {
                let (modified, ok) = self.driver.stat_mtime(arg).await;
                if ok {
                    self.reply(213, &format_mdtm(&modified)).await?;
                } else {
                    self.reply(550, "Could not get modification time").await?;
                }
            }
            _ => self.reply(502, "Command not implemented").await?,
        }
        Ok(Flow::Continue)
    }

    async fn pass(&mut self, arg: &str) -> Result<()> {
        let user = match self.user.clone() {
            Some(user) => user,
            None => {
                self.reply(503, "Login with USER first").await?;
                return Ok(());
            }
        };

        if self.driver.authenticate(&user, arg).await {
            self.logged_in = true;
            self.reply(230, "User logged in").await?;
        } else {
            self.logged_in = false;
            self.reply(530, "Login incorrect").await?;
        }
        Ok(())
    }

    async fn change_dir(&mut self, path: &str) -> Result<()> {
        if self.driver.change_dir(path).await {
            let wd = self.driver.working_dir();
            self.reply(250, &format!("Directory changed to {}", wd)).await?;
        } else {
            self.reply(550, "Failed to change directory").await?;
        }
        Ok(())
    }

    /// 被动监听绑定在控制连接的本地地址上
    async fn open_passive(&mut self) -> io::Result<u16> {
        let listener = self.ctx.ports.bind(self.local_ip).await?;
        let port = listener.local_addr()?.port();
        self.passive = Some(listener);
        Ok(port)
    }

    fn advertised_ipv4(&self) -> Option<Ipv4Addr> {
        if let Some(host) = self.ctx.config.public_host.as_deref() {
            if let Ok(ip) = host.parse::<Ipv4Addr>() {
                return Some(ip);
            }
            tracing::warn!("public_host is not an IPv4 address: {}", host);
        }
        match self.local_ip {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(ip) => ip.to_ipv4_mapped(),
        }
    }

    async fn pasv(&mut self) -> Result<()> {
        let ip = match self.advertised_ipv4() {
            Some(ip) => ip,
            None => {
                self.reply(425, "PASV needs IPv4, use EPSV").await?;
                return Ok(());
            }
        };
        match self.open_passive().await {
            Ok(port) => {
                let [a, b, c, d] = ip.octets();
                let message = format!(
                    "Entering Passive Mode ({},{},{},{},{},{})",
                    a,
                    b,
                    c,
                    d,
                    port >> 8,
                    port & 0xff
                );
                self.reply(227, &message).await?;
            }
            Err(e) => {
                tracing::warn!("Opening passive listener failed: {}", e);
                self.reply(425, "Can't open passive connection").await?;
            }
        }
        Ok(())
    }

    async fn epsv(&mut self) -> Result<()> {
        match self.open_passive().await {
            Ok(port) => {
                self.reply(229, &format!("Entering Extended Passive Mode (|||{}|)", port))
                    .await?
            }
            Err(e) => {
                tracing::warn!("Opening passive listener failed: {}", e);
                self.reply(425, "Can't open passive connection").await?;
            }
        }
        Ok(())
    }

    /// 等待客户端连上被动端口
    async fn accept_data(&mut self) -> Result<Option<TcpStream>> {
        let listener = match self.passive.take() {
            Some(listener) => listener,
            None => {
                self.reply(425, "Use PASV or EPSV first").await?;
                return Ok(None);
            }
        };

        let wait = Duration::from_secs(self.ctx.config.data_timeout.max(1));
        match tokio::time::timeout(wait, listener.accept()).await {
            Ok(Ok((stream, _))) => Ok(Some(stream)),
            Ok(Err(e)) => {
                tracing::warn!("Data connection failed: {}", e);
                self.reply(425, "Can't open data connection").await?;
                Ok(None)
            }
            Err(_) => {
                self.reply(425, "Data connection timed out").await?;
                Ok(None)
            }
        }
    }

    async fn list(&mut self, arg: &str, names_only: bool) -> Result<()> {
        // 忽略 ls 风格参数，如 "-la"
        let path = arg
            .split_whitespace()
            .filter(|part| !part.starts_with('-'))
            .collect::<Vec<_>>()
            .join(" ");

        let mut entries = self.driver.list_dir(&path).await;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let now = Utc::now();
        let body: String = entries
            .iter()
            .map(|entry| {
                if names_only {
                    format!("{}\r\n", entry.name)
                } else {
                    format!("{}\r\n", format_list_line(entry, &now))
                }
            })
            .collect();

        let mut data = match self.accept_data().await? {
            Some(data) => data,
            None => return Ok(()),
        };
        self.reply(150, "Here comes the directory listing").await?;
        let sent = async {
            data.write_all(body.as_bytes()).await?;
            data.shutdown().await
        }
        .await;
        drop(data);

        match sent {
            Ok(()) => self.reply(226, "Directory send OK").await?,
            Err(e) => {
                tracing::warn!("Sending listing failed: {}", e);
                self.reply(426, "Connection closed, transfer aborted").await?;
            }
        }
        Ok(())
    }

    async fn retr(&mut self, path: &str) -> Result<()> {
        let mut reader = match self.driver.get_file(path).await {
            Ok(reader) => reader,
            Err(_) => {
                self.passive = None;
                self.reply(550, "Failed to open file").await?;
                return Ok(());
            }
        };

        let mut data = match self.accept_data().await? {
            Some(data) => data,
            None => return Ok(()),
        };
        self.reply(150, "Opening BINARY mode data connection").await?;
        let copied = async {
            let bytes = tokio::io::copy(&mut reader, &mut data).await?;
            data.shutdown().await?;
            Ok::<u64, io::Error>(bytes)
        }
        .await;
        drop(data);

        match copied {
            Ok(bytes) => {
                tracing::info!("RETR {}: {} bytes", path, bytes);
                self.reply(226, "Transfer complete").await?;
            }
            Err(e) => {
                tracing::warn!("RETR {} failed: {}", path, e);
                self.reply(426, "Connection closed, transfer aborted").await?;
            }
        }
        Ok(())
    }

    async fn stor(&mut self, path: &str) -> Result<()> {
        let mut data = match self.accept_data().await? {
            Some(data) => data,
            None => return Ok(()),
        };
        self.reply(150, "Ok to send data").await?;

        let source: UploadSource<'_> = &mut data;
        let stored = self.driver.put_file(path, Some(source)).await;
        drop(data);

        if stored {
            self.reply(226, "Transfer complete").await?;
        } else {
            self.reply(451, "Upload failed").await?;
        }
        Ok(())
    }
}

/// MDTM 响应时间格式（UTC）
fn format_mdtm(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%d%H%M%S").to_string()
}

/// `ls -l` 风格的一行；半年以前的条目显示年份
fn format_list_line(entry: &DirEntry, now: &DateTime<Utc>) -> String {
    let mode = if entry.is_dir { "drwxr-xr-x" } else { "-rw-r--r--" };
    let age = now.signed_duration_since(entry.modified);
    let time = if age.num_days() > 180 || age.num_seconds() < 0 {
        entry.modified.format("%b %e  %Y")
    } else {
        entry.modified.format("%b %e %H:%M")
    };
    format!(
        "{} 1 ftp ftp {:>12} {} {}",
        mode, entry.size, time, entry.name
    )
}
