use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use ssh2::{Channel, Session};
use tracing::{debug, warn};

use crate::DirectorResult;
use crate::error::Error;
use crate::proxy::SshJumpHost;

const SOCKS_VERSION: u8 = 0x05;
const NO_AUTHENTICATION: u8 = 0x00;
const NO_ACCEPTABLE_METHODS: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_HOST_UNREACHABLE: u8 = 0x04;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

const LIBSSH2_ERROR_EAGAIN: i32 = -37;
const IDLE_BACKOFF: Duration = Duration::from_millis(2);
const PUMP_BUFFER: usize = 16 * 1024;

/// Loopback SOCKS5 listener whose connections leave through an SSH session.
///
/// The accept loop owns the session and lives as long as the process.
#[derive(Debug)]
pub(crate) struct SshTunnel {
    local_addr: SocketAddr,
}

impl SshTunnel {
    pub(crate) fn open(
        jump_host: &SshJumpHost,
        private_key: &str,
        connect_timeout: Duration,
    ) -> DirectorResult<Self> {
        let target = jump_host.address();
        let tunnel_error = |source: std::io::Error| Error::Tunnel {
            target: target.clone(),
            source,
        };

        let tcp = connect_any(&jump_host.host, jump_host.port, connect_timeout)
            .map_err(tunnel_error)?;
        let session = start_session(tcp, jump_host, private_key, connect_timeout)
            .map_err(|source| tunnel_error(std::io::Error::other(source)))?;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(tunnel_error)?;
        let local_addr = listener.local_addr().map_err(tunnel_error)?;
        session.set_blocking(false);

        thread::Builder::new()
            .name(format!("ssh-tunnel-{target}"))
            .spawn(move || accept_loop(listener, session))
            .map_err(tunnel_error)?;

        debug!(jump_host = %target, local_addr = %local_addr, "ssh tunnel ready");
        Ok(Self { local_addr })
    }

    pub(crate) fn proxy_url(&self) -> String {
        format!("socks5://{}", self.local_addr)
    }
}

fn connect_any(host: &str, port: u16, timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_error = None;
    for address in (host, port).to_socket_addrs()? {
        let attempt = if timeout.is_zero() {
            TcpStream::connect(address)
        } else {
            TcpStream::connect_timeout(&address, timeout)
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = Some(error),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(ErrorKind::NotFound, format!("{host} did not resolve"))
    }))
}

fn start_session(
    tcp: TcpStream,
    jump_host: &SshJumpHost,
    private_key: &str,
    timeout: Duration,
) -> Result<Session, ssh2::Error> {
    let mut session = Session::new()?;
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.set_tcp_stream(tcp);
    session.handshake()?;
    session.userauth_pubkey_memory(&jump_host.user, None, private_key, None)?;
    session.set_timeout(0);
    Ok(session)
}

fn accept_loop(listener: TcpListener, session: Session) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(error) => {
                warn!(error = %error, "ssh tunnel accept failed");
                continue;
            }
        };
        let session = session.clone();
        let spawned = thread::Builder::new()
            .name("ssh-tunnel-conn".to_owned())
            .spawn(move || {
                if let Err(error) = serve_connection(stream, &session) {
                    debug!(error = %error, "ssh tunnel connection closed with error");
                }
            });
        if let Err(error) = spawned {
            warn!(error = %error, "ssh tunnel could not spawn connection worker");
        }
    }
}

fn serve_connection(mut stream: TcpStream, session: &Session) -> std::io::Result<()> {
    let (host, port) = negotiate(&mut stream)?;
    let channel = match open_channel(session, &host, port) {
        Ok(channel) => channel,
        Err(error) => {
            write_reply(&mut stream, REPLY_HOST_UNREACHABLE)?;
            return Err(std::io::Error::other(format!(
                "opening channel to {host}:{port}: {error}"
            )));
        }
    };
    write_reply(&mut stream, REPLY_SUCCEEDED)?;
    pump(stream, channel)
}

fn is_would_block(error: &ssh2::Error) -> bool {
    matches!(error.code(), ssh2::ErrorCode::Session(LIBSSH2_ERROR_EAGAIN))
}

fn open_channel(session: &Session, host: &str, port: u16) -> Result<Channel, ssh2::Error> {
    loop {
        match session.channel_direct_tcpip(host, port, None) {
            Ok(channel) => return Ok(channel),
            Err(error) if is_would_block(&error) => thread::sleep(IDLE_BACKOFF),
            Err(error) => return Err(error),
        }
    }
}

fn pump(mut stream: TcpStream, mut channel: Channel) -> std::io::Result<()> {
    stream.set_nonblocking(true)?;
    let mut buffer = vec![0_u8; PUMP_BUFFER];

    loop {
        let mut progressed = false;

        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => {
                write_all_nonblocking(&mut channel, &buffer[..read])?;
                progressed = true;
            }
            Err(error) if error.kind() == ErrorKind::WouldBlock => {}
            Err(error) => return Err(error),
        }

        match channel.read(&mut buffer) {
            Ok(0) if channel.eof() => break,
            Ok(0) => {}
            Ok(read) => {
                write_all_nonblocking(&mut stream, &buffer[..read])?;
                progressed = true;
            }
            Err(error) if error.kind() == ErrorKind::WouldBlock => {}
            Err(error) => return Err(error),
        }

        if !progressed {
            thread::sleep(IDLE_BACKOFF);
        }
    }

    let _ = channel.send_eof();
    let _ = channel.close();
    Ok(())
}

fn write_all_nonblocking<W: Write>(writer: &mut W, mut bytes: &[u8]) -> std::io::Result<()> {
    while !bytes.is_empty() {
        match writer.write(bytes) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(written) => bytes = &bytes[written..],
            Err(error) if error.kind() == ErrorKind::WouldBlock => thread::sleep(IDLE_BACKOFF),
            Err(error) => return Err(error),
        }
    }
    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(error) if error.kind() == ErrorKind::WouldBlock => thread::sleep(IDLE_BACKOFF),
            Err(error) => return Err(error),
        }
    }
}

/// Server side of the SOCKS5 greeting and CONNECT request. Returns the requested
/// destination; the caller sends the final reply once the destination is reachable.
pub(crate) fn negotiate<S: Read + Write>(stream: &mut S) -> std::io::Result<(String, u16)> {
    let mut greeting = [0_u8; 2];
    stream.read_exact(&mut greeting)?;
    if greeting[0] != SOCKS_VERSION {
        return Err(invalid_data(format!(
            "unsupported socks version {}",
            greeting[0]
        )));
    }
    let mut methods = vec![0_u8; usize::from(greeting[1])];
    stream.read_exact(&mut methods)?;
    if !methods.contains(&NO_AUTHENTICATION) {
        stream.write_all(&[SOCKS_VERSION, NO_ACCEPTABLE_METHODS])?;
        return Err(invalid_data("client offered no acceptable auth method"));
    }
    stream.write_all(&[SOCKS_VERSION, NO_AUTHENTICATION])?;

    let mut header = [0_u8; 4];
    stream.read_exact(&mut header)?;
    if header[0] != SOCKS_VERSION {
        write_reply(stream, REPLY_GENERAL_FAILURE)?;
        return Err(invalid_data("bad socks request version"));
    }
    if header[1] != CMD_CONNECT {
        write_reply(stream, REPLY_COMMAND_NOT_SUPPORTED)?;
        return Err(invalid_data(format!("unsupported socks command {}", header[1])));
    }

    let host = match header[3] {
        ATYP_IPV4 => {
            let mut octets = [0_u8; 4];
            stream.read_exact(&mut octets)?;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let mut length = [0_u8; 1];
            stream.read_exact(&mut length)?;
            let mut domain = vec![0_u8; usize::from(length[0])];
            stream.read_exact(&mut domain)?;
            String::from_utf8(domain).map_err(|_| invalid_data("domain is not utf-8"))?
        }
        ATYP_IPV6 => {
            let mut octets = [0_u8; 16];
            stream.read_exact(&mut octets)?;
            Ipv6Addr::from(octets).to_string()
        }
        other => {
            write_reply(stream, REPLY_ADDRESS_NOT_SUPPORTED)?;
            return Err(invalid_data(format!("unsupported address type {other}")));
        }
    };

    let mut port = [0_u8; 2];
    stream.read_exact(&mut port)?;
    Ok((host, u16::from_be_bytes(port)))
}

fn write_reply<W: Write>(stream: &mut W, reply: u8) -> std::io::Result<()> {
    stream.write_all(&[SOCKS_VERSION, reply, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])?;
    stream.flush()
}

fn invalid_data(message: impl Into<String>) -> std::io::Error {
    std::io::Error::new(ErrorKind::InvalidData, message.into())
}
