use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use api_types::FilterSet;

use crate::encode_query;
use crate::Watchdog;
use crate::WatchdogError;
use crate::ACKNOWLEDGMENT;

/// Timeouts applied to a TCP connection to the watchdog.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// how long to wait for the acknowledgment line
    pub ack_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

impl WatchdogConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }
}

/// Watchdog client over an already open duplex byte stream.
#[derive(Debug)]
pub struct StreamWatchdog<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
}

pub type TcpWatchdog = StreamWatchdog<BufReader<TcpStream>, TcpStream>;

impl<R: BufRead, W: Write> StreamWatchdog<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    /// Gives back the underlying reader and writer.
    pub fn into_parts(self) -> (R, W) {
        (
            self.reader.into_inner().unwrap_or_else(PoisonError::into_inner),
            self.writer.into_inner().unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl TcpWatchdog {
    /// Connects to a watchdog listening on `addr`.
    ///
    /// Every resolved address is tried in turn; the last connect error is
    /// reported if none of them accepts.
    pub fn connect_tcp(addr: &str, config: &WatchdogConfig) -> Result<Self, WatchdogError> {
        let mut last_err = None;
        for socket_addr in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&socket_addr, config.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(config.ack_timeout))?;
                    let reader = BufReader::new(stream.try_clone()?);
                    tracing::debug!(%socket_addr, "connected to watchdog");
                    return Ok(Self::new(reader, stream));
                }
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(source) => Err(WatchdogError::Connect {
                addr: addr.to_string(),
                source,
            }),
            None => Err(WatchdogError::Unresolved(addr.to_string())),
        }
    }
}

impl<R: BufRead, W: Write> Watchdog for StreamWatchdog<R, W> {
    fn register(&self, filters: &FilterSet) -> Result<bool, WatchdogError> {
        let query = encode_query(filters);
        tracing::debug!("Sending '{query}' to watchdog");

        {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_all(query.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }

        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        wait_for_acknowledgment(&mut *reader)
    }
}

fn wait_for_acknowledgment<R: BufRead>(reader: &mut R) -> Result<bool, WatchdogError> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if !read_line_bytes(reader, &mut line)? {
            tracing::debug!("watchdog closed the stream before acknowledging");
            return Ok(false);
        }
        if line.eq_ignore_ascii_case(ACKNOWLEDGMENT.as_bytes()) {
            return Ok(true);
        }
        tracing::trace!(line = %String::from_utf8_lossy(&line), "ignoring watchdog line");
    }
}

/// Reads one line into `line` without its terminator.
///
/// A line ends at `\n` or at `\r`, so `\r\n` yields an extra empty line.
/// Bytes are not required to be UTF-8. Returns `false` at end of stream when
/// nothing was read.
fn read_line_bytes<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<bool> {
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(!line.is_empty());
        }
        match available.iter().position(|&b| matches!(b, b'\n' | b'\r')) {
            Some(end) => {
                line.extend_from_slice(&available[..end]);
                reader.consume(end + 1);
                return Ok(true);
            }
            None => {
                let read = available.len();
                line.extend_from_slice(available);
                reader.consume(read);
            }
        }
    }
}
