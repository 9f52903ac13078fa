use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::thread;

use crate::tza_config::{CommSettings, LineSettings};

/// Responses are terminated by a carriage return.
pub const TERMINATOR: u8 = b'\r';

#[derive(Debug, thiserror::Error)]
pub enum TzaTerminalError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Port not open")]
    NotConnected,

    #[error("No terminated response after {attempts} polls, received '{received}'")]
    Timeout { attempts: u32, received: String },
}

/// Byte stream to the instrument.
///
/// `read_available` must not block waiting for data: it returns whatever is
/// buffered right now, possibly nothing.
pub trait Transport: Send {
    fn write(&mut self, data: &[u8]) -> Result<(), TzaTerminalError>;

    fn read_available(&mut self) -> Result<Vec<u8>, TzaTerminalError>;

    /// Discard everything buffered in both directions.
    fn flush(&mut self) -> Result<(), TzaTerminalError>;

    fn close(&mut self) -> Result<(), TzaTerminalError>;
}

/// [`Transport`] over a `serialport` handle.
pub struct SerialTransport {
    serial: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open `port` with the given line parameters and purge its buffers.
    pub fn open(port: &str, line: &LineSettings) -> Result<Self, TzaTerminalError> {
        let serial = serialport::new(port, line.baud_rate)
            .data_bits(line.data_bits)
            .stop_bits(line.stop_bits)
            .parity(line.parity)
            .flow_control(line.flow_control)
            .timeout(line.timeout)
            .open()?;

        let mut transport = Self {
            serial: Some(serial),
        };
        transport.flush()?;
        Ok(transport)
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TzaTerminalError> {
        self.serial.as_mut().ok_or(TzaTerminalError::NotConnected)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TzaTerminalError> {
        self.port()?.write_all(data)?;
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, TzaTerminalError> {
        let serial = self.port()?;
        let pending = serial.bytes_to_read()? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; pending];
        match serial.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<(), TzaTerminalError> {
        self.port()?.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TzaTerminalError> {
        self.serial = None;
        Ok(())
    }
}

/// Request/response channel over a [`Transport`].
///
/// Every command starts from clean buffers, and a response is everything up
/// to a trailing carriage return.
pub struct TzaTerminal {
    transport: Option<Box<dyn Transport>>,
    settings: CommSettings,
}

impl TzaTerminal {
    pub fn new(transport: Box<dyn Transport>, settings: CommSettings) -> Self {
        Self {
            transport: Some(transport),
            settings,
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>, TzaTerminalError> {
        self.transport
            .as_mut()
            .ok_or(TzaTerminalError::NotConnected)
    }

    /// Flush stale bytes, then write the command as-is.
    pub fn send(&mut self, command: &str) -> Result<(), TzaTerminalError> {
        let transport = self.transport()?;
        transport.flush()?;
        log::trace!("-> {}", command);
        transport.write(command.as_bytes())?;
        Ok(())
    }

    /// Poll until the accumulated bytes end with the terminator.
    ///
    /// Undecodable bytes are replaced, carriage returns are dropped and the
    /// text is trimmed. The transport stays open on timeout.
    pub fn receive(&mut self) -> Result<String, TzaTerminalError> {
        let poll_interval = self.settings.poll_interval;
        let max_polls = self.settings.max_polls;
        let transport = self.transport()?;

        let mut response = Vec::new();
        for _ in 0..max_polls {
            response.extend(transport.read_available()?);
            if response.last() == Some(&TERMINATOR) {
                let text = String::from_utf8_lossy(&response).replace('\r', "");
                log::trace!("<- {}", text.trim());
                return Ok(text.trim().to_string());
            }
            if !poll_interval.is_zero() {
                thread::sleep(poll_interval);
            }
        }

        Err(TzaTerminalError::Timeout {
            attempts: max_polls,
            received: String::from_utf8_lossy(&response).into_owned(),
        })
    }

    pub fn exec(&mut self, command: &str) -> Result<String, TzaTerminalError> {
        self.send(command)?;
        self.receive()
    }

    /// Release the transport. Closing twice is harmless.
    pub fn close(&mut self) -> Result<(), TzaTerminalError> {
        match self.transport.take() {
            Some(mut transport) => transport.close(),
            None => Ok(()),
        }
    }
}

impl Drop for TzaTerminal {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close transport: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{Transport, TzaTerminalError};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard};

    #[derive(Debug, Default)]
    struct MockState {
        /// Reply chunks per expected command, consumed in order.
        script: VecDeque<(String, Vec<Vec<u8>>)>,
        pending: VecDeque<Vec<u8>>,
        sent: Vec<String>,
        flushes: usize,
        closed: bool,
    }

    /// Scripted in-memory transport. Clones share state, so a test can keep
    /// one handle while the device owns the other.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap()
        }

        /// Answer `command` with `reply` in a single chunk.
        pub(crate) fn expect(&self, command: &str, reply: &str) -> &Self {
            self.expect_chunks(command, &[reply])
        }

        pub(crate) fn expect_chunks(&self, command: &str, chunks: &[&str]) -> &Self {
            self.state().script.push_back((
                command.to_string(),
                chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            ));
            self
        }

        pub(crate) fn expect_raw(&self, command: &str, reply: &[u8]) -> &Self {
            self.state()
                .script
                .push_back((command.to_string(), vec![reply.to_vec()]));
            self
        }

        /// Accept `command` but never answer.
        pub(crate) fn expect_silence(&self, command: &str) -> &Self {
            self.expect_chunks(command, &[])
        }

        /// Bytes sitting in the receive buffer before the next command.
        pub(crate) fn preload(&self, bytes: &str) {
            self.state().pending.push_back(bytes.as_bytes().to_vec());
        }

        pub(crate) fn sent(&self) -> Vec<String> {
            self.state().sent.clone()
        }

        pub(crate) fn flushes(&self) -> usize {
            self.state().flushes
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.state().closed
        }

        pub(crate) fn remaining(&self) -> usize {
            self.state().script.len()
        }
    }

    impl Transport for MockTransport {
        fn write(&mut self, data: &[u8]) -> Result<(), TzaTerminalError> {
            let mut state = self.state();
            if state.closed {
                return Err(TzaTerminalError::NotConnected);
            }
            let command = String::from_utf8_lossy(data).into_owned();
            state.sent.push(command.clone());
            match state.script.pop_front() {
                Some((expected, chunks)) if expected == command => {
                    state.pending.extend(chunks);
                    Ok(())
                }
                Some((expected, _)) => Err(TzaTerminalError::Io(std::io::Error::other(
                    format!("unexpected command '{command}', expected '{expected}'"),
                ))),
                None => Err(TzaTerminalError::Io(std::io::Error::other(format!(
                    "no reply scripted for '{command}'"
                )))),
            }
        }

        fn read_available(&mut self) -> Result<Vec<u8>, TzaTerminalError> {
            Ok(self.state().pending.pop_front().unwrap_or_default())
        }

        fn flush(&mut self) -> Result<(), TzaTerminalError> {
            let mut state = self.state();
            state.pending.clear();
            state.flushes += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<(), TzaTerminalError> {
            self.state().closed = true;
            Ok(())
        }
    }
}
