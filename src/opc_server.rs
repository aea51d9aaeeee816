use anyhow::{Context, Result};
use std::io::{ErrorKind, Read};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use channel_output::config::SourceConfig;
use channel_output::{Frame, OutputRegistry};

const RECV_BUFFER_SIZE: usize = 16384; // 16KB
const OPC_HEADER_LEN: usize = 4;
const OPC_SET_PIXELS: u8 = 0;
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Receives OPC messages over TCP and dispatches each one as a frame
pub struct OpcServer {
    source: SourceConfig,
    registry: OutputRegistry,
    channels: Vec<u8>,
    frames_received: Arc<AtomicU64>,
    channels_sent: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl OpcServer {
    pub fn new(source: SourceConfig, frame_size: usize, registry: OutputRegistry) -> Result<Self> {
        if registry.is_empty() {
            anyhow::bail!("No outputs could be opened");
        }

        let required = registry.required_channel_range();
        if !required.is_empty() && required.max >= frame_size {
            tracing::warn!(
                "Outputs read channels {} but the frame holds only {} channels",
                required,
                frame_size
            );
        }
        tracing::info!("Outputs need channels {}", required);

        Ok(OpcServer {
            source,
            registry,
            channels: vec![0u8; frame_size],
            frames_received: Arc::new(AtomicU64::new(0)),
            channels_sent: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Get a clone of the running flag for signal handlers
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Gracefully shutdown - blank every output, then close them
    pub fn shutdown(&mut self) {
        tracing::info!("Turning off lights...");
        self.registry.dispatch(&Frame::blank(self.channels.len()));

        // Give threaded outputs time to transmit the blank frame
        thread::sleep(Duration::from_millis(100));

        self.registry.close();
        tracing::info!("✓ Server stopped");
    }

    /// Run the OPC server until the running flag is cleared
    pub fn run(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.source.host, self.source.port);
        let listener = TcpListener::bind(&addr).context(format!("Failed to bind to {}", addr))?;

        // Set nonblocking so accept() can check running flag periodically
        listener.set_nonblocking(true)?;

        tracing::info!("✓ OPC Server listening on {}", addr);
        self.spawn_stats_thread();

        while self.running.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    tracing::info!("✓ Client connected from {}", peer_addr);

                    if let Err(e) = self.handle_client(stream) {
                        tracing::error!("Error handling client: {}", e);
                    }

                    tracing::info!("Client disconnected");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    tracing::error!("Error accepting connection: {}", e);
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }

        Ok(())
    }

    /// Drain one client with non-blocking reads, dispatching complete messages
    fn handle_client(&mut self, mut stream: TcpStream) -> Result<()> {
        stream
            .set_nonblocking(true)
            .context("Failed to set socket to non-blocking mode")?;

        let mut buffer = Vec::new();
        let mut read_buf = vec![0u8; RECV_BUFFER_SIZE];

        while self.running.load(Ordering::Relaxed) {
            loop {
                match stream.read(&mut read_buf) {
                    Ok(0) => return Ok(()),
                    Ok(n) => buffer.extend_from_slice(&read_buf[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            let mut latest = None;
            let mut consumed = 0;
            while let Some((command, data)) = parse_message(&buffer[consumed..]) {
                if command == OPC_SET_PIXELS {
                    latest = Some(consumed + OPC_HEADER_LEN..consumed + OPC_HEADER_LEN + data.len());
                    self.frames_received.fetch_add(1, Ordering::Relaxed);
                }
                consumed += OPC_HEADER_LEN + data.len();
            }

            // Only the newest complete frame in this read is worth sending
            if let Some(range) = latest {
                self.process_pixel_data(&buffer[range]);
            }
            buffer.drain(..consumed);

            thread::sleep(Duration::from_millis(1));
        }

        Ok(())
    }

    /// Copy OPC pixel data into the working buffer and dispatch a snapshot
    fn process_pixel_data(&mut self, data: &[u8]) {
        let offset = self.source.channel_offset.min(self.channels.len());
        let len = data.len().min(self.channels.len() - offset);
        self.channels[offset..offset + len].copy_from_slice(&data[..len]);

        tracing::trace!("Received {} bytes: {}", data.len(), hex::encode(&data[..data.len().min(30)]));

        let frame = Frame::from(self.channels.as_slice());
        let handled = self.registry.dispatch(&frame);
        self.channels_sent.fetch_add(handled as u64, Ordering::Relaxed);
    }

    fn spawn_stats_thread(&self) {
        let frames_received = Arc::clone(&self.frames_received);
        let channels_sent = Arc::clone(&self.channels_sent);
        let running = Arc::clone(&self.running);

        thread::spawn(move || {
            let mut last_received = 0u64;
            let mut last_sent = 0u64;

            while running.load(Ordering::Relaxed) {
                thread::sleep(STATS_INTERVAL);

                let received = frames_received.load(Ordering::Relaxed);
                let sent = channels_sent.load(Ordering::Relaxed);
                let secs = STATS_INTERVAL.as_secs_f64();
                tracing::debug!(
                    "[Stats] Received: {:.1} fps, dispatched {:.0} channels/s",
                    (received - last_received) as f64 / secs,
                    (sent - last_sent) as f64 / secs
                );

                last_received = received;
                last_sent = sent;
            }
        });
    }
}

/// Split one complete OPC message off the front of `buf`.
///
/// Header: channel (1 byte), command (1 byte), length (2 bytes, big-endian).
fn parse_message(buf: &[u8]) -> Option<(u8, &[u8])> {
    if buf.len() < OPC_HEADER_LEN {
        return None;
    }
    let command = buf[1];
    let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    buf.get(OPC_HEADER_LEN..OPC_HEADER_LEN + length)
        .map(|data| (command, data))
}
