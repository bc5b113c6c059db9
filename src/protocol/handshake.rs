//! RTMP simple handshake
//!
//! ```text
//! Publisher                                Server
//!   |------- C0 (version) + C1 ----------->|
//!   |<------ S0 + S1 + S2 (echo of C1) ----|
//!   |------- C2 (echo of S1) ------------->|
//! ```
//!
//! Only the simple (non-digest) variant is spoken. Servers that validate the
//! digest fall back to simple mode when C1 carries a zero version field.
//! Echoes are not verified strictly; several servers send S2 with their own
//! timestamp in place of ours.
//!
//! Reference: RTMP Specification Section 5.2

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::HandshakeError;
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Which side of the handshake we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    /// Used by loopback servers in tests and tools
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nothing sent or received yet
    Start,
    /// Client: waiting for S0S1S2. Server: waiting for C0C1.
    AwaitPeer,
    /// Server: waiting for C2
    AwaitEcho,
    Done,
}

/// Handshake state machine, driven by the caller's I/O
///
/// ```ignore
/// let mut hs = Handshake::new(HandshakeRole::Client);
/// socket.write_all(&hs.start().unwrap()).await?;
/// while !hs.is_done() {
///     let n = socket.read_buf(&mut buf).await?;
///     if let Some(out) = hs.advance(&mut buf)? { socket.write_all(&out).await?; }
/// }
/// ```
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    phase: Phase,
    epoch: u32,
}

impl Handshake {
    pub fn new(role: HandshakeRole) -> Self {
        Self {
            role,
            phase: Phase::Start,
            epoch: now_millis(),
        }
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Bytes the peer must send before [`Handshake::advance`] can progress
    pub fn bytes_needed(&self) -> usize {
        match (self.role, self.phase) {
            (HandshakeRole::Client, Phase::AwaitPeer) => 1 + 2 * HANDSHAKE_SIZE,
            (HandshakeRole::Server, Phase::AwaitPeer) => 1 + HANDSHAKE_SIZE,
            (_, Phase::AwaitEcho) => HANDSHAKE_SIZE,
            _ => 0,
        }
    }

    /// Begin the handshake. Returns C0C1 for a client; a server sends nothing first.
    pub fn start(&mut self) -> Option<Bytes> {
        if self.phase != Phase::Start {
            return None;
        }
        self.phase = Phase::AwaitPeer;
        match self.role {
            HandshakeRole::Client => {
                let mut out = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                out.put_u8(RTMP_VERSION);
                out.put_slice(&self.random_packet());
                Some(out.freeze())
            }
            HandshakeRole::Server => None,
        }
    }

    /// Consume peer bytes from `input` once enough have arrived.
    ///
    /// Returns the bytes to send back, if any. Leaves `input` untouched when
    /// more data is needed; any bytes past the handshake remain in `input`.
    pub fn advance(&mut self, input: &mut BytesMut) -> Result<Option<Bytes>, HandshakeError> {
        if self.phase == Phase::Start {
            self.start();
        }
        let needed = self.bytes_needed();
        if needed == 0 || input.len() < needed {
            return Ok(None);
        }

        match (self.role, self.phase) {
            (HandshakeRole::Client, Phase::AwaitPeer) => {
                check_version(input.get_u8())?;
                let s1 = input.split_to(HANDSHAKE_SIZE);
                input.advance(HANDSHAKE_SIZE); // S2
                self.phase = Phase::Done;
                Ok(Some(self.echo(&s1)))
            }
            (HandshakeRole::Server, Phase::AwaitPeer) => {
                check_version(input.get_u8())?;
                let c1 = input.split_to(HANDSHAKE_SIZE);
                let mut out = BytesMut::with_capacity(1 + 2 * HANDSHAKE_SIZE);
                out.put_u8(RTMP_VERSION);
                out.put_slice(&self.random_packet());
                out.put_slice(&self.echo(&c1));
                self.phase = Phase::AwaitEcho;
                Ok(Some(out.freeze()))
            }
            (_, Phase::AwaitEcho) => {
                input.advance(HANDSHAKE_SIZE);
                self.phase = Phase::Done;
                Ok(None)
            }
            _ => Err(HandshakeError::Incomplete),
        }
    }

    /// C1/S1: time, four zero bytes, then filler
    fn random_packet(&self) -> [u8; HANDSHAKE_SIZE] {
        let mut packet = [0u8; HANDSHAKE_SIZE];
        packet[0..4].copy_from_slice(&self.epoch.to_be_bytes());

        // xorshift seeded from the clock; the filler only needs to look random
        let mut state = (self.epoch as u64) << 32 | 0x9E37_79B9;
        for byte in packet[8..].iter_mut() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *byte = state as u8;
        }
        packet
    }

    /// C2/S2: peer time, our time, peer filler
    fn echo(&self, peer: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(HANDSHAKE_SIZE);
        out.put_slice(&peer[0..4]);
        out.put_u32(now_millis().wrapping_sub(self.epoch));
        out.put_slice(&peer[8..HANDSHAKE_SIZE]);
        out.freeze()
    }
}

fn check_version(version: u8) -> Result<(), HandshakeError> {
    // Some servers answer 6 or higher for encrypted variants; only reject the obsolete ones.
    if version < RTMP_VERSION {
        return Err(HandshakeError::InvalidVersion(version));
    }
    Ok(())
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}
