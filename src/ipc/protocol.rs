//! Binary wire format of the control channel.
//!
//! All integers are little-endian.
//!
//! ```text
//! request  = magic "SFCI" | command id u32 | flags u32 | recv capacity u32 | payload len u32 | payload
//! response = magic "SFCO" | result code u32 | output len u32 | output
//! ```
//!
//! Bit 0 of `flags` marks a caller-supplied receive buffer; `recv capacity`
//! is only meaningful when it is set. A failed response always carries an
//! empty output.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Request frame magic.
pub const REQUEST_MAGIC: u32 = u32::from_le_bytes(*b"SFCI");

/// Response frame magic.
pub const RESPONSE_MAGIC: u32 = u32::from_le_bytes(*b"SFCO");

/// Size of the fixed request header.
pub const REQUEST_HEADER_LEN: usize = 20;

/// Size of the fixed response header.
pub const RESPONSE_HEADER_LEN: usize = 12;

/// Largest request payload accepted.
pub const MAX_PAYLOAD_LEN: usize = 4096;

/// Largest receive buffer a client may ask the server to fill.
pub const MAX_RECV_CAPACITY: usize = 65_536;

/// Control API version returned verbatim by `GetApiVersion`.
pub const API_VERSION: u32 = 1;

/// Maximum concurrent client sessions per server.
pub const DEFAULT_MAX_SESSIONS: usize = 42;

/// Result-code module identifying this service.
pub const ERROR_MODULE: u32 = 388;

const FLAG_RECV_BUFFER: u32 = 1;

/// Outcome of a dispatched command as carried on the wire.
///
/// Zero is success; failures pack [`ERROR_MODULE`] into the low 9 bits and
/// the error description above it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ResultCode(u32);

impl ResultCode {
    /// Successful dispatch.
    pub const SUCCESS: Self = Self(0);

    /// Wrap a raw code.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw wire value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is [`ResultCode::SUCCESS`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Module part of the code.
    #[must_use]
    pub const fn module(self) -> u32 {
        self.0 & 0x1FF
    }

    /// Description part of the code.
    #[must_use]
    pub const fn description(self) -> u32 {
        (self.0 >> 9) & 0x1FFF
    }
}

/// Domain errors reported back to clients.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ServiceError {
    /// Unknown command, undersized request, missing buffer or bad selector.
    Generic,
    /// The profile store has not finished loading.
    ConfigNotLoaded,
    /// The profile store failed to persist a change.
    ConfigSaveFailed,
}

impl ServiceError {
    /// Description value inside the result code.
    #[must_use]
    pub const fn description(self) -> u32 {
        match self {
            Self::Generic => 0,
            Self::ConfigNotLoaded => 1,
            Self::ConfigSaveFailed => 2,
        }
    }

    /// Wire result code for this error.
    #[must_use]
    pub const fn code(self) -> ResultCode {
        ResultCode(ERROR_MODULE | (self.description() << 9))
    }

    /// Map a wire result code back to a known error.
    #[must_use]
    pub const fn from_code(code: ResultCode) -> Option<Self> {
        if code.is_success() || code.module() != ERROR_MODULE {
            return None;
        }
        match code.description() {
            0 => Some(Self::Generic),
            1 => Some(Self::ConfigNotLoaded),
            2 => Some(Self::ConfigSaveFailed),
            _ => None,
        }
    }
}

/// Decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Raw command identifier; may not name a known command.
    pub command_id: u32,
    /// Input payload, possibly empty.
    pub payload: Bytes,
    /// Capacity of the caller's receive buffer, when one was supplied.
    pub recv_capacity: Option<u32>,
}

impl Request {
    /// Append the wire encoding of this request to `dst`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the payload or receive capacity
    /// exceed the protocol limits.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(AppError::Protocol(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD_LEN}",
                self.payload.len()
            )));
        }
        if self
            .recv_capacity
            .is_some_and(|cap| cap as usize > MAX_RECV_CAPACITY)
        {
            return Err(AppError::Protocol(format!(
                "receive buffer exceeds {MAX_RECV_CAPACITY} bytes"
            )));
        }

        dst.reserve(REQUEST_HEADER_LEN + self.payload.len());
        dst.put_u32_le(REQUEST_MAGIC);
        dst.put_u32_le(self.command_id);
        dst.put_u32_le(if self.recv_capacity.is_some() {
            FLAG_RECV_BUFFER
        } else {
            0
        });
        dst.put_u32_le(self.recv_capacity.unwrap_or(0));
        dst.put_u32_le(wire_len(self.payload.len())?);
        dst.put_slice(&self.payload);
        Ok(())
    }

    fn decode(src: &mut BytesMut) -> Result<Option<Self>> {
        if src.len() < REQUEST_HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..REQUEST_HEADER_LEN];
        let magic = header.get_u32_le();
        if magic != REQUEST_MAGIC {
            return Err(AppError::Protocol(format!(
                "bad request magic 0x{magic:08x}"
            )));
        }
        let command_id = header.get_u32_le();
        let flags = header.get_u32_le();
        let capacity = header.get_u32_le();
        let payload_len = header.get_u32_le() as usize;

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(AppError::Protocol(format!(
                "payload of {payload_len} bytes exceeds {MAX_PAYLOAD_LEN}"
            )));
        }
        let recv_capacity = (flags & FLAG_RECV_BUFFER != 0).then_some(capacity);
        if recv_capacity.is_some_and(|cap| cap as usize > MAX_RECV_CAPACITY) {
            return Err(AppError::Protocol(format!(
                "receive buffer of {capacity} bytes exceeds {MAX_RECV_CAPACITY}"
            )));
        }

        let frame_len = REQUEST_HEADER_LEN + payload_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(REQUEST_HEADER_LEN);
        let payload = src.split_to(payload_len).freeze();
        Ok(Some(Self {
            command_id,
            payload,
            recv_capacity,
        }))
    }
}

/// Decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Dispatch outcome.
    pub result: ResultCode,
    /// Command output; empty on failure.
    pub output: Bytes,
}

impl Response {
    /// Successful response carrying `output`.
    #[must_use]
    pub fn success(output: Bytes) -> Self {
        Self {
            result: ResultCode::SUCCESS,
            output,
        }
    }

    /// Failed response; no output is ever attached.
    #[must_use]
    pub fn failure(err: ServiceError) -> Self {
        Self {
            result: err.code(),
            output: Bytes::new(),
        }
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(RESPONSE_HEADER_LEN + self.output.len());
        dst.put_u32_le(RESPONSE_MAGIC);
        dst.put_u32_le(self.result.raw());
        dst.put_u32_le(wire_len(self.output.len())?);
        dst.put_slice(&self.output);
        Ok(())
    }

    fn decode(src: &mut BytesMut) -> Result<Option<Self>> {
        if src.len() < RESPONSE_HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..RESPONSE_HEADER_LEN];
        let magic = header.get_u32_le();
        if magic != RESPONSE_MAGIC {
            return Err(AppError::Protocol(format!(
                "bad response magic 0x{magic:08x}"
            )));
        }
        let result = ResultCode(header.get_u32_le());
        let output_len = header.get_u32_le() as usize;
        if output_len > MAX_RECV_CAPACITY {
            return Err(AppError::Protocol(format!(
                "response of {output_len} bytes exceeds {MAX_RECV_CAPACITY}"
            )));
        }

        let frame_len = RESPONSE_HEADER_LEN + output_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(RESPONSE_HEADER_LEN);
        let output = src.split_to(output_len).freeze();
        Ok(Some(Self { result, output }))
    }
}

fn wire_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| AppError::Protocol(format!("length {len} does not fit u32")))
}

/// Server side of the channel: decodes requests, encodes responses.
#[derive(Debug, Default)]
pub struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = Request;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>> {
        Request::decode(src)
    }

    /// A stream that ends inside a frame is a disconnect, not a protocol error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Request>> {
        match self.decode(src)? {
            Some(request) => Ok(Some(request)),
            None if src.is_empty() => Ok(None),
            None => Err(AppError::Disconnected),
        }
    }
}

impl Encoder<Response> for ServerCodec {
    type Error = AppError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<()> {
        item.encode(dst)
    }
}

/// Client side of the channel: encodes requests, decodes responses.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = Response;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>> {
        Response::decode(src)
    }
}

impl Encoder<Request> for ClientCodec {
    type Error = AppError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<()> {
        item.encode(dst)
    }
}
