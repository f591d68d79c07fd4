//! Blocking client for the control channel.
//!
//! Used by `clockd-ctl` and by anything else that wants to drive a running
//! daemon. One request is in flight at a time; each typed method maps a
//! non-success result code to [`AppError::Remote`].

use std::io::{Read, Write};

use bytes::{Buf, Bytes, BytesMut};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};
use tokio_util::codec::{Decoder, Encoder};

use super::commands::{get_profile_args, set_override_args, set_profile_args, Command};
use super::protocol::{ClientCodec, Request, Response, API_VERSION};
use crate::models::clock::{ClockContext, ClockModule, ProfileKind};
use crate::{AppError, Result};

const READ_CHUNK: usize = 512;

/// Receive buffer size used by [`IpcClient::version_string`].
pub const VERSION_STRING_CAPACITY: u32 = 0x100;

/// Connected control-channel client.
pub struct IpcClient {
    stream: Stream,
    codec: ClientCodec,
    read_buf: BytesMut,
}

impl IpcClient {
    /// Connect to the server listening on `ipc_name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the name is invalid or nothing listens on it.
    pub fn connect(ipc_name: &str) -> Result<Self> {
        let name = ipc_name
            .to_ns_name::<GenericNamespaced>()
            .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{ipc_name}': {err}")))?;
        let stream = Stream::connect(name)
            .map_err(|err| AppError::Ipc(format!("failed to connect to '{ipc_name}': {err}")))?;
        Ok(Self {
            stream,
            codec: ClientCodec,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
        })
    }

    /// Send a raw request and return the raw response, whatever its result.
    ///
    /// # Errors
    ///
    /// Returns an error only for transport or framing failures.
    pub fn call_raw(
        &mut self,
        command_id: u32,
        payload: impl Into<Bytes>,
        recv_capacity: Option<u32>,
    ) -> Result<Response> {
        let mut out = BytesMut::new();
        self.codec.encode(
            Request {
                command_id,
                payload: payload.into(),
                recv_capacity,
            },
            &mut out,
        )?;
        self.stream.write_all(&out)?;
        self.stream.flush()?;

        loop {
            if let Some(response) = self.codec.decode(&mut self.read_buf)? {
                return Ok(response);
            }
            let mut chunk = [0u8; READ_CHUNK];
            let read = self.stream.read(&mut chunk)?;
            if read == 0 {
                return Err(AppError::Disconnected);
            }
            self.read_buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn call(
        &mut self,
        command: Command,
        payload: impl Into<Bytes>,
        recv_capacity: Option<u32>,
    ) -> Result<Bytes> {
        let response = self.call_raw(command.id(), payload, recv_capacity)?;
        if !response.result.is_success() {
            return Err(AppError::Remote(response.result.raw()));
        }
        if let Some(len) = command.spec().output_len {
            if response.output.len() != len {
                return Err(AppError::Protocol(format!(
                    "{command:?} returned {} bytes, expected {len}",
                    response.output.len()
                )));
            }
        }
        Ok(response.output)
    }

    /// Server control API version.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success result.
    pub fn api_version(&mut self) -> Result<u32> {
        let mut out = self.call(Command::GetApiVersion, Bytes::new(), None)?;
        Ok(out.get_u32_le())
    }

    /// Fail unless the server speaks [`API_VERSION`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` on a version mismatch.
    pub fn ensure_api_version(&mut self) -> Result<()> {
        let version = self.api_version()?;
        if version != API_VERSION {
            return Err(AppError::Protocol(format!(
                "server api version {version}, client expects {API_VERSION}"
            )));
        }
        Ok(())
    }

    /// Daemon version string, truncated to fit [`VERSION_STRING_CAPACITY`].
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success result.
    pub fn version_string(&mut self) -> Result<String> {
        let out = self.call(
            Command::GetVersionString,
            Bytes::new(),
            Some(VERSION_STRING_CAPACITY),
        )?;
        let end = out.iter().position(|&b| b == 0).unwrap_or(out.len());
        Ok(String::from_utf8_lossy(&out[..end]).into_owned())
    }

    /// Current runtime context.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success result, or an
    /// undecodable context.
    pub fn current_context(&mut self) -> Result<ClockContext> {
        let out = self.call(Command::GetCurrentContext, Bytes::new(), None)?;
        ClockContext::decode(&out)
            .ok_or_else(|| AppError::Protocol("undecodable clock context".into()))
    }

    /// Ask the daemon to shut down.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success result.
    pub fn exit(&mut self) -> Result<()> {
        self.call(Command::Exit, Bytes::new(), None).map(drop)
    }

    /// Number of profiles configured for `application_id`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success result.
    pub fn profile_count(&mut self, application_id: u64) -> Result<u8> {
        let mut out = self.call(
            Command::GetProfileCount,
            Bytes::copy_from_slice(&application_id.to_le_bytes()),
            None,
        )?;
        Ok(out.get_u8())
    }

    /// Configured clock in MHz.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success result.
    pub fn profile_mhz(
        &mut self,
        application_id: u64,
        module: ClockModule,
        profile: ProfileKind,
    ) -> Result<u32> {
        let mut out = self.call(
            Command::GetProfile,
            get_profile_args(application_id, module, profile),
            None,
        )?;
        Ok(out.get_u32_le())
    }

    /// Store a clock in MHz.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success result.
    pub fn set_profile_mhz(
        &mut self,
        application_id: u64,
        module: ClockModule,
        profile: ProfileKind,
        mhz: u32,
    ) -> Result<()> {
        self.call(
            Command::SetProfile,
            set_profile_args(application_id, module, profile, mhz),
            None,
        )
        .map(drop)
    }

    /// Toggle profile application.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success result.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        self.call(
            Command::SetEnabled,
            Bytes::copy_from_slice(&[u8::from(enabled)]),
            None,
        )
        .map(drop)
    }

    /// Set a temporary override in Hz (0 clears it).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success result.
    pub fn set_override_hz(&mut self, module: ClockModule, hz: u32) -> Result<()> {
        self.call(Command::SetOverride, set_override_args(module, hz), None)
            .map(drop)
    }
}
