//! Command table and dispatcher for the control channel.
//!
//! Each [`Command`] maps to a [`CommandSpec`] through an exhaustive match,
//! so adding a command without declaring its preconditions and handler does
//! not compile. [`Dispatcher::dispatch`] enforces the declared input size and
//! receive-buffer preconditions before any handler runs; handlers then check
//! selector ranges before touching a collaborator.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};

use super::protocol::{Request, Response, ServiceError, API_VERSION};
use crate::clock::{ClockController, ProfileStore};
use crate::models::clock::{ClockContext, ClockModule, ProfileKind};

/// Input size of `GetProfileCount`: application id.
pub const GET_PROFILE_COUNT_ARGS_LEN: usize = 8;
/// Input size of `GetProfile`: application id, module, profile.
pub const GET_PROFILE_ARGS_LEN: usize = 16;
/// Input size of `SetProfile`: application id, module, profile, MHz.
pub const SET_PROFILE_ARGS_LEN: usize = 20;
/// Input size of `SetEnabled`: one boolean byte.
pub const SET_ENABLED_ARGS_LEN: usize = 1;
/// Input size of `SetOverride`: module, Hz.
pub const SET_OVERRIDE_ARGS_LEN: usize = 8;

/// Commands understood by the server.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Command {
    /// Report [`API_VERSION`].
    GetApiVersion,
    /// Copy the daemon version string into the caller's buffer.
    GetVersionString,
    /// Snapshot of the clock controller's runtime context.
    GetCurrentContext,
    /// Ask the clock controller to wind down.
    Exit,
    /// Number of profiles configured for an application.
    GetProfileCount,
    /// Configured MHz for one application, module and profile.
    GetProfile,
    /// Store MHz for one application, module and profile.
    SetProfile,
    /// Toggle profile application.
    SetEnabled,
    /// Set a temporary per-module override in Hz.
    SetOverride,
}

/// Handler outcome: the output bytes, or the error to report.
pub type HandlerResult = std::result::Result<Bytes, ServiceError>;

type Handler = fn(&Dispatcher, &Invocation<'_>) -> HandlerResult;

/// Declared preconditions and handler for one command.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    /// Minimum payload length in bytes.
    pub min_input_len: usize,
    /// Whether the caller must supply a receive buffer.
    pub needs_recv_buffer: bool,
    /// Exact output size on success; `None` when sized by the receive buffer.
    pub output_len: Option<usize>,
    handler: Handler,
}

impl Command {
    /// All commands in id order.
    pub const ALL: [Self; 9] = [
        Self::GetApiVersion,
        Self::GetVersionString,
        Self::GetCurrentContext,
        Self::Exit,
        Self::GetProfileCount,
        Self::GetProfile,
        Self::SetProfile,
        Self::SetEnabled,
        Self::SetOverride,
    ];

    /// Wire identifier.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::GetApiVersion => 0,
            Self::GetVersionString => 1,
            Self::GetCurrentContext => 2,
            Self::Exit => 3,
            Self::GetProfileCount => 4,
            Self::GetProfile => 5,
            Self::SetProfile => 6,
            Self::SetEnabled => 7,
            Self::SetOverride => 8,
        }
    }

    /// Resolve a wire identifier; `None` for unknown commands.
    #[must_use]
    pub const fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::GetApiVersion),
            1 => Some(Self::GetVersionString),
            2 => Some(Self::GetCurrentContext),
            3 => Some(Self::Exit),
            4 => Some(Self::GetProfileCount),
            5 => Some(Self::GetProfile),
            6 => Some(Self::SetProfile),
            7 => Some(Self::SetEnabled),
            8 => Some(Self::SetOverride),
            _ => None,
        }
    }

    /// Preconditions and handler for this command.
    #[must_use]
    pub fn spec(self) -> CommandSpec {
        match self {
            Self::GetApiVersion => CommandSpec::fixed(0, 4, get_api_version),
            Self::GetVersionString => CommandSpec::buffered(get_version_string),
            Self::GetCurrentContext => {
                CommandSpec::fixed(0, ClockContext::ENCODED_LEN, get_current_context)
            }
            Self::Exit => CommandSpec::fixed(0, 0, exit),
            Self::GetProfileCount => {
                CommandSpec::fixed(GET_PROFILE_COUNT_ARGS_LEN, 1, get_profile_count)
            }
            Self::GetProfile => CommandSpec::fixed(GET_PROFILE_ARGS_LEN, 4, get_profile),
            Self::SetProfile => CommandSpec::fixed(SET_PROFILE_ARGS_LEN, 0, set_profile),
            Self::SetEnabled => CommandSpec::fixed(SET_ENABLED_ARGS_LEN, 0, set_enabled),
            Self::SetOverride => CommandSpec::fixed(SET_OVERRIDE_ARGS_LEN, 0, set_override),
        }
    }
}

impl CommandSpec {
    const fn fixed(min_input_len: usize, output_len: usize, handler: Handler) -> Self {
        Self {
            min_input_len,
            needs_recv_buffer: false,
            output_len: Some(output_len),
            handler,
        }
    }

    const fn buffered(handler: Handler) -> Self {
        Self {
            min_input_len: 0,
            needs_recv_buffer: true,
            output_len: None,
            handler,
        }
    }
}

/// Validated view of a request handed to a handler.
pub struct Invocation<'a> {
    /// Payload, at least `min_input_len` bytes long.
    pub input: &'a [u8],
    /// Receive buffer capacity, present whenever the command needs one.
    pub recv_capacity: usize,
}

/// Routes requests to handlers backed by the injected collaborators.
pub struct Dispatcher {
    store: Arc<dyn ProfileStore>,
    clock: Arc<dyn ClockController>,
    version: String,
}

impl Dispatcher {
    /// Create a dispatcher reporting the crate version.
    #[must_use]
    pub fn new(store: Arc<dyn ProfileStore>, clock: Arc<dyn ClockController>) -> Self {
        Self {
            store,
            clock,
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    /// Replace the version string reported by `GetVersionString`.
    #[must_use]
    pub fn with_version_string(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Run one request to completion.
    ///
    /// Never fails: every error is encoded in the response result code.
    #[must_use]
    pub fn dispatch(&self, request: &Request) -> Response {
        let Some(command) = Command::from_id(request.command_id) else {
            debug!(command_id = request.command_id, "unknown command");
            return Response::failure(ServiceError::Generic);
        };

        let spec = command.spec();
        if request.payload.len() < spec.min_input_len {
            debug!(
                ?command,
                got = request.payload.len(),
                need = spec.min_input_len,
                "request payload too small"
            );
            return Response::failure(ServiceError::Generic);
        }
        if spec.needs_recv_buffer && request.recv_capacity.is_none() {
            debug!(?command, "receive buffer missing");
            return Response::failure(ServiceError::Generic);
        }

        let invocation = Invocation {
            input: &request.payload,
            recv_capacity: request.recv_capacity.map_or(0, |cap| cap as usize),
        };
        match (spec.handler)(self, &invocation) {
            Ok(output) => {
                if let Some(len) = spec.output_len {
                    debug_assert_eq!(len, output.len(), "{command:?} output size");
                }
                debug!(?command, output_len = output.len(), "command completed");
                Response::success(output)
            }
            Err(err) => {
                debug!(?command, ?err, "command failed");
                Response::failure(err)
            }
        }
    }
}

fn module_from_wire(raw: u32) -> Result<ClockModule, ServiceError> {
    ClockModule::from_u32(raw).ok_or(ServiceError::Generic)
}

fn profile_from_wire(raw: u32) -> Result<ProfileKind, ServiceError> {
    ProfileKind::from_u32(raw).ok_or(ServiceError::Generic)
}

fn get_api_version(_: &Dispatcher, _: &Invocation<'_>) -> HandlerResult {
    Ok(Bytes::copy_from_slice(&API_VERSION.to_le_bytes()))
}

fn get_version_string(dispatcher: &Dispatcher, inv: &Invocation<'_>) -> HandlerResult {
    if inv.recv_capacity == 0 {
        return Ok(Bytes::new());
    }
    let mut out = vec![0u8; inv.recv_capacity];
    let text = dispatcher.version.as_bytes();
    let copied = text.len().min(inv.recv_capacity - 1);
    out[..copied].copy_from_slice(&text[..copied]);
    Ok(Bytes::from(out))
}

fn get_current_context(dispatcher: &Dispatcher, _: &Invocation<'_>) -> HandlerResult {
    let mut out = BytesMut::with_capacity(ClockContext::ENCODED_LEN);
    dispatcher.clock.current_context().encode(&mut out);
    Ok(out.freeze())
}

fn exit(dispatcher: &Dispatcher, _: &Invocation<'_>) -> HandlerResult {
    info!("exit requested over IPC");
    dispatcher.clock.request_stop();
    Ok(Bytes::new())
}

fn get_profile_count(dispatcher: &Dispatcher, inv: &Invocation<'_>) -> HandlerResult {
    let mut input = inv.input;
    let application_id = input.get_u64_le();

    if !dispatcher.store.has_profiles_loaded() {
        return Err(ServiceError::ConfigNotLoaded);
    }
    let count = dispatcher.store.profile_count(application_id);
    Ok(Bytes::copy_from_slice(&[count]))
}

fn get_profile(dispatcher: &Dispatcher, inv: &Invocation<'_>) -> HandlerResult {
    let mut input = inv.input;
    let application_id = input.get_u64_le();
    let module = module_from_wire(input.get_u32_le())?;
    let profile = profile_from_wire(input.get_u32_le())?;

    if !dispatcher.store.has_profiles_loaded() {
        return Err(ServiceError::ConfigNotLoaded);
    }
    let mhz = dispatcher.store.clock_mhz(application_id, module, profile);
    Ok(Bytes::copy_from_slice(&mhz.to_le_bytes()))
}

fn set_profile(dispatcher: &Dispatcher, inv: &Invocation<'_>) -> HandlerResult {
    let mut input = inv.input;
    let application_id = input.get_u64_le();
    let module = module_from_wire(input.get_u32_le())?;
    let profile = profile_from_wire(input.get_u32_le())?;
    let mhz = input.get_u32_le();

    if !dispatcher.store.has_profiles_loaded() {
        return Err(ServiceError::ConfigNotLoaded);
    }
    if let Err(err) = dispatcher
        .store
        .set_clock_mhz(application_id, module, profile, mhz)
    {
        warn!(%err, "failed to save profile");
        return Err(ServiceError::ConfigSaveFailed);
    }

    info!(
        application_id = %format!("{application_id:016x}"),
        ?module,
        ?profile,
        mhz,
        "profile updated"
    );
    Ok(Bytes::new())
}

fn set_enabled(dispatcher: &Dispatcher, inv: &Invocation<'_>) -> HandlerResult {
    let enabled = inv.input[0] != 0;
    dispatcher.store.set_enabled(enabled);
    info!(enabled, "profile application toggled");
    Ok(Bytes::new())
}

fn set_override(dispatcher: &Dispatcher, inv: &Invocation<'_>) -> HandlerResult {
    let mut input = inv.input;
    let module = module_from_wire(input.get_u32_le())?;
    let hz = input.get_u32_le();

    dispatcher.store.set_override_hz(module, hz);
    info!(?module, hz, "override updated");
    Ok(Bytes::new())
}

/// Build the `GetProfile` payload.
#[must_use]
pub fn get_profile_args(application_id: u64, module: ClockModule, profile: ProfileKind) -> Bytes {
    let mut buf = BytesMut::with_capacity(GET_PROFILE_ARGS_LEN);
    buf.put_u64_le(application_id);
    buf.put_u32_le(module.to_u32());
    buf.put_u32_le(profile.to_u32());
    buf.freeze()
}

/// Build the `SetProfile` payload.
#[must_use]
pub fn set_profile_args(
    application_id: u64,
    module: ClockModule,
    profile: ProfileKind,
    mhz: u32,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(SET_PROFILE_ARGS_LEN);
    buf.put_u64_le(application_id);
    buf.put_u32_le(module.to_u32());
    buf.put_u32_le(profile.to_u32());
    buf.put_u32_le(mhz);
    buf.freeze()
}

/// Build the `SetOverride` payload.
#[must_use]
pub fn set_override_args(module: ClockModule, hz: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(SET_OVERRIDE_ARGS_LEN);
    buf.put_u32_le(module.to_u32());
    buf.put_u32_le(hz);
    buf.freeze()
}
