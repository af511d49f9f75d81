//! The blocking command loop.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use fission_codec::rowcodec;
use fission_codec::SerializeInput;
use fission_common::constants::{IPC_HEADER_SIZE, MAX_IPC_MESSAGE_SIZE};
use fission_common::types::{
    CatalogVersion, DependencyId, FragmentId, PartitionId, SiteId, TableId, UndoToken, Value,
};
use fission_common::{EngineError, EngineResult};
use fission_engine::{EngineConfig, FragmentBatch, PartitionEngine};

use crate::codes::{status, CommandCode};
use crate::wire_topend::WireTopend;

/// What one dispatched command replies with.
enum Reply {
    /// `[SUCCESS]`
    Ok,
    /// `[SUCCESS][i32 length][bytes]`
    OkPayload(Vec<u8>),
    /// `[SUCCESS][i32 bytes][bytes…]`, `bytes == -1` when exhausted.
    OkCow(Option<Vec<u8>>),
    /// `[ERROR][exception frame]`
    Failed(Vec<u8>),
}

/// Serves one engine over one framed command stream.
///
/// The loop reads a request, dispatches it on the engine, writes the
/// reply, and repeats until EOF or a `Terminate` command. The stream is
/// shared with the engine's [`WireTopend`] so that host callbacks can
/// interleave with a request in flight; the stream lock is never held
/// across a dispatch.
pub struct EngineService<S> {
    stream: Arc<Mutex<S>>,
    engine: Option<PartitionEngine>,
    config: EngineConfig,
}

impl<S: Read + Write + 'static> EngineService<S> {
    /// Creates a service over a connected stream.
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self::with_config(stream, EngineConfig::default())
    }

    /// Creates a service with explicit engine tunables.
    #[must_use]
    pub fn with_config(stream: S, config: EngineConfig) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
            engine: None,
            config,
        }
    }

    /// Runs the command loop to completion.
    pub fn run(&mut self) -> EngineResult<()> {
        loop {
            let Some((code, payload)) = self.read_frame()? else {
                info!("host closed the command stream");
                return Ok(());
            };
            let Some(command) = CommandCode::from_i32(code) else {
                warn!(code, "unknown command code");
                self.write_reply(Reply::Failed(empty_exception_frame()))?;
                continue;
            };
            debug!(command = %command, bytes = payload.len(), "dispatching command");

            if command == CommandCode::Terminate {
                self.write_reply(Reply::Ok)?;
                info!("terminate received, ending command loop");
                return Ok(());
            }

            let reply = self.handle(command, &payload);
            self.write_reply(reply)?;
        }
    }

    /// Reads one `[u32 size][u32 code][payload]` frame.
    ///
    /// Returns `None` on a clean EOF at a frame boundary.
    fn read_frame(&mut self) -> EngineResult<Option<(i32, Vec<u8>)>> {
        let mut stream = self.stream.lock();

        let mut header = [0u8; IPC_HEADER_SIZE];
        match stream.read_exact(&mut header) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let code = i32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if size < IPC_HEADER_SIZE || size > MAX_IPC_MESSAGE_SIZE {
            return Err(EngineError::serialization(format!(
                "request size {size} outside [{IPC_HEADER_SIZE}, {MAX_IPC_MESSAGE_SIZE}]"
            )));
        }
        let mut payload = vec![0u8; size - IPC_HEADER_SIZE];
        stream.read_exact(&mut payload)?;
        Ok(Some((code, payload)))
    }

    fn write_reply(&mut self, reply: Reply) -> EngineResult<()> {
        let mut bytes = Vec::new();
        match reply {
            Reply::Ok => bytes.push(status::SUCCESS as u8),
            Reply::OkPayload(payload) => {
                bytes.push(status::SUCCESS as u8);
                bytes.extend_from_slice(&(payload.len() as i32).to_be_bytes());
                bytes.extend_from_slice(&payload);
            }
            Reply::OkCow(chunk) => {
                bytes.push(status::SUCCESS as u8);
                match chunk {
                    Some(chunk) => {
                        bytes.extend_from_slice(&(chunk.len() as i32).to_be_bytes());
                        bytes.extend_from_slice(&chunk);
                    }
                    None => bytes.extend_from_slice(&(-1i32).to_be_bytes()),
                }
            }
            Reply::Failed(frame) => {
                bytes.push(status::ERROR as u8);
                bytes.extend_from_slice(&frame);
            }
        }
        let mut stream = self.stream.lock();
        stream.write_all(&bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn handle(&mut self, command: CommandCode, payload: &[u8]) -> Reply {
        if command == CommandCode::Initialize {
            return match self.handle_initialize(payload) {
                Ok(()) => Reply::Ok,
                Err(err) => {
                    warn!(error = %err, "initialize failed");
                    Reply::Failed(empty_exception_frame())
                }
            };
        }
        let Some(engine) = self.engine.as_mut() else {
            warn!(command = %command, "command before initialize");
            return Reply::Failed(empty_exception_frame());
        };

        match dispatch_on_engine(engine, command, payload) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(command = %command, error = %err, "command failed");
                engine.serialize_exception(&err);
                Reply::Failed(engine.exception_frame().to_vec())
            }
        }
    }

    fn handle_initialize(&mut self, payload: &[u8]) -> EngineResult<()> {
        if self.engine.is_some() {
            return Err(EngineError::internal("engine already initialized"));
        }
        let mut input = SerializeInput::new(payload);
        let cluster_id = input.read_i32().map_err(EngineError::from)?;
        let site_id = SiteId::new(input.read_i64().map_err(EngineError::from)?);
        let partition_id = PartitionId::new(input.read_i32().map_err(EngineError::from)?);
        let host_id = input.read_i32().map_err(EngineError::from)?;
        let is_lowest_site = input.read_i8().map_err(EngineError::from)? != 0;
        let log_levels = input.read_i64().map_err(EngineError::from)?;
        let hostname_len = input.read_i16().map_err(EngineError::from)?;
        let hostname_bytes = input
            .read_bytes(hostname_len.max(0) as usize)
            .map_err(EngineError::from)?;
        let hostname = String::from_utf8_lossy(hostname_bytes).into_owned();

        let topend = WireTopend::new(Arc::clone(&self.stream));
        let mut engine = PartitionEngine::new(Box::new(topend), self.config.clone());
        engine.initialize(
            cluster_id,
            site_id,
            partition_id,
            host_id,
            is_lowest_site,
            log_levels,
            hostname,
        )?;
        self.engine = Some(engine);
        Ok(())
    }
}

fn empty_exception_frame() -> Vec<u8> {
    0i16.to_be_bytes().to_vec()
}

/// Builds the reply for an execution command.
///
/// On failure the engine has already serialized a contextual exception
/// frame (naming the failing fragment); the reply forwards it verbatim.
fn exec_reply(engine: &mut PartitionEngine, outcome: EngineResult<()>) -> Reply {
    match outcome {
        Ok(()) => {
            let reply = Reply::OkPayload(engine.results().to_vec());
            engine.reset_reused_result_buffer();
            reply
        }
        Err(err) => {
            warn!(error = %err, "fragment execution failed");
            Reply::Failed(engine.exception_frame().to_vec())
        }
    }
}

fn read_params(input: &mut SerializeInput<'_>) -> EngineResult<Vec<Value>> {
    let count = input.read_i16().map_err(EngineError::from)?;
    if count < 0 {
        return Err(EngineError::serialization(format!(
            "negative parameter count {count}"
        )));
    }
    let mut params = Vec::with_capacity(count as usize);
    for _ in 0..count {
        params.push(rowcodec::read_value(input).map_err(EngineError::from)?);
    }
    Ok(params)
}

fn dispatch_on_engine(
    engine: &mut PartitionEngine,
    command: CommandCode,
    payload: &[u8],
) -> EngineResult<Reply> {
    let mut input = SerializeInput::new(payload);
    match command {
        CommandCode::LoadCatalog => {
            let version = CatalogVersion::new(input.read_i64().map_err(EngineError::from)?);
            let body = input
                .read_bytes(input.remaining())
                .map_err(EngineError::from)?;
            engine.load_catalog(version, body)?;
            Ok(Reply::Ok)
        }
        CommandCode::UpdateCatalog => {
            let version = CatalogVersion::new(input.read_i64().map_err(EngineError::from)?);
            let is_stream_update = input.read_i8().map_err(EngineError::from)? != 0;
            let body = input
                .read_bytes(input.remaining())
                .map_err(EngineError::from)?;
            engine.update_catalog(version, is_stream_update, body)?;
            Ok(Reply::Ok)
        }
        CommandCode::ToggleProfiler => {
            let toggle = input.read_i32().map_err(EngineError::from)?;
            engine.toggle_profiler(toggle != 0);
            Ok(Reply::Ok)
        }
        CommandCode::Tick => {
            let time_millis = input.read_i64().map_err(EngineError::from)?;
            let last_committed = input.read_i64().map_err(EngineError::from)?;
            engine.tick(time_millis, last_committed);
            Ok(Reply::Ok)
        }
        CommandCode::Quiesce => {
            let last_committed = input.read_i64().map_err(EngineError::from)?;
            engine.quiesce(last_committed);
            Ok(Reply::Ok)
        }
        CommandCode::GetStats => {
            let selector = input.read_i32().map_err(EngineError::from)?;
            let interval = input.read_i8().map_err(EngineError::from)? != 0;
            let now = input.read_i64().map_err(EngineError::from)?;
            let locator_count = input.read_i32().map_err(EngineError::from)?;
            let mut locators = Vec::with_capacity(locator_count.max(0) as usize);
            for _ in 0..locator_count.max(0) {
                locators.push(TableId::new(input.read_i32().map_err(EngineError::from)?));
            }
            engine.get_stats(selector, &locators, interval, now)?;
            Ok(Reply::OkPayload(engine.results().to_vec()))
        }
        CommandCode::ExecuteQueryPlanFragments => {
            let batch = read_batch(&mut input)?;
            let outcome = engine.execute_plan_fragments(&batch);
            Ok(exec_reply(engine, outcome))
        }
        CommandCode::ExecutePlanFragment => {
            let batch = read_single_fragment(&mut input)?;
            let outcome = engine.execute_plan_fragments(&batch);
            Ok(exec_reply(engine, outcome))
        }
        CommandCode::ExecuteCustomPlanFragment => {
            let _txn_id = input.read_i64().map_err(EngineError::from)?;
            let _sp_handle = input.read_i64().map_err(EngineError::from)?;
            let _last_committed = input.read_i64().map_err(EngineError::from)?;
            let undo_token = UndoToken::new(input.read_i64().map_err(EngineError::from)?);
            let input_dep_id = DependencyId::new(input.read_i32().map_err(EngineError::from)?);
            let plan_len = input.read_i32().map_err(EngineError::from)?;
            if plan_len < 0 {
                return Err(EngineError::serialization(format!(
                    "negative plan length {plan_len}"
                )));
            }
            let plan = input
                .read_bytes(plan_len as usize)
                .map_err(EngineError::from)?
                .to_vec();
            let params = read_params(&mut input)?;
            let outcome = engine.execute_custom_fragment(&plan, input_dep_id, params, undo_token);
            Ok(exec_reply(engine, outcome))
        }
        CommandCode::LoadTable => {
            let table_id = TableId::new(input.read_i32().map_err(EngineError::from)?);
            let _txn_id = input.read_i64().map_err(EngineError::from)?;
            let _sp_handle = input.read_i64().map_err(EngineError::from)?;
            let _last_committed = input.read_i64().map_err(EngineError::from)?;
            let _unique_id = input.read_i64().map_err(EngineError::from)?;
            let undo_token = UndoToken::new(input.read_i64().map_err(EngineError::from)?);
            let _return_conflicts = input.read_i8().map_err(EngineError::from)? != 0;
            let body = input
                .read_bytes(input.remaining())
                .map_err(EngineError::from)?;
            engine.load_table(table_id, body, undo_token)?;
            Ok(Reply::Ok)
        }
        CommandCode::ReleaseUndoToken => {
            let token = UndoToken::new(input.read_i64().map_err(EngineError::from)?);
            let is_empty_txn = input.read_i8().map_err(EngineError::from)? != 0;
            engine.release_undo_token(token, is_empty_txn);
            Ok(Reply::Ok)
        }
        CommandCode::UndoUndoToken => {
            let token = UndoToken::new(input.read_i64().map_err(EngineError::from)?);
            engine.undo_undo_token(token)?;
            Ok(Reply::Ok)
        }
        CommandCode::SetLogLevels => {
            let levels = input.read_i64().map_err(EngineError::from)?;
            engine.set_log_levels(levels);
            Ok(Reply::Ok)
        }
        CommandCode::ActivateCopyOnWrite => {
            let table_id = TableId::new(input.read_i32().map_err(EngineError::from)?);
            engine.activate_copy_on_write(table_id)?;
            Ok(Reply::Ok)
        }
        CommandCode::CowSerializeMore => {
            let table_id = TableId::new(input.read_i32().map_err(EngineError::from)?);
            let buffer_size = input.read_i32().map_err(EngineError::from)?;
            let chunk = engine.cow_serialize_more(table_id, buffer_size.max(0) as usize)?;
            Ok(Reply::OkCow(chunk))
        }
        CommandCode::Initialize | CommandCode::Terminate => {
            Err(EngineError::internal("handled before dispatch"))
        }
    }
}

fn read_batch(input: &mut SerializeInput<'_>) -> EngineResult<FragmentBatch> {
    let txn_id = input.read_i64().map_err(EngineError::from)?;
    let sp_handle = input.read_i64().map_err(EngineError::from)?;
    let last_committed_sp_handle = input.read_i64().map_err(EngineError::from)?;
    let unique_id = input.read_i64().map_err(EngineError::from)?;
    let undo_token = UndoToken::new(input.read_i64().map_err(EngineError::from)?);
    let trace_on = input.read_i8().map_err(EngineError::from)? != 0;
    let count = input.read_i32().map_err(EngineError::from)?;
    if count < 0 {
        return Err(EngineError::serialization(format!(
            "negative fragment count {count}"
        )));
    }
    let count = count as usize;

    let mut fragment_ids = Vec::with_capacity(count);
    for _ in 0..count {
        fragment_ids.push(FragmentId::new(input.read_i64().map_err(EngineError::from)?));
    }
    let mut input_dep_ids = Vec::with_capacity(count);
    for _ in 0..count {
        input_dep_ids.push(DependencyId::new(
            input.read_i32().map_err(EngineError::from)?,
        ));
    }
    let mut params_per_fragment = Vec::with_capacity(count);
    for _ in 0..count {
        params_per_fragment.push(read_params(input)?);
    }

    Ok(FragmentBatch {
        fragment_ids,
        input_dep_ids,
        params_per_fragment,
        txn_id,
        sp_handle,
        last_committed_sp_handle,
        unique_id,
        undo_token,
        trace_on,
    })
}

fn read_single_fragment(input: &mut SerializeInput<'_>) -> EngineResult<FragmentBatch> {
    let txn_id = input.read_i64().map_err(EngineError::from)?;
    let sp_handle = input.read_i64().map_err(EngineError::from)?;
    let last_committed_sp_handle = input.read_i64().map_err(EngineError::from)?;
    let unique_id = input.read_i64().map_err(EngineError::from)?;
    let undo_token = UndoToken::new(input.read_i64().map_err(EngineError::from)?);
    let trace_on = input.read_i8().map_err(EngineError::from)? != 0;
    let fragment_id = FragmentId::new(input.read_i64().map_err(EngineError::from)?);
    let input_dep_id = DependencyId::new(input.read_i32().map_err(EngineError::from)?);
    let params = read_params(input)?;

    Ok(FragmentBatch {
        fragment_ids: vec![fragment_id],
        input_dep_ids: vec![input_dep_id],
        params_per_fragment: vec![params],
        txn_id,
        sp_handle,
        last_committed_sp_handle,
        unique_id,
        undo_token,
        trace_on,
    })
}
