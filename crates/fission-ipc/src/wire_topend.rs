//! The socket-backed host interface.

use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use fission_codec::rowcodec;
use fission_codec::{Output, VecOutput};
use fission_common::types::{DependencyId, FragmentId, TableId, Value};
use fission_common::{EngineError, EngineResult};
use fission_engine::Topend;

use crate::codes::status;

/// A [`Topend`] that reaches the host over the command stream.
///
/// Sub-protocol messages interleave with the request/reply cycle: the
/// engine writes an out-of-band status byte plus arguments, then blocks
/// reading the host's answer. The stream is shared with the command loop;
/// neither side holds the lock across a dispatch.
pub struct WireTopend<S> {
    stream: Arc<Mutex<S>>,
}

impl<S: Read + Write> WireTopend<S> {
    /// Creates a wire topend over a shared stream.
    #[must_use]
    pub fn new(stream: Arc<Mutex<S>>) -> Self {
        Self { stream }
    }

    fn send(&mut self, bytes: &[u8]) -> EngineResult<()> {
        let mut stream = self.stream.lock();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn read_i8(&mut self) -> EngineResult<i8> {
        let mut byte = [0u8; 1];
        self.stream.lock().read_exact(&mut byte)?;
        Ok(byte[0] as i8)
    }

    fn read_i32(&mut self) -> EngineResult<i32> {
        let mut bytes = [0u8; 4];
        self.stream.lock().read_exact(&mut bytes)?;
        Ok(i32::from_be_bytes(bytes))
    }

    fn read_payload(&mut self) -> EngineResult<Vec<u8>> {
        let length = self.read_i32()?;
        if length < 0 {
            return Err(EngineError::serialization(format!(
                "host sent negative payload length {length}"
            )));
        }
        let mut payload = vec![0u8; length as usize];
        self.stream.lock().read_exact(&mut payload)?;
        Ok(payload)
    }
}

impl<S: Read + Write> Topend for WireTopend<S> {
    /// `[FETCH_PLAN][i64 fragment_id]` → `[i8 status][i32 length][bytes]`.
    fn fetch_plan(&mut self, fragment_id: FragmentId) -> EngineResult<Vec<u8>> {
        let mut message = VecOutput::new();
        message.write_i8(status::FETCH_PLAN).map_err(EngineError::from)?;
        message
            .write_i64(fragment_id.as_i64())
            .map_err(EngineError::from)?;
        self.send(message.as_slice())?;

        match self.read_i8()? {
            status::SUCCESS => self.read_payload(),
            _ => Err(EngineError::PlanNotFound { fragment_id }),
        }
    }

    /// `[RETRIEVE_DEPENDENCY][i32 dep_id]` →
    /// `[i8 status]` then, when found, `[i32 length][bytes]`.
    fn retrieve_dependency(
        &mut self,
        dependency_id: DependencyId,
    ) -> EngineResult<Option<Vec<u8>>> {
        let mut message = VecOutput::new();
        message
            .write_i8(status::RETRIEVE_DEPENDENCY)
            .map_err(EngineError::from)?;
        message
            .write_i32(dependency_id.as_i32())
            .map_err(EngineError::from)?;
        self.send(message.as_slice())?;

        match self.read_i8()? {
            status::DEPENDENCY_FOUND => Ok(Some(self.read_payload()?)),
            status::DEPENDENCY_NOT_FOUND => Ok(None),
            other => Err(EngineError::DependencyNotFound {
                dependency_id: dependency_id.as_i32(),
                message: format!("unexpected dependency response status {other}"),
            }),
        }
    }

    /// `[HANDOFF_EXPORT_BUFFER][i32 table_id][i64 uso][i32 length][bytes]`,
    /// no reply.
    fn handoff_export_buffer(
        &mut self,
        table_id: TableId,
        start_uso: i64,
        buffer: &[u8],
    ) -> EngineResult<()> {
        let mut message = VecOutput::new();
        message
            .write_i8(status::HANDOFF_EXPORT_BUFFER)
            .map_err(EngineError::from)?;
        message
            .write_i32(table_id.as_i32())
            .map_err(EngineError::from)?;
        message.write_i64(start_uso).map_err(EngineError::from)?;
        message
            .write_i32(buffer.len() as i32)
            .map_err(EngineError::from)?;
        message.write_bytes(buffer).map_err(EngineError::from)?;
        self.send(message.as_slice())
    }

    /// `[CALL_UDF][i32 fn_id][i16 argc][values]` →
    /// `[i32 return_code]` then, on code 0, one serialized value.
    fn call_user_defined_function(
        &mut self,
        function_id: i32,
        args: &[Value],
    ) -> EngineResult<Value> {
        let mut message = VecOutput::new();
        message.write_i8(status::CALL_UDF).map_err(EngineError::from)?;
        message.write_i32(function_id).map_err(EngineError::from)?;
        message
            .write_i16(args.len() as i16)
            .map_err(EngineError::from)?;
        for arg in args {
            rowcodec::write_value(&mut message, arg).map_err(EngineError::from)?;
        }
        self.send(message.as_slice())?;

        let code = self.read_i32()?;
        if code != 0 {
            return Err(EngineError::UserFunctionError { function_id, code });
        }
        let payload = self.read_payload()?;
        let mut input = fission_codec::SerializeInput::new(&payload);
        rowcodec::read_value(&mut input).map_err(EngineError::from)
    }
}
