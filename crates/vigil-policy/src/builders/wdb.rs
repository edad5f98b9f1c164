//! `wdb_update`: length-framed query to the agent-database socket.
//!
//! Resolves the request string, round-trips the collaborator's unix stream
//! socket (LE u32 byte count, then the payload, both ways) and writes the
//! verdict into the target field: `true` iff the reply is `ok` or starts
//! with `ok `. The term succeeds on either verdict; only transport problems
//! fail it. The blocking call is bounded by the per-call I/O timeout.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::builders::{
    check_arity, failure_trace, format_helper_name, parameter_not_found, resolve_string,
    success_trace,
};
use crate::error::{BuildError, RegistryError};
use crate::expression::Expression;
use crate::parameter::parse_parameters;
use crate::registry::{HelperDefinition, Registry};
use crate::result::EvalResult;

pub(crate) fn register(
    registry: &mut Registry,
    socket: PathBuf,
    timeout: Duration,
) -> Result<(), RegistryError> {
    registry.register("wdb_update", move |d| wdb_update(d, socket.clone(), timeout))
}

fn wdb_update(
    def: &HelperDefinition,
    socket: PathBuf,
    timeout: Duration,
) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 1)?;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let success = success_trace(&name);
    let no_param = parameter_not_found(&name, &params[0]);
    let empty_query = failure_trace(&name, "Query is empty");
    let io_error = failure_trace(&name, "Cannot reach the database socket");
    let query_param = params[0].clone();
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| {
            let query = match resolve_string(&event, &query_param) {
                Some(s) => s,
                None => return EvalResult::failure(event, Arc::clone(&no_param)),
            };
            if query.is_empty() {
                return EvalResult::failure(event, Arc::clone(&empty_query));
            }
            match send_query(&socket, timeout, &query) {
                Ok(reply) => {
                    let verdict = reply == "ok" || reply.starts_with("ok ");
                    event.set_bool(&target, verdict);
                    EvalResult::success(event, Arc::clone(&success))
                }
                Err(e) => {
                    debug!(socket = %socket.display(), error = %e, "wdb query failed");
                    EvalResult::failure(event, Arc::clone(&io_error))
                }
            }
        }),
    ))
}

/// One framed request/response round trip.
fn send_query(socket: &Path, timeout: Duration, query: &str) -> io::Result<String> {
    let mut stream = UnixStream::connect(socket)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let len = u32::try_from(query.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "query too large"))?;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(query.as_bytes())?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;
    let reply_len = u32::from_le_bytes(header) as usize;
    let mut payload = vec![0u8; reply_len];
    stream.read_exact(&mut payload)?;
    String::from_utf8(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
