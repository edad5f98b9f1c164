//! KVDB helpers: lookups, key matching and database deletion.
//!
//! The database name argument is either a literal or a `$reference` whose
//! string value names the database at evaluate time. All collaborator errors
//! surface as failed results with a diagnostic trace; they never unwind into
//! the evaluator.

use std::sync::Arc;

use crate::builders::{
    check_arity, failure_trace, format_helper_name, parameter_not_found, resolve_string,
    success_trace, target_not_found,
};
use crate::error::{BuildError, RegistryError};
use crate::expression::Expression;
use crate::kvdb::KvdbManager;
use crate::parameter::parse_parameters;
use crate::registry::{HelperDefinition, Registry};
use crate::result::EvalResult;

pub(crate) fn register(
    registry: &mut Registry,
    manager: Arc<KvdbManager>,
) -> Result<(), RegistryError> {
    let m = Arc::clone(&manager);
    registry.register("kvdb_get", move |d| kvdb_get(d, Arc::clone(&m)))?;
    let m = Arc::clone(&manager);
    registry.register("kvdb_match", move |d| kvdb_match(d, Arc::clone(&m)))?;
    registry.register("kvdb_delete", move |d| kvdb_delete(d, Arc::clone(&manager)))?;
    Ok(())
}

/// `kvdb_get/<db>/<key>`: write the stored value into the target field.
fn kvdb_get(def: &HelperDefinition, manager: Arc<KvdbManager>) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 2)?;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let success = success_trace(&name);
    let no_db_param = parameter_not_found(&name, &params[0]);
    let no_key_param = parameter_not_found(&name, &params[1]);
    let no_db = failure_trace(&name, "Database not found");
    let no_key = failure_trace(&name, "Key not found in database");
    let db_param = params[0].clone();
    let key_param = params[1].clone();
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| {
            let db_name = match resolve_string(&event, &db_param) {
                Some(s) => s,
                None => return EvalResult::failure(event, Arc::clone(&no_db_param)),
            };
            let key = match resolve_string(&event, &key_param) {
                Some(s) => s,
                None => return EvalResult::failure(event, Arc::clone(&no_key_param)),
            };
            let handle = match manager.open(&db_name, false) {
                Ok(h) => h,
                Err(_) => return EvalResult::failure(event, Arc::clone(&no_db)),
            };
            match handle.get(&key) {
                Some(value) => {
                    event.set_value(&target, value);
                    EvalResult::success(event, Arc::clone(&success))
                }
                None => EvalResult::failure(event, Arc::clone(&no_key)),
            }
        }),
    ))
}

/// `kvdb_match/<db>`: success iff the target field's string value is a key.
fn kvdb_match(def: &HelperDefinition, manager: Arc<KvdbManager>) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 1)?;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let success = success_trace(&name);
    let no_target = target_not_found(&name, &def.target_field);
    let no_db_param = parameter_not_found(&name, &params[0]);
    let no_db = failure_trace(&name, "Database not found");
    let no_match = failure_trace(&name, "Key does not exist in database");
    let db_param = params[0].clone();
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| {
            let key = match event.get_string(&target) {
                Some(s) => s,
                None => return EvalResult::failure(event, Arc::clone(&no_target)),
            };
            let db_name = match resolve_string(&event, &db_param) {
                Some(s) => s,
                None => return EvalResult::failure(event, Arc::clone(&no_db_param)),
            };
            let handle = match manager.open(&db_name, false) {
                Ok(h) => h,
                Err(_) => return EvalResult::failure(event, Arc::clone(&no_db)),
            };
            if handle.contains(&key) {
                EvalResult::success(event, Arc::clone(&success))
            } else {
                EvalResult::failure(event, Arc::clone(&no_match))
            }
        }),
    ))
}

/// `kvdb_delete/<db>`: delete the database, write `true` to the target.
fn kvdb_delete(
    def: &HelperDefinition,
    manager: Arc<KvdbManager>,
) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 1)?;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let success = success_trace(&name);
    let no_db_param = parameter_not_found(&name, &params[0]);
    let delete_failed = failure_trace(&name, "Database could not be deleted");
    let db_param = params[0].clone();
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| {
            let db_name = match resolve_string(&event, &db_param) {
                Some(s) => s,
                None => return EvalResult::failure(event, Arc::clone(&no_db_param)),
            };
            match manager.delete_db(&db_name) {
                Ok(()) => {
                    event.set_bool(&target, true);
                    EvalResult::success(event, Arc::clone(&success))
                }
                Err(_) => EvalResult::failure(event, Arc::clone(&delete_failed)),
            }
        }),
    ))
}
