//! Built-in host functions every guest can import.

use ferry_abi::intrinsic_signatures;
use ferry_abi::layout::*;
use log::Level;

use crate::closure::Closure;
use crate::dispatch::{Args, Dispatcher, HostCx, Ret};
use crate::error::{BridgeError, BridgeResult};
use crate::value::{HostError, HostValue};

type Intrinsic = fn(&mut HostCx<'_>, Args) -> BridgeResult<Ret>;

/// Register every intrinsic under `module`.
pub(crate) fn register(dispatcher: &mut Dispatcher, module: &str) {
    for (name, signature) in intrinsic_signatures() {
        let thunk: Intrinsic = match name {
            INTRINSIC_STRING_NEW => string_new,
            INTRINSIC_STRING_GET => string_get,
            INTRINSIC_NUMBER_NEW => number_new,
            INTRINSIC_NUMBER_GET => number_get,
            INTRINSIC_BOOLEAN_GET => boolean_get,
            INTRINSIC_BYTES_NEW => bytes_new,
            INTRINSIC_BYTES_GET => bytes_get,
            INTRINSIC_IS_UNDEFINED => is_undefined,
            INTRINSIC_IS_NULL => is_null,
            INTRINSIC_IS_STRING => is_string,
            INTRINSIC_IS_OBJECT => is_object,
            INTRINSIC_IS_FUNCTION => is_function,
            INTRINSIC_CLONE_REF => clone_ref,
            INTRINSIC_DROP_REF => drop_ref,
            INTRINSIC_DEBUG_STRING => debug_string,
            INTRINSIC_THROW => throw,
            INTRINSIC_RETHROW => rethrow,
            INTRINSIC_TAKE_EXCEPTION => take_exception,
            INTRINSIC_CLOSURE_NEW => closure_new,
            INTRINSIC_CLOSURE_DROP => closure_drop,
            INTRINSIC_LOG => log_message,
            _ => continue,
        };
        dispatcher.register(module, name, signature, thunk);
    }
}

// ── Values ──────────────────────────────────────────────────────────────────

fn string_new(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(Ret::Value(HostValue::from(args.str(0)?)))
}

fn string_get(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(match args.value(0)?.as_str() {
        Some(s) => Ret::Str(s.to_owned()),
        None => Ret::Absent,
    })
}

fn number_new(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(Ret::Value(HostValue::Number(args.f64(0)?)))
}

fn number_get(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(Ret::OptF64(args.value(0)?.as_number()))
}

fn boolean_get(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(match args.value(0)?.as_bool() {
        Some(b) => Ret::from(b),
        None => Ret::I32(NOT_A_BOOLEAN),
    })
}

fn bytes_new(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(Ret::Value(HostValue::from(args.bytes(0)?.to_vec())))
}

fn bytes_get(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(match args.value(0)?.as_bytes() {
        Some(b) => Ret::Bytes(b.to_vec()),
        None => Ret::Absent,
    })
}

fn is_undefined(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(Ret::from(args.value(0)?.is_undefined()))
}

fn is_null(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(Ret::from(args.value(0)?.is_null()))
}

fn is_string(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(Ret::from(args.value(0)?.is_string()))
}

fn is_object(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(Ret::from(args.value(0)?.is_object()))
}

fn is_function(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(Ret::from(args.value(0)?.is_function()))
}

fn debug_string(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(Ret::Str(args.value(0)?.debug_string()))
}

// ── Handles ─────────────────────────────────────────────────────────────────

fn clone_ref(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Ok(Ret::Value(args.value(0)?.clone()))
}

/// The handle is owned; the dispatcher releases it after this returns.
fn drop_ref(_: &mut HostCx<'_>, _: Args) -> BridgeResult<Ret> {
    Ok(Ret::Unit)
}

// ── Exceptions ──────────────────────────────────────────────────────────────

fn throw(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    let error = HostError::new(args.str(0)?);
    Err(BridgeError::GuestThrew(HostValue::from(error)))
}

fn rethrow(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    Err(BridgeError::GuestThrew(args.value(0)?.clone()))
}

fn take_exception(cx: &mut HostCx<'_>, _: Args) -> BridgeResult<Ret> {
    let handle = cx.state_mut().take_last_exception();
    Ok(Ret::I32(handle.map_or(NO_EXCEPTION, |h| h.to_abi())))
}

// ── Closures ────────────────────────────────────────────────────────────────

/// `closure_new(trampoline, env, context, destructor) -> handle`
fn closure_new(cx: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    let trampoline = args.i32(0)? as u32;
    let env = args.i32(1)?;
    let context = args.i32(2)?;
    let destructor = args.i32(3)? as u32;
    let closure = Closure::wrap(cx.state(), env, context, destructor, trampoline);
    Ok(Ret::Value(HostValue::Function(closure)))
}

/// Drop the guest's reference. Returns 1 when the destructor ran.
fn closure_drop(cx: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    let closure = match args.value(0)? {
        HostValue::Function(closure) => closure.clone(),
        other => {
            return Err(BridgeError::HostOperation(HostError::named(
                "TypeError",
                format!("closure_drop: {} is not a closure", other.debug_string()),
            )))
        }
    };
    Ok(Ret::from(cx.release(&closure)))
}

// ── Logging ─────────────────────────────────────────────────────────────────

fn log_message(_: &mut HostCx<'_>, args: Args) -> BridgeResult<Ret> {
    let level = match args.i32(0)? {
        LOG_ERROR => Level::Error,
        LOG_WARN => Level::Warn,
        LOG_INFO => Level::Info,
        LOG_DEBUG => Level::Debug,
        LOG_TRACE => Level::Trace,
        other => {
            return Err(BridgeError::HostOperation(HostError::named(
                "RangeError",
                format!("unknown log level {other}"),
            )))
        }
    };
    log::log!(target: "ferry::guest", level, "{}", args.str(1)?);
    Ok(Ret::Unit)
}
