//! Methods implemented inside the daemon itself.
//!
//! Registered under `bbus.bbusd.*` at startup, before the listener accepts
//! anything.

use bbus_wire::Object;

use crate::registry::LocalHandler;

/// The daemon's built-in method table.
pub const LOCAL_METHODS: &[(&str, LocalHandler)] = &[("bbus.bbusd.echo", echo)];

/// Returns its argument unchanged.
fn echo(_method: &str, arg: &mut Object) -> Option<Object> {
    Some(Object::from_bytes(arg.raw()))
}
