//! Globals the runtime provides to guest code.
//!
//! Registration happens in two steps. First the native half exposes a
//! `__oriel_native` object with the functions that need host facilities
//! (stdout, UTF-8 codecs). Then the prelude script consumes that object,
//! builds the user-facing globals (`console`, `TextEncoder`, `TextDecoder`,
//! the tracking `Promise`) and leaves the runtime's support functions on
//! `__oriel_sys`.

mod native;
mod prelude;

use rquickjs::Ctx;

use crate::error::{Error, Result};

pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    native::register(ctx)?;
    ctx.eval::<(), _>(prelude::SOURCE)
        .map_err(|_| Error::from_js_catch(ctx))
}
