use std::io::Write;

use rquickjs::{ArrayBuffer, Ctx, Function, Object, Value};

use crate::error::{Error, Result};

pub fn register(ctx: &Ctx<'_>) -> Result<()> {
    install(ctx).map_err(|_| Error::from_js_catch(ctx))
}

fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let native = Object::new(ctx.clone())?;
    native.set("write", Function::new(ctx.clone(), write_line)?)?;
    native.set("utf8Encode", Function::new(ctx.clone(), utf8_encode)?)?;
    native.set("utf8Decode", Function::new(ctx.clone(), utf8_decode)?)?;
    ctx.globals().set("__oriel_native", native)?;
    Ok(())
}

/// Console output goes to stdout, one line per call, flushed so it
/// interleaves correctly with whatever the host writes.
fn write_line(message: String) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(message.as_bytes());
    let _ = stdout.write_all(b"\n");
    let _ = stdout.flush();
}

fn utf8_encode(ctx: Ctx<'_>, text: String) -> rquickjs::Result<ArrayBuffer<'_>> {
    ArrayBuffer::new(ctx, text.into_bytes())
}

/// Invalid sequences decode to U+FFFD rather than failing.
fn utf8_decode<'js>(ctx: Ctx<'js>, value: Value<'js>) -> rquickjs::Result<rquickjs::String<'js>> {
    let bytes = buffer_bytes(&value).ok_or_else(|| {
        rquickjs::Error::new_from_js_message("value", "string", "input is not a byte buffer")
    })?;
    rquickjs::String::from_str(ctx, &String::from_utf8_lossy(bytes))
}

fn buffer_bytes<'a>(value: &'a Value<'_>) -> Option<&'a [u8]> {
    let obj = value.as_object()?;
    if let Some(buffer) = obj.as_array_buffer() {
        return buffer.as_bytes();
    }
    obj.as_typed_array::<u8>().and_then(|view| view.as_bytes())
}
