//! Conversions between the structured request/response model and the JS
//! values guest code sees. The JS-facing shapes (header maps, byte views)
//! are produced by prelude support functions so the Rust side only deals in
//! arrays of pairs and buffers.

use oriel_abi::{Request, Response};
use rquickjs::{Array, ArrayBuffer, Ctx, FromJs, Function, IntoJs, Object, TypedArray, Value};

use crate::error::{Error, Result};

fn sys_fn<'js>(ctx: &Ctx<'js>, name: &str) -> Result<Function<'js>> {
    let sys: Object<'js> = ctx
        .globals()
        .get("__oriel_sys")
        .map_err(|_| Error::Unexpected("runtime support object is missing"))?;
    sys.get(name)
        .map_err(|_| Error::Unexpected("runtime support function is missing"))
}

fn pairs_to_js<'js>(ctx: &Ctx<'js>, pairs: &[(String, String)]) -> Result<Array<'js>> {
    let arr = Array::new(ctx.clone()).map_err(|_| Error::from_js_catch(ctx))?;
    for (index, (name, value)) in pairs.iter().enumerate() {
        let entry = Array::new(ctx.clone()).map_err(|_| Error::from_js_catch(ctx))?;
        entry
            .set(0, name.as_str())
            .map_err(|_| Error::from_js_catch(ctx))?;
        entry
            .set(1, value.as_str())
            .map_err(|_| Error::from_js_catch(ctx))?;
        arr.set(index, entry).map_err(|_| Error::from_js_catch(ctx))?;
    }
    Ok(arr)
}

pub fn request_to_js<'js>(ctx: &Ctx<'js>, request: &Request) -> Result<Value<'js>> {
    let headers = pairs_to_js(ctx, &request.headers)?.into_value();
    let params = match &request.params {
        Some(pairs) => pairs_to_js(ctx, pairs)?.into_value(),
        None => Value::new_null(ctx.clone()),
    };
    let body = match &request.body {
        Some(bytes) => ArrayBuffer::new(ctx.clone(), bytes.clone())
            .and_then(|buffer| buffer.into_js(ctx))
            .map_err(|_| Error::from_js_catch(ctx))?,
        None => Value::new_null(ctx.clone()),
    };

    let make = sys_fn(ctx, "makeRequest")?;
    make.call((
        request.method.as_str(),
        request.uri.as_str(),
        headers,
        params,
        body,
    ))
    .map_err(|_| Error::from_js_catch(ctx))
}

/// Marks the handler's returned promise as handled so a rejection surfaces
/// as the call's error instead of lingering in the rejection registry.
pub fn observe<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Result<()> {
    let observe = sys_fn(ctx, "observe")?;
    observe
        .call::<_, Value<'js>>((value.clone(),))
        .map_err(|_| Error::from_js_catch(ctx))?;
    Ok(())
}

pub fn response_from_js<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Result<Response> {
    let obj = value
        .as_object()
        .ok_or(Error::MalformedResponse("handler result is not an object"))?;

    let status: Value<'js> = obj.get("status").map_err(|_| Error::from_js_catch(ctx))?;
    if status.is_undefined() || status.is_null() {
        return Err(Error::MalformedResponse("response has no status"));
    }
    let status = f64::from_js(ctx, status)
        .map_err(|_| Error::MalformedResponse("status is not a number"))?;
    if status.fract() != 0.0 || status < 0.0 || status > f64::from(u16::MAX) {
        return Err(Error::MalformedResponse("status is not a 16-bit integer"));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let status = status as u16;

    Ok(Response {
        status,
        headers: headers_from_js(ctx, value)?,
        body: body_from_js(ctx, value)?,
    })
}

fn headers_from_js<'js>(
    ctx: &Ctx<'js>,
    response: &Value<'js>,
) -> Result<Option<Vec<(String, String)>>> {
    let normalize = sys_fn(ctx, "responseHeaders")?;
    let normalized: Value<'js> = normalize.call((response.clone(),)).map_err(|_| {
        // The normalizer throws TypeError for shapes it cannot read.
        let _ = ctx.catch();
        Error::MalformedResponse("headers are not a pair list, an object or null")
    })?;
    if normalized.is_null() || normalized.is_undefined() {
        return Ok(None);
    }

    let arr = normalized
        .as_array()
        .cloned()
        .ok_or(Error::Unexpected("normalized headers are not an array"))?;
    let mut pairs = Vec::with_capacity(arr.len());
    for index in 0..arr.len() {
        let entry: Array<'js> = arr
            .get(index)
            .map_err(|_| Error::Unexpected("normalized header entry is not a pair"))?;
        let name: String = entry
            .get(0)
            .map_err(|_| Error::Unexpected("normalized header name is not a string"))?;
        let value: String = entry
            .get(1)
            .map_err(|_| Error::Unexpected("normalized header value is not a string"))?;
        pairs.push((name, value));
    }
    Ok(Some(pairs))
}

fn body_from_js<'js>(ctx: &Ctx<'js>, response: &Value<'js>) -> Result<Option<Vec<u8>>> {
    let normalize = sys_fn(ctx, "responseBody")?;
    let normalized: Value<'js> = normalize.call((response.clone(),)).map_err(|_| {
        let _ = ctx.catch();
        Error::MalformedResponse("body is not a string, a byte buffer or null")
    })?;
    if normalized.is_null() || normalized.is_undefined() {
        return Ok(None);
    }
    if let Some(text) = normalized.as_string() {
        let text = text
            .to_string()
            .map_err(|_| Error::Unexpected("body string is not readable"))?;
        return Ok(Some(text.into_bytes()));
    }
    let view = TypedArray::<u8>::from_value(normalized)
        .map_err(|_| Error::Unexpected("normalized body is not a byte view"))?;
    let bytes = view
        .as_bytes()
        .ok_or(Error::Unexpected("body buffer is detached"))?;
    Ok(Some(bytes.to_vec()))
}
