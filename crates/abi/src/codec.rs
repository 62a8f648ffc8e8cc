//! Lift and lower between the structured model and the flat convention.
//!
//! Lifting takes ownership of every guest-memory buffer it is handed, so a
//! lifted value (or a decode error part-way through) frees element buffers
//! before their backing arrays. Lowering allocates with exact capacity, so
//! the pointer/length pairs it hands out can later be released with
//! [`crate::alloc::canonical_abi_free`] using the length as the size.

use crate::http::{DecodeError, Method, Request, Response};

/// A lowered string or byte buffer: pointer into linear memory plus length.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AbiString {
    pub ptr: *mut u8,
    pub len: usize,
}

/// The eleven scalars of a flattened request, in argument order.
///
/// `params_tag` and `body_tag` are presence tags: when zero the matching
/// pointer and length carry no information and must be ignored.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawRequest {
    pub method: u32,
    pub uri_ptr: *mut u8,
    pub uri_len: usize,
    pub headers_ptr: *mut AbiString,
    pub headers_len: usize,
    pub params_tag: u32,
    pub params_ptr: *mut AbiString,
    pub params_len: usize,
    pub body_tag: u32,
    pub body_ptr: *mut u8,
    pub body_len: usize,
}

/// The seven-word return record a handler call produces.
///
/// Optional fields use the same tag convention as [`RawRequest`]: an absent
/// section has tag zero and zeroed pointer and length words.
///
/// Every field is one machine word, so the record is 28 bytes on 32-bit
/// targets. Conventions that stride the same seven values at fixed
/// eight-byte slots are deliberately not reproduced here; a host expecting
/// such a record must not read this layout directly.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetArea {
    pub status: usize,
    pub headers_tag: usize,
    pub headers_ptr: usize,
    pub headers_len: usize,
    pub body_tag: usize,
    pub body_ptr: usize,
    pub body_len: usize,
}

impl RetArea {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            status: 0,
            headers_tag: 0,
            headers_ptr: 0,
            headers_len: 0,
            body_tag: 0,
            body_ptr: 0,
            body_len: 0,
        }
    }
}

/// Reconstructs a `Vec<u8>` from a lowered buffer, taking ownership.
///
/// # Safety
///
/// `ptr` must come from an exact-capacity lowering of `len` bytes (or be
/// any value when `len` is zero) and must not be used afterwards.
unsafe fn lift_bytes(ptr: *mut u8, len: usize) -> Vec<u8> {
    if len == 0 {
        return Vec::new();
    }
    unsafe { Vec::from_raw_parts(ptr, len, len) }
}

/// Takes ownership of a lowered list of strings as raw byte buffers.
///
/// Every element buffer is owned before any parsing happens, so a failure
/// later on still releases the whole structure.
unsafe fn lift_string_list(ptr: *mut AbiString, len: usize) -> Vec<Vec<u8>> {
    if len == 0 {
        return Vec::new();
    }
    let entries = unsafe { Vec::from_raw_parts(ptr, len, len) };
    entries
        .into_iter()
        .map(|s| unsafe { lift_bytes(s.ptr, s.len) })
        .collect()
}

fn parse_pairs(
    raw: Vec<Vec<u8>>,
    field: &'static str,
) -> Result<Vec<(String, String)>, DecodeError> {
    raw.into_iter()
        .map(|bytes| {
            let entry =
                String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(field))?;
            let (name, value) = entry
                .split_once(':')
                .ok_or(DecodeError::MissingSeparator(field))?;
            Ok((name.to_owned(), value.to_owned()))
        })
        .collect()
}

/// Lifts a flattened request into its structured form, taking ownership of
/// all buffers the raw record points at.
///
/// # Safety
///
/// Every pointer in `raw` must come from an exact-capacity lowering (for
/// example via [`crate::alloc::canonical_abi_realloc`] or
/// [`lower_request`]) matching its length, and none of them may be used
/// after this call.
pub unsafe fn lift_request(raw: RawRequest) -> Result<Request, DecodeError> {
    // Own everything first; parse after.
    let uri = unsafe { lift_bytes(raw.uri_ptr, raw.uri_len) };
    let headers = unsafe { lift_string_list(raw.headers_ptr, raw.headers_len) };
    let params = (raw.params_tag != 0)
        .then(|| unsafe { lift_string_list(raw.params_ptr, raw.params_len) });
    let body = (raw.body_tag != 0).then(|| unsafe { lift_bytes(raw.body_ptr, raw.body_len) });

    let method = Method::try_from(raw.method)?;
    let uri = String::from_utf8(uri).map_err(|_| DecodeError::InvalidUtf8("uri"))?;
    let headers = parse_pairs(headers, "header")?;
    let params = params.map(|p| parse_pairs(p, "parameter")).transpose()?;

    Ok(Request {
        method,
        uri,
        headers,
        params,
        body,
    })
}

fn lower_bytes(bytes: Vec<u8>) -> (*mut u8, usize) {
    let len = bytes.len();
    if len == 0 {
        return (std::ptr::null_mut(), 0);
    }
    let boxed: Box<[u8]> = bytes.into_boxed_slice();
    (Box::into_raw(boxed).cast::<u8>(), len)
}

fn lower_pairs(pairs: &[(String, String)]) -> (*mut AbiString, usize) {
    let len = pairs.len();
    if len == 0 {
        return (std::ptr::null_mut(), 0);
    }
    let entries: Vec<AbiString> = pairs
        .iter()
        .map(|(name, value)| {
            let mut entry = String::with_capacity(name.len() + 1 + value.len());
            entry.push_str(name);
            entry.push(':');
            entry.push_str(value);
            let (ptr, len) = lower_bytes(entry.into_bytes());
            AbiString { ptr, len }
        })
        .collect();
    let boxed: Box<[AbiString]> = entries.into_boxed_slice();
    (Box::into_raw(boxed).cast::<AbiString>(), len)
}

/// Flattens a request into the eleven-scalar convention, allocating every
/// buffer with exact capacity. The caller takes ownership of the result.
#[must_use]
pub fn lower_request(request: &Request) -> RawRequest {
    let (uri_ptr, uri_len) = lower_bytes(request.uri.clone().into_bytes());
    let (headers_ptr, headers_len) = lower_pairs(&request.headers);
    let (params_tag, params_ptr, params_len) = match &request.params {
        Some(pairs) => {
            let (ptr, len) = lower_pairs(pairs);
            (1, ptr, len)
        }
        None => (0, std::ptr::null_mut(), 0),
    };
    let (body_tag, body_ptr, body_len) = match &request.body {
        Some(bytes) => {
            let (ptr, len) = lower_bytes(bytes.clone());
            (1, ptr, len)
        }
        None => (0, std::ptr::null_mut(), 0),
    };

    RawRequest {
        method: request.method as u32,
        uri_ptr,
        uri_len,
        headers_ptr,
        headers_len,
        params_tag,
        params_ptr,
        params_len,
        body_tag,
        body_ptr,
        body_len,
    }
}

/// Flattens a response into the seven-word return record.
///
/// Ownership of the lowered buffers transfers to whoever reads the record;
/// the host releases them through the exported allocator.
#[must_use]
pub fn lower_response(response: &Response) -> RetArea {
    let mut area = RetArea::zeroed();
    area.status = usize::from(response.status);
    if let Some(headers) = &response.headers {
        let (ptr, len) = lower_pairs(headers);
        area.headers_tag = 1;
        area.headers_ptr = ptr as usize;
        area.headers_len = len;
    }
    if let Some(body) = &response.body {
        let (ptr, len) = lower_bytes(body.clone());
        area.body_tag = 1;
        area.body_ptr = ptr as usize;
        area.body_len = len;
    }
    area
}

/// Lifts a return record back into a structured response, taking ownership
/// of the lowered buffers.
///
/// # Safety
///
/// The record must come from [`lower_response`] (or an equivalent
/// exact-capacity lowering) and its buffers must not be used afterwards.
pub unsafe fn lift_response(area: &RetArea) -> Result<Response, DecodeError> {
    let headers = (area.headers_tag != 0).then(|| unsafe {
        lift_string_list(area.headers_ptr as *mut AbiString, area.headers_len)
    });
    let body = (area.body_tag != 0)
        .then(|| unsafe { lift_bytes(area.body_ptr as *mut u8, area.body_len) });

    let status = u16::try_from(area.status)
        .map_err(|_| DecodeError::StatusOutOfRange(area.status))?;
    let headers = headers.map(|h| parse_pairs(h, "header")).transpose()?;

    Ok(Response {
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn request_roundtrip() {
        let request = Request {
            method: Method::Post,
            uri: "/search?q=rust".to_owned(),
            headers: pairs(&[("Content-Type", "text/plain"), ("X-Trace", "a:b:c")]),
            params: Some(pairs(&[("q", "rust")])),
            body: Some(b"hello".to_vec()),
        };
        let raw = lower_request(&request);
        let lifted = unsafe { lift_request(raw) }.unwrap();
        assert_eq!(lifted, request);
    }

    #[test]
    fn value_keeps_extra_separators() {
        let request = Request {
            method: Method::Get,
            uri: "/".to_owned(),
            headers: pairs(&[("Authorization", "Bearer a:b")]),
            params: None,
            body: None,
        };
        let raw = lower_request(&request);
        let lifted = unsafe { lift_request(raw) }.unwrap();
        assert_eq!(lifted.headers[0].1, "Bearer a:b");
    }

    #[test]
    fn absent_and_empty_optionals_differ() {
        let absent = Request {
            method: Method::Get,
            uri: "/".to_owned(),
            headers: Vec::new(),
            params: None,
            body: None,
        };
        let raw = lower_request(&absent);
        assert_eq!(raw.params_tag, 0);
        assert_eq!(raw.body_tag, 0);
        let lifted = unsafe { lift_request(raw) }.unwrap();
        assert_eq!(lifted.params, None);
        assert_eq!(lifted.body, None);

        let empty = Request {
            params: Some(Vec::new()),
            body: Some(Vec::new()),
            ..absent
        };
        let raw = lower_request(&empty);
        assert_eq!(raw.params_tag, 1);
        assert_eq!(raw.body_tag, 1);
        let lifted = unsafe { lift_request(raw) }.unwrap();
        assert_eq!(lifted.params, Some(Vec::new()));
        assert_eq!(lifted.body, Some(Vec::new()));
    }

    #[test]
    fn header_order_is_preserved() {
        let request = Request {
            method: Method::Get,
            uri: "/".to_owned(),
            headers: pairs(&[("b", "2"), ("a", "1"), ("b", "3")]),
            params: None,
            body: None,
        };
        let lifted = unsafe { lift_request(lower_request(&request)) }.unwrap();
        assert_eq!(lifted.headers, request.headers);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let mut raw = lower_request(&Request {
            method: Method::Get,
            uri: "/".to_owned(),
            headers: Vec::new(),
            params: None,
            body: None,
        });
        raw.method = 9;
        let err = unsafe { lift_request(raw) }.unwrap_err();
        assert!(matches!(err, DecodeError::UnknownMethod(9)));
    }

    #[test]
    fn header_without_separator_is_rejected() {
        let (ptr, len) = {
            let bytes: Box<[u8]> = b"no-separator".to_vec().into_boxed_slice();
            let len = bytes.len();
            (Box::into_raw(bytes).cast::<u8>(), len)
        };
        let entries: Box<[AbiString]> = vec![AbiString { ptr, len }].into_boxed_slice();
        let raw = RawRequest {
            method: 0,
            uri_ptr: std::ptr::null_mut(),
            uri_len: 0,
            headers_ptr: Box::into_raw(entries).cast::<AbiString>(),
            headers_len: 1,
            params_tag: 0,
            params_ptr: std::ptr::null_mut(),
            params_len: 0,
            body_tag: 0,
            body_ptr: std::ptr::null_mut(),
            body_len: 0,
        };
        let err = unsafe { lift_request(raw) }.unwrap_err();
        assert!(matches!(err, DecodeError::MissingSeparator("header")));
    }

    #[test]
    fn ret_area_is_seven_machine_words() {
        assert_eq!(
            std::mem::size_of::<RetArea>(),
            7 * std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn response_roundtrip() {
        let response = Response {
            status: 201,
            headers: Some(pairs(&[("Location", "/things/7")])),
            body: Some(b"created".to_vec()),
        };
        let area = lower_response(&response);
        assert_eq!(area.status, 201);
        assert_eq!(area.headers_tag, 1);
        assert_eq!(area.body_tag, 1);
        let lifted = unsafe { lift_response(&area) }.unwrap();
        assert_eq!(lifted, response);
    }

    #[test]
    fn bare_response_lowers_to_zeroed_optionals() {
        let response = Response {
            status: 204,
            headers: None,
            body: None,
        };
        let area = lower_response(&response);
        assert_eq!(area.headers_tag, 0);
        assert_eq!(area.headers_ptr, 0);
        assert_eq!(area.headers_len, 0);
        assert_eq!(area.body_tag, 0);
        assert_eq!(area.body_ptr, 0);
        assert_eq!(area.body_len, 0);
        let lifted = unsafe { lift_response(&area) }.unwrap();
        assert_eq!(lifted, response);
    }
}
