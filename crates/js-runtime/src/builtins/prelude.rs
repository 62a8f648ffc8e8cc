/// Script evaluated once per session, after the native half is registered
/// and before any guest code. It must not depend on anything guest code can
/// redefine.
pub const SOURCE: &str = r##"
"use strict";
(function (native) {
  // --- unhandled rejection registry -------------------------------------

  const pendingRejections = new Map();
  let nextRejectionId = 1;

  function describe(reason) {
    if (reason instanceof Error && typeof reason.stack === "string") {
      return reason.message + "\n" + reason.stack;
    }
    return String(reason);
  }

  const NativePromise = Promise;

  // Rejections are registered when they happen and removed once any
  // reaction is attached, mirroring how engines drive their host rejection
  // trackers. Promises created by async functions bypass the constructor
  // and are not tracked.
  class TrackedPromise extends NativePromise {
    constructor(executor) {
      const track = { id: 0, handled: false };
      super((resolve, reject) => {
        const trackedReject = (reason) => {
          if (track.id === 0 && !track.handled) {
            track.id = nextRejectionId;
            nextRejectionId += 1;
            pendingRejections.set(track.id, describe(reason));
          }
          reject(reason);
        };
        try {
          executor(resolve, trackedReject);
        } catch (err) {
          trackedReject(err);
        }
      });
      this._track = track;
    }

    // catch() and finally() delegate to then(), so overriding then() is
    // enough to observe every attached reaction.
    then(onFulfilled, onRejected) {
      settle(this._track);
      return super.then(onFulfilled, onRejected);
    }
  }

  function settle(track) {
    if (!track) {
      return;
    }
    track.handled = true;
    if (track.id !== 0) {
      pendingRejections.delete(track.id);
      track.id = 0;
    }
  }

  function observe(value) {
    if (value !== null && typeof value === "object") {
      settle(value._track);
    }
  }

  function drainRejections() {
    const reasons = Array.from(pendingRejections.values());
    pendingRejections.clear();
    return reasons;
  }

  globalThis.Promise = TrackedPromise;

  // --- console ----------------------------------------------------------

  const console = {};
  for (const level of ["log", "trace", "info", "warn", "error"]) {
    console[level] = (value) => {
      native.write(String(value));
    };
  }
  globalThis.console = console;

  // --- text codecs ------------------------------------------------------

  function toByteView(input) {
    if (input instanceof ArrayBuffer) {
      return new Uint8Array(input);
    }
    if (ArrayBuffer.isView(input)) {
      return new Uint8Array(input.buffer, input.byteOffset, input.byteLength);
    }
    return null;
  }

  class TextEncoder {
    get encoding() {
      return "utf-8";
    }
    encode(input) {
      const text = input === undefined ? "" : String(input);
      return new Uint8Array(native.utf8Encode(text));
    }
  }

  class TextDecoder {
    constructor(label) {
      if (label !== undefined) {
        const name = String(label).toLowerCase();
        if (name !== "utf-8" && name !== "utf8") {
          throw new RangeError("only utf-8 is supported");
        }
      }
    }
    get encoding() {
      return "utf-8";
    }
    decode(input) {
      if (input === undefined) {
        return "";
      }
      const view = toByteView(input);
      if (view === null) {
        throw new TypeError("decode input must be an ArrayBuffer or a typed array");
      }
      return native.utf8Decode(view);
    }
  }

  globalThis.TextEncoder = TextEncoder;
  globalThis.TextDecoder = TextDecoder;

  // --- request and response plumbing ------------------------------------

  // Ordered multi-map over name/value pairs. Header lookups fold case,
  // parameter lookups do not.
  class PairMap {
    constructor(pairs, foldCase) {
      this._pairs = pairs.map(([name, value]) => [String(name), String(value)]);
      this._foldCase = foldCase;
    }
    _canon(name) {
      return this._foldCase ? String(name).toLowerCase() : String(name);
    }
    get(name) {
      const wanted = this._canon(name);
      for (const [n, v] of this._pairs) {
        if (this._canon(n) === wanted) {
          return v;
        }
      }
      return null;
    }
    getAll(name) {
      const wanted = this._canon(name);
      const values = [];
      for (const [n, v] of this._pairs) {
        if (this._canon(n) === wanted) {
          values.push(v);
        }
      }
      return values;
    }
    has(name) {
      return this.get(name) !== null;
    }
    entries() {
      return this._pairs.map(([n, v]) => [n, v]);
    }
    forEach(fn, thisArg) {
      for (const [n, v] of this._pairs) {
        fn.call(thisArg, v, n, this);
      }
    }
    get size() {
      return this._pairs.length;
    }
    [Symbol.iterator]() {
      return this.entries()[Symbol.iterator]();
    }
  }

  function makeRequest(method, uri, headerPairs, paramPairs, bodyBuffer) {
    return {
      method,
      uri,
      headers: new PairMap(headerPairs, true),
      params: paramPairs === null ? null : new PairMap(paramPairs, false),
      body: bodyBuffer === null ? null : new Uint8Array(bodyBuffer),
    };
  }

  function responseHeaders(response) {
    const headers = response.headers;
    if (headers === null || headers === undefined) {
      return null;
    }
    if (headers instanceof PairMap) {
      return headers.entries();
    }
    if (Array.isArray(headers)) {
      return headers.map((entry) => {
        if (!Array.isArray(entry) || entry.length !== 2) {
          throw new TypeError("header entry must be a [name, value] pair");
        }
        return [String(entry[0]), String(entry[1])];
      });
    }
    if (typeof headers === "object") {
      return Object.entries(headers).map(([name, value]) => [name, String(value)]);
    }
    throw new TypeError("headers must be a pair list, an object or null");
  }

  function responseBody(response) {
    const body = response.body;
    if (body === null || body === undefined) {
      return null;
    }
    if (typeof body === "string") {
      return body;
    }
    const view = toByteView(body);
    if (view === null) {
      throw new TypeError("body must be a string, a byte buffer or null");
    }
    return view;
  }

  globalThis.__oriel_sys = {
    makeRequest,
    observe,
    drainRejections,
    responseHeaders,
    responseBody,
  };
})(globalThis.__oriel_native);
delete globalThis.__oriel_native;
"##;
