//! Event provider: gives the guest its triggering request and collects the
//! response it writes.
//!
//! Events live in a host table; the guest receives the handle as the single
//! argument of its export.

use super::{handle, lock};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, HOST};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use orbit_vm::memory::{read_bytes, read_string, status, write_bytes, write_into, write_size, write_u32};
use orbit_vm::{
    Caller, CapabilityProvider, Errno, GuestResult, HandleTable, HostOperation, HostState,
    ProviderError,
};
use std::sync::{Arc, Mutex};

/// Value written by `getEventType` for HTTP events.
pub const EVENT_TYPE_HTTP: u32 = 1;

/// One HTTP request/response pair.
#[derive(Debug)]
pub struct HttpEvent {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    body_pos: usize,
    status: StatusCode,
    response_headers: HeaderMap,
    response_body: Vec<u8>,
}

impl HttpEvent {
    fn new(request: Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            body_pos: 0,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            response_body: Vec::new(),
        }
    }

    /// Request method.
    pub fn method(&self) -> &str {
        self.method.as_str()
    }

    /// Host the request was addressed to, port included.
    pub fn host(&self) -> String {
        self.headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| self.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default()
    }

    /// Request path.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// First query parameter named `key`, percent-decoded.
    pub fn query_value(&self, key: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// All values of request header `key`, joined with `, `.
    pub fn header_value(&self, key: &str) -> Option<String> {
        let name = HeaderName::from_bytes(key.as_bytes()).ok()?;
        let values: Vec<&str> = self
            .headers
            .get_all(&name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    }

    fn unread_body(&self, max: usize) -> &[u8] {
        let rest = &self.body[self.body_pos..];
        &rest[..rest.len().min(max)]
    }

    fn into_response(self) -> Response<Bytes> {
        let mut response = Response::new(Bytes::from(self.response_body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.response_headers;
        response
    }
}

/// Shared table of live events.
///
/// The invoker keeps a clone to mint the event before the call and to take
/// the response after it.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    events: Arc<Mutex<HandleTable<HttpEvent>>>,
}

impl EventTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an HTTP request and return its handle.
    pub fn mint_http(&self, request: Request<Bytes>) -> u32 {
        lock(&self.events).insert(HttpEvent::new(request))
    }

    /// Remove an event and return the response the guest built.
    pub fn take_response(&self, handle: u32) -> Option<Response<Bytes>> {
        lock(&self.events)
            .remove(handle)
            .map(HttpEvent::into_response)
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    /// Whether no event is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with<R>(&self, handle: u32, f: impl FnOnce(&mut HttpEvent) -> R) -> GuestResult<R> {
        let mut events = lock(&self.events);
        let event = events.get_mut(handle).ok_or(Errno::EventNotFound)?;
        Ok(f(event))
    }

    fn clear(&self) -> usize {
        lock(&self.events).drain().len()
    }
}

/// Exposes [`EventTable`] entries to the guest.
#[derive(Debug)]
pub struct EventProvider {
    events: EventTable,
}

impl EventProvider {
    /// Serve events from `events`.
    pub fn new(events: EventTable) -> Self {
        Self { events }
    }

    /// The table this provider serves.
    pub fn events(&self) -> &EventTable {
        &self.events
    }
}

type Getter = fn(&HttpEvent) -> String;
type KeyedGetter = fn(&HttpEvent, &str) -> Option<String>;

fn op<F>(events: &EventTable, name: &str, arity: usize, f: F) -> HostOperation
where
    F: Fn(&EventTable, &mut Caller<'_, HostState>, &[i32]) -> GuestResult<()>
        + Send
        + Sync
        + 'static,
{
    let events = events.clone();
    HostOperation::immediate(name, arity, move |caller, args| status(f(&events, caller, args)))
}

/// `<name>Size(ev, sizePtr)` and `<name>(ev, bufPtr, bufLen)`.
fn string_pair(events: &EventTable, name: &str, get: Getter) -> [HostOperation; 2] {
    [
        op(events, &format!("{name}Size"), 2, move |events, caller, args| {
            let value = events.with(handle(args[0])?, |e| get(e))?;
            write_size(caller, args[1], value.as_bytes())
        }),
        op(events, name, 3, move |events, caller, args| {
            let value = events.with(handle(args[0])?, |e| get(e))?;
            write_into(caller, args[1], args[2], value.as_bytes())
        }),
    ]
}

/// `<name>Size(ev, keyPtr, keyLen, sizePtr)` and
/// `<name>(ev, keyPtr, keyLen, bufPtr, bufLen)`.
fn keyed_pair(events: &EventTable, name: &str, get: KeyedGetter) -> [HostOperation; 2] {
    [
        op(events, &format!("{name}Size"), 4, move |events, caller, args| {
            let key = read_string(caller, args[1], args[2])?;
            let value = events
                .with(handle(args[0])?, |e| get(e, &key))?
                .ok_or(Errno::NotFound)?;
            write_size(caller, args[3], value.as_bytes())
        }),
        op(events, name, 5, move |events, caller, args| {
            let key = read_string(caller, args[1], args[2])?;
            let value = events
                .with(handle(args[0])?, |e| get(e, &key))?
                .ok_or(Errno::NotFound)?;
            write_into(caller, args[3], args[4], value.as_bytes())
        }),
    ]
}

impl CapabilityProvider for EventProvider {
    fn name(&self) -> &str {
        "event"
    }

    fn operations(&mut self) -> Result<Vec<HostOperation>, ProviderError> {
        let events = &self.events;
        let mut ops = vec![op(events, "getEventType", 2, |events, caller, args| {
            events.with(handle(args[0])?, |_| ())?;
            write_u32(caller, args[1], EVENT_TYPE_HTTP)
        })];

        ops.extend(string_pair(events, "eventHttpMethod", |e| e.method().to_string()));
        ops.extend(string_pair(events, "eventHttpHost", HttpEvent::host));
        ops.extend(string_pair(events, "eventHttpPath", |e| e.path().to_string()));
        ops.extend(keyed_pair(events, "eventHttpQueryValueByName", HttpEvent::query_value));
        ops.extend(keyed_pair(events, "eventHttpHeaderByName", HttpEvent::header_value));

        // eventHttpBodyRead(ev, bufPtr, bufLen, nPtr)
        ops.push(op(events, "eventHttpBodyRead", 4, |events, caller, args| {
            let ev = handle(args[0])?;
            let max = args[2] as u32 as usize;
            let chunk = events.with(ev, |e| e.unread_body(max).to_vec())?;
            if chunk.is_empty() && max > 0 {
                write_u32(caller, args[3], 0)?;
                return Err(Errno::Eof);
            }
            write_bytes(caller, args[1], &chunk)?;
            write_u32(caller, args[3], chunk.len() as u32)?;
            events.with(ev, |e| e.body_pos += chunk.len())
        }));

        // eventHttpWrite(ev, bufPtr, bufLen, nPtr)
        ops.push(op(events, "eventHttpWrite", 4, |events, caller, args| {
            let ev = handle(args[0])?;
            let data = read_bytes(caller, args[1], args[2])?;
            events.with(ev, |e| e.response_body.extend_from_slice(&data))?;
            write_u32(caller, args[3], data.len() as u32)
        }));

        // eventHttpRetCode(ev, code)
        ops.push(op(events, "eventHttpRetCode", 2, |events, _caller, args| {
            let code = u16::try_from(args[1]).map_err(|_| Errno::InvalidArgument)?;
            let code = StatusCode::from_u16(code).map_err(|_| Errno::InvalidArgument)?;
            events.with(handle(args[0])?, |e| e.status = code)
        }));

        // eventHttpHeaderAdd(ev, keyPtr, keyLen, valPtr, valLen)
        ops.push(op(events, "eventHttpHeaderAdd", 5, |events, caller, args| {
            let key = read_bytes(caller, args[1], args[2])?;
            let value = read_bytes(caller, args[3], args[4])?;
            let name = HeaderName::from_bytes(&key).map_err(|_| Errno::InvalidArgument)?;
            let value = HeaderValue::from_bytes(&value).map_err(|_| Errno::InvalidArgument)?;
            events.with(handle(args[0])?, |e| {
                e.response_headers.append(name, value);
            })
        }));

        Ok(ops)
    }

    fn close(&mut self) -> Result<(), ProviderError> {
        let dropped = self.events.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "Released unclaimed events");
        }
        Ok(())
    }
}
