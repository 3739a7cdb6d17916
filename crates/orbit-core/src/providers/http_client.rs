//! HTTP client provider: outbound requests on behalf of the guest.
//!
//! The guest allocates a client, then requests under it, configures each
//! request field by field, sends it, and reads the response back. Sending
//! races the invocation's cancellation token so a timed-out guest never
//! leaves a request in flight.

use super::{handle, lock};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use orbit_vm::memory::{read_bytes, read_string, status, write_bytes, write_into, write_size, write_u32};
use orbit_vm::{
    Caller, CapabilityProvider, Errno, GuestResult, HandleTable, HostOperation, HostState,
    ProviderError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[derive(Debug, Default)]
struct PendingRequest {
    method: Method,
    url: Option<Url>,
    headers: HeaderMap,
    body: Vec<u8>,
    response: Option<FetchedResponse>,
}

#[derive(Debug)]
struct FetchedResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    pos: usize,
}

impl FetchedResponse {
    fn header(&self, key: &str) -> Option<String> {
        let name = HeaderName::from_bytes(key.as_bytes()).ok()?;
        let values: Vec<&str> = self
            .headers
            .get_all(&name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    }
}

struct ClientEntry {
    client: reqwest::Client,
    requests: HandleTable<PendingRequest>,
}

type Clients = Arc<Mutex<HandleTable<ClientEntry>>>;

fn with_client<R>(
    clients: &Clients,
    client: i32,
    f: impl FnOnce(&mut ClientEntry) -> GuestResult<R>,
) -> GuestResult<R> {
    let mut clients = lock(clients);
    let entry = clients
        .get_mut(handle(client)?)
        .ok_or(Errno::ClientNotFound)?;
    f(entry)
}

fn with_request<R>(
    clients: &Clients,
    client: i32,
    request: i32,
    f: impl FnOnce(&mut PendingRequest) -> GuestResult<R>,
) -> GuestResult<R> {
    with_client(clients, client, |entry| {
        let request = entry
            .requests
            .get_mut(handle(request)?)
            .ok_or(Errno::RequestNotFound)?;
        f(request)
    })
}

fn with_response<R>(
    clients: &Clients,
    client: i32,
    request: i32,
    f: impl FnOnce(&mut FetchedResponse) -> GuestResult<R>,
) -> GuestResult<R> {
    with_request(clients, client, request, |req| {
        req.response.as_mut().ok_or(Errno::NotFound).and_then(f)
    })
}

fn prepare(clients: &Clients, client: i32, request: i32) -> GuestResult<reqwest::RequestBuilder> {
    with_client(clients, client, |entry| {
        let req = entry
            .requests
            .get_mut(handle(request)?)
            .ok_or(Errno::RequestNotFound)?;
        let url = req.url.clone().ok_or(Errno::InvalidArgument)?;
        Ok(entry
            .client
            .request(req.method.clone(), url)
            .headers(req.headers.clone())
            .body(req.body.clone()))
    })
}

async fn fetch(builder: reqwest::RequestBuilder) -> GuestResult<FetchedResponse> {
    let response = builder.send().await.map_err(|e| {
        tracing::debug!(error = %e, "Outbound HTTP request failed");
        Errno::HttpFailure
    })?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(|e| {
        tracing::debug!(error = %e, "Reading outbound HTTP response failed");
        Errno::HttpFailure
    })?;
    Ok(FetchedResponse {
        status,
        headers,
        body,
        pos: 0,
    })
}

/// Serves the `*Http*` client operations.
pub struct HttpClientProvider {
    timeout: Option<Duration>,
    clients: Clients,
}

impl HttpClientProvider {
    /// Create a provider whose requests are capped at `timeout`, if given.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            clients: Arc::new(Mutex::new(HandleTable::new())),
        }
    }

    fn template(&self) -> Result<reqwest::Client, ProviderError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| ProviderError::Bind(format!("failed to build HTTP client: {e}")))
    }
}

impl Default for HttpClientProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

fn op<F>(clients: &Clients, name: &str, arity: usize, f: F) -> HostOperation
where
    F: Fn(&Clients, &mut Caller<'_, HostState>, &[i32]) -> GuestResult<()> + Send + Sync + 'static,
{
    let clients = Arc::clone(clients);
    HostOperation::immediate(name, arity, move |caller, args| status(f(&clients, caller, args)))
}

impl CapabilityProvider for HttpClientProvider {
    fn name(&self) -> &str {
        "http-client"
    }

    fn operations(&mut self) -> Result<Vec<HostOperation>, ProviderError> {
        let template = self.template()?;
        let clients = &self.clients;

        let mut ops = Vec::with_capacity(12);

        // newHttpClient(idPtr)
        ops.push(op(clients, "newHttpClient", 1, move |clients, caller, args| {
            let id = lock(clients).insert(ClientEntry {
                client: template.clone(),
                requests: HandleTable::new(),
            });
            write_u32(caller, args[0], id).inspect_err(|_| {
                lock(clients).remove(id);
            })
        }));

        // newHttpRequest(client, idPtr)
        ops.push(op(clients, "newHttpRequest", 2, |clients, caller, args| {
            let id = with_client(clients, args[0], |entry| {
                Ok(entry.requests.insert(PendingRequest::default()))
            })?;
            write_u32(caller, args[1], id)
        }));

        // setHttpRequestMethod(client, req, ptr, len)
        ops.push(op(clients, "setHttpRequestMethod", 4, |clients, caller, args| {
            let method = read_bytes(caller, args[2], args[3])?;
            let method = Method::from_bytes(&method).map_err(|_| Errno::InvalidArgument)?;
            with_request(clients, args[0], args[1], |req| {
                req.method = method;
                Ok(())
            })
        }));

        // setHttpRequestURL(client, req, ptr, len)
        ops.push(op(clients, "setHttpRequestURL", 4, |clients, caller, args| {
            let url = read_string(caller, args[2], args[3])?;
            let url = Url::parse(&url).map_err(|_| Errno::InvalidArgument)?;
            with_request(clients, args[0], args[1], |req| {
                req.url = Some(url);
                Ok(())
            })
        }));

        // addHttpRequestHeader(client, req, keyPtr, keyLen, valPtr, valLen)
        ops.push(op(clients, "addHttpRequestHeader", 6, |clients, caller, args| {
            let key = read_bytes(caller, args[2], args[3])?;
            let value = read_bytes(caller, args[4], args[5])?;
            let key = HeaderName::from_bytes(&key).map_err(|_| Errno::InvalidArgument)?;
            let value = HeaderValue::from_bytes(&value).map_err(|_| Errno::InvalidArgument)?;
            with_request(clients, args[0], args[1], |req| {
                req.headers.append(key, value);
                Ok(())
            })
        }));

        // setHttpRequestBody(client, req, ptr, len)
        ops.push(op(clients, "setHttpRequestBody", 4, |clients, caller, args| {
            let body = read_bytes(caller, args[2], args[3])?;
            with_request(clients, args[0], args[1], |req| {
                req.body = body;
                Ok(())
            })
        }));

        // doHttpRequest(client, req)
        let shared = Arc::clone(clients);
        ops.push(HostOperation::new("doHttpRequest", 2, move |caller, args| {
            let clients = Arc::clone(&shared);
            let cancel = caller.data().cancellation().clone();
            Box::pin(async move {
                let (client, request) = (args[0], args[1]);
                let result = match prepare(&clients, client, request) {
                    Ok(builder) => {
                        let fetched = tokio::select! {
                            fetched = fetch(builder) => fetched,
                            _ = cancel.cancelled() => Err(Errno::Cancelled),
                        };
                        fetched.and_then(|response| {
                            with_request(&clients, client, request, |req| {
                                req.response = Some(response);
                                Ok(())
                            })
                        })
                    }
                    Err(errno) => Err(errno),
                };
                Ok(status(result))
            })
        }));

        // getHttpResponseStatus(client, req, statusPtr)
        ops.push(op(clients, "getHttpResponseStatus", 3, |clients, caller, args| {
            let code = with_response(clients, args[0], args[1], |resp| Ok(resp.status))?;
            write_u32(caller, args[2], u32::from(code))
        }));

        // getHttpResponseHeaderSize(client, req, keyPtr, keyLen, sizePtr)
        ops.push(op(clients, "getHttpResponseHeaderSize", 5, |clients, caller, args| {
            let key = read_string(caller, args[2], args[3])?;
            let value = with_response(clients, args[0], args[1], |resp| {
                resp.header(&key).ok_or(Errno::NotFound)
            })?;
            write_size(caller, args[4], value.as_bytes())
        }));

        // getHttpResponseHeader(client, req, keyPtr, keyLen, bufPtr, bufLen)
        ops.push(op(clients, "getHttpResponseHeader", 6, |clients, caller, args| {
            let key = read_string(caller, args[2], args[3])?;
            let value = with_response(clients, args[0], args[1], |resp| {
                resp.header(&key).ok_or(Errno::NotFound)
            })?;
            write_into(caller, args[4], args[5], value.as_bytes())
        }));

        // readHttpResponseBody(client, req, bufPtr, bufLen, nPtr)
        ops.push(op(clients, "readHttpResponseBody", 5, |clients, caller, args| {
            let max = args[3] as u32 as usize;
            let chunk = with_response(clients, args[0], args[1], |resp| {
                let rest = resp.body.slice(resp.pos..);
                Ok(rest.slice(..rest.len().min(max)))
            })?;
            if chunk.is_empty() && max > 0 {
                write_u32(caller, args[4], 0)?;
                return Err(Errno::Eof);
            }
            write_bytes(caller, args[2], &chunk)?;
            write_u32(caller, args[4], chunk.len() as u32)?;
            with_response(clients, args[0], args[1], |resp| {
                resp.pos += chunk.len();
                Ok(())
            })
        }));

        // closeHttpRequest(client, req)
        ops.push(op(clients, "closeHttpRequest", 2, |clients, _caller, args| {
            with_client(clients, args[0], |entry| {
                entry
                    .requests
                    .remove(handle(args[1])?)
                    .map(drop)
                    .ok_or(Errno::RequestNotFound)
            })
        }));

        Ok(ops)
    }

    fn close(&mut self) -> Result<(), ProviderError> {
        let released = lock(&self.clients).drain();
        if !released.is_empty() {
            let requests: usize = released.iter().map(|c| c.requests.len()).sum();
            tracing::debug!(clients = released.len(), requests, "Released HTTP clients");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clients_with_request() -> Clients {
        let clients: Clients = Arc::new(Mutex::new(HandleTable::new()));
        let id = lock(&clients).insert(ClientEntry {
            client: reqwest::Client::new(),
            requests: HandleTable::new(),
        });
        assert_eq!(id, 1);
        with_client(&clients, 1, |entry| Ok(entry.requests.insert(PendingRequest::default())))
            .expect("request");
        clients
    }

    #[test]
    fn test_lookup_errors() {
        let clients = clients_with_request();
        assert_eq!(with_client(&clients, 9, |_| Ok(())), Err(Errno::ClientNotFound));
        assert_eq!(with_request(&clients, 1, 9, |_| Ok(())), Err(Errno::RequestNotFound));
        assert_eq!(with_request(&clients, -1, 1, |_| Ok(())), Err(Errno::InvalidArgument));
        // no response fetched yet
        assert_eq!(with_response(&clients, 1, 1, |_| Ok(())), Err(Errno::NotFound));
    }

    #[test]
    fn test_prepare_requires_url() {
        let clients = clients_with_request();
        assert!(matches!(prepare(&clients, 1, 1), Err(Errno::InvalidArgument)));

        with_request(&clients, 1, 1, |req| {
            req.url = Some(Url::parse("http://127.0.0.1:9/").expect("url"));
            req.method = Method::POST;
            Ok(())
        })
        .expect("configure");
        let request = prepare(&clients, 1, 1)
            .expect("builder")
            .build()
            .expect("request");
        assert_eq!(*request.method(), Method::POST);
        assert_eq!(request.url().as_str(), "http://127.0.0.1:9/");
    }

    #[test]
    fn test_response_header_join() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        let response = FetchedResponse {
            status: 200,
            headers,
            body: Bytes::new(),
            pos: 0,
        };
        assert_eq!(response.header("Set-Cookie").as_deref(), Some("a=1, b=2"));
        assert_eq!(response.header("etag"), None);
    }

    #[test]
    fn test_close_drains_clients() {
        let mut provider = HttpClientProvider::new(Some(Duration::from_secs(5)));
        let ops = provider.operations().expect("bind");
        assert_eq!(ops.len(), 12);
        lock(&provider.clients).insert(ClientEntry {
            client: reqwest::Client::new(),
            requests: HandleTable::new(),
        });
        provider.close().expect("close");
        assert!(lock(&provider.clients).is_empty());
    }
}
