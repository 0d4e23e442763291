use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};

use crate::DirectorResult;
use crate::error::{Error, TransportErrorKind};
use crate::request::{Request, RequestBody};
use crate::response::Response;
use crate::transport::Sender;
use crate::util::lock_unpoisoned;

pub(crate) enum Reply {
    Response {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
    },
    Refused,
    Fail(Error),
}

impl Reply {
    pub(crate) fn status(status: u16) -> Self {
        Self::Response {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub(crate) fn body(status: u16, body: &str) -> Self {
        Self::Response {
            status,
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    pub(crate) fn header(mut self, name: &'static str, value: &str) -> Self {
        if let Self::Response { headers, .. } = &mut self {
            headers.push((name, value.to_owned()));
        }
        self
    }
}

#[derive(Clone, Debug)]
pub(crate) struct SeenRequest {
    pub(crate) method: Method,
    pub(crate) uri: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Vec<u8>,
}

impl SeenRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub(crate) fn path(&self) -> &str {
        self.uri
            .split_once("://")
            .and_then(|(_, rest)| rest.find('/').map(|index| &rest[index..]))
            .unwrap_or("/")
    }
}

struct DrainFlag {
    inner: Cursor<Vec<u8>>,
    drained: Arc<AtomicBool>,
}

impl Read for DrainFlag {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read == 0 {
            self.drained.store(true, Ordering::SeqCst);
        }
        Ok(read)
    }
}

/// Answers requests from a fixed script and remembers what it was sent.
#[derive(Default)]
pub(crate) struct ScriptedSender {
    replies: Mutex<VecDeque<Reply>>,
    seen: Mutex<Vec<SeenRequest>>,
    drained: Mutex<Vec<Arc<AtomicBool>>>,
}

impl ScriptedSender {
    pub(crate) fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        })
    }

    pub(crate) fn seen(&self) -> Vec<SeenRequest> {
        lock_unpoisoned(&self.seen).clone()
    }

    pub(crate) fn remaining(&self) -> usize {
        lock_unpoisoned(&self.replies).len()
    }

    /// Whether each response handed out so far has been read to the end.
    pub(crate) fn drained(&self) -> Vec<bool> {
        lock_unpoisoned(&self.drained)
            .iter()
            .map(|flag| flag.load(Ordering::SeqCst))
            .collect()
    }
}

fn read_sent_body(request: &mut Request) -> DirectorResult<Vec<u8>> {
    let mut body = Vec::new();
    if matches!(request.body(), RequestBody::Stream(_)) {
        if let RequestBody::Stream(mut reader) =
            std::mem::replace(request.body_mut(), RequestBody::Consumed)
        {
            reader
                .read_to_end(&mut body)
                .map_err(|source| Error::ReadBody { source })?;
        }
        return Ok(body);
    }
    request
        .regenerate_body()?
        .read_to_end(&mut body)
        .map_err(|source| Error::ReadBody { source })?;
    Ok(body)
}

impl Sender for ScriptedSender {
    fn send(&self, request: &mut Request) -> DirectorResult<Response> {
        let body = read_sent_body(request)?;
        lock_unpoisoned(&self.seen).push(SeenRequest {
            method: request.method().clone(),
            uri: request.uri().to_string(),
            headers: request.headers().clone(),
            body,
        });

        let reply = lock_unpoisoned(&self.replies)
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request {} {}", request.method(), request.uri()));
        match reply {
            Reply::Response {
                status,
                headers,
                body,
            } => {
                let mut header_map = HeaderMap::new();
                for (name, value) in headers {
                    header_map.append(
                        HeaderName::from_static(name),
                        HeaderValue::from_str(&value).expect("scripted header"),
                    );
                }
                let drained = Arc::new(AtomicBool::new(body.is_empty()));
                lock_unpoisoned(&self.drained).push(Arc::clone(&drained));
                Ok(Response::new(
                    StatusCode::from_u16(status).expect("scripted status"),
                    header_map,
                    DrainFlag {
                        inner: Cursor::new(body),
                        drained,
                    },
                ))
            }
            Reply::Refused => Err(Error::Transport {
                kind: TransportErrorKind::Connect,
                method: request.method().clone(),
                uri: request.uri().to_string(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )),
            }),
            Reply::Fail(error) => Err(error),
        }
    }
}
