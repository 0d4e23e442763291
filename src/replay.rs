use std::io::{Cursor, Read, Seek, SeekFrom};

use bytes::Bytes;

use crate::error::Error;
use crate::request::{ReadSeek, Request, RequestBody};

/// Reader over a request body that is still owned by its [`Request`].
pub enum BodyReader<'a> {
    Empty,
    Buffered(Cursor<Bytes>),
    Borrowed(&'a mut (dyn ReadSeek + Send + Sync)),
}

impl Read for BodyReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Empty => Ok(0),
            Self::Buffered(cursor) => cursor.read(buf),
            Self::Borrowed(reader) => reader.read(buf),
        }
    }
}

impl Request {
    /// Makes the body re-sendable: seekable bodies are left in place, one-shot streams
    /// are buffered into memory once and the original reader is dropped.
    pub fn make_replayable(&mut self) -> Result<(), Error> {
        match self.body() {
            RequestBody::Empty | RequestBody::Buffered(_) | RequestBody::Seekable(_) => {
                return Ok(());
            }
            RequestBody::Consumed => {
                return Err(Error::body_replay(
                    "request body was already sent and is not replayable",
                ));
            }
            RequestBody::Stream(_) => {}
        }

        let body = self.body_mut();
        let RequestBody::Stream(mut reader) = std::mem::take(body) else {
            return Ok(());
        };
        let mut buffered = Vec::new();
        let read = reader.read_to_end(&mut buffered);
        drop(reader);
        match read {
            Ok(_) => {
                *body = RequestBody::Buffered(Bytes::from(buffered));
                Ok(())
            }
            Err(source) => {
                *body = RequestBody::Consumed;
                Err(Error::BodyReplay {
                    message: "buffering request body".to_owned(),
                    source: Some(source),
                })
            }
        }
    }

    /// Returns a reader positioned at the first byte of the original body.
    pub fn regenerate_body(&mut self) -> Result<BodyReader<'_>, Error> {
        match self.body_mut() {
            RequestBody::Empty => Ok(BodyReader::Empty),
            RequestBody::Buffered(body) => Ok(BodyReader::Buffered(Cursor::new(body.clone()))),
            RequestBody::Seekable(reader) => {
                reader
                    .seek(SeekFrom::Start(0))
                    .map_err(|source| Error::BodyReplay {
                        message: "seeking request body to start".to_owned(),
                        source: Some(source),
                    })?;
                Ok(BodyReader::Borrowed(reader.as_mut()))
            }
            RequestBody::Stream(_) | RequestBody::Consumed => Err(Error::body_replay(
                "request body is a one-shot stream and was not made replayable",
            )),
        }
    }

    pub(crate) fn rewind_body(&mut self) -> Result<(), Error> {
        if matches!(self.body(), RequestBody::Stream(_)) {
            return Ok(());
        }
        self.regenerate_body().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use http::Method;

    use crate::error::ErrorCode;
    use crate::request::{Request, RequestBody};

    fn request_with(body: RequestBody) -> Request {
        Request::new(
            Method::PUT,
            "https://10.0.0.6:25555/deployments/mysql".parse().expect("uri"),
        )
        .with_body(body)
    }

    fn regenerate_to_vec(request: &mut Request) -> Vec<u8> {
        let mut collected = Vec::new();
        request
            .regenerate_body()
            .expect("body should regenerate")
            .read_to_end(&mut collected)
            .expect("body should read");
        collected
    }

    #[test]
    fn stream_body_regenerates_identical_bytes_many_times() {
        let payload = b"---\nname: mysql\ninstance_groups: []\n".to_vec();
        let mut request = request_with(RequestBody::stream(Cursor::new(payload.clone())));

        request.make_replayable().expect("stream should buffer");
        assert!(request.body().is_replayable());
        for _ in 0..5 {
            assert_eq!(regenerate_to_vec(&mut request), payload);
        }
    }

    #[test]
    fn seekable_body_is_rewound_instead_of_buffered() {
        let payload = b"release tarball bytes".to_vec();
        let mut request = request_with(RequestBody::seekable(Cursor::new(payload.clone())));

        request.make_replayable().expect("seekable is already replayable");
        assert!(matches!(request.body(), RequestBody::Seekable(_)));

        let mut partial = [0_u8; 7];
        request
            .regenerate_body()
            .expect("regenerate")
            .read_exact(&mut partial)
            .expect("partial read");
        assert_eq!(&partial, b"release");

        assert_eq!(regenerate_to_vec(&mut request), payload);
        assert_eq!(regenerate_to_vec(&mut request), payload);
    }

    #[test]
    fn empty_body_regenerates_nothing() {
        let mut request = request_with(RequestBody::Empty);
        request.make_replayable().expect("empty is replayable");
        assert!(regenerate_to_vec(&mut request).is_empty());
    }

    #[test]
    fn consumed_body_cannot_be_replayed() {
        let mut request = request_with(RequestBody::Consumed);
        let error = request
            .make_replayable()
            .expect_err("consumed body must fail");
        assert_eq!(error.code(), ErrorCode::BodyReplay);
    }

    #[test]
    fn buffering_error_propagates_and_marks_body_consumed() {
        struct FailingReader;

        impl Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk went away"))
            }
        }

        let mut request = request_with(RequestBody::stream(FailingReader));
        let error = request.make_replayable().expect_err("read error");
        assert_eq!(error.code(), ErrorCode::BodyReplay);
        assert!(matches!(request.body(), RequestBody::Consumed));
    }
}
