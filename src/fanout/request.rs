//! Request builder
//!
//! Turns a job into a signed [`PreparedRequest`]. Called again for every
//! retry, so each attempt carries a fresh `Date` and signature and a payload
//! cursor rewound to the start.

use super::job::{Job, Origin};
use crate::s3::{content_md5, sign, StringToSign, UrlConstructor};
use crate::transport::{Payload, PreparedRequest};
use md5::{Digest, Md5};
use reqwest::Method;
use std::fs::File;
use std::io::{self, Read};
use std::time::Duration;

pub(crate) const CONTENT_TYPE: &str = "application/octet-stream";

/// Build the request for the job's next attempt.
///
/// Fails only when the payload cannot be read, before anything touches the
/// network.
pub(crate) fn prepare(
    job: &mut Job,
    urls: &UrlConstructor,
    timeout: Duration,
    date: &str,
) -> io::Result<PreparedRequest> {
    let destination = &job.destination;
    let url = urls(&destination.bucket, &destination.object_key);

    let mut headers: Vec<(&'static str, String)> = Vec::with_capacity(7);
    let body = if job.state.method == Method::PUT {
        let (payload, md5) = open_payload(&job.origin, job.state.content_md5.take())?;
        job.state.content_md5 = Some(md5);
        payload
    } else {
        Payload::Empty
    };

    let (content_md5, content_type) = match &body {
        Payload::Empty => ("", ""),
        _ => (job.state.content_md5.as_deref().unwrap_or(""), CONTENT_TYPE),
    };

    let authorization = sign(
        &destination.credentials,
        &StringToSign {
            method: job.state.method.as_str(),
            content_md5,
            content_type,
            date,
            bucket: &destination.bucket,
            object_key: &destination.object_key,
        },
    );

    headers.push(("Date", date.to_string()));
    headers.push(("Authorization", authorization));
    if job.state.method == Method::PUT {
        headers.push(("Content-MD5", content_md5.to_string()));
        headers.push(("Content-Type", content_type.to_string()));
        headers.push(("Content-Length", body.len().to_string()));
        if job.conditional {
            headers.push(("If-None-Match", "*".to_string()));
        }
    }

    Ok(PreparedRequest {
        method: job.state.method.clone(),
        url,
        headers,
        body,
        timeout,
    })
}

/// Rewind the payload and return it with its MD5, computing the digest only
/// when it is not cached yet.
fn open_payload(origin: &Origin, cached_md5: Option<String>) -> io::Result<(Payload, String)> {
    match origin {
        Origin::Memory(data) => {
            let md5 = cached_md5.unwrap_or_else(|| content_md5(data));
            Ok((Payload::Memory(data.clone()), md5))
        }
        Origin::Path(path) => {
            let md5 = match cached_md5 {
                Some(md5) => md5,
                None => file_md5(&mut File::open(path)?)?,
            };
            let file = File::open(path)?;
            let len = file.metadata()?.len();
            Ok((Payload::File { file, len }, md5))
        }
    }
}

fn file_md5(file: &mut File) -> io::Result<String> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(BASE64.encode(hasher.finalize()))
}
