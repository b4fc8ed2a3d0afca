// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The method channel transport. A client writes one newline-terminated
//! method call per line (a JSON `MethodCall` or a bare method name) and reads
//! back one newline-terminated JSON `MethodResponse` per call.

use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;

use crate::plugin::MethodCall;
use crate::plugin::MethodResponse;
use crate::prelude::*;
use crate::utils;

fn dispatch<F: Fn(MethodCall) -> MethodResponse>(line: &str, handler: &F) -> MethodResponse {
    match line.parse::<MethodCall>() {
        Ok(call) => handler(call),
        Err(err) => MethodResponse::error("bad_request", format!("{err:#}"), line.into()),
    }
}

fn channel_handler<F: Fn(MethodCall) -> MethodResponse>(
    stream: UnixStream,
    handler: F,
) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone().location(loc!())?);
    let mut writer = BufWriter::new(stream);
    let mut input = String::new();
    loop {
        match reader.read_line(&mut input) {
            Ok(0) => {
                debug!("Got EOF on method channel.");
                return Ok(());
            },
            Ok(n) => {
                debug!("Read {} bytes from method channel: {:?}", n, input);
                let resp = dispatch(input.trim_end_matches('\n'), &handler);
                let mut line = serde_json::to_string(&resp).location(loc!())?;
                line.push('\n');
                writer.write_all(line.as_bytes()).location(loc!())?;
                writer.flush().location(loc!())?;
            },
            Err(err) => bail!("Error reading from method channel: {}", err),
        };
        input.clear();
    }
}

/// Serves method calls on `sock_path` from a background thread, one thread
/// per connection.
pub fn start<P, F>(sock_path: P, handler: F) -> Result<()>
where
    P: AsRef<Path>,
    F: Fn(MethodCall) -> MethodResponse + Send + Clone + 'static,
{
    let listener = utils::bind_user_socket(&sock_path).location(loc!())?;
    info!("method channel listening on {:?}", sock_path.as_ref());

    thread::Builder::new()
        .name("method-channel".to_string())
        .spawn(move || {
            loop {
                let accept_result = listener.accept();
                let (stream, _) = log_and_continue!(accept_result);
                let handler = handler.clone();
                thread::spawn(move || {
                    channel_handler(stream, handler).log_and_ignore(loc!());
                });
            }
        })
        .location(loc!())?;
    Ok(())
}

/// Sends a single method call and waits for its response.
pub fn call<P: AsRef<Path>>(sock_path: P, call: &MethodCall) -> Result<MethodResponse> {
    let sock_path = sock_path.as_ref();
    let stream = UnixStream::connect(sock_path)
        .with_context(loc!(), || format!("connecting to {sock_path:?}"))?;
    let mut writer = BufWriter::new(stream.try_clone().location(loc!())?);
    let mut reader = BufReader::new(stream);

    let mut line = serde_json::to_string(call).location(loc!())?;
    line.push('\n');
    writer.write_all(line.as_bytes()).location(loc!())?;
    writer.flush().location(loc!())?;

    let mut response = String::new();
    if reader.read_line(&mut response).location(loc!())? == 0 {
        bail!("method channel closed before responding");
    }
    serde_json::from_str(&response).location(loc!())
}
