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

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colorbars::config;
use colorbars::control_server;
use colorbars::plugin::MethodCall;
use colorbars::prelude::*;
use colorbars::utils;
use serde_json::Value;
use tracing::Level;

#[derive(Debug, Parser)]
#[command(about = "Sends one method call to colorbarsd and prints the response", long_about = None)]
struct ColorbarsctlArgs {
    /// Unix socket colorbarsd listens on.
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Method to call, e.g. initialize, test or dispose.
    method: String,
    /// Method arguments as JSON.
    arguments: Option<String>,
}

fn run(args: ColorbarsctlArgs) -> Result<bool> {
    let arguments = match &args.arguments {
        Some(json) => serde_json::from_str(json)
            .with_context(loc!(), || format!("invalid arguments {json:?}"))?,
        None => Value::Null,
    };
    let call = MethodCall {
        method: args.method,
        arguments,
    };
    let socket = args.socket.unwrap_or_else(config::default_socket_path);

    let response = control_server::call(&socket, &call).location(loc!())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&response).location(loc!())?
    );
    Ok(response.is_success())
}

pub fn main() -> Result<ExitCode> {
    utils::configure_tracing(Level::WARN, None::<PathBuf>, Level::WARN).location(loc!())?;
    let success = run(ColorbarsctlArgs::parse()).location(loc!())?;
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
