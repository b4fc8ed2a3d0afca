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

//! Layering of defaults, a RON config file and command-line flags.

use std::fmt::Debug;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::config;
use crate::prelude::*;

pub trait Config: Debug + Default + Serialize + for<'de> Deserialize<'de> {
    fn config_file(&self) -> PathBuf;

    fn print_default_and_exit() -> ! {
        match config::to_ron(&Self::default()) {
            Ok(s) => {
                println!("{s}");
                std::process::exit(0);
            },
            Err(err) => {
                eprintln!("{err:?}");
                std::process::exit(1);
            },
        }
    }
}

/// Command-line flags that override individual config fields. Flags left
/// unset keep the value from the config file (or the default).
pub trait ConfigOverrides<Conf: Config> {
    fn print_default_config_and_exit(&self) -> bool;

    fn config_file(&self) -> Option<PathBuf>;

    fn apply_to(self, config: &mut Conf);
}

/// Resolves a config from parsed `args`. Fields absent from the config file
/// keep their defaults, so the file must be deserialized with
/// `#[serde(default)]`.
pub fn resolve_config<Conf, Args>(args: Args) -> Result<Conf>
where
    Conf: Config,
    Args: ConfigOverrides<Conf>,
{
    let config_file = args
        .config_file()
        .unwrap_or_else(|| Conf::default().config_file());

    let mut config = config::maybe_read_ron_file::<Conf>(&config_file)
        .location(loc!())?
        .unwrap_or_default();
    args.apply_to(&mut config);
    Ok(config)
}

pub fn init_config<Conf, Args>() -> Result<Conf>
where
    Conf: Config,
    Args: ConfigOverrides<Conf> + clap::Parser,
{
    let args = Args::parse();
    if args.print_default_config_and_exit() {
        Conf::print_default_and_exit();
    }
    resolve_config(args)
}
