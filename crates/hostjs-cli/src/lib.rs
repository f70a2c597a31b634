// Copyright 2025 HostJS Authors
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

//! # HostJS CLI
//!
//! Helpers behind the `hostjs` binary: turning command-line options and
//! environment overrides into a [`RunnerConfig`] and execution context.
//!
//! Precedence is always flag, then environment, then default.

use anyhow::{anyhow, Context, Result};
use hostjs_common::{ModuleType, RunnerConfig, TypeScriptConfig};
use hostjs_runtime::ExecutionContextMap;
use serde_json::Value as JsonValue;
use std::path::PathBuf;

/// Environment variable overriding the caches directory.
pub const CACHE_DIR_ENV: &str = "HOSTJS_CACHE_DIR";

/// Environment variable overriding the TypeScript compiler executable.
pub const TSC_ENV: &str = "HOSTJS_TSC";

/// Caches directory used when neither flag nor environment names one.
pub const DEFAULT_CACHE_DIR: &str = ".hostjs-cache";

/// Options shared by the commands that run or check scripts.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub working_dir: Option<PathBuf>,
    pub caches_dir: Option<PathBuf>,
    pub module_type: Option<ModuleType>,
    pub compiler: Option<String>,
}

/// Parses one `--context key=value` entry.
///
/// The value is taken as JSON when it parses as JSON and as a plain string
/// otherwise, so `--context retries=3` yields a number and `--context
/// tenant=acme` a string.
pub fn parse_context_entry(entry: &str) -> Result<(String, JsonValue)> {
    let (key, value) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid context entry '{}': expected key=value", entry))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("Invalid context entry '{}': empty key", entry));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| JsonValue::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Builds the execution-context map from `--context` entries; later keys win.
pub fn parse_context(entries: &[String]) -> Result<ExecutionContextMap> {
    let mut context = ExecutionContextMap::new();
    for entry in entries {
        let (key, value) = parse_context_entry(entry)?;
        context.insert(key, value);
    }
    Ok(context)
}

/// Builds the runner configuration from options and the environment lookup `env`.
pub fn runner_config(
    options: &RunOptions,
    env: impl Fn(&str) -> Option<String>,
) -> Result<RunnerConfig> {
    let working_dir = match &options.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Cannot determine the current directory")?,
    };
    let caches_dir = options
        .caches_dir
        .clone()
        .or_else(|| env(CACHE_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| working_dir.join(DEFAULT_CACHE_DIR));

    let mut typescript = TypeScriptConfig::new();
    if let Some(compiler) = options.compiler.clone().or_else(|| env(TSC_ENV)) {
        typescript = typescript.with_compiler(compiler);
    }

    let config = RunnerConfig::new(working_dir, caches_dir)
        .with_module_type(options.module_type.unwrap_or_default())
        .with_typescript(typescript);
    config.validate().map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}
