// Copyright 2025 The luix Authors
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

//! # luix CLI
//!
//! Command-line interface for the luix RPC runtime.
//!
//! ## Key Commands
//!
//! - `luix serve`: Start a server carrying the built-in service, optionally
//!   registered with one or more registries
//! - `luix call`: Make a generic call to a provider (outputs raw JSON for scripting)
//! - `luix info`: Print the host information of a running server
//!
//! The binary parses arguments with `argh` and dispatches to [`commands`].

pub mod commands;
