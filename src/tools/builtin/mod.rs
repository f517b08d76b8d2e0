// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Built-in tools for Parley
//!
//! Served under the `builtin` server name so they never collide with tools
//! from an external catalog.

mod current_time;
mod file_read;

use std::path::PathBuf;
use std::sync::Arc;

use crate::tools::StaticToolCatalog;

pub const BUILTIN_SERVER: &str = "builtin";

/// Add the built-in tools to a catalog
pub fn register_builtins(catalog: &mut StaticToolCatalog, working_directory: PathBuf) {
    catalog.register_fn(current_time::definition(), current_time::current_time);

    let root = Arc::new(working_directory);
    catalog.register_fn(file_read::definition(), move |args| {
        let root = Arc::clone(&root);
        async move { file_read::read_file(&root, args).await }
    });
}

/// Catalog holding only the built-ins
pub fn builtin_catalog(working_directory: PathBuf) -> StaticToolCatalog {
    let mut catalog = StaticToolCatalog::new();
    register_builtins(&mut catalog, working_directory);
    catalog
}
