// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Middleware modules (status headers).

pub mod health;

pub use health::add_health_headers;
