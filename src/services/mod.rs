// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - sync, caching, and auth logic.

pub mod api_client;
pub mod auth_machine;
pub mod breaker;
pub mod credentials;
pub mod demo;
pub mod facade;
pub mod pipeline;
pub mod queue;
pub mod repository;
pub mod sync_bus;

pub use api_client::ApiClient;
pub use auth_machine::{AuthEvent, AuthMachine, ForcedChoice, Subscription};
pub use breaker::{Breaker, ResponseVerdict};
pub use credentials::CredentialStore;
pub use facade::{Dashboard, FacadeBuilder, OAuthCompletion, SyncFacade, SyncReport};
pub use pipeline::{DashboardPipeline, PipelineStats};
pub use queue::{QueueStats, RequestQueue};
pub use repository::Repository;
pub use sync_bus::{BusMessage, CredentialSignal, OriginId, SyncBus};
