// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Aggregates, value objects and collaborator contracts of role propagation.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Roles, identities, events, requests and task results

pub mod codec;
pub mod event;
pub mod events;
pub mod identity;
pub mod partition;
pub mod plan;
pub mod propagation_config;
pub mod provisioning;
pub mod repository;
pub mod request;
pub mod task_result;
