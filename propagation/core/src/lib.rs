// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Partitioned role change propagation.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Push pending role change events to the identities they
//!   affect, one event at a time, in phase-ordered requests

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
