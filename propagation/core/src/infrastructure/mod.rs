// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod compression;
pub mod repositories;
pub mod request_queue;
pub mod event_bus;
pub mod provisioning;
pub mod fixture;

pub use event_bus::{EventBus, EventBusError, EventReceiver};
pub use fixture::{Fixture, FixtureError};
