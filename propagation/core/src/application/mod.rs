// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod task_monitor;
pub mod plan_assembly;
pub mod partition_builder;
pub mod propagation_service;
pub mod request_builder;
pub mod request_executor;
pub mod runner;

// Re-export the run entry points for convenience
pub use propagation_service::{PropagationDependencies, PropagationError, RolePropagationService};
pub use request_executor::{ExecutorError, RequestExecutor};
pub use runner::{PropagationRunner, RunHandle};
