/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/lib.rs
*
* Library root of the Oz operator. Oz grants developers time-bounded access to
* running workloads: an ExecAccessRequest yields a Role scoped to one existing
* pod, and a PodAccessRequest yields a mutated copy of the workload's pod plus
* the same kind of Role. Every grant is owned by its request and disappears
* with it once the access window has elapsed.
*
* The binary in `main.rs` wires these modules into four controllers, the
* admission webhook server and the metrics endpoint.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod access_resources;
pub mod builders;
pub mod config;
pub mod controllers;
pub mod crds;
pub mod duration;
pub mod error;
pub mod events;
pub mod kube_client;
pub mod metrics;
pub mod mutator;
pub mod pod_selector;
pub mod quantity;
pub mod resolver;
pub mod telemetry;
pub mod webhooks;

pub use error::{Error, Result};
