/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers.rs
*
* The reconcilers. `request_controller` drives ExecAccessRequest and
* PodAccessRequest through one generic stage pipeline parameterized by a
* `Builder`; `template_controller` validates ExecAccessTemplate and
* PodAccessTemplate.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod request_controller;
pub mod template_controller;

use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};

/// Api scoped to `namespace`, or cluster-wide when unset.
pub(crate) fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}
