/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/builders/pod_copy_builder.rs
*
* Builder for PodAccessRequest: launches a debug copy of the workload's pod.
*
* The workload's pod template is run through the mutator with the template's
* mutation plan, then created as a standalone pod named after the request.
* Once that pod exists the workload is no longer consulted. The grant is
* ready once that pod reports phase Running.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{namespace_of, AccessGrant, Builder, BuilderBase};
use crate::access_resources::{
    build_pod, build_role, build_role_binding, ensure_pod, ensure_role, ensure_role_binding,
    owner_reference, render_access_command,
};
use crate::crds::{access_resource_name, AccessRequest, AccessTemplate, PodAccessRequest, PodAccessTemplate};
use crate::error::{Error, Result};
use crate::mutator::{mutate_pod_template, ResourceBounds};
use crate::resolver::resolve;
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

pub struct PodAccessBuilder {
    base: BuilderBase<PodAccessRequest, PodAccessTemplate>,
}

impl PodAccessBuilder {
    pub fn new(base: BuilderBase<PodAccessRequest, PodAccessTemplate>) -> Self {
        Self { base }
    }
}

fn bounds_of(tmpl: &PodAccessTemplate) -> ResourceBounds {
    ResourceBounds {
        max_cpu: tmpl.spec.max_cpu.clone(),
        max_memory: tmpl.spec.max_memory.clone(),
        max_storage: tmpl.spec.max_storage.clone(),
    }
}

#[async_trait]
impl Builder for PodAccessBuilder {
    type Request = PodAccessRequest;
    type Template = PodAccessTemplate;

    fn kind(&self) -> &'static str {
        "pod"
    }

    fn base(&self) -> &BuilderBase<PodAccessRequest, PodAccessTemplate> {
        &self.base
    }

    #[instrument(skip(self, req, tmpl), fields(request = %req.name_any()))]
    async fn create_access_resources(
        &self,
        req: &mut PodAccessRequest,
        tmpl: &PodAccessTemplate,
    ) -> Result<AccessGrant> {
        let kube = self.base.kube.as_ref();
        let ns = namespace_of(req)?;
        let name = access_resource_name(req)?;
        let owner = owner_reference(req)?;

        let existing = req.pod_name().unwrap_or(&name).to_string();
        let pod = match kube.get_pod(&ns, &existing).await? {
            Some(pod) => {
                debug!(pod = %existing, "Access pod exists, workload not consulted");
                pod
            }
            None => {
                let workload = resolve(kube, &ns, tmpl.target_ref()).await?;
                let mutated = mutate_pod_template(
                    &workload.pod_template()?,
                    &tmpl.spec.mutation_config,
                    &workload.label_selector()?,
                    &bounds_of(tmpl),
                )?;
                ensure_pod(kube, build_pod(&name, &ns, mutated, owner.clone())?).await?
            }
        };
        let pod_name = pod.name_any();
        self.base.record_pod_name(req, &pod_name).await?;

        ensure_role(kube, build_role(&name, &ns, &pod_name, owner.clone())).await?;
        ensure_role_binding(
            kube,
            build_role_binding(&name, &ns, &tmpl.access_config().allowed_groups, owner),
        )
        .await?;
        info!(pod = %pod_name, "Pod copy access resources in place");

        let access_message =
            render_access_command(&tmpl.access_config().access_command, &ns, &pod_name)?;
        Ok(AccessGrant {
            pod_name,
            access_message,
        })
    }

    async fn access_resources_are_ready(
        &self,
        req: &PodAccessRequest,
        _tmpl: &PodAccessTemplate,
    ) -> Result<bool> {
        let ns = namespace_of(req)?;
        let name = match req.pod_name() {
            Some(name) => name.to_string(),
            None => access_resource_name(req)?,
        };
        let pod = self
            .base
            .kube
            .get_pod(&ns, &name)
            .await?
            .ok_or_else(|| Error::PodNotFound(name.clone()))?;
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("Unknown");
        debug!(pod = %name, phase, "Checked access pod phase");
        Ok(phase == "Running")
    }
}
