/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/builders/exec_builder.rs
*
* Builder for ExecAccessRequest: grants `kubectl exec` into one running pod of
* the template's workload. The pod is chosen (or validated) by the pod
* selector and written to `status.podName` before the Role is created, so the
* Role is always pinned to the recorded pod.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{namespace_of, AccessGrant, Builder, BuilderBase};
use crate::access_resources::{
    build_role, build_role_binding, ensure_role, ensure_role_binding, owner_reference,
    render_access_command,
};
use crate::crds::{access_resource_name, AccessRequest, AccessTemplate, ExecAccessRequest, ExecAccessTemplate};
use crate::error::Result;
use crate::pod_selector::select_pod;
use crate::resolver::resolve;
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{info, instrument};

pub struct ExecAccessBuilder {
    base: BuilderBase<ExecAccessRequest, ExecAccessTemplate>,
}

impl ExecAccessBuilder {
    pub fn new(base: BuilderBase<ExecAccessRequest, ExecAccessTemplate>) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Builder for ExecAccessBuilder {
    type Request = ExecAccessRequest;
    type Template = ExecAccessTemplate;

    fn kind(&self) -> &'static str {
        "exec"
    }

    fn base(&self) -> &BuilderBase<ExecAccessRequest, ExecAccessTemplate> {
        &self.base
    }

    #[instrument(skip(self, req, tmpl), fields(request = %req.name_any()))]
    async fn create_access_resources(
        &self,
        req: &mut ExecAccessRequest,
        tmpl: &ExecAccessTemplate,
    ) -> Result<AccessGrant> {
        let kube = self.base.kube.as_ref();
        let ns = namespace_of(req)?;

        let workload = resolve(kube, &ns, tmpl.target_ref()).await?;
        let selector = workload.label_selector()?;
        let pod = select_pod(
            kube,
            &ns,
            &selector,
            req.pod_name(),
            req.spec.target_pod.as_deref(),
        )
        .await?;
        let pod_name = pod.name_any();
        self.base.record_pod_name(req, &pod_name).await?;

        let name = access_resource_name(req)?;
        let owner = owner_reference(req)?;
        ensure_role(kube, build_role(&name, &ns, &pod_name, owner.clone())).await?;
        ensure_role_binding(
            kube,
            build_role_binding(&name, &ns, &tmpl.access_config().allowed_groups, owner),
        )
        .await?;
        info!(pod = %pod_name, role = %name, "Exec access resources in place");

        let access_message =
            render_access_command(&tmpl.access_config().access_command, &ns, &pod_name)?;
        Ok(AccessGrant {
            pod_name,
            access_message,
        })
    }

    async fn access_resources_are_ready(
        &self,
        _req: &ExecAccessRequest,
        _tmpl: &ExecAccessTemplate,
    ) -> Result<bool> {
        Ok(true)
    }
}
