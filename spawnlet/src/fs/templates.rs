//! Tera templates compiled into the binary.

use serde::Serialize;
use spawnlet_shared::{SpawnletError, SpawnletResult};
use tera::{Context, Tera};

pub const BOOTSTRAP_TEMPLATE: &str = "bootstrap.sh.j2";
pub const KUBEADM_TEMPLATE: &str = "kubeadm.yml.j2";

static ALL_TEMPLATES: &[(&str, &str)] = &[
    (BOOTSTRAP_TEMPLATE, include_str!("templates/bootstrap.sh.j2")),
    (KUBEADM_TEMPLATE, include_str!("templates/kubeadm.yml.j2")),
];

/// Values available to every template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateVars {
    pub cluster_name: String,
    pub kubernetes_version: String,
    pub hyperkube_image: String,
    pub runtime: String,
    pub cri_socket: String,
    pub pod_subnet: String,
}

pub struct TemplateRenderer {
    tera: Tera,
}

impl TemplateRenderer {
    pub fn from_embedded() -> SpawnletResult<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(ALL_TEMPLATES.iter().copied())
            .map_err(|e| SpawnletError::Template(format!("failed to load templates: {}", e)))?;
        tracing::debug!(count = ALL_TEMPLATES.len(), "Loaded embedded templates");
        Ok(Self { tera })
    }

    pub fn render(&self, template: &str, vars: &TemplateVars) -> SpawnletResult<String> {
        let context = Context::from_serialize(vars)
            .map_err(|e| SpawnletError::Template(format!("bad context for {}: {}", template, e)))?;
        self.tera
            .render(template, &context)
            .map_err(|e| SpawnletError::Template(format!("failed to render {}: {}", template, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(runtime: &str) -> TemplateVars {
        TemplateVars {
            cluster_name: "demo".into(),
            kubernetes_version: "v1.9.6".into(),
            hyperkube_image: String::new(),
            runtime: runtime.into(),
            cri_socket: String::new(),
            pod_subnet: "10.32.0.0/12".into(),
        }
    }

    #[test]
    fn test_bootstrap_per_runtime() {
        let r = TemplateRenderer::from_embedded().unwrap();

        let docker = r.render(BOOTSTRAP_TEMPLATE, &vars("docker")).unwrap();
        assert!(docker.starts_with("#!/bin/bash"));
        assert!(docker.contains("systemctl enable --now docker.service"));
        assert!(!docker.contains("crio"));

        let crio = r.render(BOOTSTRAP_TEMPLATE, &vars("cri-o")).unwrap();
        assert!(crio.contains("/usr/bin/crio --config /etc/crio/crio.conf"));
        assert!(crio.contains("systemctl enable --now kubelet.service"));
    }

    #[test]
    fn test_kubeadm_config() {
        let r = TemplateRenderer::from_embedded().unwrap();
        let out = r.render(KUBEADM_TEMPLATE, &vars("docker")).unwrap();
        assert!(out.contains("kubernetesVersion: v1.9.6"));
        assert!(!out.contains("unifiedControlPlaneImage"));
        assert!(!out.contains("criSocket"));

        let mut dev = vars("cri-o");
        dev.kubernetes_version.clear();
        dev.hyperkube_image = "quay.io/me/hyperkube:dev".into();
        dev.cri_socket = "/var/run/crio/crio.sock".into();
        let out = r.render(KUBEADM_TEMPLATE, &dev).unwrap();
        assert!(!out.contains("kubernetesVersion"));
        assert!(out.contains("unifiedControlPlaneImage: quay.io/me/hyperkube:dev"));
        assert!(out.contains("criSocket: /var/run/crio/crio.sock"));
    }

    #[test]
    fn test_unknown_template() {
        let r = TemplateRenderer::from_embedded().unwrap();
        assert!(matches!(
            r.render("missing.j2", &vars("docker")),
            Err(SpawnletError::Template(_))
        ));
    }
}
