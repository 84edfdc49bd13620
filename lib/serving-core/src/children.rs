//! Builders for the child resources the reconcilers own
//!
//! Every child carries a single controller owner reference back to the
//! desired-state object that produced it, so deleting the parent lets the
//! garbage collector remove the children.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Label used to select the pods of a workload
pub const APP_LABEL: &str = "app";

pub fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), app.to_string())])
}

fn child_meta(name: &str, namespace: &str, owner: &OwnerReference, app: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(app_labels(app)),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

fn env_vars(env: &[(&str, String)]) -> Option<Vec<EnvVar>> {
    if env.is_empty() {
        return None;
    }
    Some(
        env.iter()
            .map(|(name, value)| EnvVar {
                name: name.to_string(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect(),
    )
}

/// A replicated workload with one container
pub struct Workload<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub owner: &'a OwnerReference,
    pub replicas: i32,
    pub container: &'a str,
    pub image: &'a str,
    pub port_name: &'a str,
    pub port: i32,
    pub env: Vec<(&'a str, String)>,
}

impl Workload<'_> {
    /// Pods are labelled `app=<name>`, which is also the Deployment selector
    pub fn build(&self) -> Deployment {
        let labels = app_labels(self.name);
        Deployment {
            metadata: child_meta(self.name, self.namespace, self.owner, self.name),
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: self.container.to_string(),
                            image: Some(self.image.to_string()),
                            ports: Some(vec![ContainerPort {
                                name: Some(self.port_name.to_string()),
                                container_port: self.port,
                                ..Default::default()
                            }]),
                            env: env_vars(&self.env),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// A Service selecting the pods of one workload
pub struct Endpoint<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub owner: &'a OwnerReference,
    /// Name of the workload whose pods back this endpoint
    pub app: &'a str,
    pub port_name: &'a str,
    pub port: i32,
    pub target_port: i32,
    /// No cluster IP; DNS resolves to the individual pod addresses
    pub headless: bool,
}

impl Endpoint<'_> {
    pub fn build(&self) -> Service {
        Service {
            metadata: child_meta(self.name, self.namespace, self.owner, self.app),
            spec: Some(ServiceSpec {
                cluster_ip: self.headless.then(|| "None".to_string()),
                selector: Some(app_labels(self.app)),
                ports: Some(vec![ServicePort {
                    name: Some(self.port_name.to_string()),
                    port: self.port,
                    target_port: Some(IntOrString::Int(self.target_port)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// A run-to-completion task that is never restarted in place
pub struct BatchTask<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub owner: &'a OwnerReference,
    pub container: &'a str,
    pub image: &'a str,
    pub command: Vec<String>,
    pub env: Vec<(&'a str, String)>,
}

impl BatchTask<'_> {
    pub fn build(&self) -> Job {
        Job {
            metadata: child_meta(self.name, self.namespace, self.owner, self.name),
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(app_labels(self.name)),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        containers: vec![Container {
                            name: self.container.to_string(),
                            image: Some(self.image.to_string()),
                            command: Some(self.command.clone()),
                            env: env_vars(&self.env),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Value of an environment variable on the first container of a pod template
pub fn container_env<'a>(template: &'a PodTemplateSpec, name: &str) -> Option<&'a str> {
    template
        .spec
        .as_ref()?
        .containers
        .first()?
        .env
        .as_ref()?
        .iter()
        .find(|var| var.name == name)?
        .value
        .as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "llm.example.com/v1alpha1".to_string(),
            kind: "InferenceService".to_string(),
            name: "svc".to_string(),
            uid: "1234".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    #[test]
    fn test_workload_selector_matches_pod_labels() {
        let owner = owner();
        let deployment = Workload {
            name: "svc-router",
            namespace: "ns",
            owner: &owner,
            replicas: 3,
            container: "router",
            image: "router:latest",
            port_name: "http",
            port: 5678,
            env: vec![("MODEL_REF", "m1".to_string())],
        }
        .build();

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.selector.match_labels, spec.template.metadata.clone().unwrap().labels);
        assert_eq!(container_env(&spec.template, "MODEL_REF"), Some("m1"));
        assert_eq!(deployment.metadata.owner_references.unwrap()[0].uid, "1234");
    }

    #[test]
    fn test_headless_endpoint() {
        let owner = owner();
        let endpoint = Endpoint {
            name: "pool-cache",
            namespace: "ns",
            owner: &owner,
            app: "pool-cache",
            port_name: "redis",
            port: 6379,
            target_port: 6379,
            headless: true,
        };
        let service = endpoint.build();
        assert_eq!(service.spec.as_ref().unwrap().cluster_ip.as_deref(), Some("None"));

        let routed = Endpoint {
            headless: false,
            ..endpoint
        }
        .build();
        assert_eq!(routed.spec.unwrap().cluster_ip, None);
    }

    #[test]
    fn test_batch_task_never_restarts() {
        let owner = owner();
        let job = BatchTask {
            name: "job-runner",
            namespace: "ns",
            owner: &owner,
            container: "runner",
            image: "busybox",
            command: vec!["true".to_string()],
            env: Vec::new(),
        }
        .build();
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.containers[0].env, None);
    }
}
