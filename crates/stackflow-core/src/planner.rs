//! Plan building
//!
//! Turns a parsed `StackDefinition` and concrete variable values into an
//! ordered `DeploymentPlan`. Stack-owned resources are prefixed with the stack
//! name; external networks and volumes keep their literal names.

use crate::error::{Result, StackError};
use crate::model::{
    DeploymentPlan, Mount, MountSource, NetworkSpec, PlanStep, Port, ResolvedService,
    ResourceSpec, RestartPolicy, ServiceSpec, StackDefinition, VolumeSpec,
};
use crate::parser::DEFAULT_NETWORK;
use crate::template::{VariableResolver, Variables};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Label carrying the owning stack name
pub const STACK_LABEL: &str = "stackflow.stack";
/// Label carrying the service name within the stack
pub const SERVICE_LABEL: &str = "stackflow.service";

pub struct PlanBuilder {
    resolver: VariableResolver,
}

impl PlanBuilder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            resolver: VariableResolver::new()?,
        })
    }

    /// Build the plan for `stack` deployed as `stack_name`.
    ///
    /// `variables` are merged over the declared defaults; each supplied value
    /// is checked against its definition before any substitution happens.
    #[instrument(skip(self, stack, variables), fields(stack = %stack_name))]
    pub fn build(
        &self,
        stack: &StackDefinition,
        variables: &Variables,
        stack_name: &str,
    ) -> Result<DeploymentPlan> {
        if stack_name.trim().is_empty() {
            return Err(StackError::malformed("stack name must not be empty"));
        }

        let values = effective_values(stack, variables)?;
        let ctx = NameContext { stack, stack_name };

        let mut services = Vec::with_capacity(stack.services.len());
        for service in order_services(&stack.services)? {
            services.push(self.resolve_service(service, &values, &ctx)?);
        }

        let mut steps = Vec::new();

        // Networks
        let default_network = ctx.owned(DEFAULT_NETWORK);
        steps.push(PlanStep {
            name: default_network.clone(),
            spec: ResourceSpec::Network(NetworkSpec {
                name: default_network,
                driver: None,
                external: false,
            }),
        });
        for network in &stack.networks {
            let name = ctx.network(&network.name);
            steps.push(PlanStep {
                name: name.clone(),
                spec: ResourceSpec::Network(NetworkSpec {
                    name,
                    driver: self.resolve_opt(network.driver.as_deref(), &values)?,
                    external: network.external,
                }),
            });
        }

        // Volumes: declared, then referenced only by mounts
        for volume in &stack.volumes {
            let name = ctx.volume(&volume.name);
            steps.push(PlanStep {
                name: name.clone(),
                spec: ResourceSpec::Volume(VolumeSpec {
                    name,
                    driver: self.resolve_opt(volume.driver.as_deref(), &values)?,
                    external: volume.external,
                }),
            });
        }
        for service in &services {
            for mount in &service.mounts {
                if let MountSource::Volume(name) = &mount.source
                    && !steps.iter().any(|s| s.name == *name)
                {
                    debug!(volume = %name, service = %service.service, "Adding implicit volume");
                    steps.push(PlanStep {
                        name: name.clone(),
                        spec: ResourceSpec::Volume(VolumeSpec {
                            name: name.clone(),
                            driver: None,
                            external: false,
                        }),
                    });
                }
            }
        }

        // Services in dependency order
        for service in services {
            steps.push(PlanStep {
                name: ctx.container(&service.service),
                spec: ResourceSpec::Service(service),
            });
        }

        let plan = DeploymentPlan {
            stack_name: stack_name.to_string(),
            steps,
        };
        info!(summary = %plan.summary(), "Built deployment plan");
        Ok(plan)
    }

    fn resolve_service(
        &self,
        service: &ServiceSpec,
        values: &Variables,
        ctx: &NameContext<'_>,
    ) -> Result<ResolvedService> {
        let resolve = |text: &str| self.resolver.resolve(text, values);
        let invalid = |what: String| {
            StackError::malformed(format!("service `{}`: {what}", service.name))
        };

        let image = resolve(&service.image)?;
        if image.trim().is_empty() {
            return Err(invalid("image resolved to an empty string".to_string()));
        }

        let ports = service
            .ports
            .iter()
            .map(|p| Port::parse(&resolve(p)?).map_err(invalid))
            .collect::<Result<Vec<_>>>()?;

        let environment = service
            .environment
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve(v)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let mounts = service
            .volumes
            .iter()
            .map(|m| {
                let mut mount = Mount::parse(&resolve(m)?).map_err(invalid)?;
                if let MountSource::Volume(name) = &mount.source {
                    mount.source = MountSource::Volume(ctx.volume(name));
                }
                Ok(mount)
            })
            .collect::<Result<Vec<_>>>()?;

        let networks = if service.networks.is_empty() {
            vec![ctx.owned(DEFAULT_NETWORK)]
        } else {
            service
                .networks
                .iter()
                .map(|n| Ok(ctx.network(&resolve(n)?)))
                .collect::<Result<Vec<_>>>()?
        };

        let command = service
            .command
            .as_ref()
            .map(|args| args.iter().map(|a| resolve(a)).collect::<Result<Vec<_>>>())
            .transpose()?;

        let restart = match &service.restart {
            None => RestartPolicy::default(),
            Some(text) => {
                let text = resolve(text)?;
                RestartPolicy::parse(&text)
                    .ok_or_else(|| invalid(format!("unknown restart policy `{text}`")))?
            }
        };

        let mut labels = service
            .labels
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve(v)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        labels.insert(STACK_LABEL.to_string(), ctx.stack_name.to_string());
        labels.insert(SERVICE_LABEL.to_string(), service.name.clone());

        Ok(ResolvedService {
            service: service.name.clone(),
            image,
            ports,
            environment,
            mounts,
            networks,
            depends_on: service.depends_on.clone(),
            command,
            restart,
            labels,
        })
    }

    fn resolve_opt(&self, text: Option<&str>, values: &Variables) -> Result<Option<String>> {
        text.map(|t| self.resolver.resolve(t, values)).transpose()
    }
}

/// Maps manifest names to runtime names
struct NameContext<'a> {
    stack: &'a StackDefinition,
    stack_name: &'a str,
}

impl NameContext<'_> {
    fn owned(&self, name: &str) -> String {
        format!("{}_{}", self.stack_name, name)
    }

    fn container(&self, service: &str) -> String {
        format!("{}-{}", self.stack_name, service)
    }

    fn network(&self, name: &str) -> String {
        match self.stack.networks.iter().find(|n| n.name == name) {
            Some(n) if n.external => n.name.clone(),
            _ => self.owned(name),
        }
    }

    fn volume(&self, name: &str) -> String {
        match self.stack.volumes.iter().find(|v| v.name == name) {
            Some(v) if v.external => v.name.clone(),
            _ => self.owned(name),
        }
    }
}

/// Declared defaults overlaid with supplied values, after validation
fn effective_values(stack: &StackDefinition, supplied: &Variables) -> Result<Variables> {
    let mut values = supplied.clone();

    for definition in &stack.variables {
        match supplied.get(&definition.name) {
            Some(value) => definition.validate(value)?,
            None => match &definition.default {
                Some(default) => {
                    values.insert(definition.name.clone(), default.clone());
                }
                None if definition.required => {
                    return Err(StackError::UnresolvedVariable {
                        name: definition.name.clone(),
                    });
                }
                None => {}
            },
        }
    }

    Ok(values)
}

/// Stable topological order: among ready services the earliest declared wins
fn order_services(services: &[ServiceSpec]) -> Result<Vec<&ServiceSpec>> {
    let mut placed: Vec<&ServiceSpec> = Vec::with_capacity(services.len());
    let mut remaining: Vec<&ServiceSpec> = services.iter().collect();

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|s| {
            s.depends_on
                .iter()
                .all(|dep| placed.iter().any(|p| p.name == *dep))
        });

        match ready {
            Some(index) => placed.push(remaining.remove(index)),
            None => {
                return Err(StackError::DependencyCycle {
                    cycle: find_cycle(&remaining),
                });
            }
        }
    }

    Ok(placed)
}

/// Walk dependency edges among unplaced services until a name repeats
fn find_cycle(remaining: &[&ServiceSpec]) -> Vec<String> {
    let Some(start) = remaining.first() else {
        return Vec::new();
    };

    let mut path: Vec<&str> = vec![start.name.as_str()];
    let mut current = *start;

    loop {
        let next = current
            .depends_on
            .iter()
            .find_map(|dep| remaining.iter().find(|s| s.name == *dep).copied());

        let Some(next) = next else {
            return path.iter().map(|s| s.to_string()).collect();
        };

        if let Some(pos) = path.iter().position(|name| *name == next.name) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.name.clone());
            return cycle;
        }

        path.push(next.name.as_str());
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Protocol, ResourceKind};
    use crate::parser::ManifestParser;

    fn parse(yaml: &str) -> StackDefinition {
        ManifestParser::new().unwrap().parse(yaml).unwrap()
    }

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn build(yaml: &str, values: &Variables) -> Result<DeploymentPlan> {
        PlanBuilder::new().unwrap().build(&parse(yaml), values, "shop")
    }

    fn service<'a>(plan: &'a DeploymentPlan, name: &str) -> &'a ResolvedService {
        plan.steps
            .iter()
            .find_map(|s| match &s.spec {
                ResourceSpec::Service(svc) if svc.service == name => Some(svc),
                _ => None,
            })
            .unwrap()
    }

    const WORDPRESS: &str = r#"
services:
  web:
    image: wordpress:latest
    depends_on: [db]
    ports: ["${WP_PORT:-8080}:80"]
  db:
    image: mysql:${MYSQL_VERSION:-8.0}
    environment:
      MYSQL_ROOT_PASSWORD: ${DB_PASSWORD}
    volumes: [db_data:/var/lib/mysql]
volumes:
  db_data: {}
x-variables:
  DB_PASSWORD: { type: password, min_length: 8 }
"#;

    #[test]
    fn test_defaults_are_applied() {
        let plan = build(WORDPRESS, &vars(&[("DB_PASSWORD", "s3cretpass")])).unwrap();

        let web = service(&plan, "web");
        assert_eq!(web.ports[0].host, Some(8080));
        assert_eq!(web.ports[0].container, 80);
        assert_eq!(web.ports[0].protocol, Protocol::Tcp);

        let db = service(&plan, "db");
        assert_eq!(db.image, "mysql:8.0");
        assert_eq!(db.environment["MYSQL_ROOT_PASSWORD"], "s3cretpass");
    }

    #[test]
    fn test_missing_required_variable() {
        let err = build(WORDPRESS, &Variables::new()).unwrap_err();
        assert!(matches!(err, StackError::UnresolvedVariable { name } if name == "DB_PASSWORD"));
    }

    #[test]
    fn test_unresolved_placeholder_without_definition_default() {
        let yaml = "services:\n  web:\n    image: nginx\n    ports: [\"${PORT}:80\"]\n";
        let err = build(yaml, &Variables::new()).unwrap_err();
        assert!(matches!(err, StackError::UnresolvedVariable { name } if name == "PORT"));
    }

    #[test]
    fn test_invalid_supplied_value() {
        let err = build(WORDPRESS, &vars(&[("DB_PASSWORD", "short")])).unwrap_err();
        assert!(matches!(err, StackError::InvalidVariable { name, .. } if name == "DB_PASSWORD"));
    }

    #[test]
    fn test_supplied_value_overrides_inline_default() {
        let plan = build(
            WORDPRESS,
            &vars(&[("DB_PASSWORD", "s3cretpass"), ("WP_PORT", "9090")]),
        )
        .unwrap();
        assert_eq!(service(&plan, "web").ports[0].host, Some(9090));
    }

    #[test]
    fn test_declared_default_fills_bare_placeholder() {
        let yaml = r#"
services:
  app:
    image: app:${TAG}
x-variables:
  TAG: { default: "2.1" }
"#;
        let plan = build(yaml, &Variables::new()).unwrap();
        assert_eq!(service(&plan, "app").image, "app:2.1");
    }

    #[test]
    fn test_step_order_networks_volumes_services() {
        let plan = build(WORDPRESS, &vars(&[("DB_PASSWORD", "s3cretpass")])).unwrap();
        let names: Vec<&str> = plan.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["shop_default", "shop_db_data", "shop-db", "shop-web"]
        );
        assert_eq!(plan.steps[0].kind(), ResourceKind::Network);
        assert_eq!(plan.steps[1].kind(), ResourceKind::Volume);

        let db = service(&plan, "db");
        assert_eq!(db.mounts[0].volume_name(), Some("shop_db_data"));
        assert_eq!(db.networks, vec!["shop_default"]);
        assert_eq!(db.labels[STACK_LABEL], "shop");
        assert_eq!(db.labels[SERVICE_LABEL], "db");
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        let yaml = r#"
services:
  frontend:
    image: fe
    depends_on: [api]
  api:
    image: api
    depends_on: [db, cache]
  worker:
    image: worker
  cache:
    image: redis
  db:
    image: postgres
"#;
        let plan = build(yaml, &Variables::new()).unwrap();
        let stack = parse(yaml);
        for svc in &stack.services {
            let index = plan.service_position(&svc.name).unwrap();
            for dep in &svc.depends_on {
                assert!(plan.service_position(dep).unwrap() < index);
            }
        }

        // Ready services keep declaration order
        let order: Vec<&str> = plan
            .steps
            .iter()
            .filter_map(|s| match &s.spec {
                ResourceSpec::Service(svc) => Some(svc.service.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["worker", "cache", "db", "api", "frontend"]);
    }

    #[test]
    fn test_dependency_cycle() {
        let yaml = r#"
services:
  a:
    image: a
    depends_on: [b]
  b:
    image: b
    depends_on: [a]
"#;
        let err = build(yaml, &Variables::new()).unwrap_err();
        match err {
            StackError::DependencyCycle { cycle } => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let yaml = "services:\n  a:\n    image: a\n    depends_on: [a]\n";
        let err = build(yaml, &Variables::new()).unwrap_err();
        assert!(err.to_string().contains("a -> a"));
    }

    #[test]
    fn test_external_and_implicit_resources() {
        let yaml = r#"
services:
  api:
    image: api
    networks: [shared, backend]
    volumes:
      - cache:/cache
      - uploads:/uploads
      - ./conf:/etc/api:ro
networks:
  shared: { external: true }
  backend: {}
volumes:
  uploads: { external: true }
"#;
        let plan = build(yaml, &Variables::new()).unwrap();
        let names: Vec<&str> = plan.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "shop_default",
                "shared",
                "shop_backend",
                "uploads",
                "shop_cache",
                "shop-api"
            ]
        );

        let api = service(&plan, "api");
        assert_eq!(api.networks, vec!["shared", "shop_backend"]);
        assert_eq!(api.mounts[2].source, MountSource::Bind("./conf".to_string()));

        let owned: Vec<String> = plan.owned_resources().iter().map(|r| r.name.clone()).collect();
        assert!(!owned.contains(&"shared".to_string()));
        assert!(!owned.contains(&"uploads".to_string()));
        assert!(owned.contains(&"shop_cache".to_string()));
    }

    #[test]
    fn test_invalid_port_after_resolution() {
        let yaml = "services:\n  web:\n    image: nginx\n    ports: [\"${P:-http}:80\"]\n";
        let err = build(yaml, &Variables::new()).unwrap_err();
        assert!(matches!(err, StackError::MalformedManifest(_)));
    }

    #[test]
    fn test_restart_policy_resolution() {
        let yaml = "services:\n  web:\n    image: nginx\n    restart: ${RESTART:-unless-stopped}\n";
        let plan = build(yaml, &Variables::new()).unwrap();
        assert_eq!(service(&plan, "web").restart, RestartPolicy::UnlessStopped);

        let err = build(yaml, &vars(&[("RESTART", "sometimes")])).unwrap_err();
        assert!(err.to_string().contains("unknown restart policy"));
    }
}
