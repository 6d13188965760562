use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::provision::{ProvisionError, ProvisionOutcome, Provisioner};
use crate::template::{parse_template, Template, TemplateName, TemplateParseError};
use crate::world::{Dimension, WorldId, WorldRegistry};

#[derive(Debug, Error)]
pub enum TemplateLoadError {
    #[error("world {world} is not owned by any registered namespace")]
    UnknownWorld { world: WorldId },
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("template file {path} does not exist and no bundled default is available")]
    MissingResource { path: PathBuf },
    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Malformed(#[from] TemplateParseError),
}

#[derive(Debug)]
pub struct TemplateLoadAttempt {
    pub dimension: Dimension,
    pub world: WorldId,
    pub name: TemplateName,
    pub result: Result<String, TemplateLoadError>,
}

/// Outcome of loading every template a namespace's world set needs.
#[derive(Debug, Default)]
pub struct WorldSetReport {
    pub attempts: Vec<TemplateLoadAttempt>,
}

impl WorldSetReport {
    pub fn loaded_count(&self) -> usize {
        self.attempts
            .iter()
            .filter(|attempt| attempt.result.is_ok())
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.attempts.len() - self.loaded_count()
    }
}

/// Loaded templates, at most one per world.
pub struct TemplateStore {
    provisioner: Provisioner,
    templates: HashMap<WorldId, Arc<Template>>,
}

impl TemplateStore {
    pub fn new(provisioner: Provisioner) -> Self {
        Self {
            provisioner,
            templates: HashMap::new(),
        }
    }

    pub fn get(&self, world: &WorldId) -> Option<&Arc<Template>> {
        self.templates.get(world)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Ensures the template file for `world` exists, copying the bundled
    /// default when it is absent.
    pub fn ensure_provisioned(
        &self,
        worlds: &WorldRegistry,
        world: &WorldId,
        name: TemplateName,
    ) -> Result<PathBuf, TemplateLoadError> {
        let settings = worlds
            .namespace_of(world)
            .ok_or_else(|| TemplateLoadError::UnknownWorld {
                world: world.clone(),
            })?;
        let provisioned = self.provisioner.ensure_provisioned(settings, name)?;
        if provisioned.outcome == ProvisionOutcome::Unavailable {
            return Err(TemplateLoadError::MissingResource {
                path: provisioned.path,
            });
        }
        Ok(provisioned.path)
    }

    /// Provisions, parses and installs the template for `world`, replacing
    /// any previous one. On failure the previous entry stays in place.
    pub fn load(
        &mut self,
        worlds: &WorldRegistry,
        world: &WorldId,
        name: TemplateName,
    ) -> Result<&Arc<Template>, TemplateLoadError> {
        let path = self.ensure_provisioned(worlds, world, name)?;
        let raw = fs::read_to_string(&path).map_err(|source| TemplateLoadError::Read {
            path: path.clone(),
            source,
        })?;
        let template = Arc::new(parse_template(world, name, &path, &raw)?);
        self.templates.insert(world.clone(), template);
        Ok(&self.templates[world])
    }

    /// Loads the overworld template for the namespace owning `world` and,
    /// where the namespace pastes islands there, the nether and end
    /// templates. Every load is attempted; failures are logged and reported.
    pub fn load_world_set(&mut self, worlds: &WorldRegistry, world: &WorldId) -> WorldSetReport {
        let mut report = WorldSetReport::default();
        let Some(settings) = worlds.namespace_of(world) else {
            error!(world = %world, "template_world_set_unknown_world");
            report.attempts.push(TemplateLoadAttempt {
                dimension: Dimension::Overworld,
                world: world.clone(),
                name: TemplateName::Island,
                result: Err(TemplateLoadError::UnknownWorld {
                    world: world.clone(),
                }),
            });
            return report;
        };
        let friendly_name = settings.friendly_name.clone();
        let targets = Dimension::ALL
            .into_iter()
            .filter(|dimension| settings.has_island_template(*dimension))
            .map(|dimension| (dimension, settings.world_for(dimension)))
            .collect::<Vec<_>>();

        for (dimension, target_world) in targets {
            let name = TemplateName::for_dimension(dimension);
            let result = self
                .load(worlds, &target_world, name)
                .map(|template| template.fingerprint().to_string());
            match &result {
                Ok(fingerprint) => info!(
                    namespace = %friendly_name,
                    world = %target_world,
                    template = %name,
                    fingerprint = %fingerprint,
                    "template_loaded"
                ),
                Err(load_error) => error!(
                    namespace = %friendly_name,
                    world = %target_world,
                    template = %name,
                    error = %load_error,
                    "template_load_failed"
                ),
            }
            report.attempts.push(TemplateLoadAttempt {
                dimension,
                world: target_world,
                name,
                result,
            });
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::provision::DirectoryResources;
    use crate::template::{TemplateErrorCode, TEMPLATE_DIR};
    use crate::world::test_namespace;

    const ISLAND_XML: &str =
        r#"<Template name="island"><Block x="0" y="0" z="0" type="bedrock"/></Template>"#;
    const NETHER_XML: &str =
        r#"<Template name="nether-island"><Block x="0" y="0" z="0" type="netherrack"/></Template>"#;

    fn write_bundle(root: &Path, name: TemplateName, content: &str) {
        let path = root.join(TEMPLATE_DIR).join(name.file_name());
        fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        fs::write(path, content).expect("write");
    }

    fn setup(temp: &TempDir) -> (TemplateStore, WorldRegistry) {
        let bundle = temp.path().join("bundle");
        write_bundle(&bundle, TemplateName::Island, ISLAND_XML);
        write_bundle(&bundle, TemplateName::NetherIsland, NETHER_XML);
        let store = TemplateStore::new(Provisioner::new(Box::new(DirectoryResources::new(
            "base", bundle,
        ))));
        let mut worlds = WorldRegistry::new();
        worlds
            .register(test_namespace("sky", temp.path().join("data")))
            .expect("register");
        (store, worlds)
    }

    #[test]
    fn get_is_none_before_any_load() {
        let temp = TempDir::new().expect("temp");
        let (store, _) = setup(&temp);
        assert!(store.get(&WorldId::new("sky_world")).is_none());
    }

    #[test]
    fn load_installs_template_for_world() {
        let temp = TempDir::new().expect("temp");
        let (mut store, worlds) = setup(&temp);
        let world = WorldId::new("sky_world");

        store
            .load(&worlds, &world, TemplateName::Island)
            .expect("load");
        let template = store.get(&world).expect("template");
        assert_eq!(template.name(), TemplateName::Island);
        assert_eq!(template.blocks()[0].kind, "bedrock");
    }

    #[test]
    fn reloading_replaces_the_entry() {
        let temp = TempDir::new().expect("temp");
        let (mut store, worlds) = setup(&temp);

        let first = store.load_world_set(&worlds, &WorldId::new("sky_world"));
        let first_count = store.len();
        let world = WorldId::new("sky_world");
        let path = temp
            .path()
            .join("data")
            .join(TEMPLATE_DIR)
            .join("island.schem");
        fs::write(
            &path,
            r#"<Template><Block x="0" y="0" z="0" type="sand"/><Block x="0" y="1" z="0" type="sand"/></Template>"#,
        )
        .expect("edit");
        let second = store.load_world_set(&worlds, &world);

        assert_eq!(first.loaded_count(), second.loaded_count());
        assert_eq!(store.len(), first_count);
        assert_eq!(store.get(&world).expect("template").blocks().len(), 2);
    }

    #[test]
    fn failed_reload_keeps_previous_template() {
        let temp = TempDir::new().expect("temp");
        let (mut store, worlds) = setup(&temp);
        let world = WorldId::new("sky_world");
        store
            .load(&worlds, &world, TemplateName::Island)
            .expect("load");
        let fingerprint = store.get(&world).expect("template").fingerprint().to_string();

        let path = temp
            .path()
            .join("data")
            .join(TEMPLATE_DIR)
            .join("island.schem");
        fs::write(&path, "<Template>").expect("corrupt");
        let error = store
            .load(&worlds, &world, TemplateName::Island)
            .expect_err("malformed");

        let TemplateLoadError::Malformed(parse_error) = error else {
            panic!("expected malformed template error");
        };
        assert_eq!(parse_error.code, TemplateErrorCode::XmlMalformed);
        assert_eq!(store.get(&world).expect("still cached").fingerprint(), fingerprint);
    }

    #[test]
    fn world_set_loads_only_dimensions_with_island_templates() {
        let temp = TempDir::new().expect("temp");
        let (mut store, worlds) = setup(&temp);

        let report = store.load_world_set(&worlds, &WorldId::new("sky_world"));

        // test namespace: nether islands on, end generated but not islands
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.loaded_count(), 2);
        assert!(store.get(&WorldId::new("sky_world_nether")).is_some());
        assert!(store.get(&WorldId::new("sky_world_the_end")).is_none());
    }

    #[test]
    fn world_set_attempts_every_dimension_after_a_failure() {
        let temp = TempDir::new().expect("temp");
        let bundle = temp.path().join("bundle");
        write_bundle(&bundle, TemplateName::NetherIsland, NETHER_XML);
        write_bundle(&bundle, TemplateName::EndIsland, "not xml at all <");
        let mut store = TemplateStore::new(Provisioner::new(Box::new(DirectoryResources::new(
            "base", bundle,
        ))));
        let mut worlds = WorldRegistry::new();
        let mut settings = test_namespace("sky", temp.path().join("data"));
        settings.end.islands = true;
        worlds.register(settings).expect("register");

        let report = store.load_world_set(&worlds, &WorldId::new("sky_world"));

        assert_eq!(report.attempts.len(), 3);
        assert!(matches!(
            report.attempts[0].result,
            Err(TemplateLoadError::MissingResource { .. })
        ));
        assert!(report.attempts[1].result.is_ok());
        assert!(matches!(
            report.attempts[2].result,
            Err(TemplateLoadError::Malformed(_))
        ));
        assert_eq!(report.failed_count(), 2);
        assert!(store.get(&WorldId::new("sky_world")).is_none());
        assert!(store.get(&WorldId::new("sky_world_nether")).is_some());
    }

    #[test]
    fn unknown_world_is_reported() {
        let temp = TempDir::new().expect("temp");
        let (mut store, worlds) = setup(&temp);
        let report = store.load_world_set(&worlds, &WorldId::new("lobby"));
        assert_eq!(report.failed_count(), 1);
        assert!(matches!(
            report.attempts[0].result,
            Err(TemplateLoadError::UnknownWorld { .. })
        ));
    }
}
