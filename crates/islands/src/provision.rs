use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::atomic_io::write_bytes_atomic;
use crate::template::{TemplateName, TEMPLATE_DIR};
use crate::world::NamespaceSettings;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("could not make template folder {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("namespace {namespace} is provided by addon {addon}, which has no registered resources")]
    UnknownAddon { namespace: String, addon: String },
    #[error("failed to read bundled resource {resource} from {provider}: {source}")]
    ReadBundled {
        provider: String,
        resource: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write template {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Supplies bundled default resources: the base system, or an extension
/// that owns a namespace.
pub trait ResourceProvider {
    fn id(&self) -> &str;

    /// Bytes of the bundled resource at `resource` (a `/`-separated path
    /// relative to the bundle root), or `None` if the bundle lacks it.
    fn bundled(&self, resource: &str) -> Result<Option<Vec<u8>>, ProvisionError>;
}

/// Resources bundled as plain files under a directory.
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    id: String,
    root: PathBuf,
}

impl DirectoryResources {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
        }
    }
}

impl ResourceProvider for DirectoryResources {
    fn id(&self) -> &str {
        &self.id
    }

    fn bundled(&self, resource: &str) -> Result<Option<Vec<u8>>, ProvisionError> {
        let path = resource
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment));
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ProvisionError::ReadBundled {
                provider: self.id.clone(),
                resource: resource.to_string(),
                source,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    AlreadyPresent,
    Copied { bytes: usize },
    /// Neither the file nor a bundled default exists.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedTemplate {
    pub path: PathBuf,
    pub outcome: ProvisionOutcome,
}

/// Copy-if-absent materialization of template files into a namespace's
/// data folder.
pub struct Provisioner {
    base: Box<dyn ResourceProvider>,
    addons: HashMap<String, Box<dyn ResourceProvider>>,
}

impl Provisioner {
    pub fn new(base: Box<dyn ResourceProvider>) -> Self {
        Self {
            base,
            addons: HashMap::new(),
        }
    }

    pub fn register_addon(&mut self, provider: Box<dyn ResourceProvider>) {
        self.addons.insert(provider.id().to_string(), provider);
    }

    pub fn template_path(settings: &NamespaceSettings, name: TemplateName) -> PathBuf {
        settings
            .data_folder
            .join(TEMPLATE_DIR)
            .join(name.file_name())
    }

    pub fn ensure_provisioned(
        &self,
        settings: &NamespaceSettings,
        name: TemplateName,
    ) -> Result<ProvisionedTemplate, ProvisionError> {
        let dir = settings.data_folder.join(TEMPLATE_DIR);
        fs::create_dir_all(&dir).map_err(|source| ProvisionError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let path = Self::template_path(settings, name);
        if path.is_file() {
            return Ok(ProvisionedTemplate {
                path,
                outcome: ProvisionOutcome::AlreadyPresent,
            });
        }

        let provider = self.provider_for(settings)?;
        let Some(bytes) = provider.bundled(&name.bundled_resource())? else {
            debug!(
                namespace = %settings.name,
                provider = provider.id(),
                template = %name,
                "template_resource_not_bundled"
            );
            return Ok(ProvisionedTemplate {
                path,
                outcome: ProvisionOutcome::Unavailable,
            });
        };

        write_bytes_atomic(&path, &bytes).map_err(|source| ProvisionError::Write {
            path: path.clone(),
            source,
        })?;
        info!(
            namespace = %settings.name,
            provider = provider.id(),
            template = %name,
            path = %path.display(),
            bytes = bytes.len(),
            "template_provisioned"
        );
        Ok(ProvisionedTemplate {
            path,
            outcome: ProvisionOutcome::Copied { bytes: bytes.len() },
        })
    }

    fn provider_for(
        &self,
        settings: &NamespaceSettings,
    ) -> Result<&dyn ResourceProvider, ProvisionError> {
        match &settings.addon {
            Some(addon) => self
                .addons
                .get(addon)
                .map(|provider| provider.as_ref())
                .ok_or_else(|| ProvisionError::UnknownAddon {
                    namespace: settings.name.clone(),
                    addon: addon.clone(),
                }),
            None => Ok(self.base.as_ref()),
        }
    }
}
